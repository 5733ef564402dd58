//! # Mana Runtime Testkit
//!
//! Testing utilities for the mana runtime.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known encodings for cross-platform verification
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: A runtime with sample contracts and a nonce counter
//! - **Contracts**: A metered counter and a fan-out/fan-in aggregator
//!
//! ## Golden Vectors
//!
//! Golden vectors pin the canonical wire encoding:
//!
//! ```rust
//! use mana_runtime_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, hex) in verify_all_vectors() {
//!     assert!(matches, "{name}: {hex}");
//! }
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use mana_runtime_testkit::generators::receipt;
//!
//! proptest! {
//!     #[test]
//!     fn receipt_id_is_deterministic(r in receipt()) {
//!         prop_assert_eq!(r.compute_id(), r.clone().compute_id());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Quickly set up test scenarios:
//!
//! ```rust,ignore
//! use mana_runtime_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! fixture.fund(&[("alice", 1_000)]).await?;
//! fixture.call("alice", "counter", "increment", vec![], 0, 100).await?;
//! fixture.settle().await?;
//! ```

pub mod contracts;
pub mod fixtures;
pub mod generators;
pub mod vectors;
