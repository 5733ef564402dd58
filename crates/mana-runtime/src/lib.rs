//! # Mana Runtime
//!
//! The unified API for receipt settlement: scoped access keys, metered
//! asynchronous calls, deferred callbacks and refunds.
//!
//! ## Overview
//!
//! The runtime processes receipts exactly once:
//!
//! - **AsyncCall**: authorized against the originator's access key, funded,
//!   executed under a mana budget, and settled
//! - **CallbackResult**: fills one slot of a pending callback and resumes the
//!   waiting contract once every slot is filled
//! - **Refund**: returns unspent balance
//! - **ManaAccounting**: reconciles a settled call against its granted budget
//!
//! ## Key Concepts
//!
//! - **Receipt**: Immutable. Identified by `(originator, nonce)`.
//! - **Grant**: Budget reserved when a call is funded, consumed when it settles.
//! - **Lane**: Receipts touching the same account are processed serially.
//! - **Queue**: Receipts emitted by processing are persisted by the same
//!   commit and drained later.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mana_runtime::{ContractRegistry, Runtime, RuntimeConfig};
//! use mana_runtime::core::CallBuilder;
//! use mana_runtime::store::SqliteStore;
//!
//! async fn example() {
//!     // Open storage
//!     let store = SqliteStore::open("runtime.db").unwrap();
//!
//!     // Create the runtime
//!     let runtime = Runtime::new(store, ContractRegistry::new(), RuntimeConfig::default())
//!         .unwrap();
//!     runtime.create_account("alice", 1_000).await.unwrap();
//!
//!     // Submit a call, then drain what it emitted
//!     let tx = CallBuilder::new("alice", "counter", 1)
//!         .method("increment")
//!         .mana(100)
//!         .build();
//!     let outcome = runtime.submit(tx).await.unwrap();
//!     let report = runtime.run_until_idle().await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `mana_runtime::core` - Receipts, access keys, canonical encoding
//! - `mana_runtime::store` - Storage abstraction and SQLite
//! - `mana_runtime::auth` - Access key authorization

pub mod callbacks;
pub mod config;
pub mod error;
pub mod executor;
pub mod lanes;
pub mod ledger;
pub mod refunds;
pub mod router;
pub mod runtime;
pub mod staging;
pub mod worker;

// Re-export component crates
pub use mana_runtime_auth as auth;
pub use mana_runtime_core as core;
pub use mana_runtime_store as store;

// Re-export main types for convenience
pub use callbacks::{CallbackResolver, Resolution};
pub use config::{ExecutionConfig, NodeConfig, RuntimeConfig, WorkerConfig};
pub use error::{Result, RuntimeError, Severity};
pub use executor::{
    AsyncCallExecutor, CallContext, Contract, ContractError, ContractRegistry, ExecutionOutcome,
    HostResult,
};
pub use lanes::{AccountGuard, AccountGuards};
pub use ledger::{ManaLedger, Settlement};
pub use refunds::RefundIssuer;
pub use router::{DropReason, ReceiptRouter, RoutingOutcome};
pub use runtime::{RunReport, Runtime};
pub use worker::WorkerHandle;

// Re-export commonly used core types
pub use mana_runtime_core::{
    AccessKey, AccountId, Balance, CallBuilder, CallbackId, Mana, Nonce, ReceiptBody, ReceiptId,
    ReceiptKind, ReceiptTransaction,
};
