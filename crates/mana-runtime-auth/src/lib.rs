//! # Mana Runtime Auth
//!
//! Capability checks for limited-access account keys.
//!
//! ## Overview
//!
//! An account may carry an [`AccessKey`](mana_runtime_core::AccessKey) that
//! scopes the calls it originates. Before a user-submitted call executes,
//! the router asks the [`AccessKeyAuthorizer`] whether the key permits it
//! and asks [`funding_source`] which account pays.
//!
//! ## Key Concepts
//!
//! - **Contract restriction**: the key only reaches one contract
//! - **Method restriction**: the key only reaches one method of that contract
//! - **Allowance**: the most a single call may draw through the key
//! - **Delegation**: a `balance_owner` funds usage instead of the key's account
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mana_runtime_auth::{AccessKeyAuthorizer, AccessRequest, Verdict};
//! use mana_runtime_core::{AccessKey, AccountId};
//!
//! let key = AccessKey::new(100).contract("counter");
//! let counter = AccountId::new("counter");
//! let request = AccessRequest::new(&counter, "increment", 60);
//!
//! assert_eq!(AccessKeyAuthorizer.authorize(&key, &request, None), Verdict::Authorized);
//! ```
//!
//! Authorization never mutates anything. Debiting the payer is the
//! caller's job and happens in the same atomic batch as execution.

pub mod authorizer;
pub mod funding;

pub use authorizer::{AccessKeyAuthorizer, AccessRequest, DenyReason, Verdict};
pub use funding::{funding_source, FundingSource};
