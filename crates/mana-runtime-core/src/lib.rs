//! # Mana Runtime Core
//!
//! Pure primitives for the mana runtime: receipts, access keys, and their
//! canonical wire encoding.
//!
//! This crate contains no I/O, no storage, no scheduling. It is pure
//! computation over the settlement data model.
//!
//! ## Key Types
//!
//! - [`ReceiptTransaction`] - A unit of settlement routed exactly once
//! - [`ReceiptBody`] - Exactly one of AsyncCall, CallbackResult, Refund, ManaAccounting
//! - [`AccessKey`] - A scoped credential over an account's balance
//! - [`ReceiptId`] - Content-addressed identifier (Blake3 hash)
//! - [`CallbackId`] - Correlation token for deferred results
//!
//! ## Canonicalization
//!
//! All messages are encoded using deterministic CBOR with integer field
//! numbers. See the [`canonical`] module.

pub mod access_key;
pub mod canonical;
pub mod error;
pub mod receipt;
pub mod types;
pub mod validation;

pub use access_key::AccessKey;
pub use canonical::{access_key_bytes, canonical_bytes, decode_access_key, decode_receipt};
pub use error::{CoreError, ValidationError};
pub use receipt::{
    AccountingInfo, AsyncCall, CallBuilder, CallbackInfo, CallbackResult, ManaAccounting,
    ReceiptBody, ReceiptKind, ReceiptTransaction,
};
pub use types::{
    derive_nonce, AccountId, Balance, CallbackId, Mana, Nonce, ReceiptId, CALLBACK_SLOT,
    FIRST_CALL_SLOT, MAX_ACCOUNT_ID_LEN, REFUND_SLOT, SETTLEMENT_SLOT,
};
pub use validation::validate_receipt;
