//! Error types for the runtime.

use mana_runtime_core::{AccountId, Balance, CallbackId, Mana, Nonce, ValidationError};
use mana_runtime_store::StoreError;
use thiserror::Error;

/// How the processing pipeline treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Pre-execution validation failure. Nothing was mutated and the
    /// receipt's nonce stays unconsumed.
    Rejected,
    /// Expected in steady state (stale replay, reordering). The receipt
    /// is dropped without mutation or escalation.
    Benign,
    /// Internal consistency violation or infrastructure failure. Surfaced
    /// for operator investigation.
    Fatal,
}

/// Errors that can occur during runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Structurally invalid receipt or key.
    #[error("malformed receipt: {0}")]
    MalformedReceipt(String),

    /// The originator's access key does not permit the call.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The payer cannot fund the request.
    #[error("insufficient balance on {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        account: AccountId,
        requested: Balance,
        available: Balance,
    },

    /// A settlement reported more mana than was granted.
    #[error("mana overrun for {originator}/{nonce}: granted {granted}, reported {reported}")]
    ManaOverrun {
        originator: AccountId,
        nonce: Nonce,
        granted: Mana,
        reported: u128,
    },

    /// No pending registration matches a callback result.
    #[error("unknown callback: {0}")]
    UnknownCallback(CallbackId),

    /// The result slot of a pending callback is already filled.
    #[error("callback {id} slot {index} already filled")]
    CallbackSlotTaken { id: CallbackId, index: u32 },

    /// `(originator, nonce)` was already processed.
    #[error("duplicate nonce {nonce} from {originator}")]
    DuplicateNonce { originator: AccountId, nonce: Nonce },

    /// `(originator, nonce)` is reserved by a grant for a different receipt,
    /// or for one only the runtime may deliver.
    #[error("receipt {originator}/{nonce} does not match the grant reserved for it")]
    GrantMismatch { originator: AccountId, nonce: Nonce },

    /// The account already exists.
    #[error("account already exists: {0}")]
    AccountExists(AccountId),

    /// The account does not exist.
    #[error("unknown account: {0}")]
    UnknownAccount(AccountId),

    /// Crediting an account would overflow its balance.
    #[error("balance overflow on {0}")]
    BalanceOverflow(AccountId),

    /// The contract host failed outside of contract control.
    #[error("host error: {0}")]
    Host(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RuntimeError {
    /// Classify the error for the processing pipeline.
    pub fn severity(&self) -> Severity {
        match self {
            Self::MalformedReceipt(_)
            | Self::Unauthorized(_)
            | Self::InsufficientBalance { .. }
            | Self::AccountExists(_)
            | Self::UnknownAccount(_)
            | Self::GrantMismatch { .. }
            | Self::Config(_) => Severity::Rejected,
            Self::UnknownCallback(_)
            | Self::CallbackSlotTaken { .. }
            | Self::DuplicateNonce { .. } => Severity::Benign,
            Self::ManaOverrun { .. }
            | Self::BalanceOverflow(_)
            | Self::Host(_)
            | Self::Store(_) => Severity::Fatal,
        }
    }
}

impl From<ValidationError> for RuntimeError {
    fn from(err: ValidationError) -> Self {
        Self::MalformedReceipt(err.to_string())
    }
}

impl From<mana_runtime_core::CoreError> for RuntimeError {
    fn from(err: mana_runtime_core::CoreError) -> Self {
        Self::MalformedReceipt(err.to_string())
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_policy() {
        let alice = AccountId::new("alice");
        assert_eq!(
            RuntimeError::Unauthorized("contract".into()).severity(),
            Severity::Rejected
        );
        assert_eq!(
            RuntimeError::DuplicateNonce {
                originator: alice.clone(),
                nonce: 1
            }
            .severity(),
            Severity::Benign
        );
        assert_eq!(
            RuntimeError::UnknownCallback(CallbackId::from_bytes([0; 32])).severity(),
            Severity::Benign
        );
        assert_eq!(
            RuntimeError::GrantMismatch {
                originator: alice.clone(),
                nonce: 1
            }
            .severity(),
            Severity::Rejected
        );
        // A credit that cannot be applied loses funds unless surfaced
        assert_eq!(
            RuntimeError::BalanceOverflow(alice.clone()).severity(),
            Severity::Fatal
        );
        assert_eq!(
            RuntimeError::ManaOverrun {
                originator: alice,
                nonce: 1,
                granted: 10,
                reported: 11
            }
            .severity(),
            Severity::Fatal
        );
    }
}
