//! Error types for the mana runtime core.

use thiserror::Error;

use crate::types::AccountId;

/// Core errors that can occur while building or decoding wire messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("malformed receipt: {0}")]
    MalformedReceipt(String),

    #[error("malformed access key: {0}")]
    MalformedAccessKey(String),

    #[error("method restriction requires a contract restriction")]
    MethodWithoutContract,

    #[error("non-canonical encoding")]
    NonCanonical,

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Structural validation errors for receipts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid account id: {0:?}")]
    InvalidAccountId(AccountId),

    #[error("accounting originator {accounting} does not match receipt originator {originator}")]
    OriginatorMismatch {
        originator: AccountId,
        accounting: AccountId,
    },

    #[error("callback receiver {callback} does not match receipt receiver {receiver}")]
    CallbackReceiverMismatch {
        receiver: AccountId,
        callback: AccountId,
    },

    #[error("accounting receipt must be addressed to {expected}, got {got}")]
    AccountingReceiverMismatch { expected: AccountId, got: AccountId },

    #[error("empty method name")]
    EmptyMethodName,

    #[error("zero-amount refund")]
    ZeroRefund,

    #[error("amount plus mana overflows")]
    BudgetOverflow,

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        ValidationError::StructuralError(e.to_string())
    }
}
