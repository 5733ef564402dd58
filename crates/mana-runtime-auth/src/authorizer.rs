//! Access key authorization.
//!
//! An access key scopes what its account may originate: which contract,
//! which method, and how much of the allowance a single call may draw.
//! Authorization is a pure function of the key and the request.

use mana_runtime_core::{AccessKey, AccountId, Balance};

/// A requested action, checked against an access key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRequest<'a> {
    /// Contract the call is addressed to.
    pub contract: &'a AccountId,
    /// Method the call invokes.
    pub method: &'a str,
    /// Total balance the call draws: attached amount plus mana.
    pub amount: Balance,
}

impl<'a> AccessRequest<'a> {
    /// Create a request.
    pub fn new(contract: &'a AccountId, method: &'a str, amount: Balance) -> Self {
        Self {
            contract,
            method,
            amount,
        }
    }
}

/// Why a key does not permit a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The key is restricted to a different contract.
    ContractMismatch {
        allowed: AccountId,
        requested: AccountId,
    },
    /// The key is restricted to a different method.
    MethodMismatch { allowed: String, requested: String },
    /// The key restricts the method without restricting the contract.
    MethodWithoutContract,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContractMismatch { allowed, requested } => {
                write!(f, "key is restricted to contract {allowed}, not {requested}")
            }
            Self::MethodMismatch { allowed, requested } => {
                write!(f, "key is restricted to method {allowed}, not {requested}")
            }
            Self::MethodWithoutContract => {
                write!(f, "key restricts a method without restricting the contract")
            }
        }
    }
}

/// Authorization verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The key permits the request.
    Authorized,
    /// The key does not permit the request.
    Unauthorized(DenyReason),
    /// The key permits the action but cannot fund it.
    InsufficientBalance { requested: Balance, available: Balance },
}

impl Verdict {
    /// Whether the request may proceed.
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }
}

/// Checks requests against access keys.
///
/// Stateless and deterministic: the same key, request and delegated
/// balance always yield the same verdict. On success the caller debits
/// the payer atomically with execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessKeyAuthorizer;

impl AccessKeyAuthorizer {
    /// Authorize `request` under `key`.
    ///
    /// For a delegated key, `delegated_balance` is the current balance of
    /// the key's `balance_owner` (`None` if the owner does not exist) and
    /// replaces `key.amount` as the funding limit.
    pub fn authorize(
        &self,
        key: &AccessKey,
        request: &AccessRequest<'_>,
        delegated_balance: Option<Balance>,
    ) -> Verdict {
        if key.validate().is_err() {
            return Verdict::Unauthorized(DenyReason::MethodWithoutContract);
        }

        if let Some(allowed) = &key.contract_id {
            if allowed != request.contract {
                return Verdict::Unauthorized(DenyReason::ContractMismatch {
                    allowed: allowed.clone(),
                    requested: request.contract.clone(),
                });
            }
        }

        if let Some(allowed) = &key.method_name {
            if allowed != request.method {
                return Verdict::Unauthorized(DenyReason::MethodMismatch {
                    allowed: allowed.clone(),
                    requested: request.method.to_string(),
                });
            }
        }

        let available = if key.is_delegated() {
            delegated_balance.unwrap_or(0)
        } else {
            key.amount
        };

        if request.amount > available {
            return Verdict::InsufficientBalance {
                requested: request.amount,
                available,
            };
        }

        Verdict::Authorized
    }
}
