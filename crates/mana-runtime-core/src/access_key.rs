//! AccessKey: a scoped credential over an account's balance.
//!
//! A key with no restrictions grants full access. A contract restriction
//! limits calls to one contract, and a method restriction further limits
//! calls to one method of that contract.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{AccountId, Balance};

/// A limited-access credential.
///
/// Optional fields keep absence distinct from an empty value: a key with
/// `contract_id = Some("")` restricts calls to a contract named `""`,
/// which is not the same as an unrestricted key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessKey {
    /// Allowance usable for fees and attached amounts.
    pub amount: Balance,

    /// Account that actually funds usage. `None` means the key's own account.
    pub balance_owner: Option<AccountId>,

    /// Restricts calls to one contract. `None` means any contract.
    pub contract_id: Option<AccountId>,

    /// Restricts calls to one method. `None` means any method.
    pub method_name: Option<String>,
}

impl AccessKey {
    /// Create an unrestricted key with the given allowance.
    pub fn new(amount: Balance) -> Self {
        Self {
            amount,
            balance_owner: None,
            contract_id: None,
            method_name: None,
        }
    }

    /// Restrict the key to one contract.
    pub fn contract(mut self, contract_id: impl Into<AccountId>) -> Self {
        self.contract_id = Some(contract_id.into());
        self
    }

    /// Restrict the key to one method.
    pub fn method(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = Some(method_name.into());
        self
    }

    /// Delegate funding to another account.
    pub fn balance_owner(mut self, owner: impl Into<AccountId>) -> Self {
        self.balance_owner = Some(owner.into());
        self
    }

    /// Whether usage is funded by an account other than the key's own.
    pub fn is_delegated(&self) -> bool {
        self.balance_owner.is_some()
    }

    /// Check the key is well-formed.
    ///
    /// A method restriction on a key without a contract restriction is
    /// rejected rather than ignored.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.method_name.is_some() && self.contract_id.is_none() {
            return Err(CoreError::MethodWithoutContract);
        }
        Ok(())
    }
}
