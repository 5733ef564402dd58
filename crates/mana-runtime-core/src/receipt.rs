//! Receipts: the units of settlement routed between accounts.
//!
//! A receipt is immutable. It is processed exactly once and may produce
//! further receipts, forming a DAG rooted at a user transaction.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::canonical_bytes;
use crate::types::{AccountId, Balance, CallbackId, Mana, Nonce, ReceiptId};

/// The kind of receipt body, used for logging and archival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReceiptKind {
    /// A new asynchronous call.
    AsyncCall = 1,
    /// The result of a deferred call.
    CallbackResult = 2,
    /// Return of unspent balance.
    Refund = 3,
    /// Settlement of a call's mana budget.
    ManaAccounting = 4,
}

impl ReceiptKind {
    /// Convert to u8 for storage.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::AsyncCall),
            2 => Some(Self::CallbackResult),
            3 => Some(Self::Refund),
            4 => Some(Self::ManaAccounting),
            _ => None,
        }
    }

    /// Receipts of this kind may only be produced by the runtime.
    pub fn is_runtime_generated(self) -> bool {
        !matches!(self, Self::AsyncCall)
    }
}

/// Who initiated and pays for a charge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountingInfo {
    /// Account that initiated and pays.
    pub originator: AccountId,
    /// Contract context of the charge.
    pub contract_id: Option<AccountId>,
}

/// Where a deferred result is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackInfo {
    /// Correlation token of the pending registration.
    pub id: CallbackId,
    /// Slot of this result within a multi-result callback.
    pub result_index: u32,
    /// Account to resume.
    pub receiver: AccountId,
}

/// A call of `method_name` on the receiver's contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AsyncCall {
    /// Balance transferred to the receiver on success.
    pub amount: Balance,
    /// Prepaid computation budget.
    pub mana: Mana,
    pub method_name: String,
    pub args: Bytes,
    /// Absent for fire-and-forget calls.
    pub callback: Option<CallbackInfo>,
    pub accounting_info: AccountingInfo,
}

impl AsyncCall {
    /// Total balance that must be reserved to run this call.
    pub fn budget(&self) -> Option<Balance> {
        self.amount.checked_add(self.mana)
    }
}

/// The eventual result of a deferred call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackResult {
    pub info: CallbackInfo,
    /// Absent when the call failed or returned no value.
    pub result: Option<Bytes>,
}

/// Settlement of a call's mana budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManaAccounting {
    pub accounting_info: AccountingInfo,
    /// Unused budget to return.
    pub mana_refund: Mana,
    /// Budget actually consumed.
    pub gas_used: Mana,
}

impl ManaAccounting {
    /// `mana_refund + gas_used`, or `None` on overflow.
    pub fn total(&self) -> Option<Mana> {
        self.mana_refund.checked_add(self.gas_used)
    }
}

/// A receipt body: exactly one of the four message families.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReceiptBody {
    AsyncCall(AsyncCall),
    CallbackResult(CallbackResult),
    Refund(Balance),
    ManaAccounting(ManaAccounting),
}

impl ReceiptBody {
    /// The kind discriminator of this body.
    pub fn kind(&self) -> ReceiptKind {
        match self {
            Self::AsyncCall(_) => ReceiptKind::AsyncCall,
            Self::CallbackResult(_) => ReceiptKind::CallbackResult,
            Self::Refund(_) => ReceiptKind::Refund,
            Self::ManaAccounting(_) => ReceiptKind::ManaAccounting,
        }
    }
}

/// A complete receipt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptTransaction {
    pub originator: AccountId,
    pub receiver: AccountId,
    /// Unique per originator.
    pub nonce: Nonce,
    pub body: ReceiptBody,
}

impl ReceiptTransaction {
    /// Create a receipt.
    pub fn new(originator: AccountId, receiver: AccountId, nonce: Nonce, body: ReceiptBody) -> Self {
        Self {
            originator,
            receiver,
            nonce,
            body,
        }
    }

    /// Compute the receipt ID (Blake3 hash of canonical bytes).
    pub fn compute_id(&self) -> ReceiptId {
        ReceiptId::hash(&canonical_bytes(self))
    }

    /// The kind of this receipt's body.
    pub fn kind(&self) -> ReceiptKind {
        self.body.kind()
    }
}

/// Builder for AsyncCall receipts.
///
/// Accounting defaults to the originator paying, in the receiver's
/// contract context.
#[derive(Debug, Clone)]
pub struct CallBuilder {
    originator: AccountId,
    receiver: AccountId,
    nonce: Nonce,
    amount: Balance,
    mana: Mana,
    method_name: String,
    args: Bytes,
    callback: Option<CallbackInfo>,
}

impl CallBuilder {
    /// Create a new builder.
    pub fn new(originator: impl Into<AccountId>, receiver: impl Into<AccountId>, nonce: Nonce) -> Self {
        Self {
            originator: originator.into(),
            receiver: receiver.into(),
            nonce,
            amount: 0,
            mana: 0,
            method_name: String::new(),
            args: Bytes::new(),
            callback: None,
        }
    }

    /// Set the method name.
    pub fn method(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = method_name.into();
        self
    }

    /// Set the call arguments.
    pub fn args(mut self, args: impl Into<Bytes>) -> Self {
        self.args = args.into();
        self
    }

    /// Set the attached amount.
    pub fn amount(mut self, amount: Balance) -> Self {
        self.amount = amount;
        self
    }

    /// Set the mana budget.
    pub fn mana(mut self, mana: Mana) -> Self {
        self.mana = mana;
        self
    }

    /// Deliver the result to a pending callback.
    pub fn callback(mut self, info: CallbackInfo) -> Self {
        self.callback = Some(info);
        self
    }

    /// Build the receipt.
    pub fn build(self) -> ReceiptTransaction {
        let accounting_info = AccountingInfo {
            originator: self.originator.clone(),
            contract_id: Some(self.receiver.clone()),
        };
        ReceiptTransaction {
            originator: self.originator,
            receiver: self.receiver,
            nonce: self.nonce,
            body: ReceiptBody::AsyncCall(AsyncCall {
                amount: self.amount,
                mana: self.mana,
                method_name: self.method_name,
                args: self.args,
                callback: self.callback,
                accounting_info,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ReceiptKind::AsyncCall,
            ReceiptKind::CallbackResult,
            ReceiptKind::Refund,
            ReceiptKind::ManaAccounting,
        ] {
            assert_eq!(ReceiptKind::from_u8(kind.to_u8()), Some(kind));
        }
        assert_eq!(ReceiptKind::from_u8(0), None);
        assert!(!ReceiptKind::AsyncCall.is_runtime_generated());
        assert!(ReceiptKind::Refund.is_runtime_generated());
    }

    #[test]
    fn test_call_builder() {
        let receipt = CallBuilder::new("alice", "counter", 7)
            .method("increment")
            .args(b"1".to_vec())
            .amount(5)
            .mana(100)
            .build();

        assert_eq!(receipt.kind(), ReceiptKind::AsyncCall);
        let ReceiptBody::AsyncCall(call) = &receipt.body else {
            panic!("expected an async call");
        };
        assert_eq!(call.accounting_info.originator, AccountId::new("alice"));
        assert_eq!(call.accounting_info.contract_id, Some(AccountId::new("counter")));
        assert_eq!(call.budget(), Some(105));
    }

    #[test]
    fn test_receipt_id_depends_on_nonce() {
        let a = CallBuilder::new("alice", "counter", 1).method("m").build();
        let b = CallBuilder::new("alice", "counter", 2).method("m").build();
        assert_eq!(a.compute_id(), a.clone().compute_id());
        assert_ne!(a.compute_id(), b.compute_id());
    }

    #[test]
    fn test_budget_overflow() {
        let call = AsyncCall {
            amount: u64::MAX,
            mana: 1,
            method_name: "m".into(),
            args: Bytes::new(),
            callback: None,
            accounting_info: AccountingInfo {
                originator: AccountId::new("a"),
                contract_id: None,
            },
        };
        assert_eq!(call.budget(), None);
    }
}
