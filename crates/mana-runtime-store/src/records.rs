//! Records persisted by the store.
//!
//! These are the durable pieces of settlement state: account balances and
//! keys, contract storage, pending callback registrations, mana grants, the
//! archive of processed receipts, and the receipt queue.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use mana_runtime_core::{
    AccessKey, AccountId, Balance, CallbackId, Mana, Nonce, ReceiptId, ReceiptKind,
    ReceiptTransaction,
};

/// An account: a balance and an optional limited-access credential.
///
/// With no access key the account has full access to its own balance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: Balance,
    pub access_key: Option<AccessKey>,
}

impl Account {
    /// An account with full access and the given balance.
    pub fn with_balance(balance: Balance) -> Self {
        Self {
            balance,
            access_key: None,
        }
    }
}

/// Outcome of filling a result slot of a pending callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFill {
    /// The slot was empty and now holds the result.
    Filled,
    /// The slot already holds a result.
    AlreadyFilled,
    /// No such slot for this callback.
    OutOfRange,
}

/// A durable registration awaiting one or more deferred results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCallback {
    pub id: CallbackId,
    /// Account resumed once all results arrive.
    pub receiver: AccountId,
    /// Continuation invoked on the receiver's contract.
    pub continuation: String,
    /// Mana reserved for the continuation.
    pub mana: Mana,
    /// Number of result slots.
    pub expected: u32,
    /// Filled slots, keyed by result index.
    pub results: BTreeMap<u32, Option<Bytes>>,
}

impl PendingCallback {
    /// A registration with no slots yet.
    pub fn new(id: CallbackId, receiver: AccountId, continuation: String, mana: Mana) -> Self {
        Self {
            id,
            receiver,
            continuation,
            mana,
            expected: 0,
            results: BTreeMap::new(),
        }
    }

    /// Record the result for slot `index`. Slots are filled at most once.
    pub fn fill(&mut self, index: u32, result: Option<Bytes>) -> SlotFill {
        if index >= self.expected {
            return SlotFill::OutOfRange;
        }
        if self.results.contains_key(&index) {
            return SlotFill::AlreadyFilled;
        }
        self.results.insert(index, result);
        SlotFill::Filled
    }

    /// Whether every slot holds a result.
    pub fn is_complete(&self) -> bool {
        self.expected > 0 && self.results.len() == self.expected as usize
    }

    /// Results in slot order.
    pub fn ordered_results(&self) -> Vec<Option<Bytes>> {
        self.results.values().cloned().collect()
    }
}

/// Key of a grant: the `(originator, nonce)` of the receipt it funds.
pub type GrantKey = (AccountId, Nonce);

/// Which receipt body a grant funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantKind {
    /// Prefunds an AsyncCall emitted by a contract.
    Call,
    /// Holds the budget a ManaAccounting receipt settles against.
    Settlement,
}

impl GrantKind {
    /// Stable code for storage.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Call => 1,
            Self::Settlement => 2,
        }
    }

    /// Parse a stored code.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Call),
            2 => Some(Self::Settlement),
            _ => None,
        }
    }
}

/// Funding reserved for a receipt that has not been processed yet.
///
/// The grant is bound to the exact receipt it funds: only a receipt whose
/// id equals `receipt` may consume it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManaGrant {
    pub kind: GrantKind,
    /// Id of the funded receipt.
    pub receipt: ReceiptId,
    /// Account debited for the budget and credited with refunds.
    pub payer: AccountId,
    /// Attached balance reserved alongside the mana.
    pub amount: Balance,
    pub mana: Mana,
}

impl ManaGrant {
    /// Whether this grant funds `receipt_id` as a receipt of `kind`.
    pub fn funds(&self, kind: GrantKind, receipt_id: &ReceiptId) -> bool {
        self.kind == kind && &self.receipt == receipt_id
    }
}

/// Terminal state of a processed receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// An AsyncCall ran to completion or failure and was charged.
    Settled { success: bool },
    /// A CallbackResult was matched to its registration.
    Resolved,
    /// A refund was credited.
    Credited,
    /// A ManaAccounting receipt was reconciled.
    Reconciled,
}

impl ReceiptStatus {
    /// Stable code for storage.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Settled { success: true } => 1,
            Self::Settled { success: false } => 2,
            Self::Resolved => 3,
            Self::Credited => 4,
            Self::Reconciled => 5,
        }
    }

    /// Parse a stored code.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Settled { success: true }),
            2 => Some(Self::Settled { success: false }),
            3 => Some(Self::Resolved),
            4 => Some(Self::Credited),
            5 => Some(Self::Reconciled),
            _ => None,
        }
    }
}

/// A processed receipt, kept for audit and replay detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedReceipt {
    pub id: ReceiptId,
    pub originator: AccountId,
    pub nonce: Nonce,
    pub receiver: AccountId,
    pub kind: ReceiptKind,
    pub status: ReceiptStatus,
    /// Canonical wire bytes.
    pub canonical: Vec<u8>,
    /// Local processing time (Unix ms).
    pub processed_at: i64,
}

/// A receipt waiting in the durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedReceipt {
    /// Queue position; increases monotonically.
    pub seq: u64,
    pub receipt: ReceiptTransaction,
}

/// A receipt removed from the queue after a fatal processing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedReceipt {
    pub seq: u64,
    pub receipt: ReceiptTransaction,
    pub reason: String,
}

/// All writes produced by processing one receipt.
///
/// Applied atomically by [`crate::Store::commit`], together with the
/// archive record that consumes the receipt's nonce.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub archive: Option<ArchivedReceipt>,
    pub accounts: Vec<(AccountId, Account)>,
    /// `None` removes the key.
    pub storage: Vec<(AccountId, Vec<u8>, Option<Vec<u8>>)>,
    /// `None` deletes the registration.
    pub callbacks: Vec<(CallbackId, Option<PendingCallback>)>,
    /// `None` deletes the grant.
    pub grants: Vec<(GrantKey, Option<ManaGrant>)>,
    pub enqueue: Vec<ReceiptTransaction>,
    /// Queue entry consumed by this batch.
    pub dequeue: Option<u64>,
}

impl WriteBatch {
    /// Whether the batch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.archive.is_none()
            && self.accounts.is_empty()
            && self.storage.is_empty()
            && self.callbacks.is_empty()
            && self.grants.is_empty()
            && self.enqueue.is_empty()
            && self.dequeue.is_none()
    }
}

/// Result of committing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    /// The batch was applied.
    Committed,
    /// The archived receipt's `(originator, nonce)` was already processed;
    /// nothing was applied.
    AlreadyProcessed,
}

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
