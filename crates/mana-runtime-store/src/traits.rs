//! Store trait: the abstract interface for settlement persistence.
//!
//! This trait allows the runtime to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use mana_runtime_core::{AccountId, CallbackId, Nonce, ReceiptTransaction};

use crate::error::Result;
use crate::records::{
    Account, ArchivedReceipt, CommitResult, ManaGrant, PendingCallback, QuarantinedReceipt,
    QueuedReceipt, WriteBatch,
};

/// The Store trait: async interface for settlement persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Atomic commits**: every mutation caused by one receipt goes through a
///   single [`WriteBatch`].
/// - **Exactly-once**: `commit` rechecks the archive for the batch's
///   `(originator, nonce)` inside the same critical section and returns
///   `AlreadyProcessed` without applying anything on a hit.
/// - **Durable queue**: receipts emitted during processing are enqueued by
///   the same commit that archives their parent.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Account Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an account.
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>>;

    /// Insert or replace an account outside of receipt processing.
    async fn put_account(&self, id: &AccountId, account: &Account) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Contract Storage
    // ─────────────────────────────────────────────────────────────────────────

    /// Read a key from an account's contract storage.
    async fn get_storage(&self, account: &AccountId, key: &[u8]) -> Result<Option<Vec<u8>>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Pending Callbacks
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a pending callback registration.
    async fn get_callback(&self, id: &CallbackId) -> Result<Option<PendingCallback>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Mana Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the grant funding the receipt `(originator, nonce)`.
    async fn get_grant(&self, originator: &AccountId, nonce: Nonce) -> Result<Option<ManaGrant>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Archive
    // ─────────────────────────────────────────────────────────────────────────

    /// Check if `(originator, nonce)` has been processed.
    async fn is_processed(&self, originator: &AccountId, nonce: Nonce) -> Result<bool>;

    /// Get the archive record of a processed receipt.
    async fn get_archived(
        &self,
        originator: &AccountId,
        nonce: Nonce,
    ) -> Result<Option<ArchivedReceipt>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Receipt Queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a receipt to the queue, returning its queue position.
    async fn enqueue(&self, receipt: &ReceiptTransaction) -> Result<u64>;

    /// Get up to `limit` queued receipts, oldest first.
    async fn queued(&self, limit: usize) -> Result<Vec<QueuedReceipt>>;

    /// Number of queued receipts.
    async fn queue_len(&self) -> Result<usize>;

    /// Remove a queued receipt without processing it.
    async fn remove_queued(&self, seq: u64) -> Result<()>;

    /// Move a queued receipt to quarantine.
    async fn quarantine(&self, seq: u64, reason: &str) -> Result<()>;

    /// List quarantined receipts, oldest first.
    async fn quarantined(&self) -> Result<Vec<QuarantinedReceipt>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Commit
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a batch atomically.
    ///
    /// # Returns
    /// - `Committed` if the batch was applied.
    /// - `AlreadyProcessed` if the batch's archive record names an
    ///   `(originator, nonce)` that is already archived. Nothing is applied.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitResult>;
}
