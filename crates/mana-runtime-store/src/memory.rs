//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use mana_runtime_core::{AccountId, CallbackId, Nonce, ReceiptTransaction};

use crate::error::{Result, StoreError};
use crate::records::{
    Account, ArchivedReceipt, CommitResult, GrantKey, ManaGrant, PendingCallback,
    QuarantinedReceipt, QueuedReceipt, WriteBatch,
};
use crate::traits::Store;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock;
/// `commit` holds the write lock for the whole batch.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    accounts: HashMap<AccountId, Account>,

    /// Contract storage: (account, key) -> value.
    storage: HashMap<(AccountId, Vec<u8>), Vec<u8>>,

    callbacks: HashMap<CallbackId, PendingCallback>,

    grants: HashMap<GrantKey, ManaGrant>,

    /// Processed receipts by (originator, nonce).
    archive: HashMap<(AccountId, Nonce), ArchivedReceipt>,

    queue: BTreeMap<u64, ReceiptTransaction>,
    next_seq: u64,

    quarantine: BTreeMap<u64, QuarantinedReceipt>,
}

impl MemoryStoreInner {
    fn push(&mut self, receipt: ReceiptTransaction) -> u64 {
        self.next_seq += 1;
        self.queue.insert(self.next_seq, receipt);
        self.next_seq
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(id).cloned())
    }

    async fn put_account(&self, id: &AccountId, account: &Account) -> Result<()> {
        self.write()?.accounts.insert(id.clone(), account.clone());
        Ok(())
    }

    async fn get_storage(&self, account: &AccountId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = self.read()?;
        Ok(inner.storage.get(&(account.clone(), key.to_vec())).cloned())
    }

    async fn get_callback(&self, id: &CallbackId) -> Result<Option<PendingCallback>> {
        Ok(self.read()?.callbacks.get(id).cloned())
    }

    async fn get_grant(&self, originator: &AccountId, nonce: Nonce) -> Result<Option<ManaGrant>> {
        Ok(self.read()?.grants.get(&(originator.clone(), nonce)).cloned())
    }

    async fn is_processed(&self, originator: &AccountId, nonce: Nonce) -> Result<bool> {
        Ok(self.read()?.archive.contains_key(&(originator.clone(), nonce)))
    }

    async fn get_archived(
        &self,
        originator: &AccountId,
        nonce: Nonce,
    ) -> Result<Option<ArchivedReceipt>> {
        Ok(self.read()?.archive.get(&(originator.clone(), nonce)).cloned())
    }

    async fn enqueue(&self, receipt: &ReceiptTransaction) -> Result<u64> {
        Ok(self.write()?.push(receipt.clone()))
    }

    async fn queued(&self, limit: usize) -> Result<Vec<QueuedReceipt>> {
        let inner = self.read()?;
        Ok(inner
            .queue
            .iter()
            .take(limit)
            .map(|(seq, receipt)| QueuedReceipt {
                seq: *seq,
                receipt: receipt.clone(),
            })
            .collect())
    }

    async fn queue_len(&self) -> Result<usize> {
        Ok(self.read()?.queue.len())
    }

    async fn remove_queued(&self, seq: u64) -> Result<()> {
        self.write()?.queue.remove(&seq);
        Ok(())
    }

    async fn quarantine(&self, seq: u64, reason: &str) -> Result<()> {
        let mut inner = self.write()?;
        let receipt = inner.queue.remove(&seq).ok_or(StoreError::NotQueued(seq))?;
        inner.quarantine.insert(
            seq,
            QuarantinedReceipt {
                seq,
                receipt,
                reason: reason.to_string(),
            },
        );
        Ok(())
    }

    async fn quarantined(&self) -> Result<Vec<QuarantinedReceipt>> {
        Ok(self.read()?.quarantine.values().cloned().collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitResult> {
        let mut inner = self.write()?;

        // Nonce guard, under the same lock as the writes
        if let Some(archive) = &batch.archive {
            let key = (archive.originator.clone(), archive.nonce);
            if inner.archive.contains_key(&key) {
                return Ok(CommitResult::AlreadyProcessed);
            }
        }

        for (id, account) in batch.accounts {
            inner.accounts.insert(id, account);
        }
        for (account, key, value) in batch.storage {
            match value {
                Some(value) => {
                    inner.storage.insert((account, key), value);
                }
                None => {
                    inner.storage.remove(&(account, key));
                }
            }
        }
        for (id, callback) in batch.callbacks {
            match callback {
                Some(callback) => {
                    inner.callbacks.insert(id, callback);
                }
                None => {
                    inner.callbacks.remove(&id);
                }
            }
        }
        for (key, grant) in batch.grants {
            match grant {
                Some(grant) => {
                    inner.grants.insert(key, grant);
                }
                None => {
                    inner.grants.remove(&key);
                }
            }
        }
        for receipt in batch.enqueue {
            inner.push(receipt);
        }
        if let Some(seq) = batch.dequeue {
            inner.queue.remove(&seq);
        }
        if let Some(archive) = batch.archive {
            inner
                .archive
                .insert((archive.originator.clone(), archive.nonce), archive);
        }

        Ok(CommitResult::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{now_millis, GrantKind, ReceiptStatus};
    use mana_runtime_core::{canonical_bytes, CallBuilder, ReceiptId};

    fn archive_of(receipt: &ReceiptTransaction) -> ArchivedReceipt {
        ArchivedReceipt {
            id: receipt.compute_id(),
            originator: receipt.originator.clone(),
            nonce: receipt.nonce,
            receiver: receipt.receiver.clone(),
            kind: receipt.kind(),
            status: ReceiptStatus::Settled { success: true },
            canonical: canonical_bytes(receipt),
            processed_at: now_millis(),
        }
    }

    #[tokio::test]
    async fn test_commit_is_exactly_once() {
        let store = MemoryStore::new();
        let alice = AccountId::new("alice");
        let receipt = CallBuilder::new("alice", "counter", 1).method("m").build();

        let batch = WriteBatch {
            archive: Some(archive_of(&receipt)),
            accounts: vec![(alice.clone(), Account::with_balance(10))],
            ..Default::default()
        };
        assert_eq!(store.commit(batch).await.unwrap(), CommitResult::Committed);

        let replay = WriteBatch {
            archive: Some(archive_of(&receipt)),
            accounts: vec![(alice.clone(), Account::with_balance(999))],
            ..Default::default()
        };
        assert_eq!(store.commit(replay).await.unwrap(), CommitResult::AlreadyProcessed);

        let account = store.get_account(&alice).await.unwrap().unwrap();
        assert_eq!(account.balance, 10);
        assert!(store.is_processed(&alice, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_queue_order_and_dequeue() {
        let store = MemoryStore::new();
        let first = CallBuilder::new("alice", "counter", 1).method("m").build();
        let second = CallBuilder::new("alice", "counter", 2).method("m").build();

        let s1 = store.enqueue(&first).await.unwrap();
        let s2 = store.enqueue(&second).await.unwrap();
        assert!(s1 < s2);

        let queued = store.queued(10).await.unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].receipt, first);

        let batch = WriteBatch {
            dequeue: Some(s1),
            ..Default::default()
        };
        store.commit(batch).await.unwrap();
        assert_eq!(store.queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_storage_and_grants() {
        let store = MemoryStore::new();
        let counter = AccountId::new("counter");
        let key: GrantKey = (counter.clone(), 42);

        let batch = WriteBatch {
            storage: vec![(counter.clone(), b"count".to_vec(), Some(b"1".to_vec()))],
            grants: vec![(
                key.clone(),
                Some(ManaGrant {
                    kind: GrantKind::Call,
                    receipt: ReceiptId::hash(b"call"),
                    payer: AccountId::new("alice"),
                    amount: 0,
                    mana: 100,
                }),
            )],
            ..Default::default()
        };
        store.commit(batch).await.unwrap();
        assert_eq!(
            store.get_storage(&counter, b"count").await.unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(store.get_grant(&counter, 42).await.unwrap().unwrap().mana, 100);

        let batch = WriteBatch {
            storage: vec![(counter.clone(), b"count".to_vec(), None)],
            grants: vec![(key, None)],
            ..Default::default()
        };
        store.commit(batch).await.unwrap();
        assert_eq!(store.get_storage(&counter, b"count").await.unwrap(), None);
        assert_eq!(store.get_grant(&counter, 42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quarantine() {
        let store = MemoryStore::new();
        let receipt = CallBuilder::new("alice", "counter", 1).method("m").build();
        let seq = store.enqueue(&receipt).await.unwrap();

        store.quarantine(seq, "overrun").await.unwrap();
        assert_eq!(store.queue_len().await.unwrap(), 0);

        let quarantined = store.quarantined().await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].reason, "overrun");
        assert!(matches!(
            store.quarantine(seq, "again").await,
            Err(StoreError::NotQueued(_))
        ));
    }
}
