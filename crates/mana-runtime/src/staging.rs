//! Staged writes for one receipt.
//!
//! Processing a receipt reads through to the store and buffers every write
//! in an overlay. The overlay can be checkpointed and restored, which is
//! how a failed call rolls back its contract-state effects while keeping
//! the charge. At the end the overlay becomes a single [`WriteBatch`].

use std::collections::BTreeMap;

use mana_runtime_core::{AccountId, Balance, CallbackId, Nonce};
use mana_runtime_store::{Account, GrantKey, ManaGrant, PendingCallback, Store, WriteBatch};

use crate::error::{Result, RuntimeError};

/// A read-through cache whose entries remember whether they were written.
#[derive(Debug, Clone)]
struct Cached<K, V> {
    entries: BTreeMap<K, (Option<V>, bool)>,
}

impl<K: Ord + Clone, V: Clone> Cached<K, V> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    fn get(&self, key: &K) -> Option<Option<V>> {
        self.entries.get(key).map(|(value, _)| value.clone())
    }

    fn load(&mut self, key: K, value: Option<V>) {
        self.entries.entry(key).or_insert((value, false));
    }

    fn set(&mut self, key: K, value: Option<V>) {
        self.entries.insert(key, (value, true));
    }

    fn dirty(self) -> impl Iterator<Item = (K, Option<V>)> {
        self.entries
            .into_iter()
            .filter(|(_, (_, dirty))| *dirty)
            .map(|(key, (value, _))| (key, value))
    }
}

#[derive(Debug, Clone)]
struct Overlay {
    accounts: Cached<AccountId, Account>,
    storage: Cached<(AccountId, Vec<u8>), Vec<u8>>,
    callbacks: Cached<CallbackId, PendingCallback>,
    grants: Cached<GrantKey, ManaGrant>,
}

/// Saved overlay state, see [`Staging::checkpoint`].
#[derive(Debug, Clone)]
pub struct Checkpoint(Overlay);

/// Buffered state for processing one receipt.
pub struct Staging<'s> {
    store: &'s dyn Store,
    state: Overlay,
}

impl<'s> Staging<'s> {
    /// Start an empty overlay over `store`.
    pub fn new(store: &'s dyn Store) -> Self {
        Self {
            store,
            state: Overlay {
                accounts: Cached::new(),
                storage: Cached::new(),
                callbacks: Cached::new(),
                grants: Cached::new(),
            },
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an account.
    pub async fn account(&mut self, id: &AccountId) -> Result<Option<Account>> {
        if let Some(cached) = self.state.accounts.get(id) {
            return Ok(cached);
        }
        let loaded = self.store.get_account(id).await?;
        self.state.accounts.load(id.clone(), loaded.clone());
        Ok(loaded)
    }

    /// Replace an account.
    pub fn put_account(&mut self, id: &AccountId, account: Account) {
        self.state.accounts.set(id.clone(), Some(account));
    }

    /// Current balance; zero for an unknown account.
    pub async fn balance(&mut self, id: &AccountId) -> Result<Balance> {
        Ok(self.account(id).await?.map_or(0, |a| a.balance))
    }

    /// Add to a balance, creating the account if needed.
    pub async fn credit(&mut self, id: &AccountId, amount: Balance) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let mut account = self.account(id).await?.unwrap_or_default();
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| RuntimeError::BalanceOverflow(id.clone()))?;
        self.put_account(id, account);
        Ok(())
    }

    /// Subtract from a balance.
    pub async fn debit(&mut self, id: &AccountId, amount: Balance) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let mut account = self.account(id).await?.unwrap_or_default();
        let available = account.balance;
        account.balance =
            available
                .checked_sub(amount)
                .ok_or_else(|| RuntimeError::InsufficientBalance {
                    account: id.clone(),
                    requested: amount,
                    available,
                })?;
        self.put_account(id, account);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Contract Storage
    // ─────────────────────────────────────────────────────────────────────────

    /// Read a storage key.
    pub async fn storage(&mut self, account: &AccountId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cache_key = (account.clone(), key.to_vec());
        if let Some(cached) = self.state.storage.get(&cache_key) {
            return Ok(cached);
        }
        let loaded = self.store.get_storage(account, key).await?;
        self.state.storage.load(cache_key, loaded.clone());
        Ok(loaded)
    }

    /// Write a storage key.
    pub fn put_storage(&mut self, account: &AccountId, key: &[u8], value: Vec<u8>) {
        self.state
            .storage
            .set((account.clone(), key.to_vec()), Some(value));
    }

    /// Remove a storage key.
    pub fn remove_storage(&mut self, account: &AccountId, key: &[u8]) {
        self.state.storage.set((account.clone(), key.to_vec()), None);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pending Callbacks
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a pending callback registration.
    pub async fn callback(&mut self, id: &CallbackId) -> Result<Option<PendingCallback>> {
        if let Some(cached) = self.state.callbacks.get(id) {
            return Ok(cached);
        }
        let loaded = self.store.get_callback(id).await?;
        self.state.callbacks.load(*id, loaded.clone());
        Ok(loaded)
    }

    /// Insert or replace a registration.
    pub fn put_callback(&mut self, callback: PendingCallback) {
        self.state.callbacks.set(callback.id, Some(callback));
    }

    /// Delete a registration.
    pub fn delete_callback(&mut self, id: &CallbackId) {
        self.state.callbacks.set(*id, None);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mana Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the grant for receipt `(originator, nonce)`.
    pub async fn grant(&mut self, originator: &AccountId, nonce: Nonce) -> Result<Option<ManaGrant>> {
        let key = (originator.clone(), nonce);
        if let Some(cached) = self.state.grants.get(&key) {
            return Ok(cached);
        }
        let loaded = self.store.get_grant(originator, nonce).await?;
        self.state.grants.load(key, loaded.clone());
        Ok(loaded)
    }

    /// Record a grant.
    pub fn put_grant(&mut self, originator: &AccountId, nonce: Nonce, grant: ManaGrant) {
        self.state.grants.set((originator.clone(), nonce), Some(grant));
    }

    /// Delete a grant.
    pub fn delete_grant(&mut self, originator: &AccountId, nonce: Nonce) {
        self.state.grants.set((originator.clone(), nonce), None);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rollback
    // ─────────────────────────────────────────────────────────────────────────

    /// Save the current overlay.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.state.clone())
    }

    /// Discard everything staged since `checkpoint`.
    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.state = checkpoint.0;
    }

    /// Turn the staged writes into a batch.
    pub fn into_batch(self) -> WriteBatch {
        let Overlay {
            accounts,
            storage,
            callbacks,
            grants,
        } = self.state;

        WriteBatch {
            accounts: accounts
                .dirty()
                .filter_map(|(id, account)| account.map(|a| (id, a)))
                .collect(),
            storage: storage
                .dirty()
                .map(|((account, key), value)| (account, key, value))
                .collect(),
            callbacks: callbacks.dirty().collect(),
            grants: grants.dirty().collect(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mana_runtime_core::ReceiptId;
    use mana_runtime_store::{GrantKind, MemoryStore};

    #[tokio::test]
    async fn test_reads_through_and_buffers_writes() {
        let store = MemoryStore::new();
        let alice = AccountId::new("alice");
        store
            .put_account(&alice, &Account::with_balance(100))
            .await
            .unwrap();

        let mut staging = Staging::new(&store);
        staging.debit(&alice, 30).await.unwrap();
        assert_eq!(staging.balance(&alice).await.unwrap(), 70);

        // Nothing reaches the store until the batch is committed
        assert_eq!(store.get_account(&alice).await.unwrap().unwrap().balance, 100);

        let batch = staging.into_batch();
        assert_eq!(batch.accounts, vec![(alice, Account::with_balance(70))]);
        assert!(batch.storage.is_empty());
    }

    #[tokio::test]
    async fn test_debit_beyond_balance() {
        let store = MemoryStore::new();
        let bob = AccountId::new("bob");
        let mut staging = Staging::new(&store);

        let err = staging.debit(&bob, 1).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::InsufficientBalance {
                requested: 1,
                available: 0,
                ..
            }
        ));
        assert!(staging.into_batch().is_empty());
    }

    #[tokio::test]
    async fn test_restore_discards_later_writes() {
        let store = MemoryStore::new();
        let counter = AccountId::new("counter");
        let mut staging = Staging::new(&store);

        staging.put_storage(&counter, b"a", b"1".to_vec());
        let checkpoint = staging.checkpoint();
        staging.put_storage(&counter, b"b", b"2".to_vec());
        staging.credit(&counter, 5).await.unwrap();
        staging.restore(checkpoint);

        assert_eq!(staging.storage(&counter, b"b").await.unwrap(), None);
        let batch = staging.into_batch();
        assert_eq!(batch.storage, vec![(counter, b"a".to_vec(), Some(b"1".to_vec()))]);
        assert!(batch.accounts.is_empty());
    }

    #[tokio::test]
    async fn test_grant_delete_is_staged() {
        let store = MemoryStore::new();
        let counter = AccountId::new("counter");
        let mut staging = Staging::new(&store);

        staging.put_grant(
            &counter,
            9,
            ManaGrant {
                kind: GrantKind::Call,
                receipt: ReceiptId::hash(b"call"),
                payer: AccountId::new("alice"),
                amount: 0,
                mana: 10,
            },
        );
        assert!(staging.grant(&counter, 9).await.unwrap().is_some());
        staging.delete_grant(&counter, 9);
        assert!(staging.grant(&counter, 9).await.unwrap().is_none());

        let batch = staging.into_batch();
        assert_eq!(batch.grants, vec![((counter, 9), None)]);
    }
}
