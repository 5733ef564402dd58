//! Per-account processing lanes.
//!
//! The [`AccountGuards`] type controls the active guards. It can be cheaply
//! cloned and shared between tasks.
//!
//! The [`AccountGuard`] type guards a single account. There is always at most
//! one live instance for a given account, and a new instance for the same
//! account can only be created once the previous one is dropped. Receipts
//! touching the same account are therefore serialized, while receipts on
//! disjoint accounts never contend.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use mana_runtime_core::AccountId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Every account is mapped to a weak reference to an asynchronous [`Mutex`].
///
/// Upgrading the weak reference tells whether a guard for that account is
/// live or awaited.
type AccountGuardMap = DashMap<AccountId, Weak<Mutex<()>>>;

/// Manager of [`AccountGuard`]s.
#[derive(Clone, Debug, Default)]
pub struct AccountGuards {
    guards: Arc<AccountGuardMap>,
}

impl AccountGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtain the guard for `account`, waiting while another one is live.
    pub async fn guard(&self, account: AccountId) -> AccountGuard {
        let lock = self.get_or_create_lock(&account);
        AccountGuard {
            account,
            guards: self.guards.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Obtain guards for every account in `accounts`.
    ///
    /// Guards are acquired in sorted order with duplicates removed, so two
    /// callers locking overlapping sets cannot deadlock.
    pub async fn lock_all(&self, accounts: impl IntoIterator<Item = AccountId>) -> Vec<AccountGuard> {
        let sorted: BTreeSet<AccountId> = accounts.into_iter().collect();
        let mut held = Vec::with_capacity(sorted.len());
        for account in sorted {
            held.push(self.guard(account).await);
        }
        held
    }

    /// Number of accounts with a live or awaited guard.
    pub fn active(&self) -> usize {
        self.guards.len()
    }

    /// Obtain the lock used for guarding an account.
    ///
    /// The returned lock must only be locked after the map entry is
    /// released, which happens at the end of this method.
    fn get_or_create_lock(&self, account: &AccountId) -> Arc<Mutex<()>> {
        let mut new_lock_holder = None;
        let mut entry = self.guards.entry(account.clone()).or_insert_with(|| {
            let (lock, weak) = Self::create_new_mutex();
            new_lock_holder = Some(lock);
            weak
        });
        entry.upgrade().unwrap_or_else(|| {
            let (lock, weak) = Self::create_new_mutex();
            *entry = weak;
            lock
        })
    }

    fn create_new_mutex() -> (Arc<Mutex<()>>, Weak<Mutex<()>>) {
        let lock = Arc::new(Mutex::new(()));
        let weak = Arc::downgrade(&lock);
        (lock, weak)
    }
}

/// Exclusive access to one account.
///
/// Dropping it releases the lock and removes the map entry unless another
/// task is waiting for the same account.
pub struct AccountGuard {
    account: AccountId,
    guards: Arc<AccountGuardMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl AccountGuard {
    pub fn account(&self) -> &AccountId {
        &self.account
    }
}

impl std::fmt::Debug for AccountGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AccountGuard").field(&self.account).finish()
    }
}

impl Drop for AccountGuard {
    /// Release the lock and remove the entry from the map if nobody waits.
    ///
    /// Both steps run inside [`DashMap::remove_if`], which holds the entry's
    /// write lock, and [`AccountGuards::get_or_create_lock`] only runs while
    /// holding that same lock, so a waiter cannot slip in between.
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        self.guards.remove_if(&self.account, |_, _| {
            let lock = Arc::downgrade(OwnedMutexGuard::mutex(&guard));
            drop(guard);
            lock.upgrade().is_none()
        });
    }
}
