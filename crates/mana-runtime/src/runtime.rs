//! The Runtime: public API of the settlement engine.
//!
//! The Runtime brings together storage, the receipt router, account lanes
//! and the queue worker into one cloneable handle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use mana_runtime_core::{
    validate_receipt, AccessKey, AccountId, Balance, CallbackId, Nonce, ReceiptTransaction,
};
use mana_runtime_store::{
    Account, ArchivedReceipt, PendingCallback, QuarantinedReceipt, QueuedReceipt, ReceiptStatus,
    Store,
};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError, Severity};
use crate::executor::ContractRegistry;
use crate::lanes::AccountGuards;
use crate::router::{ReceiptRouter, RoutingOutcome};
use crate::worker::WorkerHandle;

/// Counts from draining the receipt queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Receipts committed.
    pub processed: usize,
    /// Benign drops: duplicates, unknown callbacks, taken slots.
    pub dropped: usize,
    /// Pre-execution rejections of user receipts, removed from the queue.
    pub rejected: usize,
    /// Fatal failures and rejected runtime-generated receipts, moved to
    /// quarantine.
    pub quarantined: usize,
}

impl RunReport {
    /// Total receipts taken off the queue.
    pub fn total(&self) -> usize {
        self.processed + self.dropped + self.rejected + self.quarantined
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn merge(&mut self, other: RunReport) {
        self.processed += other.processed;
        self.dropped += other.dropped;
        self.rejected += other.rejected;
        self.quarantined += other.quarantined;
    }
}

struct Inner<S: Store> {
    store: Arc<S>,
    router: ReceiptRouter<S>,
    guards: AccountGuards,
    config: RuntimeConfig,
    notify: Arc<Notify>,
}

/// The main Runtime handle.
///
/// Provides a unified API for:
/// - Creating accounts and registering access keys
/// - Submitting user transactions
/// - Delivering receipts to the durable queue and draining it
/// - Querying balances, storage, callbacks and receipt status
///
/// Cloning is cheap; clones share the same store and lanes.
pub struct Runtime<S: Store + 'static> {
    inner: Arc<Inner<S>>,
}

impl<S: Store + 'static> Clone for Runtime<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Store + 'static> Runtime<S> {
    /// Create a runtime over `store` with the contracts in `registry`.
    pub fn new(store: S, registry: ContractRegistry, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(store);
        let router = ReceiptRouter::new(store.clone(), Arc::new(registry), config.execution.clone());

        info!(
            node_index = config.node.node_index,
            listen_addr = %config.node.listen_addr,
            seed = config.node.is_seed(),
            "runtime started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                router,
                guards: AccountGuards::new(),
                config,
                notify: Arc::new(Notify::new()),
            }),
        })
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Account Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an account holding `balance`.
    pub async fn create_account(&self, id: impl Into<AccountId>, balance: Balance) -> Result<()> {
        let id = id.into();
        if !id.is_valid() {
            return Err(RuntimeError::MalformedReceipt(format!("invalid account id {id:?}")));
        }

        let _guard = self.inner.guards.guard(id.clone()).await;
        if self.inner.store.get_account(&id).await?.is_some() {
            return Err(RuntimeError::AccountExists(id));
        }
        self.inner
            .store
            .put_account(&id, &Account::with_balance(balance))
            .await?;

        debug!(account = %id, balance, "account created");
        Ok(())
    }

    /// Register or remove the access key of `id`.
    ///
    /// A key restricting the method without restricting the contract is
    /// rejected here.
    pub async fn set_access_key(&self, id: &AccountId, key: Option<AccessKey>) -> Result<()> {
        if let Some(key) = &key {
            key.validate()?;
        }

        let _guard = self.inner.guards.guard(id.clone()).await;
        let mut account = self
            .inner
            .store
            .get_account(id)
            .await?
            .ok_or_else(|| RuntimeError::UnknownAccount(id.clone()))?;
        account.access_key = key;
        self.inner.store.put_account(id, &account).await?;

        debug!(account = %id, restricted = account.access_key.is_some(), "access key set");
        Ok(())
    }

    pub async fn account(&self, id: &AccountId) -> Result<Option<Account>> {
        Ok(self.inner.store.get_account(id).await?)
    }

    /// Balance of `id`.
    pub async fn balance(&self, id: &AccountId) -> Result<Balance> {
        self.account(id)
            .await?
            .map(|a| a.balance)
            .ok_or_else(|| RuntimeError::UnknownAccount(id.clone()))
    }

    /// Read a key from an account's contract storage.
    pub async fn storage(&self, account: &AccountId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.store.get_storage(account, key).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Receipt Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Process a user transaction synchronously.
    ///
    /// Validation and authorization failures come back as errors in the same
    /// call and consume nothing. Receipts emitted by the call go to the
    /// durable queue. A call emitted by a contract is never accepted here;
    /// its grant is only consumed when it arrives through the queue.
    pub async fn submit(&self, tx: ReceiptTransaction) -> Result<RoutingOutcome> {
        validate_receipt(&tx)?;
        if tx.kind().is_runtime_generated() {
            return Err(RuntimeError::MalformedReceipt(format!(
                "{:?} receipts are generated by the runtime",
                tx.kind()
            )));
        }

        let outcome = self.dispatch_locked(&tx, None).await?;
        if !outcome.emitted().is_empty() {
            self.inner.notify.notify_one();
        }
        Ok(outcome)
    }

    /// Append a receipt to the durable queue, returning its queue position.
    ///
    /// Used for receipts arriving from elsewhere. They are processed by
    /// [`run_until_idle`](Self::run_until_idle) or a worker.
    pub async fn deliver(&self, tx: ReceiptTransaction) -> Result<u64> {
        validate_receipt(&tx)?;
        let seq = self.inner.store.enqueue(&tx).await?;
        self.inner.notify.notify_one();
        Ok(seq)
    }

    /// Drain the queue, including everything processing emits.
    pub async fn run_until_idle(&self) -> Result<RunReport> {
        let mut report = RunReport::default();
        loop {
            let round = self.process_batch().await?;
            if round.is_empty() {
                return Ok(report);
            }
            report.merge(round);
        }
    }

    /// Start a background worker draining the queue.
    pub fn spawn_worker(&self) -> WorkerHandle {
        let runtime = self.clone();
        let idle = Duration::from_millis(self.inner.config.worker.idle_poll_interval_ms);

        WorkerHandle::spawn(idle, self.inner.notify.clone(), move || {
            let runtime = runtime.clone();
            async move {
                match runtime.process_batch().await {
                    Ok(report) => !report.is_empty(),
                    Err(err) => {
                        error!(error = %err, "worker round failed");
                        false
                    }
                }
            }
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a pending callback registration.
    pub async fn pending_callback(&self, id: &CallbackId) -> Result<Option<PendingCallback>> {
        Ok(self.inner.store.get_callback(id).await?)
    }

    /// Terminal status of the receipt `(originator, nonce)`, if processed.
    pub async fn receipt_status(
        &self,
        originator: &AccountId,
        nonce: Nonce,
    ) -> Result<Option<ReceiptStatus>> {
        Ok(self.archived(originator, nonce).await?.map(|a| a.status))
    }

    pub async fn archived(
        &self,
        originator: &AccountId,
        nonce: Nonce,
    ) -> Result<Option<ArchivedReceipt>> {
        Ok(self.inner.store.get_archived(originator, nonce).await?)
    }

    pub async fn queue_len(&self) -> Result<usize> {
        Ok(self.inner.store.queue_len().await?)
    }

    /// Receipts that failed fatally, for operator investigation.
    pub async fn quarantined(&self) -> Result<Vec<QuarantinedReceipt>> {
        Ok(self.inner.store.quarantined().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Take one batch off the queue and process it.
    ///
    /// Receipts are grouped by receiver. Lanes run concurrently; within a
    /// lane receipts run one at a time in queue order.
    async fn process_batch(&self) -> Result<RunReport> {
        let queued = self
            .inner
            .store
            .queued(self.inner.config.worker.batch_size)
            .await?;
        if queued.is_empty() {
            return Ok(RunReport::default());
        }

        let mut lanes: BTreeMap<AccountId, Vec<QueuedReceipt>> = BTreeMap::new();
        for entry in queued {
            lanes
                .entry(entry.receipt.receiver.clone())
                .or_default()
                .push(entry);
        }

        let mut tasks = JoinSet::new();
        for (_, lane) in lanes {
            let runtime = self.clone();
            tasks.spawn(async move { runtime.process_lane(lane).await });
        }

        let mut report = RunReport::default();
        while let Some(joined) = tasks.join_next().await {
            let lane = joined.map_err(|e| RuntimeError::Host(format!("lane task failed: {e}")))??;
            report.merge(lane);
        }
        Ok(report)
    }

    async fn process_lane(&self, lane: Vec<QueuedReceipt>) -> Result<RunReport> {
        let mut report = RunReport::default();
        for QueuedReceipt { seq, receipt } in lane {
            match self.dispatch_locked(&receipt, Some(seq)).await {
                Ok(RoutingOutcome::Dropped(_)) => {
                    self.inner.store.remove_queued(seq).await?;
                    report.dropped += 1;
                }
                Ok(_) => report.processed += 1,
                Err(err) => {
                    // Funds held for a runtime-generated receipt are released
                    // only by processing it
                    let fatal = match err.severity() {
                        Severity::Fatal => true,
                        Severity::Rejected | Severity::Benign => {
                            self.inner.router.is_runtime_generated(&receipt).await?
                        }
                    };
                    if fatal {
                        error!(
                            seq,
                            originator = %receipt.originator,
                            nonce = receipt.nonce,
                            receiver = %receipt.receiver,
                            error = %err,
                            "receipt quarantined"
                        );
                        self.inner.store.quarantine(seq, &err.to_string()).await?;
                        report.quarantined += 1;
                    } else {
                        self.inner.store.remove_queued(seq).await?;
                        report.rejected += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    /// Dispatch `receipt` while holding the guards of every account it
    /// touches.
    async fn dispatch_locked(
        &self,
        receipt: &ReceiptTransaction,
        queued: Option<u64>,
    ) -> Result<RoutingOutcome> {
        let router = &self.inner.router;
        let mut accounts = router.accounts_touched(receipt).await?;

        loop {
            let guards = self.inner.guards.lock_all(accounts.iter().cloned()).await;

            // The payer can change between the lookup and the lock
            let current = router.accounts_touched(receipt).await?;
            if current.iter().all(|a| accounts.contains(a)) {
                let result = router.dispatch(receipt, queued).await;
                drop(guards);
                return result;
            }

            drop(guards);
            accounts.extend(current);
            accounts.sort();
            accounts.dedup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mana_runtime_core::CallBuilder;
    use mana_runtime_store::MemoryStore;

    fn runtime() -> Runtime<MemoryStore> {
        Runtime::new(MemoryStore::new(), ContractRegistry::new(), RuntimeConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_create_account_once() {
        let runtime = runtime();
        runtime.create_account("alice", 100).await.unwrap();

        let err = runtime.create_account("alice", 5).await.unwrap_err();
        assert!(matches!(err, RuntimeError::AccountExists(_)));
        assert_eq!(runtime.balance(&AccountId::new("alice")).await.unwrap(), 100);

        let err = runtime.create_account("", 5).await.unwrap_err();
        assert!(matches!(err, RuntimeError::MalformedReceipt(_)));
    }

    #[tokio::test]
    async fn test_method_without_contract_key_rejected() {
        let runtime = runtime();
        runtime.create_account("alice", 100).await.unwrap();

        let mut key = AccessKey::new(10);
        key.method_name = Some("increment".into());
        let err = runtime
            .set_access_key(&AccountId::new("alice"), Some(key))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::MalformedReceipt(_)));

        let err = runtime
            .set_access_key(&AccountId::new("bob"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownAccount(_)));
    }

    #[tokio::test]
    async fn test_submit_refuses_runtime_generated_kinds() {
        let runtime = runtime();
        let refund = ReceiptTransaction::new(
            AccountId::new("alice"),
            AccountId::new("bob"),
            1,
            mana_runtime_core::ReceiptBody::Refund(5),
        );

        let err = runtime.submit(refund.clone()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::MalformedReceipt(_)));

        // The same receipt is accepted from the queue
        runtime.deliver(refund).await.unwrap();
        let report = runtime.run_until_idle().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(runtime.balance(&AccountId::new("bob")).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_failed_call_refund_drains_through_queue() {
        let runtime = runtime();
        runtime.create_account("alice", 1_000).await.unwrap();
        let alice = AccountId::new("alice");

        // No contract on "nobody": the call fails after the base cost
        let tx = CallBuilder::new("alice", "nobody", 1)
            .method("m")
            .amount(50)
            .mana(100)
            .build();
        let outcome = runtime.submit(tx).await.unwrap();
        assert!(matches!(outcome, RoutingOutcome::Settled { success: false, gas_used: 5, .. }));
        assert_eq!(runtime.balance(&alice).await.unwrap(), 850);
        assert_eq!(runtime.queue_len().await.unwrap(), 2);

        let report = runtime.run_until_idle().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(runtime.balance(&alice).await.unwrap(), 995);
        assert_eq!(
            runtime.receipt_status(&alice, 1).await.unwrap(),
            Some(ReceiptStatus::Settled { success: false })
        );
    }
}
