//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use mana_runtime::{
    AccountId, Balance, ContractRegistry, ExecutionConfig, Mana, RoutingOutcome, RunReport,
    Runtime, RuntimeConfig,
};
use mana_runtime_core::CallBuilder;
use mana_runtime_store::{MemoryStore, SqliteStore, Store};

use crate::contracts::sample_registry;

/// Execution costs of zero, so balances only move by what calls spend
/// explicitly.
pub fn zero_cost_config() -> RuntimeConfig {
    RuntimeConfig {
        execution: ExecutionConfig {
            base_call_cost: 0,
            storage_read_cost: 0,
            storage_write_cost_per_byte: 0,
            promise_base_cost: 0,
            ..ExecutionConfig::default()
        },
        ..RuntimeConfig::default()
    }
}

/// A runtime with the sample contracts deployed, plus a nonce counter.
pub struct TestFixture<S: Store + 'static = MemoryStore> {
    pub runtime: Runtime<S>,
    next_nonce: AtomicU64,
}

impl TestFixture<MemoryStore> {
    /// In-memory runtime with zero execution costs.
    pub fn new() -> Self {
        Self::with_config(zero_cost_config())
    }

    /// In-memory runtime with the given config.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_parts(MemoryStore::new(), sample_registry(), config)
            .unwrap_or_else(|e| panic!("invalid fixture config: {e}"))
    }
}

impl TestFixture<SqliteStore> {
    /// SQLite-backed runtime with zero execution costs.
    pub fn sqlite(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let store = SqliteStore::open(path.as_ref())
            .with_context(|| format!("opening {}", path.as_ref().display()))?;
        Self::with_parts(store, sample_registry(), zero_cost_config())
    }
}

impl<S: Store + 'static> TestFixture<S> {
    pub fn with_parts(
        store: S,
        registry: ContractRegistry,
        config: RuntimeConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            runtime: Runtime::new(store, registry, config)?,
            next_nonce: AtomicU64::new(1),
        })
    }

    /// Create accounts with the given balances.
    pub async fn fund(&self, accounts: &[(&str, Balance)]) -> anyhow::Result<()> {
        for (name, balance) in accounts {
            self.runtime
                .create_account(*name, *balance)
                .await
                .with_context(|| format!("creating {name}"))?;
        }
        Ok(())
    }

    /// A fresh nonce, unique within this fixture.
    pub fn nonce(&self) -> u64 {
        self.next_nonce.fetch_add(1, Ordering::Relaxed)
    }

    /// Submit a call from `from` to `to`.
    pub async fn call(
        &self,
        from: &str,
        to: &str,
        method: &str,
        args: impl Into<Bytes>,
        amount: Balance,
        mana: Mana,
    ) -> anyhow::Result<RoutingOutcome> {
        let tx = CallBuilder::new(from, to, self.nonce())
            .method(method)
            .args(args)
            .amount(amount)
            .mana(mana)
            .build();
        Ok(self.runtime.submit(tx).await?)
    }

    /// Drain the queue.
    pub async fn settle(&self) -> anyhow::Result<RunReport> {
        Ok(self.runtime.run_until_idle().await?)
    }

    /// Balance of `account`, zero if it does not exist.
    pub async fn balance(&self, account: &str) -> anyhow::Result<Balance> {
        Ok(self
            .runtime
            .account(&AccountId::new(account))
            .await?
            .map_or(0, |a| a.balance))
    }

    /// Sum of the balances of `accounts`.
    pub async fn total(&self, accounts: &[&str]) -> anyhow::Result<Balance> {
        let mut total: Balance = 0;
        for account in accounts {
            total += self.balance(account).await?;
        }
        Ok(total)
    }
}

impl Default for TestFixture<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shuffle `items` deterministically.
pub fn shuffled<T>(mut items: Vec<T>, seed: u64) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);
    items
}
