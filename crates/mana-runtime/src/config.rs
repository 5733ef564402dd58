//! Runtime configuration.
//!
//! Loaded from JSON; every section falls back to defaults when absent.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use mana_runtime_core::Mana;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Configuration for the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Node identity assigned by the orchestration layer.
    pub node: NodeConfig,
    /// Host function costs and limits.
    pub execution: ExecutionConfig,
    /// Background queue worker.
    pub worker: WorkerConfig,
}

/// Node identity and addressing.
///
/// The runtime stores and reports these values. Discovery and cluster
/// membership belong to whatever starts the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Ordinal of this replica.
    pub node_index: u32,
    /// Address this node listens on.
    pub listen_addr: String,
    /// Peer to join. `None` makes this node the seed.
    pub bootstrap_peer: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_index: 0,
            listen_addr: "127.0.0.1:2552".to_string(),
            bootstrap_peer: None,
        }
    }
}

impl NodeConfig {
    /// Whether this node starts a cluster rather than joining one.
    pub fn is_seed(&self) -> bool {
        self.bootstrap_peer.is_none()
    }
}

/// Mana costs of host operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Charged once when a call or continuation starts.
    pub base_call_cost: Mana,
    /// Charged per storage read.
    pub storage_read_cost: Mana,
    /// Charged per byte of key and value written.
    pub storage_write_cost_per_byte: Mana,
    /// Charged per emitted call or registered callback.
    pub promise_base_cost: Mana,
    /// Largest accepted argument payload, in bytes.
    pub max_args_len: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            base_call_cost: 5,
            storage_read_cost: 2,
            storage_write_cost_per_byte: 1,
            promise_base_cost: 10,
            max_args_len: 64 * 1024,
        }
    }
}

/// Background worker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Queued receipts taken per scheduling round.
    pub batch_size: usize,
    /// How long an idle worker sleeps before polling the queue again.
    pub idle_poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            idle_poll_interval_ms: 50,
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RuntimeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Check that addresses parse and limits are usable.
    pub fn validate(&self) -> Result<()> {
        self.node
            .listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| RuntimeError::Config(format!("listen_addr: {e}")))?;

        if let Some(peer) = &self.node.bootstrap_peer {
            peer.parse::<SocketAddr>()
                .map_err(|e| RuntimeError::Config(format!("bootstrap_peer: {e}")))?;
        }

        if self.worker.batch_size == 0 {
            return Err(RuntimeError::Config("worker.batch_size must be positive".into()));
        }

        Ok(())
    }
}
