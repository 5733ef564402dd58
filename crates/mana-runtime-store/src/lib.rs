//! # Mana Runtime Store
//!
//! Storage abstraction for the mana runtime. Provides a trait-based interface
//! for settlement persistence with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The store abstracts durable settlement state behind the [`Store`] trait,
//! allowing the runtime to be storage-agnostic. The primary implementation
//! is [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`WriteBatch`] - Every write caused by one receipt
//! - [`CommitResult`] - Result of committing a batch
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mana_runtime_store::{Account, SqliteStore, Store};
//! use mana_runtime_core::AccountId;
//!
//! async fn example() {
//!     // Open a SQLite database
//!     let store = SqliteStore::open("runtime.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let alice = AccountId::new("alice");
//!     store.put_account(&alice, &Account::with_balance(1_000)).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Exactly-once commits**: a batch archiving an already processed
//!   `(originator, nonce)` returns `AlreadyProcessed` and writes nothing
//! - **Durable queue**: emitted receipts are enqueued in the same commit
//!   that archives their parent
//! - **Quarantine**: receipts that hit a fatal error are set aside for
//!   inspection instead of being retried forever

pub mod error;
pub mod memory;
pub mod migration;
pub mod records;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use records::{
    now_millis, Account, ArchivedReceipt, CommitResult, GrantKey, GrantKind, ManaGrant, PendingCallback,
    QuarantinedReceipt, QueuedReceipt, ReceiptStatus, SlotFill, WriteBatch,
};
pub use sqlite::SqliteStore;
pub use traits::Store;
