//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Queued receipt not found.
    #[error("queued receipt not found: {0}")]
    NotQueued(u64),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A lock guarding in-memory state was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Stored wire bytes failed to decode.
    #[error("codec error: {0}")]
    Codec(#[from] mana_runtime_core::CoreError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
