//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::records::now_millis;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
///
/// Unsigned 64-bit quantities (balances, mana, nonces) are stored as their
/// two's-complement i64 bit pattern.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Account balances and access keys
        CREATE TABLE accounts (
            account_id TEXT PRIMARY KEY,
            balance INTEGER NOT NULL,
            access_key BLOB                   -- canonical CBOR, NULL for full access
        );

        -- Contract key/value storage
        CREATE TABLE contract_storage (
            account_id TEXT NOT NULL,
            key BLOB NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (account_id, key)
        );

        -- Pending callback registrations
        CREATE TABLE pending_callbacks (
            callback_id BLOB PRIMARY KEY,     -- 32 bytes
            receiver TEXT NOT NULL,
            continuation TEXT NOT NULL,
            mana INTEGER NOT NULL,
            expected INTEGER NOT NULL,
            results BLOB NOT NULL             -- CBOR map of result_index -> result
        );

        -- Funding reserved for receipts not yet processed
        CREATE TABLE mana_grants (
            originator TEXT NOT NULL,
            nonce INTEGER NOT NULL,
            kind INTEGER NOT NULL,            -- GrantKind as u8
            receipt_id BLOB NOT NULL,         -- 32 bytes, id of the funded receipt
            payer TEXT NOT NULL,
            amount INTEGER NOT NULL,
            mana INTEGER NOT NULL,
            PRIMARY KEY (originator, nonce)
        );

        -- Processed receipts
        CREATE TABLE archive (
            originator TEXT NOT NULL,
            nonce INTEGER NOT NULL,
            receipt_id BLOB NOT NULL,         -- 32 bytes, Blake3 hash of canonical bytes
            receiver TEXT NOT NULL,
            kind INTEGER NOT NULL,            -- ReceiptKind as u8
            status INTEGER NOT NULL,          -- ReceiptStatus as u8
            canonical_bytes BLOB NOT NULL,
            processed_at INTEGER NOT NULL,
            PRIMARY KEY (originator, nonce)
        );

        -- Durable receipt queue
        CREATE TABLE receipt_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            receiver TEXT NOT NULL,
            canonical_bytes BLOB NOT NULL,
            enqueued_at INTEGER NOT NULL
        );

        -- Receipts pulled from the queue after a fatal error
        CREATE TABLE quarantine (
            seq INTEGER PRIMARY KEY,
            canonical_bytes BLOB NOT NULL,
            reason TEXT NOT NULL,
            quarantined_at INTEGER NOT NULL
        );

        CREATE INDEX idx_archive_receipt_id ON archive(receipt_id);
        CREATE INDEX idx_queue_receiver ON receipt_queue(receiver);
        "#,
    )?;

    Ok(())
}
