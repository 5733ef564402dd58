//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for the mana runtime. It uses
//! rusqlite with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use mana_runtime_core::{
    access_key_bytes, canonical_bytes, decode_access_key, decode_receipt, AccountId, CallbackId,
    Nonce, ReceiptId, ReceiptKind, ReceiptTransaction,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::records::{
    now_millis, Account, ArchivedReceipt, CommitResult, GrantKind, ManaGrant, PendingCallback,
    QuarantinedReceipt, QueuedReceipt, ReceiptStatus, WriteBatch,
};
use crate::traits::Store;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_MISUSE),
                Some(format!("blocking task failed: {}", e)),
            ))
        })?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some(format!("mutex poisoned: {}", e)),
        ))
    })
}

// Unsigned quantities are stored as their i64 bit pattern.
fn to_sql(n: u64) -> i64 {
    n as i64
}

fn from_sql(n: i64) -> u64 {
    n as u64
}

fn encode_results(results: &BTreeMap<u32, Option<Bytes>>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(results, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_results(bytes: &[u8]) -> Result<BTreeMap<u32, Option<Bytes>>> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn bytes32(bytes: Vec<u8>, what: &str) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| StoreError::InvalidData(format!("{what}: expected 32 bytes")))
}

fn read_account(conn: &Connection, id: &AccountId) -> Result<Option<Account>> {
    let row: Option<(i64, Option<Vec<u8>>)> = conn
        .query_row(
            "SELECT balance, access_key FROM accounts WHERE account_id = ?1",
            params![id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(balance, key)| {
        Ok(Account {
            balance: from_sql(balance),
            access_key: key.map(|bytes| decode_access_key(&bytes)).transpose()?,
        })
    })
    .transpose()
}

fn write_account(conn: &Connection, id: &AccountId, account: &Account) -> Result<()> {
    let key = account.access_key.as_ref().map(access_key_bytes);
    conn.execute(
        "INSERT INTO accounts (account_id, balance, access_key) VALUES (?1, ?2, ?3)
         ON CONFLICT(account_id) DO UPDATE SET balance = excluded.balance, access_key = excluded.access_key",
        params![id.as_str(), to_sql(account.balance), key],
    )?;
    Ok(())
}

fn insert_queued(conn: &Connection, receipt: &ReceiptTransaction) -> Result<u64> {
    conn.execute(
        "INSERT INTO receipt_queue (receiver, canonical_bytes, enqueued_at) VALUES (?1, ?2, ?3)",
        params![receipt.receiver.as_str(), canonical_bytes(receipt), now_millis()],
    )?;
    Ok(from_sql(conn.last_insert_rowid()))
}

fn apply_batch(conn: &Connection, batch: WriteBatch) -> Result<()> {
    for (id, account) in &batch.accounts {
        write_account(conn, id, account)?;
    }

    for (account, key, value) in &batch.storage {
        match value {
            Some(value) => conn.execute(
                "INSERT INTO contract_storage (account_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(account_id, key) DO UPDATE SET value = excluded.value",
                params![account.as_str(), key, value],
            )?,
            None => conn.execute(
                "DELETE FROM contract_storage WHERE account_id = ?1 AND key = ?2",
                params![account.as_str(), key],
            )?,
        };
    }

    for (id, callback) in &batch.callbacks {
        match callback {
            Some(cb) => conn.execute(
                "INSERT INTO pending_callbacks (callback_id, receiver, continuation, mana, expected, results)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(callback_id) DO UPDATE SET
                    receiver = excluded.receiver,
                    continuation = excluded.continuation,
                    mana = excluded.mana,
                    expected = excluded.expected,
                    results = excluded.results",
                params![
                    id.as_bytes().as_slice(),
                    cb.receiver.as_str(),
                    cb.continuation,
                    to_sql(cb.mana),
                    cb.expected,
                    encode_results(&cb.results)?,
                ],
            )?,
            None => conn.execute(
                "DELETE FROM pending_callbacks WHERE callback_id = ?1",
                params![id.as_bytes().as_slice()],
            )?,
        };
    }

    for ((originator, nonce), grant) in &batch.grants {
        match grant {
            Some(grant) => conn.execute(
                "INSERT OR REPLACE INTO mana_grants
                 (originator, nonce, kind, receipt_id, payer, amount, mana)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    originator.as_str(),
                    to_sql(*nonce),
                    grant.kind.to_u8(),
                    grant.receipt.as_bytes().as_slice(),
                    grant.payer.as_str(),
                    to_sql(grant.amount),
                    to_sql(grant.mana),
                ],
            )?,
            None => conn.execute(
                "DELETE FROM mana_grants WHERE originator = ?1 AND nonce = ?2",
                params![originator.as_str(), to_sql(*nonce)],
            )?,
        };
    }

    for receipt in &batch.enqueue {
        insert_queued(conn, receipt)?;
    }

    if let Some(seq) = batch.dequeue {
        conn.execute("DELETE FROM receipt_queue WHERE seq = ?1", params![to_sql(seq)])?;
    }

    if let Some(archive) = &batch.archive {
        conn.execute(
            "INSERT INTO archive (originator, nonce, receipt_id, receiver, kind, status, canonical_bytes, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                archive.originator.as_str(),
                to_sql(archive.nonce),
                archive.id.as_bytes().as_slice(),
                archive.receiver.as_str(),
                archive.kind.to_u8(),
                archive.status.to_u8(),
                archive.canonical,
                archive.processed_at,
            ],
        )?;
    }

    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        let id = id.clone();
        self.blocking(move |conn| read_account(conn, &id)).await
    }

    async fn put_account(&self, id: &AccountId, account: &Account) -> Result<()> {
        let id = id.clone();
        let account = account.clone();
        self.blocking(move |conn| write_account(conn, &id, &account)).await
    }

    async fn get_storage(&self, account: &AccountId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let account = account.clone();
        let key = key.to_vec();
        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM contract_storage WHERE account_id = ?1 AND key = ?2",
                    params![account.as_str(), key],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn get_callback(&self, id: &CallbackId) -> Result<Option<PendingCallback>> {
        let id = *id;
        self.blocking(move |conn| {
            let row: Option<(String, String, i64, u32, Vec<u8>)> = conn
                .query_row(
                    "SELECT receiver, continuation, mana, expected, results
                     FROM pending_callbacks WHERE callback_id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )
                .optional()?;

            row.map(|(receiver, continuation, mana, expected, results)| {
                Ok(PendingCallback {
                    id,
                    receiver: AccountId::new(receiver),
                    continuation,
                    mana: from_sql(mana),
                    expected,
                    results: decode_results(&results)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn get_grant(&self, originator: &AccountId, nonce: Nonce) -> Result<Option<ManaGrant>> {
        let originator = originator.clone();
        self.blocking(move |conn| {
            let row: Option<(u8, Vec<u8>, String, i64, i64)> = conn
                .query_row(
                    "SELECT kind, receipt_id, payer, amount, mana FROM mana_grants
                     WHERE originator = ?1 AND nonce = ?2",
                    params![originator.as_str(), to_sql(nonce)],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )
                .optional()?;

            row.map(|(kind, receipt, payer, amount, mana)| {
                Ok(ManaGrant {
                    kind: GrantKind::from_u8(kind)
                        .ok_or_else(|| StoreError::InvalidData(format!("grant kind {kind}")))?,
                    receipt: ReceiptId::from_bytes(bytes32(receipt, "grant receipt_id")?),
                    payer: AccountId::new(payer),
                    amount: from_sql(amount),
                    mana: from_sql(mana),
                })
            })
            .transpose()
        })
        .await
    }

    async fn is_processed(&self, originator: &AccountId, nonce: Nonce) -> Result<bool> {
        let originator = originator.clone();
        self.blocking(move |conn| {
            let hit: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM archive WHERE originator = ?1 AND nonce = ?2",
                    params![originator.as_str(), to_sql(nonce)],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hit.is_some())
        })
        .await
    }

    async fn get_archived(
        &self,
        originator: &AccountId,
        nonce: Nonce,
    ) -> Result<Option<ArchivedReceipt>> {
        let originator = originator.clone();
        self.blocking(move |conn| {
            let row: Option<(Vec<u8>, String, u8, u8, Vec<u8>, i64)> = conn
                .query_row(
                    "SELECT receipt_id, receiver, kind, status, canonical_bytes, processed_at
                     FROM archive WHERE originator = ?1 AND nonce = ?2",
                    params![originator.as_str(), to_sql(nonce)],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(id, receiver, kind, status, canonical, processed_at)| {
                Ok(ArchivedReceipt {
                    id: ReceiptId::from_bytes(bytes32(id, "receipt_id")?),
                    originator: originator.clone(),
                    nonce,
                    receiver: AccountId::new(receiver),
                    kind: ReceiptKind::from_u8(kind)
                        .ok_or_else(|| StoreError::InvalidData(format!("receipt kind {kind}")))?,
                    status: ReceiptStatus::from_u8(status)
                        .ok_or_else(|| StoreError::InvalidData(format!("receipt status {status}")))?,
                    canonical,
                    processed_at,
                })
            })
            .transpose()
        })
        .await
    }

    async fn enqueue(&self, receipt: &ReceiptTransaction) -> Result<u64> {
        let receipt = receipt.clone();
        self.blocking(move |conn| insert_queued(conn, &receipt)).await
    }

    async fn queued(&self, limit: usize) -> Result<Vec<QueuedReceipt>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.blocking(move |conn| {
            let rows: Vec<(i64, Vec<u8>)> = conn
                .prepare("SELECT seq, canonical_bytes FROM receipt_queue ORDER BY seq LIMIT ?1")?
                .query_map(params![limit], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<_, _>>()?;

            rows.into_iter()
                .map(|(seq, bytes)| {
                    Ok(QueuedReceipt {
                        seq: from_sql(seq),
                        receipt: decode_receipt(&bytes)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn queue_len(&self) -> Result<usize> {
        self.blocking(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM receipt_queue", [], |row| row.get(0))?;
            Ok(n as usize)
        })
        .await
    }

    async fn remove_queued(&self, seq: u64) -> Result<()> {
        self.blocking(move |conn| {
            conn.execute("DELETE FROM receipt_queue WHERE seq = ?1", params![to_sql(seq)])?;
            Ok(())
        })
        .await
    }

    async fn quarantine(&self, seq: u64, reason: &str) -> Result<()> {
        let reason = reason.to_string();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let bytes: Vec<u8> = tx
                .query_row(
                    "SELECT canonical_bytes FROM receipt_queue WHERE seq = ?1",
                    params![to_sql(seq)],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StoreError::NotQueued(seq))?;

            tx.execute(
                "INSERT INTO quarantine (seq, canonical_bytes, reason, quarantined_at) VALUES (?1, ?2, ?3, ?4)",
                params![to_sql(seq), bytes, reason, now_millis()],
            )?;
            tx.execute("DELETE FROM receipt_queue WHERE seq = ?1", params![to_sql(seq)])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn quarantined(&self) -> Result<Vec<QuarantinedReceipt>> {
        self.blocking(|conn| {
            let rows: Vec<(i64, Vec<u8>, String)> = conn
                .prepare("SELECT seq, canonical_bytes, reason FROM quarantine ORDER BY seq")?
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<std::result::Result<_, _>>()?;

            rows.into_iter()
                .map(|(seq, bytes, reason)| {
                    Ok(QuarantinedReceipt {
                        seq: from_sql(seq),
                        receipt: decode_receipt(&bytes)?,
                        reason,
                    })
                })
                .collect()
        })
        .await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitResult> {
        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            // Nonce guard, inside the same transaction as the writes
            if let Some(archive) = &batch.archive {
                let hit: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM archive WHERE originator = ?1 AND nonce = ?2",
                        params![archive.originator.as_str(), to_sql(archive.nonce)],
                        |row| row.get(0),
                    )
                    .optional()?;
                if hit.is_some() {
                    return Ok(CommitResult::AlreadyProcessed);
                }
            }

            apply_batch(&tx, batch)?;
            tx.commit()?;
            Ok(CommitResult::Committed)
        })
        .await
    }
}
