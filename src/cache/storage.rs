//! Partition store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::entry::CacheEntry;
use crate::error::{StoreError, StoreResult};
use crate::http::{Headers, Response};

/// Durable, named partitions of stored responses.
///
/// Every call is a short critical section; callers never hold anything
/// across an await.
pub trait PartitionStore: Send + Sync {
  /// Create the partition if it does not exist.
  fn open_partition(&self, partition: &str) -> StoreResult<()>;

  /// Store (or overwrite) the response for `key`, creating the partition.
  fn put(&self, partition: &str, key: &str, response: &Response) -> StoreResult<()>;

  /// Look up `key` in one partition.
  fn get(&self, partition: &str, key: &str) -> StoreResult<Option<CacheEntry>>;

  /// Look up `key` in every partition, oldest partition first.
  fn find(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

  /// Remove one entry. Returns whether it existed.
  fn delete(&self, partition: &str, key: &str) -> StoreResult<bool>;

  /// All entries of a partition in insertion order.
  fn entries(&self, partition: &str) -> StoreResult<Vec<CacheEntry>>;

  fn count(&self, partition: &str) -> StoreResult<usize>;

  /// Names of all existing partitions.
  fn partitions(&self) -> StoreResult<Vec<String>>;

  /// Drop a partition and everything in it. Returns whether it existed.
  fn delete_partition(&self, partition: &str) -> StoreResult<bool>;
}

/// SQLite-backed partition store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> StoreResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  /// Non-durable store, used by tests and dry runs.
  pub fn open_in_memory() -> StoreResult<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> StoreResult<Self> {
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

/// Schema for partition tables.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by sha256(request key)
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(key_hash);
"#;

/// Stable, fixed-length index key for a request key.
fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

type EntryRow = (String, u16, String, Vec<u8>, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_entry((request_key, status, headers, body, stored_at): EntryRow) -> StoreResult<CacheEntry> {
  let headers: Headers = serde_json::from_str(&headers)?;
  Ok(CacheEntry {
    request_key,
    status,
    headers,
    body,
    stored_at: parse_datetime(&stored_at)?,
  })
}

impl PartitionStore for SqliteStore {
  fn open_partition(&self, partition: &str) -> StoreResult<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )?;
    Ok(())
  }

  fn put(&self, partition: &str, key: &str, response: &Response) -> StoreResult<()> {
    let headers = serde_json::to_string(&response.headers)?;
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute(
      "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
      params![partition],
    )?;
    // Delete first so an overwrite moves the entry to the end of the insertion order
    tx.execute(
      "DELETE FROM entries WHERE partition = ? AND key_hash = ?",
      params![partition, key_hash(key)],
    )?;
    tx.execute(
      "INSERT INTO entries (partition, key_hash, request_key, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        key_hash(key),
        key,
        response.status,
        headers,
        response.body
      ],
    )?;

    tx.commit()?;
    Ok(())
  }

  fn get(&self, partition: &str, key: &str) -> StoreResult<Option<CacheEntry>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        "SELECT request_key, status, headers, body, stored_at FROM entries
         WHERE partition = ? AND key_hash = ?",
        params![partition, key_hash(key)],
        read_row,
      )
      .optional()?;

    row.map(into_entry).transpose()
  }

  fn find(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        "SELECT e.request_key, e.status, e.headers, e.body, e.stored_at
         FROM entries e INNER JOIN partitions p ON p.name = e.partition
         WHERE e.key_hash = ?
         ORDER BY p.rowid
         LIMIT 1",
        params![key_hash(key)],
        read_row,
      )
      .optional()?;

    row.map(into_entry).transpose()
  }

  fn delete(&self, partition: &str, key: &str) -> StoreResult<bool> {
    let conn = self.lock()?;
    let deleted = conn.execute(
      "DELETE FROM entries WHERE partition = ? AND key_hash = ?",
      params![partition, key_hash(key)],
    )?;
    Ok(deleted > 0)
  }

  fn entries(&self, partition: &str) -> StoreResult<Vec<CacheEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT request_key, status, headers, body, stored_at FROM entries
       WHERE partition = ?
       ORDER BY rowid",
    )?;

    let rows = stmt
      .query_map(params![partition], read_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(into_entry).collect()
  }

  fn count(&self, partition: &str) -> StoreResult<usize> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM entries WHERE partition = ?",
      params![partition],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  fn partitions(&self) -> StoreResult<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM partitions ORDER BY rowid")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  fn delete_partition(&self, partition: &str) -> StoreResult<bool> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM entries WHERE partition = ?", params![partition])?;
    let deleted = tx.execute("DELETE FROM partitions WHERE name = ?", params![partition])?;
    tx.commit()?;
    Ok(deleted > 0)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> StoreResult<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|_| StoreError::Timestamp(s.to_string()))
}
