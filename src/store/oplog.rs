//! Durable operation log.
//!
//! Client mutations that have not yet been acknowledged by the server.
//! Every operation is retained until the sync coordinator confirms
//! delivery; listing is non-destructive and removal is a separate,
//! explicit, all-or-none step. Partitioned by the operation-kind tag
//! prefix through a secondary index.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One not-yet-confirmed client mutation.
#[derive(Debug, Clone)]
pub struct PendingOperation {
  /// Store-assigned, monotonic id
  pub id: i64,
  /// Operation-kind tag, e.g. "watchlist_add"
  pub tag: String,
  /// Opaque payload, forwarded verbatim to the endpoint
  pub payload: serde_json::Value,
  pub enqueued_at: DateTime<Utc>,
}

/// Partition key for a tag: the prefix up to and including the first
/// underscore, or the whole tag if it has none.
pub fn partition_of(tag: &str) -> &str {
  match tag.find('_') {
    Some(i) => &tag[..=i],
    None => tag,
  }
}

/// SQLite-backed operation log.
pub struct OperationLog {
  conn: Mutex<Connection>,
}

/// Schema for the operation log.
const OPLOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    partition_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_pending_operations_partition
    ON pending_operations(partition_key, id);
"#;

impl OperationLog {
  /// Open or create the log at the given path.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open operation log at {}: {}", path.display(), e))?;

    let log = Self {
      conn: Mutex::new(conn),
    };
    log.run_migrations()?;

    Ok(log)
  }

  /// Open an in-memory log. Used in tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory operation log: {}", e))?;

    let log = Self {
      conn: Mutex::new(conn),
    };
    log.run_migrations()?;

    Ok(log)
  }

  /// Default log path under the platform data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("driftsync").join("oplog.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(OPLOG_SCHEMA)
      .map_err(|e| eyre!("Failed to run operation log migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Record a mutation. Returns the store-assigned id. The engine never
  /// deduplicates; enqueuing the same logical mutation twice yields two
  /// operations.
  pub fn enqueue(&self, tag: &str, payload: serde_json::Value) -> Result<i64> {
    let conn = self.lock()?;

    let serialized = serde_json::to_string(&payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_operations (tag, partition_key, payload, enqueued_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![tag, partition_of(tag), serialized],
      )
      .map_err(|e| eyre!("Failed to enqueue operation: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  /// All pending operations in the tag's partition, in insertion order.
  /// Accepts a full tag or a bare partition prefix; never removes
  /// anything.
  pub fn list_by_tag(&self, tag: &str) -> Result<Vec<PendingOperation>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, tag, payload, enqueued_at FROM pending_operations
         WHERE partition_key = ? ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare operation query: {}", e))?;

    let rows = stmt
      .query_map(params![partition_of(tag)], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query operations: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read operations: {}", e))?;

    let mut operations = Vec::with_capacity(rows.len());
    for (id, tag, payload, enqueued_at) in rows {
      operations.push(PendingOperation {
        id,
        tag,
        payload: serde_json::from_str(&payload)
          .map_err(|e| eyre!("Corrupt payload for operation {}: {}", id, e))?,
        enqueued_at: parse_datetime(&enqueued_at)?,
      });
    }

    Ok(operations)
  }

  /// Remove exactly the given operations. All-or-none: if any id is
  /// missing, nothing is removed and an error is returned, so a drained
  /// batch can never be half-cleared.
  pub fn remove(&self, ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
      return Ok(());
    }

    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut removed = 0usize;
    for id in ids {
      match conn.execute("DELETE FROM pending_operations WHERE id = ?", params![id]) {
        Ok(n) => removed += n,
        Err(e) => {
          let _ = conn.execute("ROLLBACK", []);
          return Err(eyre!("Failed to remove operation {}: {}", id, e));
        }
      }
    }

    if removed != ids.len() {
      let _ = conn.execute("ROLLBACK", []);
      return Err(eyre!(
        "Refusing partial removal: {} of {} operations matched",
        removed,
        ids.len()
      ));
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit removal: {}", e))?;

    Ok(())
  }

  /// Pending counts per partition. Used for status reporting.
  pub fn counts_by_partition(&self) -> Result<Vec<(String, i64)>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT partition_key, COUNT(*) FROM pending_operations
         GROUP BY partition_key ORDER BY partition_key",
      )
      .map_err(|e| eyre!("Failed to prepare count query: {}", e))?;

    let counts = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query counts: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read counts: {}", e))?;

    Ok(counts)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
