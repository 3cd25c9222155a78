//! Versioned content store.
//!
//! Cached responses live in named namespaces (shell, data, media), each
//! belonging to a numbered generation. Exactly one generation is active
//! at a time; reads resolve the active generation per lookup, so
//! activation is atomic from the router's perspective. Entries are
//! immutable once written and are only ever replaced wholesale.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::request::RequestKey;

const ACTIVE_GENERATION: &str = "active_generation";
const PENDING_GENERATION: &str = "pending_generation";

/// One named partition of the content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
  /// Static application shell, populated from the manifest at install
  Shell,
  /// API data responses
  Data,
  /// Media and image responses
  Media,
}

impl Namespace {
  pub fn as_str(&self) -> &'static str {
    match self {
      Namespace::Shell => "shell",
      Namespace::Data => "data",
      Namespace::Media => "media",
    }
  }
}

/// A response captured for storage. The retrieval timestamp is injected
/// by the store at write time.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl CapturedResponse {
  pub fn from_fetch(url: &str, response: &crate::fetch::FetchedResponse) -> Self {
    Self {
      url: url.to_string(),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
    }
  }
}

/// One cached response, as read back from the store.
#[derive(Debug, Clone)]
pub struct ContentEntry {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub retrieved_at: DateTime<Utc>,
}

/// SQLite-backed content store.
pub struct ContentStore {
  conn: Mutex<Connection>,
}

/// Schema for the content store.
const CONTENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS content_entries (
    generation INTEGER NOT NULL,
    namespace TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    retrieved_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, namespace, request_key)
);

CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl ContentStore {
  /// Open or create the store at the given path.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open content store at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open an in-memory store. Used in tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory content store: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Default store path under the platform data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("driftsync").join("content.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(CONTENT_SCHEMA)
      .map_err(|e| eyre!("Failed to run content store migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// The currently active generation, if any.
  pub fn active_generation(&self) -> Result<Option<i64>> {
    let conn = self.lock()?;
    meta_i64(&conn, ACTIVE_GENERATION)
  }

  /// The installed-but-not-yet-active generation, if any.
  pub fn pending_generation(&self) -> Result<Option<i64>> {
    let conn = self.lock()?;
    meta_i64(&conn, PENDING_GENERATION)
  }

  /// Allocate the next generation number and record it as pending.
  pub fn begin_generation(&self) -> Result<i64> {
    let conn = self.lock()?;

    let active = meta_i64(&conn, ACTIVE_GENERATION)?.unwrap_or(0);
    let pending = meta_i64(&conn, PENDING_GENERATION)?.unwrap_or(0);
    let highest: Option<i64> = conn
      .query_row("SELECT MAX(generation) FROM content_entries", [], |row| {
        row.get(0)
      })
      .map_err(|e| eyre!("Failed to inspect generations: {}", e))?;

    let next = active.max(pending).max(highest.unwrap_or(0)) + 1;

    conn
      .execute(
        "INSERT OR REPLACE INTO store_meta (key, value) VALUES (?, ?)",
        params![PENDING_GENERATION, next.to_string()],
      )
      .map_err(|e| eyre!("Failed to record pending generation: {}", e))?;

    Ok(next)
  }

  /// Store an entry in an explicit generation. Replaces any existing
  /// entry for the same identity.
  pub fn put(
    &self,
    generation: i64,
    namespace: Namespace,
    key: &RequestKey,
    response: &CapturedResponse,
  ) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, generation, namespace, key, response)
  }

  /// Store an entry in the active generation, resolved at write time.
  /// Errors when no generation is active yet.
  pub fn put_active(
    &self,
    namespace: Namespace,
    key: &RequestKey,
    response: &CapturedResponse,
  ) -> Result<()> {
    let conn = self.lock()?;
    let generation = meta_i64(&conn, ACTIVE_GENERATION)?
      .ok_or_else(|| eyre!("No active generation to write into"))?;
    insert_entry(&conn, generation, namespace, key, response)
  }

  /// Look up an entry in the active generation.
  pub fn get(&self, namespace: Namespace, key: &RequestKey) -> Result<Option<ContentEntry>> {
    let conn = self.lock()?;

    let generation = match meta_i64(&conn, ACTIVE_GENERATION)? {
      Some(g) => g,
      None => return Ok(None),
    };

    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, body, retrieved_at FROM content_entries
         WHERE generation = ? AND namespace = ? AND request_key = ?",
        params![generation, namespace.as_str(), key.hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read content entry: {}", e))?;

    match row {
      Some((url, status, headers, body, retrieved_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(ContentEntry {
          url,
          status,
          headers,
          body,
          retrieved_at: parse_datetime(&retrieved_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  /// Make `generation` the active one and delete every entry belonging
  /// to any other generation. One transaction, so no request ever sees a
  /// mix of generations.
  pub fn activate(&self, generation: i64) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = (|| -> Result<()> {
      conn
        .execute(
          "INSERT OR REPLACE INTO store_meta (key, value) VALUES (?, ?)",
          params![ACTIVE_GENERATION, generation.to_string()],
        )
        .map_err(|e| eyre!("Failed to set active generation: {}", e))?;

      conn
        .execute(
          "DELETE FROM store_meta WHERE key = ?",
          params![PENDING_GENERATION],
        )
        .map_err(|e| eyre!("Failed to clear pending generation: {}", e))?;

      conn
        .execute(
          "DELETE FROM content_entries WHERE generation != ?",
          params![generation],
        )
        .map_err(|e| eyre!("Failed to delete prior generations: {}", e))?;

      Ok(())
    })();

    match result {
      Ok(()) => conn
        .execute("COMMIT", [])
        .map(|_| ())
        .map_err(|e| eyre!("Failed to commit activation: {}", e)),
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  /// Delete every content entry across all namespaces and generations.
  /// The active-generation marker is left in place.
  pub fn purge_all(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM content_entries", [])
      .map_err(|e| eyre!("Failed to purge content entries: {}", e))?;
    Ok(())
  }

  /// Distinct generations that still hold entries.
  pub fn generations(&self) -> Result<Vec<i64>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT generation FROM content_entries ORDER BY generation")
      .map_err(|e| eyre!("Failed to prepare generation query: {}", e))?;

    let generations = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query generations: {}", e))?
      .collect::<std::result::Result<Vec<i64>, _>>()
      .map_err(|e| eyre!("Failed to read generations: {}", e))?;

    Ok(generations)
  }

  /// Number of entries in a namespace of the active generation.
  pub fn entry_count(&self, namespace: Namespace) -> Result<i64> {
    let conn = self.lock()?;

    let generation = match meta_i64(&conn, ACTIVE_GENERATION)? {
      Some(g) => g,
      None => return Ok(0),
    };

    conn
      .query_row(
        "SELECT COUNT(*) FROM content_entries WHERE generation = ? AND namespace = ?",
        params![generation, namespace.as_str()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))
  }
}

fn insert_entry(
  conn: &Connection,
  generation: i64,
  namespace: Namespace,
  key: &RequestKey,
  response: &CapturedResponse,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO content_entries
         (generation, namespace, request_key, url, status, headers, body, retrieved_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        namespace.as_str(),
        key.hash(),
        response.url,
        response.status,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store content entry: {}", e))?;

  Ok(())
}

fn meta_i64(conn: &Connection, key: &str) -> Result<Option<i64>> {
  let value: Option<String> = conn
    .query_row(
      "SELECT value FROM store_meta WHERE key = ?",
      params![key],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to read store meta {}: {}", key, e))?;

  match value {
    Some(v) => v
      .parse::<i64>()
      .map(Some)
      .map_err(|e| eyre!("Corrupt store meta {}: {}", key, e)),
    None => Ok(None),
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
