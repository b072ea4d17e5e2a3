//! Cache storage trait and its SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::CachedResponse;
use crate::net::Response;

/// Trait for cache storage backends.
///
/// A backend holds named cache generations, each a map of request key to
/// response snapshot. Names are listed in creation order.
pub trait CacheStorage: Send + Sync {
  /// Open a cache generation, creating it if absent.
  fn open(&self, name: &str) -> Result<()>;

  /// Look up a request key in one generation.
  fn match_request(&self, name: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Store a response, replacing any existing entry for the key.
  fn put(&self, name: &str, key: &str, response: &Response) -> Result<()>;

  /// Store a batch of responses atomically: either all are written or none.
  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()>;

  /// Delete a generation and all of its entries. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Names of all generations.
  fn keys(&self) -> Result<Vec<String>>;

  /// Request keys stored in a generation.
  fn entries(&self, name: &str) -> Result<Vec<String>>;
}

type MemoryCaches = Vec<(String, HashMap<String, CachedResponse>)>;

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  caches: Mutex<MemoryCaches>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryCaches>> {
    self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn memory_cache<'a>(
  caches: &'a mut MemoryCaches,
  name: &str,
) -> &'a mut HashMap<String, CachedResponse> {
  let index = match caches.iter().position(|(n, _)| n == name) {
    Some(index) => index,
    None => {
      caches.push((name.to_string(), HashMap::new()));
      caches.len() - 1
    }
  };
  &mut caches[index].1
}

impl CacheStorage for MemoryStorage {
  fn open(&self, name: &str) -> Result<()> {
    let mut caches = self.lock()?;
    memory_cache(&mut caches, name);
    Ok(())
  }

  fn match_request(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
    let caches = self.lock()?;
    Ok(
      caches
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, entries)| entries.get(key).cloned()),
    )
  }

  fn put(&self, name: &str, key: &str, response: &Response) -> Result<()> {
    let mut caches = self.lock()?;
    memory_cache(&mut caches, name).insert(
      key.to_string(),
      CachedResponse {
        response: response.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut caches = self.lock()?;
    let cache = memory_cache(&mut caches, name);
    let now = Utc::now();
    for (key, response) in entries {
      cache.insert(
        key.clone(),
        CachedResponse {
          response: response.clone(),
          cached_at: now,
        },
      );
    }
    Ok(())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut caches = self.lock()?;
    let before = caches.len();
    caches.retain(|(n, _)| n != name);
    Ok(caches.len() != before)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let caches = self.lock()?;
    Ok(caches.iter().map(|(n, _)| n.clone()).collect())
  }

  fn entries(&self, name: &str) -> Result<Vec<String>> {
    let caches = self.lock()?;
    let mut keys: Vec<String> = caches
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, entries)| entries.keys().cloned().collect())
      .unwrap_or_default();
    keys.sort();
    Ok(keys)
  }
}

/// SQLite-based cache storage implementation.
///
/// One database file corresponds to one storage origin.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the storage at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Storage backed by a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-worker").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named cache generations
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots, one per request key per generation
CREATE TABLE IF NOT EXISTS entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    digest TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);
"#;

fn body_digest(body: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body);
  hex::encode(hasher.finalize())
}

fn insert_entry(conn: &Connection, name: &str, key: &str, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers for {}: {}", key, e))?;
  let body: &[u8] = &response.body;

  conn
    .execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (cache_name, request_key, url, status, headers, body, digest, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        name,
        key,
        response.url,
        response.status,
        headers,
        body,
        body_digest(body)
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in cache {}: {}", key, name, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO caches (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    Ok(())
  }

  fn match_request(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT url, status, headers, body, digest, cached_at FROM entries
         WHERE cache_name = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, u16, String, Vec<u8>, String, String)> = stmt
      .query_row(params![name, key], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in cache {}: {}", key, name, e))?;

    let Some((url, status, headers, body, digest, cached_at)) = row else {
      return Ok(None);
    };

    if body_digest(&body) != digest {
      return Err(eyre!(
        "Cached body for {} in cache {} does not match its digest",
        key,
        name
      ));
    }

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to parse cached headers for {}: {}", key, e))?;

    Ok(Some(CachedResponse {
      response: Response {
        url,
        status,
        headers,
        body: body.into(),
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, name: &str, key: &str, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    insert_entry(&conn, name, key, response)
  }

  fn put_all(&self, name: &str, entries: &[(String, Response)]) -> Result<()> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      insert_entry(&tx, name, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE cache_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of cache {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn entries(&self, name: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT request_key FROM entries WHERE cache_name = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![name], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of cache {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read request key: {}", e))?;

    Ok(keys)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
