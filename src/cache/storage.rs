//! Key/value storage backends and the failure-tolerant persisted store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::constants::STORE_NAMESPACE;

/// Trait for raw string key/value backends.
pub trait KeyValueStore: Send + Sync {
  /// Read the raw value for a key.
  fn get_raw(&self, key: &str) -> Result<Option<String>>;

  /// Write (insert or replace) the raw value for a key.
  fn set_raw(&self, key: &str, value: &str) -> Result<()>;

  /// Remove a key. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;

  /// Remove every key starting with `prefix`, returning how many went.
  fn remove_prefix(&self, prefix: &str) -> Result<usize>;
}

/// Storage implementation that doesn't persist anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStore;

impl KeyValueStore for NoopStore {
  fn get_raw(&self, _key: &str) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  fn set_raw(&self, _key: &str, _value: &str) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn remove_prefix(&self, _prefix: &str) -> Result<usize> {
    Ok(0)
  }
}

/// Process-local map, for tests and as a fallback when the database
/// cannot be opened.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl KeyValueStore for MemoryStore {
  fn get_raw(&self, key: &str) -> Result<Option<String>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn set_raw(&self, key: &str, value: &str) -> Result<()> {
    self.lock()?.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.lock()?.remove(key);
    Ok(())
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize> {
    let mut entries = self.lock()?;
    let before = entries.len();
    entries.retain(|k, _| !k.starts_with(prefix));
    Ok(before - entries.len())
  }
}

/// SQLite-based key/value storage.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a throwaway in-memory database.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("opsync").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for the store table.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the key/value table.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl KeyValueStore for SqliteStore {
  fn get_raw(&self, key: &str) -> Result<Option<String>> {
    self
      .lock()?
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn set_raw(&self, key: &str, value: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self
      .lock()?
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;
    Ok(())
  }

  fn remove_prefix(&self, prefix: &str) -> Result<usize> {
    self
      .lock()?
      .execute(
        "DELETE FROM kv WHERE substr(key, 1, ?2) = ?1",
        params![prefix, prefix.chars().count() as i64],
      )
      .map_err(|e| eyre!("Failed to clear {}: {}", prefix, e))
  }
}

/// Namespaced JSON view over a [`KeyValueStore`].
///
/// Never raises: write failures degrade to memory-only operation for the
/// caller, and unreadable or corrupt values read back as absent.
#[derive(Clone)]
pub struct PersistentStore {
  backend: Arc<dyn KeyValueStore>,
  /// Bumped on every bulk clear so in-memory copies know to re-read.
  epoch: Arc<AtomicU64>,
}

impl PersistentStore {
  pub fn new(backend: impl KeyValueStore + 'static) -> Self {
    Self::from_arc(Arc::new(backend))
  }

  pub fn from_arc(backend: Arc<dyn KeyValueStore>) -> Self {
    Self {
      backend,
      epoch: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Memory-backed store, handy for tests.
  pub fn memory() -> Self {
    Self::new(MemoryStore::new())
  }

  fn full_key(key: &str) -> String {
    format!("{}:{}", STORE_NAMESPACE, key)
  }

  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let raw = self.get_raw(key)?;
    match serde_json::from_str(&raw) {
      Ok(value) => Some(value),
      Err(e) => {
        debug!(key, error = %e, "Ignoring unreadable persisted value");
        None
      }
    }
  }

  /// Raw persisted text for a key, if readable.
  pub fn get_raw(&self, key: &str) -> Option<String> {
    match self.backend.get_raw(&Self::full_key(key)) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key, error = %e, "Persisted store read failed");
        None
      }
    }
  }

  /// Persist a value. Returns false when it only lives in memory now.
  pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
    let raw = match serde_json::to_string(value) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key, error = %e, "Failed to serialize value for persistence");
        return false;
      }
    };

    match self.backend.set_raw(&Self::full_key(key), &raw) {
      Ok(()) => true,
      Err(e) => {
        warn!(key, error = %e, "Persisted store write failed");
        false
      }
    }
  }

  pub fn remove(&self, key: &str) -> bool {
    match self.backend.remove(&Self::full_key(key)) {
      Ok(()) => true,
      Err(e) => {
        warn!(key, error = %e, "Persisted store remove failed");
        false
      }
    }
  }

  /// Remove every entry under `prefix` and invalidate in-memory copies.
  pub fn clear_prefix(&self, prefix: &str) -> usize {
    self.epoch.fetch_add(1, Ordering::SeqCst);
    match self.backend.remove_prefix(&Self::full_key(prefix)) {
      Ok(removed) => removed,
      Err(e) => {
        warn!(prefix, error = %e, "Persisted store clear failed");
        0
      }
    }
  }

  pub fn epoch(&self) -> u64 {
    self.epoch.load(Ordering::SeqCst)
  }
}
