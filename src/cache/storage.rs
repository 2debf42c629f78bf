//! Snapshot storage backends.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::traits::{Snapshot, SnapshotStorage};
use crate::query::QueryArg;

/// Storage that keeps nothing. Used when snapshots are disabled.
pub struct NoopStorage;

impl SnapshotStorage for NoopStorage {
  fn save(&self, _entries: &[(QueryArg, Value)], _saved_at: DateTime<Utc>) -> Result<()> {
    Ok(())
  }

  fn load(&self) -> Result<Snapshot> {
    Ok(Snapshot::default())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based snapshot storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the snapshot database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create snapshot directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open snapshot database at {}: {}", path.display(), e))?;
    debug!(path = %path.display(), "opened snapshot database");

    Self::with_connection(conn)
  }

  /// In-memory database, gone when dropped.
  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
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

    Ok(data_dir.join("japi").join("snapshot.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(SNAPSHOT_SCHEMA)
      .map_err(|e| eyre!("Failed to run snapshot migrations: {}", e))?;

    Ok(())
  }
}

const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshot_entries (
    key_hash TEXT PRIMARY KEY,
    key TEXT NOT NULL,
    document BLOB NOT NULL,
    position INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshot_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    saved_at TEXT NOT NULL
);
"#;

/// SHA-256 hex digest of a serialized key.
pub fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

impl SnapshotStorage for SqliteStorage {
  fn save(&self, entries: &[(QueryArg, Value)], saved_at: DateTime<Utc>) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM snapshot_entries", [])
      .map_err(|e| eyre!("Failed to delete old snapshot: {}", e))?;

    for (position, (key, document)) in entries.iter().enumerate() {
      let key = serde_json::to_string(key).map_err(|e| eyre!("Failed to serialize key: {}", e))?;
      let data =
        serde_json::to_vec(document).map_err(|e| eyre!("Failed to serialize document: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO snapshot_entries (key_hash, key, document, position)
         VALUES (?, ?, ?, ?)",
        params![key_hash(&key), key, data, position as i64],
      )
      .map_err(|e| eyre!("Failed to store snapshot entry: {}", e))?;
    }

    tx.execute(
      "INSERT OR REPLACE INTO snapshot_meta (id, saved_at) VALUES (1, ?)",
      params![saved_at.to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to store snapshot time: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    debug!(entries = entries.len(), "saved snapshot");
    Ok(())
  }

  fn load(&self) -> Result<Snapshot> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let saved_at: Option<String> = conn
      .query_row("SELECT saved_at FROM snapshot_meta WHERE id = 1", [], |row| {
        row.get(0)
      })
      .ok();

    let saved_at = match saved_at {
      Some(s) => Some(
        DateTime::parse_from_rfc3339(&s)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| eyre!("Failed to parse snapshot time '{}': {}", s, e))?,
      ),
      None => None,
    };

    let mut stmt = conn
      .prepare("SELECT key, document FROM snapshot_entries ORDER BY position")
      .map_err(|e| eyre!("Failed to prepare snapshot query: {}", e))?;

    let rows: Vec<(String, Vec<u8>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to query snapshot: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut entries = Vec::with_capacity(rows.len());
    for (key, data) in rows {
      let parsed = serde_json::from_str::<QueryArg>(&key)
        .and_then(|key| serde_json::from_slice::<Value>(&data).map(|doc| (key, doc)));
      match parsed {
        Ok(entry) => entries.push(entry),
        Err(e) => warn!(key, error = %e, "skipping unreadable snapshot entry"),
      }
    }

    Ok(Snapshot { entries, saved_at })
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch("DELETE FROM snapshot_entries; DELETE FROM snapshot_meta;")
      .map_err(|e| eyre!("Failed to clear snapshot: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query::Segment;
  use chrono::TimeZone;
  use serde_json::json;

  fn sample() -> Vec<(QueryArg, Value)> {
    vec![
      (QueryArg::from("/todos"), json!({ "data": [] })),
      (
        QueryArg::from(vec![
          Segment::from("users"),
          Segment::from(1),
          Segment::from(json!({ "include": "todos" })),
        ]),
        json!({ "data": { "type": "users", "id": "1" } }),
      ),
    ]
  }

  #[test]
  fn test_key_hash_is_sha256_hex() {
    assert_eq!(
      key_hash(""),
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(key_hash("\"/todos\"").len(), 64);
  }

  #[test]
  fn test_empty_store_loads_nothing() {
    let storage = SqliteStorage::in_memory().unwrap();
    let snapshot = storage.load().unwrap();
    assert!(snapshot.is_empty());
    assert!(snapshot.saved_at.is_none());
  }

  #[test]
  fn test_save_and_load_preserves_order() {
    let storage = SqliteStorage::in_memory().unwrap();
    let saved_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    storage.save(&sample(), saved_at).unwrap();
    let snapshot = storage.load().unwrap();

    assert_eq!(snapshot.entries, sample());
    assert_eq!(snapshot.saved_at, Some(saved_at));
  }

  #[test]
  fn test_save_replaces_previous_snapshot() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.save(&sample(), Utc::now()).unwrap();
    storage
      .save(&[(QueryArg::from("/users"), json!({ "data": [] }))], Utc::now())
      .unwrap();

    let snapshot = storage.load().unwrap();
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].0, QueryArg::from("/users"));
  }

  #[test]
  fn test_clear() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.save(&sample(), Utc::now()).unwrap();
    storage.clear().unwrap();
    assert!(storage.load().unwrap().is_empty());
  }

  #[test]
  fn test_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("snapshot.db");

    SqliteStorage::open(Some(&path))
      .unwrap()
      .save(&sample(), Utc::now())
      .unwrap();

    let reopened = SqliteStorage::open(Some(&path)).unwrap();
    assert_eq!(reopened.load().unwrap().entries, sample());
  }

  #[test]
  fn test_noop_storage() {
    let storage = NoopStorage;
    storage.save(&sample(), Utc::now()).unwrap();
    assert!(storage.load().unwrap().is_empty());
  }
}
