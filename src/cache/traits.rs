//! Persistence contract for cache snapshots.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde_json::Value;

use crate::query::QueryArg;

/// Extracted cache contents plus when they were saved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
  /// `(key, raw document)` pairs in registry order
  pub entries: Vec<(QueryArg, Value)>,
  /// Missing when nothing has been saved yet
  pub saved_at: Option<DateTime<Utc>>,
}

impl Snapshot {
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Trait for snapshot storage backends.
pub trait SnapshotStorage: Send + Sync {
  /// Replace the stored snapshot.
  fn save(&self, entries: &[(QueryArg, Value)], saved_at: DateTime<Utc>) -> Result<()>;

  /// Load the stored snapshot. An empty store yields an empty snapshot.
  fn load(&self) -> Result<Snapshot>;

  /// Forget everything stored.
  fn clear(&self) -> Result<()>;
}
