//! Registry of cache entries owned by one client.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

use super::entry::{EntryState, QueryEntry, SharedFetch};
use crate::query::QueryArg;

/// Ordered set of entries, at most one per canonical URL.
///
/// Entries are only appended or removed explicitly. Lookups go through
/// [`QueryCache::get_query`], which deduplicates by URL.
#[derive(Default)]
pub struct QueryCache {
  entries: Mutex<Vec<Arc<QueryEntry>>>,
  mounted: AtomicBool,
}

impl QueryCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<Arc<QueryEntry>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Return the registered entry for the candidate's URL, registering the
  /// candidate if there is none. URL-less candidates are returned as is.
  pub fn get_query(&self, candidate: QueryEntry) -> Arc<QueryEntry> {
    self.register(Arc::new(candidate))
  }

  /// Like [`QueryCache::get_query`] for an entry that may already be shared.
  pub fn register(&self, entry: Arc<QueryEntry>) -> Arc<QueryEntry> {
    let Some(url) = entry.url() else {
      return entry;
    };

    let mut entries = self.lock();
    if let Some(existing) = entries.iter().find(|e| e.url() == Some(url)) {
      return Arc::clone(existing);
    }

    trace!(url, "registering query");
    entries.push(Arc::clone(&entry));
    entry
  }

  pub fn find(&self, url: &str) -> Option<Arc<QueryEntry>> {
    self.lock().iter().find(|e| e.url() == Some(url)).cloned()
  }

  /// Snapshot of the registry in insertion order
  pub fn entries(&self) -> Vec<Arc<QueryEntry>> {
    self.lock().clone()
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  pub fn contains(&self, entry: &Arc<QueryEntry>) -> bool {
    self.lock().iter().any(|e| Arc::ptr_eq(e, entry))
  }

  pub fn remove(&self, entry: &Arc<QueryEntry>) -> bool {
    let mut entries = self.lock();
    let before = entries.len();
    entries.retain(|e| !Arc::ptr_eq(e, entry));
    entries.len() != before
  }

  /// Signal that rendering has attached; from now on freshness is judged by time.
  pub fn mount(&self) {
    self.mounted.store(true, Ordering::SeqCst);
  }

  pub fn is_mounted(&self) -> bool {
    self.mounted.load(Ordering::SeqCst)
  }

  /// Whether the entry holds a usable document younger than `window`.
  pub fn is_cached(&self, entry: &QueryEntry, window: Duration, now: i64) -> bool {
    self.is_fresh(&entry.lock(), window, now)
  }

  pub(crate) fn is_fresh(&self, state: &EntryState, window: Duration, now: i64) -> bool {
    let Some(cache) = &state.cache else {
      return false;
    };
    if !self.is_mounted() {
      return true;
    }
    if has_errors(cache) {
      return false;
    }
    state.timestamp + window.as_millis() as i64 > now
  }

  /// True if any entry has a fetch in flight
  pub fn is_fetching(&self) -> bool {
    self.entries().iter().any(|e| e.is_fetching())
  }

  /// Every fetch currently in flight, for callers that need to drain them
  pub fn in_flight(&self) -> Vec<SharedFetch> {
    self.entries().iter().filter_map(|e| e.promise()).collect()
  }

  /// Drop every cached document, keeping the entries
  pub fn clear(&self) {
    for entry in self.entries() {
      entry.lock().cache = None;
    }
  }

  /// `(key, raw document)` for every entry that holds a document
  pub fn extract(&self) -> Vec<(QueryArg, Value)> {
    self
      .entries()
      .iter()
      .filter_map(|e| e.cache().map(|doc| (e.key().clone(), doc)))
      .collect()
  }

  /// Re-populate entries from a snapshot, all stamped with `timestamp`.
  pub fn hydrate<F>(&self, snapshot: Vec<(QueryArg, Value)>, timestamp: i64, make_entry: F)
  where
    F: Fn(QueryArg) -> QueryEntry,
  {
    for (key, doc) in snapshot {
      let entry = self.get_query(make_entry(key));
      let mut state = entry.lock();
      state.cache = Some(doc);
      state.timestamp = timestamp;
    }
  }
}

/// Whether a document carries an `error` or `errors` member
pub fn has_errors(doc: &Value) -> bool {
  doc.get("error").is_some_and(|v| !v.is_null()) || doc.get("errors").is_some_and(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query::parse_query_arg;
  use serde_json::json;

  fn candidate(path: &str) -> QueryEntry {
    let key = QueryArg::from(path);
    let descriptor = parse_query_arg(&key);
    QueryEntry::new(key, descriptor)
  }

  #[test]
  fn test_get_query_dedupes_by_url() {
    let cache = QueryCache::new();
    let a = cache.get_query(candidate("/todos/1"));
    let b = cache.get_query(candidate("todos/1"));
    let c = cache.get_query(candidate("/todos/2"));

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(cache.len(), 2);
  }

  #[test]
  fn test_urlless_entries_are_not_registered() {
    let cache = QueryCache::new();
    let entry = cache.get_query(candidate(""));
    assert!(entry.url().is_none());
    assert!(cache.is_empty());
  }

  #[test]
  fn test_is_cached_before_mount() {
    let cache = QueryCache::new();
    let entry = cache.get_query(candidate("/todos"));
    assert!(!cache.is_cached(&entry, Duration::ZERO, 0));

    entry.lock().cache = Some(json!({ "error": { "status": "500" } }));
    assert!(cache.is_cached(&entry, Duration::ZERO, 1_000_000));
  }

  #[test]
  fn test_is_cached_after_mount() {
    let cache = QueryCache::new();
    cache.mount();
    let entry = cache.get_query(candidate("/todos"));
    {
      let mut state = entry.lock();
      state.cache = Some(json!({ "data": [] }));
      state.timestamp = 10_000;
    }

    assert!(cache.is_cached(&entry, Duration::from_secs(5), 14_999));
    assert!(!cache.is_cached(&entry, Duration::from_secs(5), 15_000));

    entry.lock().cache = Some(json!({ "errors": [] }));
    assert!(!cache.is_cached(&entry, Duration::from_secs(5), 10_001));
  }

  #[test]
  fn test_extract_and_hydrate() {
    let cache = QueryCache::new();
    let entry = cache.get_query(candidate("/todos"));
    cache.get_query(candidate("/users"));
    entry.lock().cache = Some(json!({ "data": [] }));

    let snapshot = cache.extract();
    assert_eq!(snapshot, vec![(QueryArg::from("/todos"), json!({ "data": [] }))]);

    let other = QueryCache::new();
    other.hydrate(snapshot, 42, |key| {
      let descriptor = parse_query_arg(&key);
      QueryEntry::new(key, descriptor)
    });

    let hydrated = other.find("/todos").expect("hydrated entry");
    assert_eq!(hydrated.timestamp(), 42);
    assert_eq!(hydrated.cache(), Some(json!({ "data": [] })));
  }

  #[test]
  fn test_clear_keeps_entries() {
    let cache = QueryCache::new();
    let entry = cache.get_query(candidate("/todos"));
    entry.lock().cache = Some(json!({ "data": [] }));

    cache.clear();
    assert_eq!(cache.len(), 1);
    assert!(entry.cache().is_none());
  }
}
