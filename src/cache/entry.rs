//! A single cached request.

use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::timer::TimerHandle;
use crate::event::{Listener, Listeners, QueryEvent};
use crate::query::{QueryArg, RequestDescriptor};
use crate::schema::Schema;
use crate::types::{get_type_map, TypeMap};

/// The in-flight round trip of an entry, awaited by every concurrent caller.
pub type SharedFetch = Shared<BoxFuture<'static, Value>>;

pub(crate) struct EntryState {
  pub type_map: Option<TypeMap>,
  pub cache: Option<Value>,
  pub timestamp: i64,
  pub cache_time: Duration,
  pub promise: Option<SharedFetch>,
  pub timeout: Option<TimerHandle>,
  pub subscribers: Listeners<QueryEvent>,
}

/// One registered request: its key, parsed descriptor and mutable cache state.
pub struct QueryEntry {
  key: QueryArg,
  descriptor: RequestDescriptor,
  state: Mutex<EntryState>,
}

impl QueryEntry {
  pub fn new(key: QueryArg, descriptor: RequestDescriptor) -> Self {
    Self {
      key,
      descriptor,
      state: Mutex::new(EntryState {
        type_map: None,
        cache: None,
        timestamp: 0,
        cache_time: Duration::ZERO,
        promise: None,
        timeout: None,
        subscribers: Listeners::default(),
      }),
    }
  }

  /// The argument this entry was first created from
  pub fn key(&self) -> &QueryArg {
    &self.key
  }

  pub fn descriptor(&self) -> &RequestDescriptor {
    &self.descriptor
  }

  pub fn url(&self) -> Option<&str> {
    self.descriptor.url.as_deref()
  }

  pub fn id(&self) -> Option<&str> {
    self.descriptor.id.as_deref()
  }

  /// Last raw wire document, if any
  pub fn cache(&self) -> Option<Value> {
    self.lock().cache.clone()
  }

  /// Epoch millis of the last successful fetch
  pub fn timestamp(&self) -> i64 {
    self.lock().timestamp
  }

  /// Largest retention window requested by any fetch
  pub fn cache_time(&self) -> Duration {
    self.lock().cache_time
  }

  pub fn is_fetching(&self) -> bool {
    self.lock().promise.is_some()
  }

  pub fn subscriber_count(&self) -> usize {
    self.lock().subscribers.len()
  }

  pub fn has_pending_gc(&self) -> bool {
    self.lock().timeout.is_some()
  }

  /// The in-flight fetch, if one is running
  pub fn promise(&self) -> Option<SharedFetch> {
    self.lock().promise.clone()
  }

  /// Type map of the request, resolved on first use
  pub fn type_map(&self, schema: &Schema) -> TypeMap {
    let mut state = self.lock();
    state
      .type_map
      .get_or_insert_with(|| get_type_map(&self.descriptor, schema, None))
      .clone()
  }

  pub(crate) fn lock(&self) -> MutexGuard<'_, EntryState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn add_subscriber(&self, listener: Listener<QueryEvent>) -> u64 {
    self.lock().subscribers.add(listener)
  }

  /// Send an event to this entry's subscribers, outside the state lock.
  pub(crate) fn notify(&self, event: &QueryEvent) {
    let listeners = self.lock().subscribers.snapshot();
    for listener in listeners {
      listener(event);
    }
  }

  /// Cancel a pending GC timer, if armed
  pub(crate) fn cancel_gc(&self) {
    let timeout = self.lock().timeout.take();
    if let Some(timeout) = timeout {
      timeout.cancel();
    }
  }
}

impl fmt::Debug for QueryEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.lock();
    f.debug_struct("QueryEntry")
      .field("url", &self.descriptor.url)
      .field("id", &self.descriptor.id)
      .field("cached", &state.cache.is_some())
      .field("timestamp", &state.timestamp)
      .field("fetching", &state.promise.is_some())
      .field("subscribers", &state.subscribers.len())
      .finish()
  }
}
