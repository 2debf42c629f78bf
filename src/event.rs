use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::cache::QueryEntry;

/// Client-wide request/response transitions
#[derive(Clone)]
pub enum Action {
  /// A query round trip is starting
  RequestQuery { query: Arc<QueryEntry> },
  /// A query round trip finished; `result` is the normalized document
  ReceiveQuery { query: Arc<QueryEntry>, result: Value },
  /// A mutation is being sent with this serialized body
  RequestMutation { payload: Option<Value> },
  /// A mutation finished; `result` is the normalized document
  ReceiveMutation { result: Value },
}

impl Action {
  pub fn name(&self) -> &'static str {
    match self {
      Action::RequestQuery { .. } => "REQUEST_QUERY",
      Action::ReceiveQuery { .. } => "RECEIVE_QUERY",
      Action::RequestMutation { .. } => "REQUEST_MUTATION",
      Action::ReceiveMutation { .. } => "RECEIVE_MUTATION",
    }
  }

  /// The affected cache entry, for query actions
  pub fn query(&self) -> Option<&Arc<QueryEntry>> {
    match self {
      Action::RequestQuery { query } | Action::ReceiveQuery { query, .. } => Some(query),
      _ => None,
    }
  }

  pub fn result(&self) -> Option<&Value> {
    match self {
      Action::ReceiveQuery { result, .. } | Action::ReceiveMutation { result } => Some(result),
      _ => None,
    }
  }
}

impl fmt::Debug for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut s = f.debug_struct(self.name());
    if let Some(query) = self.query() {
      s.field("url", &query.url());
    }
    if let Action::RequestMutation { payload } = self {
      s.field("payload", payload);
    }
    if let Some(result) = self.result() {
      s.field("result", result);
    }
    s.finish()
  }
}

/// Per-entry notification sent to the entry's own subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEvent {
  pub is_fetching: bool,
  pub result: Option<Value>,
}

pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered set of callbacks
pub struct Listeners<E> {
  next_id: u64,
  items: Vec<(u64, Listener<E>)>,
}

impl<E> Default for Listeners<E> {
  fn default() -> Self {
    Self {
      next_id: 0,
      items: Vec::new(),
    }
  }
}

impl<E> Listeners<E> {
  pub fn add(&mut self, listener: Listener<E>) -> u64 {
    self.next_id += 1;
    self.items.push((self.next_id, listener));
    self.next_id
  }

  pub fn remove(&mut self, id: u64) -> bool {
    let before = self.items.len();
    self.items.retain(|(i, _)| *i != id);
    self.items.len() != before
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// Clone the callbacks so they can be invoked after the owning lock is released
  pub fn snapshot(&self) -> Vec<Listener<E>> {
    self.items.iter().map(|(_, l)| Arc::clone(l)).collect()
  }
}

/// Handle returned by `subscribe`. Dropping it (or calling `unsubscribe`) detaches the callback.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
  detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
  pub(crate) fn new(detach: impl FnOnce() + Send + 'static) -> Self {
    Self {
      detach: Some(Box::new(detach)),
    }
  }

  pub fn unsubscribe(mut self) {
    if let Some(detach) = self.detach.take() {
      detach();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(detach) = self.detach.take() {
      detach();
    }
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.detach.is_some())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  #[test]
  fn test_listeners_keep_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut listeners: Listeners<u32> = Listeners::default();

    for tag in ["a", "b", "c"] {
      let seen = seen.clone();
      listeners.add(Arc::new(move |n: &u32| seen.lock().unwrap().push(format!("{}{}", tag, n))));
    }

    for listener in listeners.snapshot() {
      listener(&1);
    }

    assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1", "c1"]);
  }

  #[test]
  fn test_remove_listener() {
    let mut listeners: Listeners<()> = Listeners::default();
    let first = listeners.add(Arc::new(|_| {}));
    listeners.add(Arc::new(|_| {}));

    assert!(listeners.remove(first));
    assert!(!listeners.remove(first));
    assert_eq!(listeners.len(), 1);
  }

  #[test]
  fn test_subscription_detaches_once() {
    let count = Arc::new(AtomicUsize::new(0));

    let c = count.clone();
    let sub = Subscription::new(move || {
      c.fetch_add(1, Ordering::SeqCst);
    });
    sub.unsubscribe();

    let c = count.clone();
    drop(Subscription::new(move || {
      c.fetch_add(1, Ordering::SeqCst);
    }));

    assert_eq!(count.load(Ordering::SeqCst), 2);
  }
}
