//! Reads: coalesced fetches, freshness, observers and garbage collection.

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::{ApiClient, QueryTarget, RequestOptions};
use crate::cache::QueryEntry;
use crate::event::{Action, QueryEvent, Subscription};

/// Options for [`ApiClient::fetch`]
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
  /// Skip the freshness check
  pub force: bool,
  /// Retention window; the client default when unset
  pub cache_time: Option<Duration>,
  /// Background revalidation threshold; the client default when unset
  pub stale_time: Option<Duration>,
  /// Per-request header overrides; `None` removes a header
  pub headers: HashMap<String, Option<String>>,
}

impl FetchOptions {
  pub fn forced() -> Self {
    Self {
      force: true,
      ..Self::default()
    }
  }

  pub fn cache_time(mut self, cache_time: Duration) -> Self {
    self.cache_time = Some(cache_time);
    self
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }

  pub fn header(mut self, name: impl Into<String>, value: Option<String>) -> Self {
    self.headers.insert(name.into(), value);
    self
  }
}

impl ApiClient {
  /// Fetch a query, reusing a fresh cached document or an in-flight request.
  ///
  /// The round trip is spawned on the runtime, so it completes and updates
  /// the cache even if every returned future is dropped. Must be called from
  /// within a tokio runtime.
  pub fn fetch(&self, target: impl Into<QueryTarget>, options: FetchOptions) -> BoxFuture<'static, Value> {
    let entry = self.get_query(target);
    let Some(url) = entry.url().map(String::from) else {
      return future::ready(Value::Null).boxed();
    };

    let cache_time = options.cache_time.unwrap_or(self.inner.options.cache_time);
    let stale_time = options.stale_time.or(self.inner.options.stale_time);
    let now = self.now();

    let mut state = entry.lock();
    state.cache_time = state.cache_time.max(cache_time);

    if let Some(promise) = &state.promise {
      trace!(url, "joining in-flight fetch");
      return promise.clone().boxed();
    }

    let cache = &self.inner.cache;
    if !options.force && cache.is_fresh(&state, cache_time, now) {
      let cached = state.cache.clone().unwrap_or(Value::Null);
      let stale = stale_time.is_some_and(|window| !cache.is_fresh(&state, window, now));
      drop(state);

      trace!(url, "serving cached document");
      if stale {
        debug!(url, "revalidating stale document");
        drop(self.fetch(Arc::clone(&entry), FetchOptions::forced()));
      }
      return future::ready(self.normalize(&cached, None)).boxed();
    }

    let round_trip = self
      .clone()
      .run_query(Arc::clone(&entry), url, options.headers)
      .boxed()
      .shared();
    state.promise = Some(round_trip.clone());
    drop(state);

    tokio::spawn(round_trip.clone());
    round_trip.boxed()
  }

  async fn run_query(
    self,
    entry: Arc<QueryEntry>,
    url: String,
    headers: HashMap<String, Option<String>>,
  ) -> Value {
    entry.cancel_gc();

    debug!(url, "fetching query");
    self.dispatch(Action::RequestQuery {
      query: Arc::clone(&entry),
    });
    entry.notify(&QueryEvent {
      is_fetching: true,
      result: None,
    });

    let doc = self
      .request(
        &url,
        RequestOptions {
          headers,
          ..RequestOptions::default()
        },
      )
      .await;
    let result = self.normalize(&doc, None);

    let observed = {
      let mut state = entry.lock();
      state.cache = Some(doc);
      state.timestamp = self.now();
      state.promise = None;
      !state.subscribers.is_empty()
    };

    debug!(url, "received query");
    self.dispatch(Action::ReceiveQuery {
      query: Arc::clone(&entry),
      result: result.clone(),
    });
    entry.notify(&QueryEvent {
      is_fetching: false,
      result: Some(result.clone()),
    });

    if !observed && !self.inner.options.ssr_mode {
      self.schedule_gc(&entry);
    }

    result
  }

  /// Observe one entry. While any subscription is alive the entry is never
  /// evicted; dropping the last one schedules eviction.
  pub fn subscribe_query<F>(&self, target: impl Into<QueryTarget>, callback: F) -> Subscription
  where
    F: Fn(&QueryEvent) + Send + Sync + 'static,
  {
    let entry = self.get_query(target);
    entry.cancel_gc();
    let id = entry.add_subscriber(Arc::new(callback));

    let client = Arc::downgrade(&self.inner);
    let weak_entry = Arc::downgrade(&entry);
    Subscription::new(move || {
      let (Some(inner), Some(entry)) = (client.upgrade(), weak_entry.upgrade()) else {
        return;
      };

      let unobserved = {
        let mut state = entry.lock();
        state.subscribers.remove(id);
        state.subscribers.is_empty()
      };

      if unobserved && !inner.options.ssr_mode {
        ApiClient { inner }.schedule_gc(&entry);
      }
    })
  }

  /// Evict the entry once its retention window has passed, unless observed.
  pub fn schedule_gc(&self, entry: &Arc<QueryEntry>) {
    let Some(url) = entry.url() else {
      return;
    };
    let now = self.now();

    let mut state = entry.lock();
    if !state.subscribers.is_empty() {
      return;
    }
    if let Some(timeout) = state.timeout.take() {
      timeout.cancel();
    }

    let expires = state.timestamp + state.cache_time.as_millis() as i64;
    if expires <= now {
      drop(state);
      trace!(url, "evicting expired query");
      self.inner.cache.remove(entry);
      return;
    }

    let client = Arc::downgrade(&self.inner);
    let target = Arc::downgrade(entry);
    let delay = Duration::from_millis((expires - now) as u64);
    trace!(url, delay_ms = delay.as_millis() as u64, "scheduling eviction");

    let handle = self.inner.scheduler.schedule(
      delay,
      Box::new(move || {
        let (Some(inner), Some(entry)) = (client.upgrade(), target.upgrade()) else {
          return;
        };
        {
          let mut state = entry.lock();
          state.timeout = None;
          if !state.subscribers.is_empty() {
            return;
          }
        }
        trace!(url = entry.url(), "evicting query after retention window");
        inner.cache.remove(&entry);
      }),
    );
    state.timeout = Some(handle);
  }
}
