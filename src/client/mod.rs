//! The API client: owns the schema, the query cache and the transport.

mod fetch;
mod mutate;

use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{QueryCache, QueryEntry, Scheduler, SharedFetch, TokioScheduler};
use crate::event::{Action, Listeners, Subscription};
use crate::query::{parse_query_arg_with, QueryArg, Segment, StringifyFn};
use crate::schema::Schema;
use crate::serializer::Serializer;
use crate::transport::{Method, ReqwestTransport, Transport, TransportRequest};

pub use fetch::FetchOptions;
pub use mutate::{Invalidate, MutateOptions};

pub const DEFAULT_MEDIA_TYPE: &str = "application/vnd.api+json";

/// Rewrites a single `error` member of a normalized document
pub type FormatErrorFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Rewrites an `errors` member; the second argument carries `{payload}` for mutations
pub type FormatErrorsFn = Arc<dyn Fn(Value, Option<&Value>) -> Value + Send + Sync>;

/// Runtime settings of a client
#[derive(Clone)]
pub struct ClientOptions {
  /// Base URL every request path is appended to
  pub url: String,
  pub media_type: String,
  /// Headers sent with every request
  pub headers: HashMap<String, String>,
  /// Default retention window of fetched documents
  pub cache_time: Duration,
  /// Default age after which a fresh document is revalidated in the background
  pub stale_time: Option<Duration>,
  /// Never schedule garbage collection
  pub ssr_mode: bool,
  pub stringify: Option<StringifyFn>,
  pub format_error: Option<FormatErrorFn>,
  pub format_errors: Option<FormatErrorsFn>,
}

impl ClientOptions {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      media_type: DEFAULT_MEDIA_TYPE.to_string(),
      headers: HashMap::new(),
      cache_time: Duration::ZERO,
      stale_time: None,
      ssr_mode: false,
      stringify: None,
      format_error: None,
      format_errors: None,
    }
  }
}

/// Extension hook run once against a freshly built client
pub trait Plugin {
  fn initialize(&self, client: &ApiClient);
}

/// Per-request settings for [`ApiClient::request`]
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
  pub method: Method,
  /// Overrides client headers; `None` removes a header
  pub headers: HashMap<String, Option<String>>,
  pub body: Option<Value>,
  /// Replaces the client's base URL for this request
  pub base_url: Option<String>,
}

/// Something that identifies a cache entry: a raw argument or the entry itself
#[derive(Debug, Clone)]
pub enum QueryTarget {
  Arg(QueryArg),
  Entry(Arc<QueryEntry>),
}

impl From<QueryArg> for QueryTarget {
  fn from(arg: QueryArg) -> Self {
    QueryTarget::Arg(arg)
  }
}

impl From<&QueryArg> for QueryTarget {
  fn from(arg: &QueryArg) -> Self {
    QueryTarget::Arg(arg.clone())
  }
}

impl From<&str> for QueryTarget {
  fn from(path: &str) -> Self {
    QueryTarget::Arg(path.into())
  }
}

impl From<String> for QueryTarget {
  fn from(path: String) -> Self {
    QueryTarget::Arg(path.into())
  }
}

impl From<Vec<Segment>> for QueryTarget {
  fn from(segments: Vec<Segment>) -> Self {
    QueryTarget::Arg(segments.into())
  }
}

impl From<Arc<QueryEntry>> for QueryTarget {
  fn from(entry: Arc<QueryEntry>) -> Self {
    QueryTarget::Entry(entry)
  }
}

impl From<&Arc<QueryEntry>> for QueryTarget {
  fn from(entry: &Arc<QueryEntry>) -> Self {
    QueryTarget::Entry(Arc::clone(entry))
  }
}

pub struct ClientBuilder {
  options: ClientOptions,
  schema: Schema,
  transport: Option<Arc<dyn Transport>>,
  scheduler: Option<Arc<dyn Scheduler>>,
  plugins: Vec<Box<dyn Plugin>>,
}

impl ClientBuilder {
  pub fn new(options: ClientOptions) -> Self {
    Self {
      options,
      schema: Schema::default(),
      transport: None,
      scheduler: None,
      plugins: Vec::new(),
    }
  }

  pub fn schema(mut self, schema: Schema) -> Self {
    self.schema = schema;
    self
  }

  pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
    self.transport = Some(Arc::new(transport));
    self
  }

  pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
    self.scheduler = Some(Arc::new(scheduler));
    self
  }

  pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
    self.options.media_type = media_type.into();
    self
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.options.headers.insert(name.into(), value.into());
    self
  }

  pub fn cache_time(mut self, cache_time: Duration) -> Self {
    self.options.cache_time = cache_time;
    self
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.options.stale_time = Some(stale_time);
    self
  }

  pub fn ssr_mode(mut self, ssr_mode: bool) -> Self {
    self.options.ssr_mode = ssr_mode;
    self
  }

  pub fn stringify<F>(mut self, stringify: F) -> Self
  where
    F: Fn(&serde_json::Map<String, Value>) -> String + Send + Sync + 'static,
  {
    self.options.stringify = Some(Arc::new(stringify));
    self
  }

  pub fn format_error<F>(mut self, format: F) -> Self
  where
    F: Fn(Value) -> Value + Send + Sync + 'static,
  {
    self.options.format_error = Some(Arc::new(format));
    self
  }

  pub fn format_errors<F>(mut self, format: F) -> Self
  where
    F: Fn(Value, Option<&Value>) -> Value + Send + Sync + 'static,
  {
    self.options.format_errors = Some(Arc::new(format));
    self
  }

  pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
    self.plugins.push(Box::new(plugin));
    self
  }

  pub fn build(self) -> Result<ApiClient> {
    if self.options.url.is_empty() {
      return Err(eyre!("ApiClient requires a url"));
    }
    Url::parse(&self.options.url)
      .map_err(|e| eyre!("Invalid API url '{}': {}", self.options.url, e))?;

    let transport: Arc<dyn Transport> = match self.transport {
      Some(transport) => transport,
      None => Arc::new(ReqwestTransport::new()?),
    };
    let scheduler: Arc<dyn Scheduler> = match self.scheduler {
      Some(scheduler) => scheduler,
      None => Arc::new(TokioScheduler),
    };

    let headers = RwLock::new(self.options.headers.clone());
    let client = ApiClient {
      inner: Arc::new(ClientInner {
        options: self.options,
        headers,
        schema: self.schema,
        transport,
        scheduler,
        cache: QueryCache::new(),
        listeners: Mutex::new(Listeners::default()),
      }),
    };

    for plugin in &self.plugins {
      plugin.initialize(&client);
    }

    Ok(client)
  }
}

struct ClientInner {
  options: ClientOptions,
  headers: RwLock<HashMap<String, String>>,
  schema: Schema,
  transport: Arc<dyn Transport>,
  scheduler: Arc<dyn Scheduler>,
  cache: QueryCache,
  listeners: Mutex<Listeners<Action>>,
}

/// Handle to a client. Clones share the same registry, headers and listeners.
#[derive(Clone)]
pub struct ApiClient {
  inner: Arc<ClientInner>,
}

impl ApiClient {
  pub fn builder(url: impl Into<String>) -> ClientBuilder {
    ClientBuilder::new(ClientOptions::new(url))
  }

  pub fn options(&self) -> &ClientOptions {
    &self.inner.options
  }

  pub fn schema(&self) -> &Schema {
    &self.inner.schema
  }

  pub fn cache(&self) -> &QueryCache {
    &self.inner.cache
  }

  /// Current time in epoch millis, as seen by the client's scheduler
  pub fn now(&self) -> i64 {
    self.inner.scheduler.now()
  }

  pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
    self
      .inner
      .headers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(name.into(), value.into());
    self
  }

  pub fn remove_header(&self, name: &str) -> &Self {
    self
      .inner
      .headers
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(name);
    self
  }

  pub fn headers(&self) -> HashMap<String, String> {
    self
      .inner
      .headers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn serialize(&self, type_name: &str, data: &Value) -> Value {
    Serializer::new(&self.inner.schema).serialize(type_name, data)
  }

  /// Deserialize a wire document and apply the error formatting hooks.
  pub fn normalize(&self, doc: &Value, extra: Option<&Value>) -> Value {
    let mut result = Serializer::new(&self.inner.schema).deserialize(doc);
    let Some(map) = result.as_object_mut() else {
      return result;
    };

    if let Some(format) = &self.inner.options.format_error {
      if let Some(error) = map.remove("error") {
        let formatted = if error.is_null() { error } else { format(error) };
        map.insert("error".into(), formatted);
      }
    }

    if let Some(format) = &self.inner.options.format_errors {
      if let Some(errors) = map.remove("errors") {
        let formatted = if errors.is_null() { errors } else { format(errors, extra) };
        map.insert("errors".into(), formatted);
      }
    }

    result
  }

  /// Observe every client-wide action until the subscription is dropped.
  pub fn subscribe<F>(&self, callback: F) -> Subscription
  where
    F: Fn(&Action) + Send + Sync + 'static,
  {
    let id = self.listeners().add(Arc::new(callback));
    let inner = Arc::downgrade(&self.inner);
    Subscription::new(move || {
      if let Some(inner) = inner.upgrade() {
        inner
          .listeners
          .lock()
          .unwrap_or_else(PoisonError::into_inner)
          .remove(id);
      }
    })
  }

  fn listeners(&self) -> std::sync::MutexGuard<'_, Listeners<Action>> {
    self
      .inner
      .listeners
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn dispatch(&self, action: Action) {
    let listeners = self.listeners().snapshot();
    for listener in listeners {
      listener(&action);
    }
  }

  /// Switch freshness checks from "everything cached is fresh" to time based.
  pub fn mount(&self) {
    self.inner.cache.mount();
  }

  pub fn is_mounted(&self) -> bool {
    self.inner.cache.is_mounted()
  }

  pub fn is_fetching(&self) -> bool {
    self.inner.cache.is_fetching()
  }

  pub fn is_cached(&self, entry: &QueryEntry, window: Duration) -> bool {
    self.inner.cache.is_cached(entry, window, self.now())
  }

  /// Every fetch currently in flight
  pub fn in_flight(&self) -> Vec<SharedFetch> {
    self.inner.cache.in_flight()
  }

  fn make_entry(&self, key: QueryArg) -> QueryEntry {
    let descriptor = parse_query_arg_with(&key, self.inner.options.stringify.as_ref());
    QueryEntry::new(key, descriptor)
  }

  /// Resolve a target to its registered entry, registering it on first use.
  pub fn get_query(&self, target: impl Into<QueryTarget>) -> Arc<QueryEntry> {
    match target.into() {
      QueryTarget::Entry(entry) => self.inner.cache.register(entry),
      QueryTarget::Arg(arg) => self.inner.cache.get_query(self.make_entry(arg)),
    }
  }

  /// Null every cached document. Entries stay registered.
  pub fn clear_cache(&self) {
    self.inner.cache.clear();
  }

  pub fn extract(&self) -> Vec<(QueryArg, Value)> {
    self.inner.cache.extract()
  }

  /// Load a snapshot, stamping every entry with the current time.
  pub fn hydrate(&self, snapshot: Vec<(QueryArg, Value)>) {
    self.hydrate_at(snapshot, self.now());
  }

  pub fn hydrate_at(&self, snapshot: Vec<(QueryArg, Value)>, timestamp: i64) {
    debug!(entries = snapshot.len(), timestamp, "hydrating cache");
    self
      .inner
      .cache
      .hydrate(snapshot, timestamp, |key| self.make_entry(key));
  }

  /// Send one request through the transport. Never fails: transport errors
  /// come back as `{"error": {"status": "500", "title": ...}}`.
  pub async fn request(&self, path: &str, options: RequestOptions) -> Value {
    let base = options.base_url.as_deref().unwrap_or(&self.inner.options.url);
    let url = format!("{}{}", base.trim_end_matches('/'), path);

    let mut headers = HashMap::new();
    headers.insert("Accept".to_string(), self.inner.options.media_type.clone());
    headers.extend(self.headers());
    if options.body.is_some() {
      headers.insert(
        "Content-Type".to_string(),
        self.inner.options.media_type.clone(),
      );
    }
    for (name, value) in options.headers {
      match value {
        Some(value) => headers.insert(name, value),
        None => headers.remove(&name),
      };
    }

    let request = TransportRequest {
      method: options.method,
      headers,
      body: options.body,
    };

    match self.inner.transport.request(&url, request).await {
      Ok(response) if response.status == 204 => json!({}),
      Ok(response) => response.body,
      Err(e) => {
        warn!(url, error = %e, "request failed");
        json!({ "error": { "status": "500", "title": e.to_string() } })
      }
    }
  }
}

impl std::fmt::Debug for ApiClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ApiClient")
      .field("url", &self.inner.options.url)
      .field("entries", &self.inner.cache.len())
      .finish()
  }
}
