//! Shared fixtures for unit tests.

use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::cache::ManualScheduler;
use crate::client::ApiClient;
use crate::schema::Schema;
use crate::transport::{RawResponse, Transport, TransportRequest};

pub const BASE_URL: &str = "https://api.test";

/// users, profiles, todos, comments and polymorphic photos
pub fn schema() -> Schema {
  Schema::parse(&json!({
    "users": {
      "relationships": { "profile": "profiles", "todos": "todos" }
    },
    "profiles": {
      "relationships": { "user": "users" }
    },
    "todos": {
      "fields": {
        "status": { "readOnly": true },
        "created": { "type": "date" }
      },
      "relationships": { "user": "users", "comments": "comments", "photos": "photos" }
    },
    "comments": {
      "relationships": { "todo": "todos", "user": "users" }
    },
    "photos": {
      "fields": { "owner_type": { "readOnly": true }, "url": {} },
      "relationships": { "owner": {} }
    }
  }))
  .with_resolver("todos", "status", |value, _, _| match value.as_str() {
    Some(s) => json!(s.to_uppercase()),
    None => value.clone(),
  })
  .with_resolver("photos", "url", |_, attrs, _| {
    let name = attrs.get("name").and_then(Value::as_str).unwrap_or("");
    json!(format!("/photos/{}", name))
  })
  .with_type_resolver("photos", "owner", |attrs| {
    attrs
      .get("owner_type")
      .and_then(Value::as_str)
      .map(String::from)
  })
}

type Responder = Arc<dyn Fn(&str, &TransportRequest) -> Result<RawResponse> + Send + Sync>;

/// In-memory transport answering from a closure and recording every call.
#[derive(Clone)]
pub struct MockTransport {
  calls: Arc<Mutex<Vec<(String, TransportRequest)>>>,
  responder: Responder,
  gate: Option<Arc<Semaphore>>,
}

impl MockTransport {
  pub fn new<F>(responder: F) -> Self
  where
    F: Fn(&str, &TransportRequest) -> Result<RawResponse> + Send + Sync + 'static,
  {
    Self {
      calls: Arc::new(Mutex::new(Vec::new())),
      responder: Arc::new(responder),
      gate: None,
    }
  }

  /// Answer every request with the same 200 document
  pub fn json(body: Value) -> Self {
    Self::new(move |_, _| Ok(RawResponse::new(200, body.clone())))
  }

  /// Hold every response until [`MockTransport::release`] lets it through
  pub fn gated(mut self) -> Self {
    self.gate = Some(Arc::new(Semaphore::new(0)));
    self
  }

  pub fn release(&self, responses: usize) {
    if let Some(gate) = &self.gate {
      gate.add_permits(responses);
    }
  }

  pub fn calls(&self) -> Vec<(String, TransportRequest)> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(called, _)| called == url)
      .count()
  }
}

impl Transport for MockTransport {
  fn request(&self, url: &str, request: TransportRequest) -> BoxFuture<'static, Result<RawResponse>> {
    let reply = (self.responder)(url, &request);
    self.calls.lock().unwrap().push((url.to_string(), request));
    let gate = self.gate.clone();

    async move {
      if let Some(gate) = gate {
        gate.acquire().await.expect("gate closed").forget();
      }
      reply
    }
    .boxed()
  }
}

/// Client over the fixture schema with a manual clock at t = 1_000_000 ms
pub fn client(transport: MockTransport) -> (ApiClient, ManualScheduler) {
  let scheduler = ManualScheduler::new(1_000_000);
  let client = ApiClient::builder(BASE_URL)
    .schema(schema())
    .transport(transport)
    .scheduler(scheduler.clone())
    .build()
    .unwrap();
  (client, scheduler)
}

/// Wait for every fetch the client has in flight
pub async fn settle(client: &ApiClient) {
  while client.is_fetching() {
    futures::future::join_all(client.in_flight()).await;
  }
}
