//! Writes and the invalidation they trigger.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::{ApiClient, FetchOptions, RequestOptions};
use crate::cache::has_errors;
use crate::event::{Action, QueryEvent};
use crate::query::{parse_query_arg_with, QueryArg, RequestDescriptor};
use crate::transport::Method;
use crate::types::{get_type_map, TypeMap};

/// Which cached queries a successful mutation marks stale
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Invalidate {
  /// The mutated type plus every type its path, includes and payload touch
  #[default]
  Inferred,
  /// Leave other queries alone
  Disabled,
  /// Exactly these types
  Types(Vec<String>),
}

impl From<&str> for Invalidate {
  fn from(type_name: &str) -> Self {
    Invalidate::Types(vec![type_name.to_string()])
  }
}

impl From<Vec<String>> for Invalidate {
  fn from(types: Vec<String>) -> Self {
    Invalidate::Types(types)
  }
}

impl From<bool> for Invalidate {
  fn from(enabled: bool) -> Self {
    if enabled {
      Invalidate::Inferred
    } else {
      Invalidate::Disabled
    }
  }
}

/// Options for [`ApiClient::mutate`]
#[derive(Debug, Clone, Default)]
pub struct MutateOptions {
  pub invalidate: Invalidate,
  /// PATCH when the target has an id, POST otherwise
  pub method: Option<Method>,
  pub headers: HashMap<String, Option<String>>,
}

impl MutateOptions {
  pub fn method(mut self, method: Method) -> Self {
    self.method = Some(method);
    self
  }

  pub fn invalidate(mut self, invalidate: impl Into<Invalidate>) -> Self {
    self.invalidate = invalidate.into();
    self
  }

  pub fn header(mut self, name: impl Into<String>, value: Option<String>) -> Self {
    self.headers.insert(name.into(), value);
    self
  }
}

impl ApiClient {
  /// Send a write and invalidate the cached queries it affects.
  ///
  /// Returns the normalized response document. Refetches of observed
  /// queries are started but not awaited.
  pub async fn mutate(
    &self,
    target: impl Into<QueryArg>,
    payload: Option<Value>,
    options: MutateOptions,
  ) -> Value {
    let arg = target.into();
    let descriptor = parse_query_arg_with(&arg, self.inner.options.stringify.as_ref());
    let type_map = get_type_map(&descriptor, &self.inner.schema, payload.as_ref());

    let method = options.method.unwrap_or(if descriptor.id.is_some() {
      Method::Patch
    } else {
      Method::Post
    });

    let body = payload.filter(|p| !p.is_null()).map(|payload| {
      let payload = with_id(payload, descriptor.id.as_deref());
      self.serialize(type_map.r#type.as_deref().unwrap_or_default(), &payload)
    });

    let Some(url) = descriptor.url.clone() else {
      return json!({ "error": { "status": "400", "title": "Mutation requires a url" } });
    };

    debug!(%method, url, "sending mutation");
    self.dispatch(Action::RequestMutation {
      payload: body.clone(),
    });

    let raw = self
      .request(
        &url,
        RequestOptions {
          method,
          headers: options.headers,
          body: body.clone(),
          base_url: None,
        },
      )
      .await;

    let extra = json!({ "payload": body });
    let result = self.normalize(&raw, Some(&extra));

    self.dispatch(Action::ReceiveMutation {
      result: result.clone(),
    });

    if !has_errors(&raw) {
      self.invalidate(&descriptor, method, &type_map, &raw, &result, &options.invalidate);
    }

    result
  }

  /// `mutate` with DELETE and no payload
  pub async fn delete(&self, target: impl Into<QueryArg>, options: MutateOptions) -> Value {
    self
      .mutate(target, None, options.method(Method::Delete))
      .await
  }

  fn invalidate(
    &self,
    descriptor: &RequestDescriptor,
    method: Method,
    type_map: &TypeMap,
    raw: &Value,
    result: &Value,
    invalidate: &Invalidate,
  ) {
    let invalid: Option<Vec<String>> = match invalidate {
      Invalidate::Types(types) => Some(types.clone()),
      Invalidate::Disabled => None,
      Invalidate::Inferred => Some(type_map.all().map(String::from).collect()),
    };
    let has_data = raw.get("data").is_some_and(|d| !d.is_null());

    for entry in self.inner.cache.entries() {
      if method == Method::Delete && descriptor.id.is_some() && entry.id() == descriptor.id.as_deref() {
        trace!(url = entry.url(), "dropping deleted resource");
        entry.lock().cache = None;
        continue;
      }

      if entry.id().is_some() && entry.url() == descriptor.url.as_deref() && has_data {
        trace!(url = entry.url(), "patching cached resource");
        entry.lock().cache = Some(raw.clone());
        entry.notify(&QueryEvent {
          is_fetching: false,
          result: Some(result.clone()),
        });
        continue;
      }

      let Some(invalid) = &invalid else {
        continue;
      };

      if !entry.type_map(&self.inner.schema).intersects(invalid) {
        continue;
      }

      let observed = {
        let mut state = entry.lock();
        state.cache = None;
        !state.subscribers.is_empty()
      };

      if observed {
        debug!(url = entry.url(), "refetching invalidated query");
        drop(self.fetch(Arc::clone(&entry), FetchOptions::forced()));
      } else {
        trace!(url = entry.url(), "invalidated query");
      }
    }
  }
}

/// Merge the target id into an object payload; an id in the payload wins.
fn with_id(payload: Value, id: Option<&str>) -> Value {
  match (payload, id) {
    (Value::Object(map), Some(id)) => {
      let mut merged = serde_json::Map::new();
      merged.insert("id".into(), Value::String(id.to_string()));
      merged.extend(map);
      Value::Object(merged)
    }
    (payload, _) => payload,
  }
}
