//! Request descriptors: turning a flexible query argument into a canonical request.
//!
//! A query argument is either a path string or a sequence of path segments,
//! optionally ending with a parameters object. Parsing produces a
//! [`RequestDescriptor`] with a canonical URL, the trailing resource id (if
//! any), the query parameters and the non-identifier path segments.
//!
//! # Example
//!
//! ```ignore
//! let arg = QueryArg::from(vec![
//!     Segment::from("users"),
//!     Segment::from(1),
//!     Segment::from("todos"),
//!     Segment::from(json!({ "page": { "size": 20 } })),
//! ]);
//!
//! let descriptor = parse_query_arg(&arg);
//! assert_eq!(descriptor.url.as_deref(), Some("/users/1/todos?page[size]=20"));
//! assert_eq!(descriptor.keys, vec!["users", "todos"]);
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};

/// Overrides the default query string serialization.
pub type StringifyFn = Arc<dyn Fn(&Map<String, Value>) -> String + Send + Sync>;

static NUMERIC_ID: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("numeric id pattern"));

static UUID_ID: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
    .expect("uuid pattern")
});

/// One element of a segmented query argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
  Id(i64),
  Name(String),
  Params(Map<String, Value>),
}

impl From<&str> for Segment {
  fn from(s: &str) -> Self {
    Segment::Name(s.to_string())
  }
}

impl From<String> for Segment {
  fn from(s: String) -> Self {
    Segment::Name(s)
  }
}

impl From<i64> for Segment {
  fn from(n: i64) -> Self {
    Segment::Id(n)
  }
}

impl From<Map<String, Value>> for Segment {
  fn from(params: Map<String, Value>) -> Self {
    Segment::Params(params)
  }
}

impl From<Value> for Segment {
  fn from(value: Value) -> Self {
    match value {
      Value::Object(map) => Segment::Params(map),
      Value::String(s) => Segment::Name(s),
      Value::Number(n) => match n.as_i64() {
        Some(i) => Segment::Id(i),
        None => Segment::Name(n.to_string()),
      },
      other => Segment::Name(other.to_string()),
    }
  }
}

/// The argument identifying a request. This is also the cache key stored in snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryArg {
  /// No request; yields a descriptor without a URL
  #[default]
  Empty,
  Path(String),
  Segments(Vec<Segment>),
}

impl QueryArg {
  /// Whether the argument can produce a URL at all.
  pub fn is_empty(&self) -> bool {
    match self {
      QueryArg::Empty => true,
      QueryArg::Path(p) => p.is_empty(),
      QueryArg::Segments(_) => false,
    }
  }
}

impl From<&str> for QueryArg {
  fn from(s: &str) -> Self {
    QueryArg::Path(s.to_string())
  }
}

impl From<String> for QueryArg {
  fn from(s: String) -> Self {
    QueryArg::Path(s)
  }
}

impl From<Vec<Segment>> for QueryArg {
  fn from(segments: Vec<Segment>) -> Self {
    QueryArg::Segments(segments)
  }
}

impl<const N: usize> From<[Segment; N]> for QueryArg {
  fn from(segments: [Segment; N]) -> Self {
    QueryArg::Segments(segments.into())
  }
}

impl From<&QueryArg> for QueryArg {
  fn from(arg: &QueryArg) -> Self {
    arg.clone()
  }
}

/// Canonical form of a query argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestDescriptor {
  /// Absolute path plus canonical query string; `None` for an empty argument
  pub url: Option<String>,
  /// Trailing numeric or UUID path segment
  pub id: Option<String>,
  pub params: Map<String, Value>,
  /// Path segments with every identifier removed
  pub keys: Vec<String>,
}

impl RequestDescriptor {
  /// Turn the descriptor back into an argument that parses to the same url, id and keys.
  pub fn to_arg(&self) -> QueryArg {
    match &self.url {
      Some(url) => QueryArg::Path(url.clone()),
      None => QueryArg::Empty,
    }
  }
}

/// Whether a path token addresses a single resource.
///
/// Only two shapes count: a decimal numeral and a canonical 8-4-4-4-12 hex
/// UUID. Anything else, including tokens that merely start with digits, is a
/// path segment.
pub fn is_identifier(token: &str) -> bool {
  NUMERIC_ID.is_match(token) || UUID_ID.is_match(token)
}

/// Parse a query argument with the default query string serialization.
pub fn parse_query_arg(arg: &QueryArg) -> RequestDescriptor {
  parse_query_arg_with(arg, None)
}

/// Parse a query argument, optionally overriding query string serialization.
pub fn parse_query_arg_with(arg: &QueryArg, stringify_fn: Option<&StringifyFn>) -> RequestDescriptor {
  if arg.is_empty() {
    return RequestDescriptor::default();
  }

  let single: [Segment; 1];
  let segments: &[Segment] = match arg {
    QueryArg::Segments(segments) => segments,
    QueryArg::Path(path) => {
      single = [Segment::Name(path.clone())];
      &single
    }
    QueryArg::Empty => &[],
  };

  let mut tokens: Vec<String> = Vec::new();
  let mut params = Map::new();
  let mut explicit = Map::new();

  for segment in segments {
    match segment {
      Segment::Id(n) => tokens.push(n.to_string()),
      Segment::Name(s) => {
        let (path, query) = match s.split_once('?') {
          Some((path, query)) => (path, Some(query)),
          None => (s.as_str(), None),
        };
        tokens.extend(path.split('/').filter(|p| !p.is_empty()).map(String::from));
        if let Some(query) = query {
          merge_params(&mut params, parse_query_string(query));
        }
      }
      Segment::Params(map) => merge_params(&mut explicit, map.clone()),
    }
  }

  // Explicit parameter objects win over parameters embedded in a path string
  merge_params(&mut params, explicit);

  let mut url = format!("/{}", tokens.join("/"));

  if !params.is_empty() {
    let query = match stringify_fn {
      Some(f) => f(&params),
      None => stringify(&params),
    };
    if !query.is_empty() {
      url.push('?');
      url.push_str(&query);
    }
  }

  let id = match tokens.last() {
    Some(last) if is_identifier(last) => tokens.pop(),
    _ => None,
  };

  let keys = tokens.into_iter().filter(|t| !is_identifier(t)).collect();

  RequestDescriptor {
    url: Some(url),
    id,
    params,
    keys,
  }
}

fn merge_params(target: &mut Map<String, Value>, source: Map<String, Value>) {
  for (key, value) in source {
    target.insert(key, value);
  }
}

/// Serialize parameters into a deterministic query string.
///
/// Keys are sorted at every nesting level, nested objects use bracket
/// notation (`page[size]=20`), scalar arrays are comma-joined and only values
/// are percent-encoded. Empty arrays and objects produce nothing.
pub fn stringify(params: &Map<String, Value>) -> String {
  let mut pairs = Vec::new();
  let mut keys: Vec<&String> = params.keys().collect();
  keys.sort();

  for key in keys {
    push_pairs(key.clone(), &params[key], &mut pairs);
  }

  pairs.join("&")
}

fn push_pairs(prefix: String, value: &Value, out: &mut Vec<String>) {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      for key in keys {
        push_pairs(format!("{}[{}]", prefix, key), &map[key], out);
      }
    }
    Value::Array(items) if items.is_empty() => {}
    Value::Array(items) if items.iter().all(is_scalar) => {
      let joined: Vec<String> = items.iter().map(|v| encode(&scalar_string(v))).collect();
      out.push(format!("{}={}", prefix, joined.join(",")));
    }
    Value::Array(items) => {
      for (i, item) in items.iter().enumerate() {
        push_pairs(format!("{}[{}]", prefix, i), item, out);
      }
    }
    scalar => out.push(format!("{}={}", prefix, encode(&scalar_string(scalar)))),
  }
}

fn is_scalar(value: &Value) -> bool {
  !matches!(value, Value::Object(_) | Value::Array(_))
}

fn scalar_string(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// RFC 3986 component encoding: spaces become `%20`, not `+`.
fn encode(s: &str) -> String {
  url::form_urlencoded::byte_serialize(s.as_bytes())
    .collect::<String>()
    .replace('+', "%20")
    .replace('*', "%2A")
}

fn decode(s: &str) -> String {
  // Without an '=' the whole input is parsed as a single decoded key
  url::form_urlencoded::parse(s.replace('=', "%3D").as_bytes())
    .next()
    .map(|(key, _)| key.into_owned())
    .unwrap_or_default()
}

/// Parse a query string produced by [`stringify`] back into parameters.
///
/// Values stay strings; comma-separated values become arrays.
pub fn parse_query_string(query: &str) -> Map<String, Value> {
  let mut params = Map::new();

  for pair in query.split('&').filter(|p| !p.is_empty()) {
    let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));

    let value = if raw_value.contains(',') {
      Value::Array(
        raw_value
          .split(',')
          .map(|v| Value::String(decode(v)))
          .collect(),
      )
    } else {
      Value::String(decode(raw_value))
    };

    let path = key_path(&decode(raw_key));
    insert_path(&mut params, &path, value);
  }

  params
}

/// `page[size]` -> `["page", "size"]`
fn key_path(key: &str) -> Vec<String> {
  let (base, rest) = match key.find('[') {
    Some(i) => (&key[..i], &key[i..]),
    None => return vec![key.to_string()],
  };

  let mut path = vec![base.to_string()];
  for part in rest.split('[').skip(1) {
    path.push(part.trim_end_matches(']').to_string());
  }
  path
}

fn insert_path(map: &mut Map<String, Value>, path: &[String], value: Value) {
  match path {
    [] => {}
    [last] => {
      map.insert(last.clone(), value);
    }
    [head, rest @ ..] => {
      let child = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
      if !child.is_object() {
        *child = Value::Object(Map::new());
      }
      if let Value::Object(child) = child {
        insert_path(child, rest, value);
      }
    }
  }
}
