//! Resolving which resource types a request or mutation touches.

use serde_json::Value;

use crate::query::RequestDescriptor;
use crate::schema::Schema;

/// The primary type of a request plus every related type it implies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeMap {
  pub r#type: Option<String>,
  pub relationships: Vec<String>,
}

impl TypeMap {
  /// Primary type followed by the related types.
  pub fn all(&self) -> impl Iterator<Item = &str> {
    self
      .r#type
      .iter()
      .chain(self.relationships.iter())
      .map(String::as_str)
  }

  /// Whether any type in this map appears in `types`.
  pub fn intersects(&self, types: &[String]) -> bool {
    self.all().any(|t| types.iter().any(|other| other == t))
  }
}

/// Walk path keys through the schema, collecting the type reached at each step.
///
/// The first key is looked up directly; each following key must be a
/// relationship of the type reached so far. Once a step fails the walk is
/// over and later keys never resolve. When nothing resolves, the first raw
/// key is returned as a best effort.
pub fn parse_types<S: AsRef<str>>(keys: &[S], schema: &Schema) -> Vec<String> {
  let mut types: Vec<String> = Vec::new();

  for (i, key) in keys.iter().enumerate() {
    let key = key.as_ref();

    let next = if i == 0 {
      schema.get(key).map(|entry| entry.type_name.clone())
    } else {
      types
        .last()
        .and_then(|type_name| schema.get(type_name))
        .and_then(|entry| entry.relationships.get(key))
        .and_then(|rel| rel.target.fixed())
        .map(String::from)
    };

    match next {
      Some(type_name) => types.push(type_name),
      None => break,
    }
  }

  if types.is_empty() {
    keys
      .first()
      .map(|k| vec![k.as_ref().to_string()])
      .unwrap_or_default()
  } else {
    types
  }
}

/// Compute the primary type and related types for a request and optional mutation payload.
pub fn get_type_map(
  descriptor: &RequestDescriptor,
  schema: &Schema,
  payload: Option<&Value>,
) -> TypeMap {
  let mut relationships = parse_types(&descriptor.keys, schema);
  let primary = relationships.pop();

  if let Some(primary) = &primary {
    for path in include_paths(descriptor.params.get("include")) {
      let mut walk = vec![primary.clone()];
      walk.extend(path.split('.').map(String::from));
      relationships.extend(parse_types(&walk, schema).into_iter().skip(1));
    }

    if let Some(payload) = payload {
      merge_payload_types(primary, payload, schema, &mut relationships);
    }
  }

  let mut seen = Vec::with_capacity(relationships.len());
  for type_name in relationships {
    if !seen.contains(&type_name) {
      seen.push(type_name);
    }
  }

  TypeMap {
    r#type: primary,
    relationships: seen,
  }
}

/// `include` may be a comma-separated string or a sequence of them.
fn include_paths(include: Option<&Value>) -> Vec<String> {
  let values: Vec<&str> = match include {
    Some(Value::String(s)) => vec![s.as_str()],
    Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
    _ => Vec::new(),
  };

  values
    .into_iter()
    .flat_map(|s| s.split(','))
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from)
    .collect()
}

/// Collect the types implied by relationship values present in a write payload.
fn merge_payload_types(type_name: &str, payload: &Value, schema: &Schema, types: &mut Vec<String>) {
  let Some(entry) = schema.get(type_name) else {
    return;
  };

  let attrs = match payload {
    Value::Object(map) => map,
    Value::Array(items) => {
      for item in items {
        merge_payload_types(type_name, item, schema, types);
      }
      return;
    }
    _ => return,
  };

  for (field, rel) in &entry.relationships {
    let Some(value) = attrs.get(field).filter(|v| is_truthy(v)) else {
      continue;
    };

    let Some(related) = rel.target.resolve(attrs) else {
      continue;
    };

    types.push(related.clone());
    merge_payload_types(&related, value, schema, types);
  }
}

/// JavaScript-style truthiness, which is what the wire convention assumes.
pub(crate) fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}
