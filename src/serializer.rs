//! Bidirectional conversion between flat domain objects and JSON:API documents.
//!
//! `serialize` turns a domain object (or a list of them) into a request
//! document, reducing relationship values to `{type, id}` references and
//! dropping read-only fields. `deserialize` flattens a response document:
//! attributes are coerced per the schema and related resources from
//! `included` are spliced in place of their references.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};

use crate::schema::{FieldKind, Schema};
use crate::types::is_truthy;

/// Attribute naming an explicit per-record type override.
pub const TYPE_OVERRIDE_FIELD: &str = "_type";

/// Schema-aware serializer. With an empty schema every resource passes through untouched.
#[derive(Debug, Clone, Copy)]
pub struct Serializer<'a> {
  schema: &'a Schema,
}

impl<'a> Serializer<'a> {
  pub fn new(schema: &'a Schema) -> Self {
    Self { schema }
  }

  // ==========================================================================
  // Write direction
  // ==========================================================================

  /// Serialize a domain object, a list of them, or null into a request document.
  pub fn serialize(&self, type_name: &str, attrs: &Value) -> Value {
    match attrs {
      Value::Null => json!({ "type": type_name, "data": null }),
      Value::Array(records) => json!({
        "data": records
          .iter()
          .map(|rec| self.parse_resource(type_name, rec))
          .collect::<Vec<_>>(),
      }),
      record => json!({ "data": self.parse_resource(type_name, record) }),
    }
  }

  fn parse_resource(&self, type_name: &str, record: &Value) -> Value {
    let mut attrs = match record {
      Value::Object(map) => map.clone(),
      Value::Null => return Value::Null,
      // A bare scalar stands for the record's id
      scalar => {
        let mut map = Map::new();
        map.insert("id".into(), scalar.clone());
        map
      }
    };

    let mut type_name = type_name.to_string();
    if let Some(Value::String(t)) = attrs.remove(TYPE_OVERRIDE_FIELD) {
      if !t.is_empty() {
        type_name = t;
      }
    }

    let mut data = Map::new();
    data.insert("type".into(), Value::String(type_name.clone()));

    if let Some(id) = attrs.remove("id").filter(is_truthy) {
      data.insert("id".into(), Value::String(id_string(&id)));
    }

    let Some(config) = self.schema.get(&type_name) else {
      data.insert("attributes".into(), Value::Object(attrs));
      return Value::Object(data);
    };

    let original = attrs.clone();
    let mut relationships = Map::new();

    for (field, rel) in &config.relationships {
      let Some(value) = attrs.remove(field) else {
        continue;
      };

      let Some(related) = rel.target.resolve(&attrs) else {
        continue;
      };

      if rel.read_only {
        continue;
      }

      let reference = match &value {
        Value::Array(items) => Value::Array(
          items
            .iter()
            .map(|item| self.parse_relationship(&related, item))
            .collect(),
        ),
        other => self.parse_relationship(&related, other),
      };

      relationships.insert(field.clone(), json!({ "data": reference }));
    }

    for (field, def) in &config.fields {
      if let Some(serialize) = &def.serialize {
        if let Some(value) = attrs.get(field) {
          let value = serialize(value, &original);
          attrs.insert(field.clone(), value);
        }
      }
    }

    for (field, def) in &config.fields {
      if def.read_only {
        attrs.remove(field);
      }
    }

    data.insert("attributes".into(), Value::Object(attrs));

    if !relationships.is_empty() {
      data.insert("relationships".into(), Value::Object(relationships));
    }

    Value::Object(data)
  }

  /// Reduce a related record to a `{type, id}` reference.
  fn parse_relationship(&self, type_name: &str, record: &Value) -> Value {
    match self.parse_resource(type_name, record) {
      Value::Object(resource) => json!({
        "type": resource.get("type").cloned().unwrap_or(Value::Null),
        "id": resource.get("id").cloned().unwrap_or(Value::Null),
      }),
      _ => Value::Null,
    }
  }

  // ==========================================================================
  // Read direction
  // ==========================================================================

  /// Flatten a response document into domain objects.
  ///
  /// Error documents are normalized into a single `error` (or passed
  /// through as `errors` when every entry is a 422 validation error).
  /// Documents without `data` are returned unchanged.
  pub fn deserialize(&self, doc: &Value) -> Value {
    let Some(res) = doc.as_object() else {
      return Value::Null;
    };

    if let Some(error) = res.get("error").filter(|e| is_truthy(e)) {
      if error.is_object() {
        return doc.clone();
      }
      let message = match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
      };
      let status = res
        .get("status")
        .filter(|s| is_truthy(s))
        .map(id_string)
        .unwrap_or_else(|| "400".to_string());
      return json!({
        "error": { "status": status, "title": message, "message": message }
      });
    }

    if let Some(errors) = res.get("errors").filter(|e| is_truthy(e)) {
      let hoisted = errors.as_array().and_then(|list| {
        list
          .iter()
          .find(|e| e.get("status").and_then(Value::as_str) != Some("422"))
      });
      return match hoisted {
        Some(error) => json!({ "error": error }),
        None => json!({ "errors": errors }),
      };
    }

    let data = match res.get("data") {
      Some(data) if !data.is_null() => data,
      _ => return doc.clone(),
    };

    let primary: Vec<&Value> = match data {
      Value::Array(items) => items.iter().collect(),
      single => vec![single],
    };

    let pool: Vec<&Value> = primary
      .iter()
      .copied()
      .chain(
        res
          .get("included")
          .and_then(Value::as_array)
          .into_iter()
          .flatten(),
      )
      .collect();

    let graph = Graph::new(self.schema, &pool);

    let flattened = match data {
      Value::Array(items) => Value::Array(
        items
          .iter()
          .filter_map(|item| graph.find(resource_type(item), resource_id(item)))
          .map(|idx| graph.expand(idx))
          .collect(),
      ),
      single => graph
        .find(resource_type(single), resource_id(single))
        .map(|idx| graph.expand(idx))
        .unwrap_or(Value::Null),
    };

    let mut out = Map::new();
    out.insert("data".into(), flattened);
    for (key, value) in res {
      if key != "data" && key != "included" {
        out.insert(key.clone(), value.clone());
      }
    }
    Value::Object(out)
  }
}

/// The pooled resources of one document with their coerced attributes.
struct Graph<'d> {
  resources: Vec<&'d Value>,
  attributes: Vec<Map<String, Value>>,
  index: HashMap<(Option<String>, Option<String>), usize>,
}

impl<'d> Graph<'d> {
  fn new(schema: &Schema, pool: &[&'d Value]) -> Self {
    let mut index = HashMap::new();
    let mut attributes = Vec::with_capacity(pool.len());

    for (i, resource) in pool.iter().enumerate() {
      index
        .entry((resource_type(resource).map(String::from), resource_id(resource)))
        .or_insert(i);
      attributes.push(coerce_resource(schema, resource));
    }

    Self {
      resources: pool.to_vec(),
      attributes,
      index,
    }
  }

  fn find(&self, type_name: Option<&str>, id: Option<String>) -> Option<usize> {
    self.index.get(&(type_name.map(String::from), id)).copied()
  }

  /// Attributes of a resource with its relationships spliced in.
  ///
  /// Every resource is expanded at most once per tree, so the output stays
  /// linear in the number of references even for many-to-many graphs.
  fn expand(&self, idx: usize) -> Value {
    let mut visited = HashSet::new();
    self.expand_guarded(idx, &mut visited)
  }

  fn expand_guarded(&self, idx: usize, visited: &mut HashSet<usize>) -> Value {
    let mut attrs = self.attributes[idx].clone();

    // Already expanded somewhere in this tree: embed flat
    if !visited.insert(idx) {
      return Value::Object(attrs);
    }

    if let Some(rels) = self.resources[idx]
      .get("relationships")
      .and_then(Value::as_object)
    {
      for (field, rel) in rels {
        let reference = match rel.get("data") {
          Some(reference) if !reference.is_null() => reference,
          _ => continue,
        };

        let spliced = match reference {
          Value::Array(refs) => Value::Array(
            refs
              .iter()
              .filter_map(|r| self.find(resource_type(r), resource_id(r)))
              .map(|child| self.expand_guarded(child, visited))
              .collect(),
          ),
          single => self
            .find(resource_type(single), resource_id(single))
            .map(|child| self.expand_guarded(child, visited))
            .unwrap_or(Value::Null),
        };

        attrs.insert(field.clone(), spliced);
      }
    }

    Value::Object(attrs)
  }
}

fn resource_type(resource: &Value) -> Option<&str> {
  resource.get("type").and_then(Value::as_str)
}

fn resource_id(resource: &Value) -> Option<String> {
  resource.get("id").filter(|id| !id.is_null()).map(id_string)
}

fn id_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// `{id, ...attributes}` with declared fields coerced and resolved.
fn coerce_resource(schema: &Schema, resource: &Value) -> Map<String, Value> {
  let mut attrs = Map::new();
  if let Some(id) = resource.get("id") {
    attrs.insert("id".into(), id.clone());
  }
  if let Some(raw) = resource.get("attributes").and_then(Value::as_object) {
    for (key, value) in raw {
      attrs.insert(key.clone(), value.clone());
    }
  }

  let Some(config) = resource_type(resource).and_then(|t| schema.get(t)) else {
    return attrs;
  };

  for (field, def) in &config.fields {
    if let Some(kind) = def.kind {
      if let Some(value) = coerce_value(attrs.get(field), kind) {
        attrs.insert(field.clone(), value);
      }
    }

    if let Some(resolve) = &def.resolve {
      let current = attrs.get(field).cloned().unwrap_or(Value::Null);
      let value = resolve(&current, &attrs, resource);
      attrs.insert(field.clone(), value);
    }
  }

  attrs
}

/// Coerce a raw attribute. `None` in and out means the attribute is absent.
pub fn coerce_value(value: Option<&Value>, kind: FieldKind) -> Option<Value> {
  let truthy = value.map(is_truthy).unwrap_or(false);

  match kind {
    FieldKind::String => Some(Value::String(match value {
      Some(Value::Number(n)) if n.as_f64() == Some(0.0) => "0".to_string(),
      Some(v) if truthy => id_string(v),
      _ => String::new(),
    })),
    FieldKind::Number if truthy => Some(value.map(parse_int).unwrap_or(Value::Null)),
    FieldKind::Float if truthy => Some(value.map(parse_float).unwrap_or(Value::Null)),
    FieldKind::Date if truthy => Some(value.map(parse_date).unwrap_or(Value::Null)),
    FieldKind::Boolean => Some(Value::Bool(truthy)),
    _ => value.cloned(),
  }
}

/// Leading-integer parse; anything unparsable becomes null.
fn parse_int(value: &Value) -> Value {
  match value {
    Value::Number(n) => match n.as_i64() {
      Some(i) => json!(i),
      None => n
        .as_f64()
        .map(f64::trunc)
        .map(|f| if f.abs() < i64::MAX as f64 { json!(f as i64) } else { json!(f) })
        .unwrap_or(Value::Null),
    },
    Value::String(s) => {
      let s = s.trim_start();
      let end = s
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
      let digits = &s[..end];
      match digits.parse::<i64>() {
        Ok(i) => json!(i),
        // Out of i64 range
        Err(_) => digits
          .parse::<f64>()
          .ok()
          .filter(|f| f.is_finite())
          .map(|f| json!(f.trunc()))
          .unwrap_or(Value::Null),
      }
    }
    _ => Value::Null,
  }
}

/// Leading-float parse; anything unparsable becomes null.
fn parse_float(value: &Value) -> Value {
  match value {
    Value::Number(_) => value.clone(),
    Value::String(s) => {
      let s = s.trim_start();
      // Longest prefix that parses as a float
      (1..=s.len())
        .rev()
        .filter(|end| s.is_char_boundary(*end))
        .find_map(|end| s[..end].parse::<f64>().ok().filter(|f| f.is_finite()))
        .map(|f| json!(f))
        .unwrap_or(Value::Null)
    }
    _ => Value::Null,
  }
}

/// Parse an instant and render it as RFC 3339 UTC with milliseconds.
fn parse_date(value: &Value) -> Value {
  let parsed: Option<DateTime<Utc>> = match value {
    Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
    Value::String(s) => DateTime::parse_from_rfc3339(s)
      .map(|dt| dt.with_timezone(&Utc))
      .ok()
      .or_else(|| {
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
          .iter()
          .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
          .map(|dt| dt.and_utc())
      })
      .or_else(|| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
          .ok()
          .and_then(|d| d.and_hms_opt(0, 0, 0))
          .map(|dt| dt.and_utc())
      }),
    _ => None,
  };

  parsed
    .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
    .unwrap_or(Value::Null)
}

/// Read a date attribute produced by deserialization.
pub fn attribute_date(value: &Value) -> Option<DateTime<Utc>> {
  value
    .as_str()
    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support;

  fn success() -> Value {
    json!({
      "data": {
        "id": "1",
        "type": "todos",
        "attributes": {
          "title": "Clean the kitchen!",
          "created": "2020-01-01T00:00:00.000Z",
        },
        "relationships": {
          "user": { "data": { "type": "users", "id": "2" } },
        },
      },
      "included": [
        { "id": "2", "type": "users", "attributes": { "name": "Steve" } },
      ],
    })
  }

  #[test]
  fn test_serializes_without_a_schema() {
    let schema = Schema::default();
    let result =
      Serializer::new(&schema).serialize("todos", &json!({ "id": 1, "title": "Clean the kitchen" }));
    assert_eq!(
      result,
      json!({
        "data": { "id": "1", "type": "todos", "attributes": { "title": "Clean the kitchen" } }
      })
    );
  }

  #[test]
  fn test_serializes_with_a_schema() {
    let schema = test_support::schema();
    let result = Serializer::new(&schema).serialize(
      "todos",
      &json!({
        "id": 1,
        "title": "Clean the kitchen",
        "user": { "id": 2, "name": "Steve" },
        "comments": [{ "id": "1", "text": "Almost done..." }],
      }),
    );

    assert_eq!(
      result,
      json!({
        "data": {
          "id": "1",
          "type": "todos",
          "attributes": { "title": "Clean the kitchen" },
          "relationships": {
            "user": { "data": { "type": "users", "id": "2" } },
            "comments": { "data": [{ "type": "comments", "id": "1" }] },
          },
        }
      })
    );
  }

  #[test]
  fn test_serializes_polymorphic_resources() {
    let schema = test_support::schema();
    let result = Serializer::new(&schema).serialize(
      "photos",
      &json!({ "id": 1, "name": "todo.jpg", "owner_type": "todos", "owner": { "id": 1 } }),
    );

    assert_eq!(
      result,
      json!({
        "data": {
          "id": "1",
          "type": "photos",
          "attributes": { "name": "todo.jpg" },
          "relationships": { "owner": { "data": { "type": "todos", "id": "1" } } },
        }
      })
    );
  }

  #[test]
  fn test_skips_relationships_without_a_type() {
    let schema = test_support::schema();
    let result =
      Serializer::new(&schema).serialize("photos", &json!({ "id": 1, "owner": { "id": 1 } }));
    assert_eq!(
      result,
      json!({ "data": { "id": "1", "type": "photos", "attributes": {} } })
    );
  }

  #[test]
  fn test_omits_read_only_fields() {
    let schema = test_support::schema();
    let result = Serializer::new(&schema).serialize(
      "todos",
      &json!({ "id": 1, "title": "Clean the kitchen", "status": "done" }),
    );
    assert_eq!(
      result,
      json!({
        "data": { "id": "1", "type": "todos", "attributes": { "title": "Clean the kitchen" } }
      })
    );
  }

  #[test]
  fn test_read_only_relationships_are_dropped() {
    let schema = Schema::parse(&json!({
      "todos": { "relationships": { "user": { "type": "users", "readOnly": true } } }
    }));
    let result =
      Serializer::new(&schema).serialize("todos", &json!({ "title": "a", "user": { "id": 2 } }));
    assert_eq!(
      result,
      json!({ "data": { "type": "todos", "attributes": { "title": "a" } } })
    );
  }

  #[test]
  fn test_supports_a_field_serializer() {
    let schema = test_support::schema().with_field_serializer("todos", "title", |value, attrs| {
      let description = attrs.get("description").and_then(Value::as_str).unwrap_or("");
      json!(format!("{}{}", value.as_str().unwrap_or(""), description))
    });
    let result = Serializer::new(&schema).serialize(
      "todos",
      &json!({ "id": 1, "title": "foo", "description": "bar" }),
    );
    assert_eq!(
      result,
      json!({
        "data": {
          "id": "1",
          "type": "todos",
          "attributes": { "title": "foobar", "description": "bar" },
        }
      })
    );
  }

  #[test]
  fn test_serializes_lists_nulls_and_overrides() {
    let schema = test_support::schema();
    let serializer = Serializer::new(&schema);

    assert_eq!(
      serializer.serialize("todos", &Value::Null),
      json!({ "type": "todos", "data": null })
    );

    let result = serializer.serialize(
      "todos",
      &json!([{ "id": 1, "title": "a" }, { "_type": "notes", "title": "b", "user": 3 }]),
    );
    assert_eq!(
      result,
      json!({
        "data": [
          { "id": "1", "type": "todos", "attributes": { "title": "a" } },
          { "type": "notes", "attributes": { "title": "b", "user": 3 } },
        ]
      })
    );
  }

  #[test]
  fn test_relationship_ids_default_to_null() {
    let schema = test_support::schema();
    let result = Serializer::new(&schema).serialize(
      "todos",
      &json!({ "title": "a", "user": { "name": "new" }, "photos": null }),
    );
    assert_eq!(
      result["data"]["relationships"],
      json!({
        "user": { "data": { "type": "users", "id": null } },
        "photos": { "data": null },
      })
    );
  }

  #[test]
  fn test_normalizes_a_successful_response() {
    let schema = Schema::default();
    let result = Serializer::new(&schema).deserialize(&success());
    assert_eq!(
      result,
      json!({
        "data": {
          "id": "1",
          "title": "Clean the kitchen!",
          "created": "2020-01-01T00:00:00.000Z",
          "user": { "id": "2", "name": "Steve" },
        }
      })
    );
  }

  #[test]
  fn test_deserialize_is_idempotent() {
    let schema = test_support::schema();
    let serializer = Serializer::new(&schema);
    let doc = success();
    let first = serializer.deserialize(&doc);
    let second = serializer.deserialize(&doc);
    assert_eq!(first, second);
    assert_eq!(doc, success());
  }

  #[test]
  fn test_coerces_typed_attributes() {
    let schema = Schema::parse(&json!({
      "todos": { "fields": { "created": { "type": "date" } } }
    }));
    let doc = json!({
      "data": {
        "id": "1",
        "type": "todos",
        "attributes": { "created": "2020-01-01T02:00:00+02:00" },
      }
    });
    let result = Serializer::new(&schema).deserialize(&doc);
    assert_eq!(result["data"]["created"], json!("2020-01-01T00:00:00.000Z"));
    assert!(attribute_date(&result["data"]["created"]).is_some());

    // Timestamps without an offset are read as UTC
    for (raw, expected) in [
      ("2020-01-01T10:00:00", "2020-01-01T10:00:00.000Z"),
      ("2020-01-01 10:00:00", "2020-01-01T10:00:00.000Z"),
      ("2020-01-01T10:00:00.250", "2020-01-01T10:00:00.250Z"),
      ("2020-01-01T10:00:00.000Z", "2020-01-01T10:00:00.000Z"),
    ] {
      let doc = json!({
        "data": { "id": "1", "type": "todos", "attributes": { "created": raw } }
      });
      let result = Serializer::new(&schema).deserialize(&doc);
      assert_eq!(result["data"]["created"], json!(expected), "{}", raw);
    }
  }

  #[test]
  fn test_handles_polymorphic_resources() {
    let schema = test_support::schema();
    let result = Serializer::new(&schema).deserialize(&json!({
      "data": {
        "id": "1",
        "type": "photos",
        "attributes": { "name": "photo.jpg" },
        "relationships": { "owner": { "data": { "type": "todos", "id": "1" } } },
      },
      "included": [
        {
          "id": "1",
          "type": "todos",
          "attributes": { "title": "Clean the kitchen!", "status": "done" },
        },
      ],
    }));

    assert_eq!(
      result,
      json!({
        "data": {
          "id": "1",
          "name": "photo.jpg",
          "url": "/photos/photo.jpg",
          "owner": { "id": "1", "title": "Clean the kitchen!", "status": "DONE" },
        }
      })
    );
  }

  #[test]
  fn test_lists_keep_order_and_pass_meta_through() {
    let schema = Schema::default();
    let result = Serializer::new(&schema).deserialize(&json!({
      "data": [
        { "id": "2", "type": "todos", "attributes": { "title": "b" },
          "relationships": { "comments": { "data": [
            { "type": "comments", "id": "9" },
            { "type": "comments", "id": "404" },
          ] } } },
        { "id": "1", "type": "todos", "attributes": { "title": "a" },
          "relationships": { "user": { "data": { "type": "users", "id": "404" } },
                             "photos": { "data": null } } },
      ],
      "included": [
        { "id": "9", "type": "comments", "attributes": { "text": "hi" } },
        { "id": "1", "type": "users", "attributes": { "name": "not a todo" } },
      ],
      "meta": { "total": 2 },
      "links": { "next": "/todos?page[number]=2" },
    }));

    assert_eq!(
      result,
      json!({
        "data": [
          { "id": "2", "title": "b", "comments": [{ "id": "9", "text": "hi" }] },
          { "id": "1", "title": "a", "user": null },
        ],
        "meta": { "total": 2 },
        "links": { "next": "/todos?page[number]=2" },
      })
    );
  }

  #[test]
  fn test_breaks_relationship_cycles() {
    let schema = Schema::default();
    let result = Serializer::new(&schema).deserialize(&json!({
      "data": {
        "id": "1", "type": "todos", "attributes": { "title": "a" },
        "relationships": { "user": { "data": { "type": "users", "id": "2" } } },
      },
      "included": [
        { "id": "2", "type": "users", "attributes": { "name": "Steve" },
          "relationships": { "todos": { "data": [{ "type": "todos", "id": "1" }] } } },
      ],
    }));

    assert_eq!(
      result,
      json!({
        "data": {
          "id": "1",
          "title": "a",
          "user": { "id": "2", "name": "Steve", "todos": [{ "id": "1", "title": "a" }] },
        }
      })
    );
  }

  fn count_key(value: &Value, key: &str) -> usize {
    match value {
      Value::Object(map) => map
        .iter()
        .map(|(k, v)| usize::from(k == key) + count_key(v, key))
        .sum(),
      Value::Array(items) => items.iter().map(|v| count_key(v, key)).sum(),
      _ => 0,
    }
  }

  #[test]
  fn test_many_to_many_graphs_stay_bounded() {
    let n = 8;
    let refs = |type_name: &str| -> Value {
      Value::Array(
        (1..=n)
          .map(|i| json!({ "type": type_name, "id": i.to_string() }))
          .collect(),
      )
    };
    let todos: Vec<Value> = (1..=n)
      .map(|i| {
        json!({
          "id": i.to_string(), "type": "todos", "attributes": { "title": format!("t{}", i) },
          "relationships": { "tags": { "data": refs("tags") } },
        })
      })
      .collect();
    let tags: Vec<Value> = (1..=n)
      .map(|i| {
        json!({
          "id": i.to_string(), "type": "tags", "attributes": { "label": format!("l{}", i) },
          "relationships": { "todos": { "data": refs("todos") } },
        })
      })
      .collect();

    let schema = Schema::default();
    let result = Serializer::new(&schema).deserialize(&json!({ "data": todos, "included": tags }));

    let items = result["data"].as_array().unwrap();
    assert_eq!(items.len(), n);
    for item in items {
      // Each todo and each tag is expanded exactly once per tree
      assert_eq!(count_key(item, "tags"), n);
      assert_eq!(count_key(item, "todos"), n);
      assert_eq!(item["tags"].as_array().unwrap().len(), n);
    }
    assert!(result.to_string().len() < 200_000);
  }

  #[test]
  fn test_error_documents() {
    let schema = Schema::default();
    let serializer = Serializer::new(&schema);

    let object = json!({ "error": { "status": "404", "title": "Not found" } });
    assert_eq!(serializer.deserialize(&object), object);

    assert_eq!(
      serializer.deserialize(&json!({ "error": "Boom", "status": 503 })),
      json!({ "error": { "status": "503", "title": "Boom", "message": "Boom" } })
    );
    assert_eq!(
      serializer.deserialize(&json!({ "error": "Boom" })),
      json!({ "error": { "status": "400", "title": "Boom", "message": "Boom" } })
    );

    let validation = json!([
      { "status": "422", "source": { "pointer": "/data/attributes/title" } },
    ]);
    assert_eq!(
      serializer.deserialize(&json!({ "errors": validation })),
      json!({ "errors": validation })
    );

    assert_eq!(
      serializer.deserialize(&json!({ "errors": [
        { "status": "422", "title": "Invalid" },
        { "status": "403", "title": "Forbidden" },
      ] })),
      json!({ "error": { "status": "403", "title": "Forbidden" } })
    );
  }

  #[test]
  fn test_documents_without_data_pass_through() {
    let schema = Schema::default();
    let serializer = Serializer::new(&schema);
    let meta = json!({ "meta": { "count": 3 } });
    assert_eq!(serializer.deserialize(&meta), meta);
    assert_eq!(serializer.deserialize(&json!({})), json!({}));
    assert_eq!(serializer.deserialize(&Value::Null), Value::Null);
  }

  #[test]
  fn test_coerce_value() {
    assert_eq!(coerce_value(Some(&json!(0)), FieldKind::String), Some(json!("0")));
    assert_eq!(coerce_value(None, FieldKind::String), Some(json!("")));
    assert_eq!(coerce_value(Some(&json!(12)), FieldKind::String), Some(json!("12")));
    assert_eq!(coerce_value(Some(&json!("12px")), FieldKind::Number), Some(json!(12)));
    assert_eq!(coerce_value(Some(&json!("abc")), FieldKind::Number), Some(Value::Null));
    assert_eq!(
      coerce_value(Some(&json!("99999999999999999999")), FieldKind::Number),
      Some(json!(1e20))
    );
    assert_eq!(coerce_value(Some(&json!("-")), FieldKind::Number), Some(Value::Null));
    assert_eq!(coerce_value(Some(&json!(2.9)), FieldKind::Number), Some(json!(2)));
    assert_eq!(coerce_value(Some(&json!(1e20)), FieldKind::Number), Some(json!(1e20)));
    assert_eq!(coerce_value(Some(&json!("")), FieldKind::Number), Some(json!("")));
    assert_eq!(coerce_value(None, FieldKind::Number), None);
    assert_eq!(coerce_value(Some(&json!("1.5kg")), FieldKind::Float), Some(json!(1.5)));
    assert_eq!(coerce_value(Some(&json!("yes")), FieldKind::Boolean), Some(json!(true)));
    assert_eq!(coerce_value(Some(&json!(0)), FieldKind::Boolean), Some(json!(false)));
    assert_eq!(coerce_value(None, FieldKind::Boolean), Some(json!(false)));
    assert_eq!(coerce_value(Some(&json!("nope")), FieldKind::Date), Some(Value::Null));
    assert_eq!(
      coerce_value(Some(&json!("2020-01-01")), FieldKind::Date),
      Some(json!("2020-01-01T00:00:00.000Z"))
    );
  }
}
