//! Schema model for JSON:API resource types.
//!
//! A raw declaration maps each resource type to its attribute fields and its
//! relationships:
//!
//! ```yaml
//! todos:
//!   fields:
//!     title: string
//!     created: { type: date }
//!     status: { readOnly: true }
//!   relationships:
//!     user: users
//!     comments: { type: comments }
//! ```
//!
//! Hooks (`resolve`, field `serialize`, polymorphic `getType`) cannot be
//! written in a declaration file, so they are attached with the `with_*`
//! builder methods before the schema is handed to a client.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Post-coercion hook for a field: `(value, attributes, raw resource) -> value`.
pub type ResolveFn = Arc<dyn Fn(&Value, &Map<String, Value>, &Value) -> Value + Send + Sync>;

/// Write-direction hook for a field: `(value, attributes) -> value`.
pub type FieldSerializeFn = Arc<dyn Fn(&Value, &Map<String, Value>) -> Value + Send + Sync>;

/// Computes the concrete type of a polymorphic relationship from sibling attributes.
pub type TypeResolverFn = Arc<dyn Fn(&Map<String, Value>) -> Option<String> + Send + Sync>;

/// Coercion applied to an attribute when a document is deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
  String,
  Number,
  Float,
  Date,
  Boolean,
}

impl FieldKind {
  /// Unknown type names yield `None`, which makes the field a passthrough.
  pub fn parse(name: &str) -> Option<Self> {
    match name {
      "string" => Some(FieldKind::String),
      "number" => Some(FieldKind::Number),
      "float" => Some(FieldKind::Float),
      "date" => Some(FieldKind::Date),
      "boolean" => Some(FieldKind::Boolean),
      _ => None,
    }
  }
}

/// A declared attribute field.
#[derive(Clone, Default)]
pub struct FieldDef {
  pub kind: Option<FieldKind>,
  pub read_only: bool,
  pub resolve: Option<ResolveFn>,
  pub serialize: Option<FieldSerializeFn>,
}

impl fmt::Debug for FieldDef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FieldDef")
      .field("kind", &self.kind)
      .field("read_only", &self.read_only)
      .field("resolve", &self.resolve.is_some())
      .field("serialize", &self.serialize.is_some())
      .finish()
  }
}

/// How the type of a related resource is determined.
#[derive(Clone)]
pub enum RelationshipTarget {
  /// Always points at the named type
  Fixed(String),
  /// Polymorphic: the type is computed from the owning record's attributes
  Computed(TypeResolverFn),
  /// Declared without a type; never resolves
  Unknown,
}

impl RelationshipTarget {
  /// The statically known type, if any.
  pub fn fixed(&self) -> Option<&str> {
    match self {
      RelationshipTarget::Fixed(t) => Some(t),
      _ => None,
    }
  }

  /// Resolve the concrete type against the owning record's attributes.
  pub fn resolve(&self, attrs: &Map<String, Value>) -> Option<String> {
    match self {
      RelationshipTarget::Fixed(t) => Some(t.clone()),
      RelationshipTarget::Computed(f) => f(attrs).filter(|t| !t.is_empty()),
      RelationshipTarget::Unknown => None,
    }
  }
}

impl fmt::Debug for RelationshipTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RelationshipTarget::Fixed(t) => f.debug_tuple("Fixed").field(t).finish(),
      RelationshipTarget::Computed(_) => f.write_str("Computed(..)"),
      RelationshipTarget::Unknown => f.write_str("Unknown"),
    }
  }
}

/// A declared relationship.
#[derive(Debug, Clone)]
pub struct RelationshipDef {
  pub target: RelationshipTarget,
  pub read_only: bool,
}

/// Canonical schema entry for one resource type.
#[derive(Debug, Clone)]
pub struct ResourceSchema {
  pub type_name: String,
  pub fields: IndexMap<String, FieldDef>,
  pub relationships: IndexMap<String, RelationshipDef>,
}

impl ResourceSchema {
  fn new(type_name: &str) -> Self {
    Self {
      type_name: type_name.to_string(),
      fields: IndexMap::new(),
      relationships: IndexMap::new(),
    }
  }
}

/// Normalized lookup structure built once from a raw declaration.
#[derive(Debug, Clone, Default)]
pub struct Schema {
  types: IndexMap<String, ResourceSchema>,
}

impl Schema {
  /// Normalize a raw declaration.
  ///
  /// Non-object entries are skipped; a declaration that is not an object at
  /// all produces an empty schema.
  pub fn parse(raw: &Value) -> Self {
    let Some(root) = raw.as_object() else {
      return Self::default();
    };

    let mut types = IndexMap::new();

    for (name, decl) in root {
      let Some(decl) = decl.as_object() else {
        continue;
      };

      let type_name = decl
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(name.as_str());
      let mut entry = ResourceSchema::new(type_name);

      if let Some(fields) = decl.get("fields").and_then(Value::as_object) {
        for (field, def) in fields {
          entry.fields.insert(field.clone(), parse_field(def));
        }
      }

      if let Some(rels) = decl.get("relationships").and_then(Value::as_object) {
        for (field, def) in rels {
          entry.relationships.insert(field.clone(), parse_relationship(def));
        }
      }

      types.insert(name.clone(), entry);
    }

    Self { types }
  }

  pub fn get(&self, type_name: &str) -> Option<&ResourceSchema> {
    self.types.get(type_name)
  }

  pub fn is_empty(&self) -> bool {
    self.types.is_empty()
  }

  /// Declared type names in declaration order.
  pub fn type_names(&self) -> impl Iterator<Item = &str> {
    self.types.keys().map(String::as_str)
  }

  /// Attach a `resolve` hook to a field, declaring the field if needed.
  pub fn with_resolver<F>(mut self, type_name: &str, field: &str, resolve: F) -> Self
  where
    F: Fn(&Value, &Map<String, Value>, &Value) -> Value + Send + Sync + 'static,
  {
    self.field_mut(type_name, field).resolve = Some(Arc::new(resolve));
    self
  }

  /// Attach a write-direction `serialize` hook to a field.
  pub fn with_field_serializer<F>(mut self, type_name: &str, field: &str, serialize: F) -> Self
  where
    F: Fn(&Value, &Map<String, Value>) -> Value + Send + Sync + 'static,
  {
    self.field_mut(type_name, field).serialize = Some(Arc::new(serialize));
    self
  }

  /// Make a relationship polymorphic. A previously declared `readOnly` flag is kept.
  pub fn with_type_resolver<F>(mut self, type_name: &str, relationship: &str, get_type: F) -> Self
  where
    F: Fn(&Map<String, Value>) -> Option<String> + Send + Sync + 'static,
  {
    let entry = self.entry_mut(type_name);
    let target = RelationshipTarget::Computed(Arc::new(get_type));
    entry
      .relationships
      .entry(relationship.to_string())
      .and_modify(|def| def.target = target.clone())
      .or_insert(RelationshipDef {
        target,
        read_only: false,
      });
    self
  }

  fn entry_mut(&mut self, type_name: &str) -> &mut ResourceSchema {
    self
      .types
      .entry(type_name.to_string())
      .or_insert_with(|| ResourceSchema::new(type_name))
  }

  fn field_mut(&mut self, type_name: &str, field: &str) -> &mut FieldDef {
    self
      .entry_mut(type_name)
      .fields
      .entry(field.to_string())
      .or_default()
  }
}

fn read_only_flag(decl: &Map<String, Value>) -> bool {
  decl
    .get("readOnly")
    .or_else(|| decl.get("read_only"))
    .and_then(Value::as_bool)
    .unwrap_or(false)
}

fn parse_field(def: &Value) -> FieldDef {
  match def {
    Value::String(kind) => FieldDef {
      kind: FieldKind::parse(kind),
      ..FieldDef::default()
    },
    Value::Object(decl) => FieldDef {
      kind: decl.get("type").and_then(Value::as_str).and_then(FieldKind::parse),
      read_only: read_only_flag(decl),
      ..FieldDef::default()
    },
    _ => FieldDef::default(),
  }
}

fn parse_relationship(def: &Value) -> RelationshipDef {
  match def {
    Value::String(t) if !t.is_empty() => RelationshipDef {
      target: RelationshipTarget::Fixed(t.clone()),
      read_only: false,
    },
    Value::Object(decl) => RelationshipDef {
      target: match decl.get("type").and_then(Value::as_str) {
        Some(t) if !t.is_empty() => RelationshipTarget::Fixed(t.to_string()),
        _ => RelationshipTarget::Unknown,
      },
      read_only: read_only_flag(decl),
    },
    _ => RelationshipDef {
      target: RelationshipTarget::Unknown,
      read_only: false,
    },
  }
}
