//! Expected-shape descriptors.
//!
//! A [`ShapeDescriptor`] describes what the application currently expects a
//! synced document to look like: which fields exist, their defaults, and
//! which list items form a fixed catalogue. The [`crate::reconcile`] module
//! uses it to migrate older persisted documents forward.

use crate::SchemaVersion;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field types supported in shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Bool,
    /// Arbitrary nested JSON, kept as-is
    Json,
    /// Nested object with its own fields
    Object(ObjectShape),
    /// List of objects
    List(ListShape),
}

impl FieldType {
    /// Shallow type check: does `value` have the right JSON kind?
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Json => true,
            FieldType::Object(_) => value.is_object(),
            FieldType::List(_) => value.is_array(),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Number => write!(f, "Number"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Json => write!(f, "Json"),
            FieldType::Object(_) => write!(f, "Object"),
            FieldType::List(_) => write!(f, "List"),
        }
    }
}

/// Definition of a field in an object shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Default filled in when the field is missing, null or mistyped.
    /// `None` marks an optional field.
    pub default: Option<Value>,
}

impl FieldDef {
    /// A required field with an explicit default.
    pub fn required(name: impl Into<String>, field_type: FieldType, default: Value) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: Some(default),
        }
    }

    /// An optional field. Missing stays missing; a mistyped value is dropped.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: None,
        }
    }

    /// A required nested object whose default is built from its own fields.
    pub fn object(name: impl Into<String>, shape: ObjectShape) -> Self {
        let default = shape.default_value();
        Self::required(name, FieldType::Object(shape), default)
    }

    /// A required list whose default is the catalogue (empty for open lists).
    pub fn list(name: impl Into<String>, shape: ListShape) -> Self {
        let default = shape.default_value();
        Self::required(name, FieldType::List(shape), default)
    }

    /// Whether the field must be present after reconciliation.
    pub fn is_required(&self) -> bool {
        self.default.is_some()
    }
}

/// Shape of a JSON object. Fields not listed here are dropped.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectShape {
    /// Field definitions, in declaration order
    pub fields: Vec<FieldDef>,
}

impl ObjectShape {
    /// Create an object shape.
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// An object holding every required field at its default.
    pub fn default_value(&self) -> Value {
        let mut obj = Map::new();
        for field in &self.fields {
            if let Some(default) = &field.default {
                obj.insert(field.name.clone(), default.clone());
            }
        }
        Value::Object(obj)
    }
}

/// A fixed catalogue of list items, identified by a key field.
///
/// Items whose key is not in the catalogue are retired and dropped; catalogue
/// items missing from a loaded list are appended in catalogue order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalogue {
    /// Name of the string field identifying an item
    pub key: String,
    /// Default items, in canonical order
    pub items: Vec<Value>,
}

impl Catalogue {
    /// The default item for `key`, if it is part of the catalogue.
    pub fn item(&self, key: &str) -> Option<&Value> {
        self.items
            .iter()
            .find(|item| item.get(&self.key).and_then(Value::as_str) == Some(key))
    }

    /// Keys of all catalogue items, in canonical order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .filter_map(|item| item.get(&self.key).and_then(Value::as_str))
    }
}

/// Shape of a list of objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListShape {
    /// Shape every item is reconciled against
    pub item: ObjectShape,
    /// Closed catalogue, or `None` for an open list of user items
    pub catalogue: Option<Catalogue>,
}

impl ListShape {
    /// A list of user-created items (songs, notes). No items are added or
    /// removed by reconciliation, only normalized.
    pub fn open(item: ObjectShape) -> Self {
        Self {
            item,
            catalogue: None,
        }
    }

    /// A list drawn from a fixed catalogue keyed by `key`.
    pub fn keyed(key: impl Into<String>, item: ObjectShape, defaults: Vec<Value>) -> Self {
        Self {
            item,
            catalogue: Some(Catalogue {
                key: key.into(),
                items: defaults,
            }),
        }
    }

    /// The full catalogue as a list (empty for open lists).
    pub fn default_value(&self) -> Value {
        match &self.catalogue {
            Some(catalogue) => Value::Array(catalogue.items.clone()),
            None => Value::Array(Vec::new()),
        }
    }
}

/// The expected shape of a whole synced document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeDescriptor {
    /// Shape version, bumped whenever defaults or fields change
    pub version: SchemaVersion,
    /// Top-level object shape
    pub root: ObjectShape,
}

impl ShapeDescriptor {
    /// Create a descriptor.
    pub fn new(version: SchemaVersion, fields: Vec<FieldDef>) -> Self {
        Self {
            version,
            root: ObjectShape::new(fields),
        }
    }

    /// A document with every required field at its default.
    pub fn default_value(&self) -> Value {
        self.root.default_value()
    }
}
