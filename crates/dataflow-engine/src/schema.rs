//! Schemas: ordered field declarations describing a record shape
//!
//! Schemas are built once and shared as [`SchemaRef`]. Derived schemas
//! (projections, merges, error schemas) are new values; a schema is never
//! changed after construction.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

/// Shared, immutable schema handle
pub type SchemaRef = Arc<Schema>;

/// Name of the line-number field added to error schemas
pub const LINE_FIELD: &str = "_line";
/// Name of the message field added to error schemas
pub const MESSAGES_FIELD: &str = "_messages";

/// Semantic type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Text
    String,
    /// Whole number
    Integer,
    /// Floating point number
    Float,
    /// True/false
    Boolean,
    /// Any JSON value, no coercion
    Any,
}

impl FieldType {
    /// Get a human-readable name for this type
    pub fn label(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Any => "any",
        }
    }

    /// Coerce a value into this type.
    ///
    /// Null passes through unchanged. Empty strings become null for
    /// non-string types, mirroring how delimited sources treat blank cells.
    pub fn coerce(&self, field: &str, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let fail = || EngineError::Coercion {
            field: field.to_string(),
            expected: self.label().to_string(),
            value: value.to_string(),
        };
        match self {
            FieldType::Any => Ok(value.clone()),
            FieldType::String => Ok(match value {
                Value::String(_) => value.clone(),
                Value::Bool(b) => Value::String(b.to_string()),
                Value::Number(n) => Value::String(n.to_string()),
                other => Value::String(other.to_string()),
            }),
            FieldType::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::Number(n) => match n.as_f64() {
                    // i64::MAX rounds up to 2^63, which is already out of range
                    Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                        Ok(Value::from(f as i64))
                    }
                    _ => Err(fail()),
                },
                Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| fail()),
                Value::Bool(b) => Ok(Value::from(i64::from(*b))),
                _ => Err(fail()),
            },
            FieldType::Float => match value {
                Value::Number(n) => n.as_f64().map(Value::from).ok_or_else(fail),
                Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(f) if f.is_finite() => Ok(Value::from(f)),
                    _ => Err(fail()),
                },
                _ => Err(fail()),
            },
            FieldType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "" => Ok(Value::Null),
                    "true" | "t" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
                    "false" | "f" | "no" | "n" | "0" => Ok(Value::Bool(false)),
                    _ => Err(fail()),
                },
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Value::Bool(false)),
                    Some(1) => Ok(Value::Bool(true)),
                    _ => Err(fail()),
                },
                _ => Err(fail()),
            },
        }
    }
}

/// Declaration of one field in a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Field name, unique within a schema
    pub name: String,
    /// Semantic type
    pub field_type: FieldType,
    /// Whether null is an acceptable value
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Value used when a record does not carry this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Term in an external vocabulary this field corresponds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl Field {
    /// Create a nullable field with no default
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            default: None,
            vocabulary: None,
        }
    }

    /// Shorthand for a string field
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    /// Shorthand for an integer field
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    /// Mark this field as not nullable
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the default value used for records missing this field
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Tag this field with an external vocabulary term
    pub fn with_vocabulary(mut self, term: impl Into<String>) -> Self {
        self.vocabulary = Some(term.into());
        self
    }

    /// The value a record takes for this field when it is absent
    pub fn default_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

/// An ordered list of field declarations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema name, used in diagnostics
    pub name: String,
    fields: Vec<Field>,
}

impl Schema {
    /// Create a schema, rejecting duplicate field names
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(EngineError::config(format!(
                    "Schema '{}' declares field '{}' twice",
                    name, field.name
                )));
            }
        }
        Ok(Self { name, fields })
    }

    /// Create a shared schema
    pub fn shared(name: impl Into<String>, fields: Vec<Field>) -> Result<SchemaRef> {
        Self::new(name, fields).map(Arc::new)
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Number of declared fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check whether a field is declared
    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Find a field by name or fail with `UnknownField`
    pub fn require(&self, name: &str) -> Result<&Field> {
        self.field(name).ok_or_else(|| EngineError::UnknownField {
            field: name.to_string(),
            schema: self.name.clone(),
        })
    }

    /// The default value of a field, null when undeclared
    pub fn default_for(&self, name: &str) -> Value {
        self.field(name).map(Field::default_value).unwrap_or(Value::Null)
    }

    /// Structural compatibility: same field names with the same types,
    /// in any order.
    pub fn is_compatible_with(&self, other: &Schema) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.iter().all(|f| {
                other
                    .field(&f.name)
                    .map(|o| o.field_type == f.field_type)
                    .unwrap_or(false)
            })
    }

    /// Fail with `IncompatibleSchema` unless the schemas are compatible
    pub fn ensure_compatible(&self, other: &Schema) -> Result<()> {
        if self.is_compatible_with(other) {
            Ok(())
        } else {
            Err(EngineError::IncompatibleSchema {
                left: self.describe(),
                right: other.describe(),
            })
        }
    }

    /// A schema holding only the named fields, in this schema's order
    pub fn project(&self, name: impl Into<String>, names: &[&str]) -> Result<Self> {
        for n in names {
            self.require(n)?;
        }
        let fields = self
            .fields
            .iter()
            .filter(|f| names.contains(&f.name.as_str()))
            .cloned()
            .collect();
        Self::new(name, fields)
    }

    /// This schema's fields followed by any of `other`'s not already present
    pub fn merged(&self, other: &Schema) -> Self {
        let mut fields = self.fields.clone();
        fields.extend(
            other
                .fields
                .iter()
                .filter(|f| !self.contains(&f.name))
                .cloned(),
        );
        Self {
            name: self.name.clone(),
            fields,
        }
    }

    /// This schema with one more field appended (replacing a same-named one)
    pub fn with_field(&self, field: Field) -> Self {
        let mut fields: Vec<Field> = self
            .fields
            .iter()
            .filter(|f| f.name != field.name)
            .cloned()
            .collect();
        fields.push(field);
        Self {
            name: self.name.clone(),
            fields,
        }
    }

    /// The schema used for error ports: this schema plus line and messages
    pub fn error_schema(&self) -> Self {
        self.with_field(Field::integer(LINE_FIELD))
            .with_field(Field::string(MESSAGES_FIELD))
    }

    /// Compact textual form, e.g. `taxon(id: string, parent: string)`
    pub fn describe(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{}: {}", f.name, f.field_type.label()))
            .collect();
        format!("{}({})", self.name, fields.join(", "))
    }
}
