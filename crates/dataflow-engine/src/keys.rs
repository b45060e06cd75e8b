//! Composite keys derived from records
//!
//! [`Keys`] names the fields that make up a key; [`Key`] is the hashable
//! tuple derived from one record. JSON values are not hashable, so each
//! part is normalised into a [`KeyPart`]. Integers and strings stay
//! distinct: `1` and `"1"` are different keys. Case-insensitive keys fold
//! text parts to lowercase.

use std::fmt;

use serde_json::{Number, Value};

use crate::error::{EngineError, Result};
use crate::record::Record;
use crate::schema::Schema;

/// One normalised component of a key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// Float stored by bit pattern
    Float(u64),
    Text(String),
    /// Arrays and objects, by their JSON text
    Json(String),
}

impl KeyPart {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => KeyPart::Null,
            Value::Bool(b) => KeyPart::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    KeyPart::Int(i)
                } else if let Some(u) = n.as_u64() {
                    KeyPart::UInt(u)
                } else {
                    KeyPart::Float(n.as_f64().unwrap_or(f64::NAN).to_bits())
                }
            }
            Value::String(s) => KeyPart::Text(s.clone()),
            other => KeyPart::Json(other.to_string()),
        }
    }

    /// Convert back into a JSON value
    pub fn to_value(&self) -> Value {
        match self {
            KeyPart::Null => Value::Null,
            KeyPart::Bool(b) => Value::Bool(*b),
            KeyPart::Int(i) => Value::from(*i),
            KeyPart::UInt(u) => Value::from(*u),
            KeyPart::Float(bits) => Number::from_f64(f64::from_bits(*bits))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            KeyPart::Text(s) => Value::String(s.clone()),
            KeyPart::Json(text) => serde_json::from_str(text).unwrap_or(Value::Null),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, KeyPart::Null)
    }
}

/// A key tuple derived from a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<KeyPart>);

impl Key {
    /// Build a key from values
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        Key(values.into_iter().map(KeyPart::from_value).collect())
    }

    /// A single-part key
    pub fn single(value: &Value) -> Self {
        Key(vec![KeyPart::from_value(value)])
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// A key is null when every part is null; null keys never match
    pub fn is_null(&self) -> bool {
        self.0.iter().all(KeyPart::is_null)
    }

    /// The key parts as JSON values
    pub fn to_values(&self) -> Vec<Value> {
        self.0.iter().map(KeyPart::to_value).collect()
    }

    /// The key with text parts lowercased
    pub fn folded(&self) -> Key {
        Key(self
            .0
            .iter()
            .map(|part| match part {
                KeyPart::Text(s) => KeyPart::Text(s.to_lowercase()),
                other => other.clone(),
            })
            .collect())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.to_values();
        if values.len() == 1 {
            write!(f, "{}", values[0])
        } else {
            let parts: Vec<String> = values.iter().map(Value::to_string).collect();
            write!(f, "({})", parts.join(", "))
        }
    }
}

/// An ordered tuple of field names used to derive keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    fields: Vec<String>,
    case_insensitive: bool,
}

impl Keys {
    /// Build keys over a schema, failing if a field is not declared
    pub fn new<S: AsRef<str>>(schema: &Schema, fields: &[S]) -> Result<Self> {
        if fields.is_empty() {
            return Err(EngineError::config(format!(
                "Empty key list for schema '{}'",
                schema.name
            )));
        }
        let fields = fields
            .iter()
            .map(|f| schema.require(f.as_ref()).map(|field| field.name.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            fields,
            case_insensitive: false,
        })
    }

    /// Single-field keys
    pub fn single(schema: &Schema, field: &str) -> Result<Self> {
        Self::new(schema, &[field])
    }

    /// Compare text parts without regard to case
    pub fn case_insensitive(self) -> Self {
        self.with_case_insensitive(true)
    }

    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Derive the key of a record; absent fields are null parts
    pub fn key_of(&self, record: &Record) -> Key {
        let key = Key(self
            .fields
            .iter()
            .map(|f| record.get(f).map(KeyPart::from_value).unwrap_or(KeyPart::Null))
            .collect());
        if self.case_insensitive {
            key.folded()
        } else {
            key
        }
    }

    /// A copy of the record with the key fields set from `key`
    pub fn set(&self, record: Record, key: &Key) -> Result<Record> {
        if key.parts().len() != self.fields.len() {
            return Err(EngineError::row(format!(
                "Key {} does not fit fields {:?}",
                key, self.fields
            )));
        }
        Ok(self
            .fields
            .iter()
            .zip(key.to_values())
            .fold(record, |r, (field, value)| r.with_value(field.clone(), value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(
            "s",
            vec![Field::string("genus"), Field::string("species"), Field::integer("n")],
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_field() {
        assert!(matches!(
            Keys::new(&schema(), &["family"]),
            Err(EngineError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_composite_key() {
        let keys = Keys::new(&schema(), &["genus", "species"]).unwrap();
        let a = Record::from_pairs(1, [("genus", json!("Acacia")), ("species", json!("dealbata"))]);
        let b = Record::from_pairs(2, [("species", json!("dealbata")), ("genus", json!("Acacia"))]);
        assert_eq!(keys.key_of(&a), keys.key_of(&b));
        assert_eq!(keys.key_of(&a).to_string(), "(\"Acacia\", \"dealbata\")");
    }

    #[test]
    fn test_types_are_distinct_and_nulls_detected() {
        let keys = Keys::single(&schema(), "n").unwrap();
        let int = Record::from_pairs(1, [("n", json!(1))]);
        let text = Record::from_pairs(1, [("n", json!("1"))]);
        assert_ne!(keys.key_of(&int), keys.key_of(&text));
        assert!(keys.key_of(&Record::new(1)).is_null());
    }

    #[test]
    fn test_set() {
        let keys = Keys::new(&schema(), &["genus", "n"]).unwrap();
        let key = Key::from_values(&[json!("Eucalyptus"), json!(3)]);
        let record = keys.set(Record::new(1), &key).unwrap();
        assert_eq!(record.get_str("genus"), Some("Eucalyptus"));
        assert_eq!(record.get("n"), Some(&json!(3)));
        assert!(keys.set(Record::new(1), &Key::single(&json!("x"))).is_err());
    }

    #[test]
    fn test_case_insensitive() {
        let keys = Keys::new(&schema(), &["genus", "n"]).unwrap();
        let upper = Record::from_pairs(1, [("genus", json!("ACACIA")), ("n", json!(1))]);
        let lower = Record::from_pairs(2, [("genus", json!("acacia")), ("n", json!(1))]);
        assert_ne!(keys.key_of(&upper), keys.key_of(&lower));

        let keys = keys.case_insensitive();
        assert!(keys.is_case_insensitive());
        assert_eq!(keys.key_of(&upper), keys.key_of(&lower));
        assert_eq!(keys.key_of(&upper).to_values(), vec![json!("acacia"), json!(1)]);
    }
}
