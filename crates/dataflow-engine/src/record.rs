//! Records and the issues attached to them
//!
//! A [`Record`] is one row: a source line number, an ordered map of field
//! values, and the issues found while processing it. Records are values;
//! every "modification" consumes the record and returns a new one, so a
//! record bound into a dataset is never changed afterwards.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{Schema, LINE_FIELD, MESSAGES_FIELD};

/// How serious an issue is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational only
    Info,
    /// Suspicious but usable
    Warning,
    /// The record is not usable as-is
    Error,
}

/// A problem recorded against a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    /// Short machine-readable code, e.g. `unresolved-reference`
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// The offending field, if there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
            field: None,
        }
    }

    /// An error-severity issue
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    /// A warning-severity issue
    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    /// Attach the offending field
    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// A single data row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    line: u64,
    data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    issues: Vec<Issue>,
}

impl Record {
    /// Create an empty record for a source line
    pub fn new(line: u64) -> Self {
        Self {
            line,
            data: Map::new(),
            issues: Vec::new(),
        }
    }

    /// Create a record from existing field data
    pub fn from_data(line: u64, data: Map<String, Value>) -> Self {
        Self {
            line,
            data,
            issues: Vec::new(),
        }
    }

    /// Create a record from `(field, value)` pairs
    pub fn from_pairs<I, K>(line: u64, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::from_data(line, pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Source line number
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Field data in insertion order
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Issues attached to this record
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Whether any attached issue is at least `Error` severity
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity >= Severity::Error)
    }

    /// Get a field value.
    ///
    /// Returns `None` when the field is absent or null; use
    /// [`Record::value`] to resolve schema defaults instead.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field).filter(|v| !v.is_null())
    }

    /// Get a field as a string slice, if it is a string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Get a field value, falling back to the schema default when absent
    pub fn value(&self, field: &str, schema: &Schema) -> Value {
        match self.data.get(field) {
            Some(v) if !v.is_null() => v.clone(),
            _ => schema.default_for(field),
        }
    }

    /// Whether the field is absent or null
    pub fn is_null(&self, field: &str) -> bool {
        self.get(field).is_none()
    }

    /// A copy of this record with one field set
    pub fn with_value(mut self, field: impl Into<String>, value: Value) -> Self {
        self.data.insert(field.into(), value);
        self
    }

    /// A copy of this record with one field removed
    pub fn without(mut self, field: &str) -> Self {
        self.data = std::mem::take(&mut self.data)
            .into_iter()
            .filter(|(name, _)| name != field)
            .collect();
        self
    }

    /// A copy of this record with different data, keeping line and issues
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// A copy of this record with an issue appended
    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    /// A copy of this record with an issue appended unless an issue with
    /// the same code and field is already attached
    pub fn with_issue_once(self, issue: Issue) -> Self {
        let present = self
            .issues
            .iter()
            .any(|i| i.code == issue.code && i.field == issue.field);
        if present {
            self
        } else {
            self.with_issue(issue)
        }
    }

    /// All issue messages joined with `, `
    pub fn messages(&self) -> String {
        self.issues
            .iter()
            .map(|i| i.message.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The error form of this record.
    ///
    /// The issue is attached, and the data gains `_line` and `_messages`
    /// fields so the record conforms to the error schema of its port.
    pub fn error(self, issue: Issue) -> Self {
        self.with_issue(issue).error_form()
    }

    /// The error form of this record with the issues it already carries
    pub fn error_form(mut self) -> Self {
        let messages = self.messages();
        self.data.insert(LINE_FIELD.to_string(), Value::from(self.line));
        self.data.insert(MESSAGES_FIELD.to_string(), Value::String(messages));
        self
    }

    /// This record laid out on a schema: fields in schema order, values
    /// not in the schema dropped, missing fields set to the schema default
    pub fn mapped(&self, schema: &Schema) -> Self {
        let data = schema
            .fields()
            .iter()
            .map(|f| (f.name.clone(), self.value(&f.name, schema)))
            .collect();
        Self {
            line: self.line,
            data,
            issues: self.issues.clone(),
        }
    }

    /// Field names carried by this record that the schema does not declare
    pub fn undeclared_fields<'a>(&'a self, schema: &'a Schema) -> impl Iterator<Item = &'a str> + 'a {
        self.data
            .keys()
            .map(String::as_str)
            .filter(move |name| !schema.contains(name))
    }
}
