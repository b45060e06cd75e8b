//! Input nodes
//!
//! Nodes that bring records into a run. Each source binds one output
//! dataset conforming to its declared schema, plus an error port for
//! records rejected during ingestion.

mod dataset_source;
mod json_lines;

pub use dataset_source::DatasetSource;
pub use json_lines::{JsonLinesSource, JsonLinesSourceConfig};

use dataflow_engine::{EngineError, Record, Result, Schema};
use serde_json::Map;

/// Lay a raw record onto a schema.
///
/// Undeclared fields are rejected, declared fields are coerced to their
/// type (absent ones take the schema default) and non-nullable fields
/// must end up with a value.
pub(crate) fn conform(record: &Record, schema: &Schema) -> Result<Record> {
    if let Some(field) = record.undeclared_fields(schema).next() {
        return Err(EngineError::UnknownField {
            field: field.to_string(),
            schema: schema.name.clone(),
        });
    }
    let mut data = Map::with_capacity(schema.len());
    for field in schema.fields() {
        let value = field
            .field_type
            .coerce(&field.name, &record.value(&field.name, schema))?;
        if value.is_null() && !field.nullable {
            return Err(EngineError::row(format!("Field '{}' is required", field.name)));
        }
        data.insert(field.name.clone(), value);
    }
    Ok(record.clone().with_data(data))
}
