//! Output nodes
//!
//! Sinks consume one input dataset and write it somewhere outside the
//! engine. They bind no ports of their own.

mod json_lines;
mod log_sink;
mod null_sink;

pub use json_lines::{JsonLinesSink, JsonLinesSinkConfig};
pub use log_sink::LogSink;
pub use null_sink::NullSink;

use std::collections::HashSet;

use dataflow_engine::Dataset;

/// Columns to write, in schema order; with `reduce`, columns that are null
/// in every record are dropped
pub(crate) fn columns(dataset: &Dataset, reduce: bool) -> Vec<&str> {
    let schema = dataset.schema();
    if !reduce {
        return schema.field_names().collect();
    }
    let used: HashSet<&str> = dataset
        .iter()
        .flat_map(|r| r.data().iter())
        .filter(|(_, v)| !v.is_null())
        .map(|(k, _)| k.as_str())
        .collect();
    schema.field_names().filter(|name| used.contains(name)).collect()
}
