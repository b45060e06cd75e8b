//! JSON Lines Sink
//!
//! Writes each record of a port as one JSON object per line.

use std::path::PathBuf;

use async_trait::async_trait;
use dataflow_engine::{counter, Context, EventSink, Node, NodeOptions, Port, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Configuration for the JSON lines sink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JsonLinesSinkConfig {
    /// File to write; parent directories are created
    pub path: PathBuf,
    /// Drop columns that are null in every record
    pub reduce: bool,
}

/// JSON Lines Sink
///
/// Fields are written in schema order. Absent fields are written as null
/// unless `reduce` drops the column entirely.
///
/// # Inputs (from context)
/// - the written port (required)
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    config: JsonLinesSinkConfig,
    input: Port,
}

impl JsonLinesSink {
    /// Create a sink writing `path`
    pub fn new(id: impl Into<String>, input: &Port, path: impl Into<PathBuf>) -> Self {
        Self::with_config(
            id,
            input,
            JsonLinesSinkConfig {
                path: path.into(),
                reduce: false,
            },
        )
    }

    /// Create with configuration
    pub fn with_config(id: impl Into<String>, input: &Port, config: JsonLinesSinkConfig) -> Self {
        Self {
            id: id.into(),
            options: NodeOptions::default(),
            config,
            input: input.clone(),
        }
    }
}

#[async_trait]
impl Node for JsonLinesSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn options(&self) -> &NodeOptions {
        &self.options
    }

    fn inputs(&self) -> Vec<&Port> {
        vec![&self.input]
    }

    fn outputs(&self) -> Vec<&Port> {
        Vec::new()
    }

    fn errors(&self) -> Vec<&Port> {
        Vec::new()
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let dataset = context.resolve(&self.input)?;
        let columns = super::columns(&dataset, self.config.reduce);
        if columns.len() < dataset.schema().len() {
            log::debug!(
                "JsonLinesSink {}: reduced {} columns to {}",
                self.id,
                dataset.schema().len(),
                columns.len()
            );
        }

        let mut buffer = Vec::new();
        for record in dataset.iter() {
            let row: Map<String, Value> = columns
                .iter()
                .map(|name| {
                    let value = record.get(name).cloned().unwrap_or(Value::Null);
                    (name.to_string(), value)
                })
                .collect();
            serde_json::to_writer(&mut buffer, &row)?;
            buffer.push(b'\n');
        }

        if let Some(parent) = self.config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&self.config.path).await?;
        file.write_all(&buffer).await?;
        file.flush().await?;

        log::debug!(
            "JsonLinesSink {}: wrote {} records to '{}'",
            self.id,
            dataset.len(),
            self.config.path.display()
        );
        context.count(&self.id, counter::PROCESSED, dataset.len() as u64);
        Ok(())
    }
}
