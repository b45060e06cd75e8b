//! Log Sink
//!
//! Writes a port to the log as tab-separated rows, for inspecting small
//! datasets during development.

use async_trait::async_trait;
use dataflow_engine::{counter, Context, Dataset, EventSink, Node, NodeOptions, Port, Result};
use serde_json::Value;

/// Log Sink
///
/// Logs a header of column names, then one line per record at info level.
/// With `reduce`, columns that are null in every record are left out; with
/// a limit, only the first records are logged. Every record is counted.
///
/// # Inputs (from context)
/// - the logged port (required)
#[derive(Debug, Clone)]
pub struct LogSink {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    input: Port,
    reduce: bool,
    limit: Option<usize>,
}

impl LogSink {
    pub fn new(id: impl Into<String>, input: &Port) -> Self {
        Self {
            id: id.into(),
            options: NodeOptions::default(),
            input: input.clone(),
            reduce: false,
            limit: None,
        }
    }

    /// Leave out columns that are null in every record
    pub fn reduced(mut self) -> Self {
        self.reduce = true;
        self
    }

    /// Log at most `limit` records
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The header line followed by one line per logged record
    fn lines(&self, dataset: &Dataset) -> Vec<String> {
        let columns = super::columns(dataset, self.reduce);
        let limit = self.limit.unwrap_or(usize::MAX);
        std::iter::once(columns.join("\t"))
            .chain(dataset.iter().take(limit).map(|record| {
                columns
                    .iter()
                    .map(|name| match record.get(name) {
                        None => String::new(),
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\t")
            }))
            .collect()
    }
}

#[async_trait]
impl Node for LogSink {
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
        for line in self.lines(&dataset) {
            log::info!("{}: {}", self.id, line);
        }
        if let Some(limit) = self.limit.filter(|&limit| dataset.len() > limit) {
            log::info!("{}: ... {} more", self.id, dataset.len() - limit);
        }
        context.count(&self.id, counter::PROCESSED, dataset.len() as u64);
        Ok(())
    }
}
