//! JSON Lines Source
//!
//! Reads one JSON object per line from a file.

use std::path::PathBuf;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EngineError, EventSink, Node, NodeOptions, Port, Record, Result,
    RowErrors, SchemaRef,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;

use super::conform;

/// Configuration for the JSON lines source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JsonLinesSourceConfig {
    /// File to read
    pub path: PathBuf,
    /// Ignore lines that are empty after trimming
    pub skip_blank: bool,
}

/// JSON Lines Source
///
/// Each line of the file is parsed as a JSON object and conformed to the
/// schema. Line numbers are 1-based and carried on each record.
///
/// # Outputs (to context)
/// - `{id}.output` - Conforming records
/// - `{id}.error` - Malformed lines and records failing coercion
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    config: JsonLinesSourceConfig,
    output: Port,
    error: Port,
}

impl JsonLinesSource {
    /// Port name for the output
    pub const PORT_OUTPUT: &'static str = "output";

    /// Create a source reading `path`
    pub fn new(id: impl Into<String>, schema: SchemaRef, path: impl Into<PathBuf>) -> Self {
        Self::with_config(
            id,
            schema,
            JsonLinesSourceConfig {
                path: path.into(),
                skip_blank: true,
            },
        )
    }

    /// Create with configuration
    pub fn with_config(id: impl Into<String>, schema: SchemaRef, config: JsonLinesSourceConfig) -> Self {
        let id = id.into();
        Self {
            output: Port::of(&id, Self::PORT_OUTPUT, schema.clone()),
            error: Port::error_port(&id, &schema),
            options: NodeOptions::default(),
            config,
            id,
        }
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn output(&self) -> &Port {
        &self.output
    }

    pub fn error(&self) -> &Port {
        &self.error
    }

    fn parse(line: u64, text: &str) -> Result<Record> {
        let data: Map<String, Value> = serde_json::from_str(text)?;
        Ok(Record::from_data(line, data))
    }
}

#[async_trait]
impl Node for JsonLinesSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn options(&self) -> &NodeOptions {
        &self.options
    }

    fn inputs(&self) -> Vec<&Port> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<&Port> {
        vec![&self.output]
    }

    fn errors(&self) -> Vec<&Port> {
        vec![&self.error]
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        log::debug!(
            "JsonLinesSource {}: reading '{}'",
            self.id,
            self.config.path.display()
        );
        let content = fs::read_to_string(&self.config.path).await.map_err(|e| {
            log::error!("Failed to read '{}': {}", self.config.path.display(), e);
            EngineError::Io(e)
        })?;

        let schema = &self.output.schema;
        let mut result = Dataset::new(schema.clone());
        let mut errors = RowErrors::new(&self.id, &self.options);
        for (index, text) in content.lines().enumerate() {
            let line = index as u64 + 1;
            if self.config.skip_blank && text.trim().is_empty() {
                continue;
            }
            match Self::parse(line, text) {
                Ok(record) => match conform(&record, schema) {
                    Ok(conformed) => result.push(conformed),
                    Err(e) => errors.fail(&record, e)?,
                },
                Err(e) => errors.fail(&Record::new(line), e)?,
            }
            context.count(&self.id, counter::PROCESSED, 1);
        }

        log::debug!(
            "JsonLinesSource {}: read {} records, {} rejected",
            self.id,
            result.len(),
            errors.len()
        );
        context.count(&self.id, counter::ACCEPTED, result.len() as u64);
        context.bind(&self.output, result)?;
        errors.bind(context, &self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_engine::{Field, NullEventSink, Schema};
    use serde_json::json;
    use std::io::Write;
    use tempfile::tempdir;

    fn schema() -> SchemaRef {
        Schema::shared("s", vec![Field::string("id"), Field::integer("n")]).unwrap()
    }

    #[tokio::test]
    async fn test_read_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, r#"{{"id": "a", "n": 1}}"#).unwrap();
            writeln!(file).unwrap();
            writeln!(file, "not json").unwrap();
            writeln!(file, r#"{{"id": "b", "n": "two"}}"#).unwrap();
            writeln!(file, r#"{{"id": "c", "n": "3"}}"#).unwrap();
        }

        let source = JsonLinesSource::new("reader", schema(), path.clone()).with_options(NodeOptions::tolerant());
        let mut context = Context::new();
        source.execute(&mut context, &NullEventSink).await.unwrap();

        let output = context.resolve(source.output()).unwrap();
        let lines: Vec<u64> = output.iter().map(Record::line).collect();
        assert_eq!(lines, vec![1, 5]);
        assert_eq!(output.records()[1].get("n"), Some(&json!(3)));

        let errors = context.resolve(source.error()).unwrap();
        let lines: Vec<u64> = errors.iter().map(Record::line).collect();
        assert_eq!(lines, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal() {
        let dir = tempdir().unwrap();
        let source = JsonLinesSource::new("reader", schema(), dir.path().join("absent.jsonl"));
        let mut context = Context::new();
        let err = source.execute(&mut context, &NullEventSink).await.unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
        assert!(!context.is_bound(source.output()));
    }

    #[tokio::test]
    async fn test_fail_on_exception() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"id\": \"a\"}\n[1, 2]\n").unwrap();
        let source = JsonLinesSource::new("reader", schema(), path.clone())
            .with_options(NodeOptions::default().with_fail_on_exception(true));
        let mut context = Context::new();
        let err = source.execute(&mut context, &NullEventSink).await.unwrap_err();
        assert!(matches!(err, EngineError::RecordFailed { line: 2, .. }));
    }
}
