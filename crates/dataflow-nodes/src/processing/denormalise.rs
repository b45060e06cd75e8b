//! Denormalise Task
//!
//! Splits a delimited field into one record per piece.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EngineError, EventSink, Field, Node, NodeOptions, Port, Record,
    Result, RowErrors,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the piece-position field added to the output schema
pub const INDEX_FIELD: &str = "_index";

/// Computes the pieces of a record in place of delimiter splitting. An
/// `Err` is a per-record failure.
pub type Expander = Arc<dyn Fn(&Record) -> Result<Vec<String>> + Send + Sync>;

fn default_delimiter() -> String {
    "|".to_string()
}

/// Configuration for the denormalise task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenormaliseConfig {
    /// The field to split
    pub field: String,
    /// Piece separator
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

impl DenormaliseConfig {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            delimiter: default_delimiter(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }
}

/// Denormalise
///
/// Each non-empty, trimmed piece of the configured field becomes one output
/// record with the field replaced by the piece and `_index` set to the
/// piece's zero-based position among the emitted pieces. A null, empty or
/// non-text field passes through once with `_index = 0`.
///
/// An expander replaces the delimiter: its pieces are trimmed and empty
/// ones skipped the same way.
///
/// # Inputs (from context)
/// - the split port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - One record per piece, input schema plus `_index`
/// - `{id}.error` - Records the expander failed on
#[derive(Clone)]
pub struct Denormalise {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    config: DenormaliseConfig,
    expander: Option<Expander>,
    input: Port,
    output: Port,
    error: Port,
}

impl fmt::Debug for Denormalise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Denormalise")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("expander", &self.expander.is_some())
            .finish()
    }
}

impl Denormalise {
    /// Port name for the output
    pub const PORT_OUTPUT: &'static str = "output";

    /// Split `field` on `|`
    pub fn new(id: impl Into<String>, input: &Port, field: &str) -> Result<Self> {
        Self::with_config(id, input, DenormaliseConfig::new(field))
    }

    /// Create with configuration; the field must be declared by the input
    pub fn with_config(id: impl Into<String>, input: &Port, config: DenormaliseConfig) -> Result<Self> {
        let id = id.into();
        input.schema.require(&config.field)?;
        if config.delimiter.is_empty() {
            return Err(EngineError::config(format!(
                "Denormalise '{}' has an empty delimiter",
                id
            )));
        }
        let schema = input.schema.with_field(Field::integer(INDEX_FIELD));
        Ok(Self {
            output: Port::of(&id, Self::PORT_OUTPUT, schema.into()),
            error: Port::error_port(&id, &input.schema),
            options: NodeOptions::default(),
            expander: None,
            config,
            input: input.clone(),
            id,
        })
    }

    /// Split `field` into the pieces `expander` computes for each record
    pub fn expand<F>(id: impl Into<String>, input: &Port, field: &str, expander: F) -> Result<Self>
    where
        F: Fn(&Record) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        let mut node = Self::new(id, input, field)?;
        node.expander = Some(Arc::new(expander));
        Ok(node)
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

    fn pieces(&self, record: &Record) -> Result<Vec<String>> {
        let raw: Vec<String> = match (&self.expander, record.get_str(&self.config.field)) {
            (Some(expander), _) => expander(record)?,
            (None, Some(text)) => text
                .split(self.config.delimiter.as_str())
                .map(str::to_string)
                .collect(),
            (None, None) => Vec::new(),
        };
        Ok(raw
            .iter()
            .map(|piece| piece.trim())
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn split(&self, record: &Record, result: &mut Dataset) -> Result<()> {
        let field = &self.config.field;
        let pieces = self.pieces(record)?;
        if pieces.is_empty() {
            result.push(record.clone().with_value(INDEX_FIELD, Value::from(0)));
            return Ok(());
        }
        for (index, piece) in pieces.into_iter().enumerate() {
            result.push(
                record
                    .clone()
                    .with_value(field.clone(), Value::String(piece))
                    .with_value(INDEX_FIELD, Value::from(index)),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Node for Denormalise {
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
        vec![&self.output]
    }

    fn errors(&self) -> Vec<&Port> {
        vec![&self.error]
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let mut result = Dataset::new(self.output.schema.clone());
        let mut errors = RowErrors::new(&self.id, &self.options);
        for record in input.iter() {
            if let Err(e) = self.split(record, &mut result) {
                errors.fail(record, e)?;
            }
        }
        log::debug!(
            "Denormalise {}: {} records split into {}",
            self.id,
            input.len(),
            result.len()
        );
        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::ACCEPTED, result.len() as u64);
        context.bind(&self.output, result)?;
        errors.bind(context, &self.error)
    }
}
