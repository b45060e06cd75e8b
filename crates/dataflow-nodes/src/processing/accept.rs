//! Accept Task
//!
//! Passes records whose key appears in a set of accepted values.

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EngineError, EventSink, Index, Keys, MatchPolicy, Node, NodeOptions,
    Port, Result,
};
use serde::{Deserialize, Serialize};

/// Configuration for the accept task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AcceptConfig {
    /// Key fields on the input side
    pub input_keys: Vec<String>,
    /// Key fields on the values side, paired with `input_keys`
    pub value_keys: Vec<String>,
    /// Accept records whose key is *not* among the values
    pub exclude: bool,
    /// Compare text keys without regard to case
    pub case_insensitive: bool,
    /// Copy rejected records to a `reject` port
    pub record_rejects: bool,
}

impl AcceptConfig {
    /// Accept where `input_key` = `value_key`
    pub fn on(input_key: impl Into<String>, value_key: impl Into<String>) -> Self {
        Self {
            input_keys: vec![input_key.into()],
            value_keys: vec![value_key.into()],
            ..Self::default()
        }
    }
}

/// Accept
///
/// Indexes the values dataset (first entry wins) and keeps each input
/// record whose key is found, or is not found when `exclude` is set.
/// A record with a null key is never found.
///
/// # Inputs (from context)
/// - the input port (required)
/// - the values port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Accepted records, unchanged
/// - `{id}.reject` - Rejected records (only with `record_rejects`)
#[derive(Debug, Clone)]
pub struct Accept {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    config: AcceptConfig,
    input: Port,
    values: Port,
    output: Port,
    reject: Option<Port>,
    input_keys: Keys,
    value_keys: Keys,
}

impl Accept {
    /// Port name for accepted records
    pub const PORT_OUTPUT: &'static str = "output";
    /// Port name for rejected records
    pub const PORT_REJECT: &'static str = "reject";

    pub fn new(id: impl Into<String>, input: &Port, values: &Port, config: AcceptConfig) -> Result<Self> {
        let id = id.into();
        let input_keys =
            Keys::new(&input.schema, &config.input_keys)?.with_case_insensitive(config.case_insensitive);
        let value_keys =
            Keys::new(&values.schema, &config.value_keys)?.with_case_insensitive(config.case_insensitive);
        if input_keys.len() != value_keys.len() {
            return Err(EngineError::config(format!(
                "Accept '{}' pairs {} input keys with {} value keys",
                id,
                input_keys.len(),
                value_keys.len()
            )));
        }
        Ok(Self {
            output: Port::of(&id, Self::PORT_OUTPUT, input.schema.clone()),
            reject: config
                .record_rejects
                .then(|| Port::of(&id, Self::PORT_REJECT, input.schema.clone())),
            options: NodeOptions::default(),
            input: input.clone(),
            values: values.clone(),
            input_keys,
            value_keys,
            config,
            id,
        })
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn output(&self) -> &Port {
        &self.output
    }

    pub fn reject(&self) -> Option<&Port> {
        self.reject.as_ref()
    }
}

#[async_trait]
impl Node for Accept {
    fn id(&self) -> &str {
        &self.id
    }

    fn options(&self) -> &NodeOptions {
        &self.options
    }

    fn inputs(&self) -> Vec<&Port> {
        vec![&self.input, &self.values]
    }

    fn outputs(&self) -> Vec<&Port> {
        vec![&self.output]
    }

    fn extras(&self) -> Vec<&Port> {
        self.reject.iter().collect()
    }

    fn errors(&self) -> Vec<&Port> {
        Vec::new()
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let values = context.resolve(&self.values)?;
        let index = Index::build(&values, self.value_keys.clone(), MatchPolicy::First)?;

        let mut accepted = Dataset::new(self.output.schema.clone());
        let mut rejected = Vec::new();
        for record in input.iter() {
            let found = index.lookup(record, &self.input_keys).is_some();
            if found != self.config.exclude {
                accepted.push(record.clone());
            } else {
                rejected.push(record.clone());
            }
        }

        log::debug!(
            "Accept {}: {} of {} records accepted against {} values",
            self.id,
            accepted.len(),
            input.len(),
            index.len()
        );
        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::ACCEPTED, accepted.len() as u64);
        context.count(&self.id, counter::REJECTED, rejected.len() as u64);
        context.bind(&self.output, accepted)?;
        if let Some(port) = &self.reject {
            context.bind(port, Dataset::from_records(port.schema.clone(), rejected))?;
        }
        Ok(())
    }
}
