//! Selector Task
//!
//! Runs one of several sub-pipelines per input record, chosen by a key
//! field.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, EngineError, EventSink, Node, NodeOptions, Orchestrator, Port, Result,
    RowErrors,
};
use serde_json::Value;

/// Selector
///
/// For each input record, the value of the key field picks a branch
/// pipeline, which runs to completion in a fresh context. The record's
/// non-null fields become context defaults of that run, on top of the
/// defaults of the enclosing run, so branch nodes read them through
/// `Rule::context_default`. A record whose key names no branch is a
/// per-record failure. A failing branch run fails the node.
///
/// # Inputs (from context)
/// - the selecting port (required)
///
/// # Outputs (to context)
/// - `{id}.error` - Records whose key names no branch
pub struct Selector {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    input: Port,
    field: String,
    branches: BTreeMap<String, Orchestrator>,
    error: Port,
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("id", &self.id)
            .field("input", &self.input.id)
            .field("field", &self.field)
            .field("branches", &self.branches.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Selector {
    /// Select branches of `input` records by the value of `field`
    pub fn new(id: impl Into<String>, input: &Port, field: &str) -> Result<Self> {
        let id = id.into();
        input.schema.require(field)?;
        Ok(Self {
            error: Port::error_port(&id, &input.schema),
            options: NodeOptions::default(),
            input: input.clone(),
            field: field.to_string(),
            branches: BTreeMap::new(),
            id,
        })
    }

    /// Run `pipeline` for records whose key is `key`
    pub fn branch(mut self, key: impl Into<String>, pipeline: Orchestrator) -> Self {
        self.branches.insert(key.into(), pipeline);
        self
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn error(&self) -> &Port {
        &self.error
    }
}

#[async_trait]
impl Node for Selector {
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
        vec![&self.error]
    }

    async fn execute(&self, context: &mut Context, events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let mut errors = RowErrors::new(&self.id, &self.options);
        let mut runs = 0;

        for record in input.iter() {
            let key = match record.get(&self.field) {
                None => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };
            let Some((key, pipeline)) = key.and_then(|k| self.branches.get_key_value(&k)) else {
                let err = EngineError::row(format!(
                    "No branch for {} {}",
                    self.field,
                    record.get(&self.field).unwrap_or(&Value::Null)
                ));
                errors.fail(record, err)?;
                continue;
            };

            let mut branch = context.subcontext();
            for (name, value) in record.data().iter().filter(|(_, v)| !v.is_null()) {
                branch.set_default(name.clone(), value.clone());
            }
            log::debug!("Selector {}: line {} runs branch '{}'", self.id, record.line(), key);
            pipeline.execute(&mut branch, events).await?;
            runs += 1;
        }

        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::ACCEPTED, runs);
        errors.bind(context, &self.error)
    }
}
