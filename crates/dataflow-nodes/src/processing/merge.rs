//! Merge Task
//!
//! Concatenates several datasets with compatible schemas.

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EngineError, EventSink, Node, NodeOptions, Port, Result,
};

/// Merge
///
/// Output order is input order: all records of the first input, then the
/// second, and so on. Records from inputs whose schema declares fields in
/// a different order are re-laid in the output schema's order.
///
/// # Inputs (from context)
/// - each merged port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Concatenated records, typed by the first input's schema
#[derive(Debug, Clone)]
pub struct Merge {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    inputs: Vec<Port>,
    output: Port,
}

impl Merge {
    /// Port name for the output
    pub const PORT_OUTPUT: &'static str = "output";

    /// Create a merge over `inputs`, which must have compatible schemas
    pub fn new(id: impl Into<String>, inputs: &[&Port]) -> Result<Self> {
        let id = id.into();
        let first = inputs
            .first()
            .ok_or_else(|| EngineError::config(format!("Merge '{}' has no inputs", id)))?;
        for other in &inputs[1..] {
            first.schema.ensure_compatible(&other.schema)?;
        }
        Ok(Self {
            output: Port::of(&id, Self::PORT_OUTPUT, first.schema.clone()),
            options: NodeOptions::default(),
            inputs: inputs.iter().map(|p| (*p).clone()).collect(),
            id,
        })
    }

    pub fn output(&self) -> &Port {
        &self.output
    }
}

#[async_trait]
impl Node for Merge {
    fn id(&self) -> &str {
        &self.id
    }

    fn options(&self) -> &NodeOptions {
        &self.options
    }

    fn inputs(&self) -> Vec<&Port> {
        self.inputs.iter().collect()
    }

    fn outputs(&self) -> Vec<&Port> {
        vec![&self.output]
    }

    fn errors(&self) -> Vec<&Port> {
        Vec::new()
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let schema = &self.output.schema;
        let mut result = Dataset::new(schema.clone());
        for port in &self.inputs {
            let input = context.resolve(port)?;
            let same_layout = Arc::ptr_eq(input.schema(), schema)
                || input.schema().field_names().eq(schema.field_names());
            for record in input.iter() {
                if same_layout {
                    result.push(record.clone());
                } else {
                    result.push(record.mapped(schema));
                }
            }
            context.count(&self.id, counter::PROCESSED, input.len() as u64);
        }
        context.count(&self.id, counter::ACCEPTED, result.len() as u64);
        context.bind(&self.output, result)?;
        Ok(())
    }
}
