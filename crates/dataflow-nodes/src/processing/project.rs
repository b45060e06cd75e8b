//! Project Task
//!
//! Lays records out on a target schema.

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EventSink, Node, NodeOptions, Port, Result, SchemaRef,
};

/// Project
///
/// Same-named fields are copied, fields the input lacks take the target
/// default, and fields outside the target are dropped.
///
/// # Inputs (from context)
/// - the projected port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Records on the target schema
#[derive(Debug, Clone)]
pub struct Project {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    input: Port,
    output: Port,
}

impl Project {
    /// Port name for the output
    pub const PORT_OUTPUT: &'static str = "output";

    /// Project onto an explicit target schema
    pub fn new(id: impl Into<String>, input: &Port, target: SchemaRef) -> Self {
        let id = id.into();
        Self {
            output: Port::of(&id, Self::PORT_OUTPUT, target),
            options: NodeOptions::default(),
            input: input.clone(),
            id,
        }
    }

    /// Project onto a subset of the input's fields
    pub fn fields(id: impl Into<String>, input: &Port, names: &[&str]) -> Result<Self> {
        let id = id.into();
        let target = input.schema.project(id.clone(), names)?;
        Ok(Self::new(id, input, target.into()))
    }

    pub fn output(&self) -> &Port {
        &self.output
    }
}

#[async_trait]
impl Node for Project {
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
        Vec::new()
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let target = &self.output.schema;
        let records = input.iter().map(|r| r.mapped(target)).collect();
        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::ACCEPTED, input.len() as u64);
        context.bind(&self.output, Dataset::from_records(target.clone(), records))?;
        Ok(())
    }
}
