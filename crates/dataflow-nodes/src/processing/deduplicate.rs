//! Deduplicate Task
//!
//! Keeps the first record per key.

use std::collections::HashSet;

use async_trait::async_trait;
use dataflow_engine::{counter, Context, Dataset, EventSink, Keys, Node, NodeOptions, Port, Result};

/// Deduplicate
///
/// The first record seen for a key goes to the output; later records with
/// the same key go to the duplicates port. Records with a null key are never
/// duplicates of anything and always pass.
///
/// # Inputs (from context)
/// - the deduplicated port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - First record per key, in input order
/// - `{id}.duplicates` - Later records per key
#[derive(Debug, Clone)]
pub struct Deduplicate {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    keys: Keys,
    input: Port,
    output: Port,
    duplicates: Port,
}

impl Deduplicate {
    /// Port name for the output
    pub const PORT_OUTPUT: &'static str = "output";
    /// Port name for duplicate records
    pub const PORT_DUPLICATES: &'static str = "duplicates";

    /// Deduplicate on the named key fields
    pub fn new<S: AsRef<str>>(id: impl Into<String>, input: &Port, keys: &[S]) -> Result<Self> {
        let id = id.into();
        Ok(Self {
            keys: Keys::new(&input.schema, keys)?,
            output: Port::of(&id, Self::PORT_OUTPUT, input.schema.clone()),
            duplicates: Port::of(&id, Self::PORT_DUPLICATES, input.schema.clone()),
            options: NodeOptions::default(),
            input: input.clone(),
            id,
        })
    }

    pub fn output(&self) -> &Port {
        &self.output
    }

    pub fn duplicates(&self) -> &Port {
        &self.duplicates
    }
}

#[async_trait]
impl Node for Deduplicate {
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

    fn extras(&self) -> Vec<&Port> {
        vec![&self.duplicates]
    }

    fn errors(&self) -> Vec<&Port> {
        Vec::new()
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let mut seen = HashSet::with_capacity(input.len());
        let mut result = Dataset::new(self.output.schema.clone());
        let mut duplicates = Dataset::new(self.duplicates.schema.clone());
        for record in input.iter() {
            let key = self.keys.key_of(record);
            if key.is_null() || seen.insert(key) {
                result.push(record.clone());
            } else {
                duplicates.push(record.clone());
            }
        }

        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::ACCEPTED, result.len() as u64);
        context.count(&self.id, counter::DUPLICATE, duplicates.len() as u64);
        context.bind(&self.output, result)?;
        context.bind(&self.duplicates, duplicates)?;
        Ok(())
    }
}
