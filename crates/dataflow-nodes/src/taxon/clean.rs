use std::collections::HashMap;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EventSink, Index, Key, MatchPolicy, Node, NodeOptions, Port, Result,
};

use super::{TaxonFields, TaxonKeys};

/// Taxon Clean
///
/// Produces the largest subset of the input whose references form a closed
/// set. Records whose parent or accepted reference does not resolve are
/// removed, then every record referring to a removed record, and so on
/// until nothing changes. Self-references resolve and are kept.
///
/// # Inputs (from context)
/// - the cleaned port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Retained records, in input order
/// - `{id}.removed` - Removed records, in input order
#[derive(Debug, Clone)]
pub struct TaxonClean {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    fields: TaxonFields,
    input: Port,
    output: Port,
    removed: Port,
}

impl TaxonClean {
    /// Port name for retained records
    pub const PORT_OUTPUT: &'static str = "output";
    /// Port name for removed records
    pub const PORT_REMOVED: &'static str = "removed";

    pub fn new(id: impl Into<String>, input: &Port, keys: TaxonKeys) -> Result<Self> {
        let id = id.into();
        Ok(Self {
            fields: keys.resolve(&input.schema)?,
            output: Port::of(&id, Self::PORT_OUTPUT, input.schema.clone()),
            removed: Port::of(&id, Self::PORT_REMOVED, input.schema.clone()),
            options: NodeOptions::default(),
            input: input.clone(),
            id,
        })
    }

    pub fn output(&self) -> &Port {
        &self.output
    }

    pub fn removed(&self) -> &Port {
        &self.removed
    }

    /// Flags, by position, the records to remove
    fn sweep(&self, dataset: &Dataset) -> Result<Vec<bool>> {
        // Validates uniqueness of the identifiers
        let index = Index::build(dataset, self.fields.identifier.clone(), MatchPolicy::Unique)?;

        let mut referrers: HashMap<Key, Vec<usize>> = HashMap::new();
        let mut removed = vec![false; dataset.len()];
        let mut worklist = Vec::new();
        for (position, record) in dataset.iter().enumerate() {
            for (_, reference) in self.fields.references_of(record) {
                if !index.contains(&reference) && !removed[position] {
                    removed[position] = true;
                    worklist.push(position);
                }
                referrers.entry(reference).or_default().push(position);
            }
        }

        while let Some(position) = worklist.pop() {
            let id = self.fields.id_of(&dataset.records()[position]);
            if id.is_null() {
                continue;
            }
            for &referrer in referrers.get(&id).into_iter().flatten() {
                if !removed[referrer] {
                    removed[referrer] = true;
                    worklist.push(referrer);
                }
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl Node for TaxonClean {
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
        vec![&self.removed]
    }

    fn errors(&self) -> Vec<&Port> {
        Vec::new()
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let flags = self.sweep(&input)?;

        let mut retained = Dataset::new(self.output.schema.clone());
        let mut removed = Dataset::new(self.removed.schema.clone());
        for (record, remove) in input.iter().zip(flags) {
            if remove {
                removed.push(record.clone());
            } else {
                retained.push(record.clone());
            }
        }

        log::debug!(
            "TaxonClean {}: removed {} of {} records",
            self.id,
            removed.len(),
            input.len()
        );
        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::ACCEPTED, retained.len() as u64);
        context.count(&self.id, counter::CLEANED, removed.len() as u64);
        context.bind(&self.output, retained)?;
        context.bind(&self.removed, removed)?;
        Ok(())
    }
}
