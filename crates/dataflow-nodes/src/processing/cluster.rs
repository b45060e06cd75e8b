//! Cluster Task
//!
//! Groups records by a computed signature and keeps selected members of
//! each group, re-pointing references from dropped members to kept ones.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EngineError, EventSink, Field, Key, Keys, Node, NodeOptions, Port,
    Record, Result, RowErrors,
};
use serde_json::Value;

/// Field holding the cluster signature on rejected records
pub const SIGNATURE_FIELD: &str = "_cluster_signature";

/// Computes the cluster signature of a record
pub type Signature = Arc<dyn Fn(&Record) -> Result<String> + Send + Sync>;

/// Picks the positions of the members to keep from one cluster
pub type ClusterSelector = Arc<dyn Fn(&str, &[&Record]) -> Vec<usize> + Send + Sync>;

/// Identifier and reference keys used to re-point references
#[derive(Debug, Clone)]
struct Remap {
    identifier: Keys,
    references: Vec<Keys>,
}

/// Cluster
///
/// Records with the same signature form a cluster, in order of first
/// appearance. The selector picks the members to keep; without one every
/// member is kept. Kept members are output cluster by cluster. Dropped
/// members go to the reject port (with `_cluster_signature` added) when
/// rejects are recorded.
///
/// With remapping, every dropped member's identifier maps to the first
/// kept member of its cluster, and the references of kept records are
/// rewritten through that map. A reference to an identifier that is not
/// in the map is a per-record failure.
///
/// # Inputs (from context)
/// - the clustered port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Kept records
/// - `{id}.reject` - Dropped records (only with `with_rejects`)
/// - `{id}.error` - Records whose signature or references failed
#[derive(Clone)]
pub struct Cluster {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    signature: Signature,
    selector: Option<ClusterSelector>,
    remap: Option<Remap>,
    input: Port,
    output: Port,
    reject: Option<Port>,
    error: Port,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("input", &self.input.id)
            .field("selector", &self.selector.is_some())
            .field("remap", &self.remap)
            .finish()
    }
}

impl Cluster {
    /// Port name for kept records
    pub const PORT_OUTPUT: &'static str = "output";
    /// Port name for dropped records
    pub const PORT_REJECT: &'static str = "reject";

    pub fn new<F>(id: impl Into<String>, input: &Port, signature: F) -> Self
    where
        F: Fn(&Record) -> Result<String> + Send + Sync + 'static,
    {
        let id = id.into();
        Self {
            output: Port::of(&id, Self::PORT_OUTPUT, input.schema.clone()),
            error: Port::error_port(&id, &input.schema),
            reject: None,
            options: NodeOptions::default(),
            signature: Arc::new(signature),
            selector: None,
            remap: None,
            input: input.clone(),
            id,
        }
    }

    /// Keep only the members `selector` picks from each cluster
    pub fn with_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(&str, &[&Record]) -> Vec<usize> + Send + Sync + 'static,
    {
        self.selector = Some(Arc::new(selector));
        self
    }

    /// Copy dropped members to a `reject` port
    pub fn with_rejects(mut self) -> Self {
        let schema = self.input.schema.with_field(Field::string(SIGNATURE_FIELD));
        self.reject = Some(Port::of(&self.id, Self::PORT_REJECT, schema.into()));
        self
    }

    /// Re-point `references` from dropped to kept `identifier`s
    pub fn remapping(mut self, identifier: &str, references: &[&str]) -> Result<Self> {
        let schema = &self.input.schema;
        self.remap = Some(Remap {
            identifier: Keys::single(schema, identifier)?,
            references: references
                .iter()
                .map(|field| Keys::single(schema, field))
                .collect::<Result<_>>()?,
        });
        Ok(self)
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

    pub fn error(&self) -> &Port {
        &self.error
    }

    /// Positions of the kept members, in cluster order without repeats
    fn select(&self, signature: &str, members: &[&Record]) -> Vec<usize> {
        match &self.selector {
            None => (0..members.len()).collect(),
            Some(selector) => {
                let mut kept = Vec::new();
                for position in selector(signature, members) {
                    if position < members.len() && !kept.contains(&position) {
                        kept.push(position);
                    }
                }
                kept
            }
        }
    }

    fn rewrite(remap: &Remap, record: &Record, map: &HashMap<Key, Key>) -> Result<Record> {
        let mut record = record.clone();
        for keys in &remap.references {
            let key = keys.key_of(&record);
            if key.is_null() {
                continue;
            }
            let target = map.get(&key).ok_or_else(|| {
                EngineError::row(format!("Unable to find {} {} in the cluster map", keys.fields()[0], key))
            })?;
            if target != &key {
                record = keys.set(record, target)?;
            }
        }
        Ok(record)
    }
}

#[async_trait]
impl Node for Cluster {
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
        self.reject.iter().collect()
    }

    fn errors(&self) -> Vec<&Port> {
        vec![&self.error]
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let mut errors = RowErrors::new(&self.id, &self.options);

        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut clusters: Vec<(String, Vec<&Record>)> = Vec::new();
        for record in input.iter() {
            let signature = match (self.signature)(record) {
                Ok(signature) => signature,
                Err(e) => {
                    errors.fail(record, e)?;
                    continue;
                }
            };
            match positions.get(&signature) {
                Some(&position) => clusters[position].1.push(record),
                None => {
                    positions.insert(signature.clone(), clusters.len());
                    clusters.push((signature, vec![record]));
                }
            }
        }

        let mut kept: Vec<&Record> = Vec::new();
        let mut dropped = Vec::new();
        let mut map: HashMap<Key, Key> = HashMap::new();
        for (signature, members) in &clusters {
            let selected = self.select(signature, members);
            let survivor = selected.first().map(|&p| members[p]);
            for (position, &member) in members.iter().enumerate() {
                let target = if selected.contains(&position) {
                    kept.push(member);
                    Some(member)
                } else {
                    dropped.push(member.clone().with_value(SIGNATURE_FIELD, Value::String(signature.clone())));
                    survivor
                };
                if let (Some(remap), Some(target)) = (&self.remap, target) {
                    let id = remap.identifier.key_of(member);
                    if !id.is_null() {
                        map.insert(id, remap.identifier.key_of(target));
                    }
                }
            }
        }

        let mut result = Dataset::new(self.output.schema.clone());
        for record in kept {
            match &self.remap {
                None => result.push(record.clone()),
                Some(remap) => match Self::rewrite(remap, record, &map) {
                    Ok(rewritten) => result.push(rewritten),
                    Err(e) => errors.fail(record, e)?,
                },
            }
        }

        log::debug!(
            "Cluster {}: {} records in {} clusters, {} kept, {} dropped",
            self.id,
            input.len(),
            clusters.len(),
            result.len(),
            dropped.len()
        );
        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::CLUSTERS, clusters.len() as u64);
        context.count(&self.id, counter::ACCEPTED, result.len() as u64);
        context.count(&self.id, counter::REJECTED, dropped.len() as u64);
        context.bind(&self.output, result)?;
        if let Some(port) = &self.reject {
            context.bind(port, Dataset::from_records(port.schema.clone(), dropped))?;
        }
        errors.bind(context, &self.error)
    }
}
