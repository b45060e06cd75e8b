use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EngineError, EventSink, Field, FieldType, Key, Node, NodeOptions,
    Port, Record, Result, RowErrors, Schema, SchemaRef,
};
use serde_json::Value;

use super::{TaxonFields, TaxonKeys};
use crate::processing::Rule;

/// Mapping field holding the replaced identifier
pub const ORIGINAL_ID: &str = "original_id";
/// Mapping field holding the new identifier
pub const MAPPED_ID: &str = "mapped_id";

/// Taxon Reidentify
///
/// Replaces every identifier with one computed by a rule and rewrites the
/// parent and accepted references to match. Each distinct non-null
/// identifier is mapped once; a repeated identifier reuses its first
/// mapping. A computed identifier that was already assigned to a different
/// identifier is replaced by a random UUID. References to identifiers
/// outside the dataset are left as they are.
///
/// A rule failure is reported once per identifier: later records sharing
/// a failed identifier are held back from the output without a second
/// attempt or error row.
///
/// # Inputs (from context)
/// - the reidentified port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Records with new identifiers
/// - `{id}.mapping` - One (`original_id`, `mapped_id`) row per identifier
/// - `{id}.error` - Records whose identifier could not be computed
pub struct TaxonReidentify {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    keys: TaxonKeys,
    fields: TaxonFields,
    identifier: Rule,
    input: Port,
    output: Port,
    mapping: Port,
    error: Port,
}

impl std::fmt::Debug for TaxonReidentify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaxonReidentify")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .field("identifier", &self.identifier)
            .finish()
    }
}

impl TaxonReidentify {
    /// Port name for the rewritten records
    pub const PORT_OUTPUT: &'static str = "output";
    /// Port name for the identifier mapping
    pub const PORT_MAPPING: &'static str = "mapping";

    pub fn new(id: impl Into<String>, input: &Port, keys: TaxonKeys, identifier: Rule) -> Result<Self> {
        let id = id.into();
        Ok(Self {
            fields: keys.resolve(&input.schema)?,
            output: Port::of(&id, Self::PORT_OUTPUT, input.schema.clone()),
            mapping: Port::of(&id, Self::PORT_MAPPING, Self::mapping_schema(&id)?),
            error: Port::error_port(&id, &input.schema),
            options: NodeOptions::default(),
            input: input.clone(),
            identifier,
            keys,
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

    pub fn mapping(&self) -> &Port {
        &self.mapping
    }

    pub fn error(&self) -> &Port {
        &self.error
    }

    fn mapping_schema(id: &str) -> Result<SchemaRef> {
        Schema::shared(
            format!("{}_mapping", id),
            vec![
                Field::new(ORIGINAL_ID, FieldType::Any),
                Field::new(MAPPED_ID, FieldType::Any),
            ],
        )
    }

    /// The new identifier for `record`, or `None` when it has no identifier
    fn compute(&self, record: &Record, context: &Context) -> Result<Option<Value>> {
        if self.fields.id_of(record).is_null() {
            return Ok(None);
        }
        match self.identifier.evaluate(record, context, None)? {
            Value::Null => Err(EngineError::row(format!(
                "No new identifier for {}",
                self.fields.id_of(record)
            ))),
            value => Ok(Some(value)),
        }
    }

    /// Rewrite the identifier and references of a record through the mapping
    fn rewrite(&self, record: &Record, mapping: &HashMap<Key, Value>) -> Record {
        let fields = std::iter::once(self.keys.identifier.as_str()).chain(self.keys.reference_fields());
        let mut record = record.clone();
        for field in fields {
            let replacement = record
                .get(field)
                .and_then(|value| mapping.get(&Key::single(value)))
                .cloned();
            if let Some(value) = replacement {
                record = record.with_value(field, value);
            }
        }
        record
    }
}

#[async_trait]
impl Node for TaxonReidentify {
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
        vec![&self.mapping]
    }

    fn errors(&self) -> Vec<&Port> {
        vec![&self.error]
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let mut errors = RowErrors::new(&self.id, &self.options);
        let mut failed = vec![false; input.len()];

        // Pass 1: old identifier -> new identifier
        let mut mapping: HashMap<Key, Value> = HashMap::new();
        let mut assigned: HashSet<Key> = HashSet::new();
        let mut failures: HashSet<Key> = HashSet::new();
        let mut rows = Dataset::new(self.mapping.schema.clone());
        for (position, record) in input.iter().enumerate() {
            let old = self.fields.id_of(record);
            if old.is_null() || mapping.contains_key(&old) {
                continue;
            }
            if failures.contains(&old) {
                failed[position] = true;
                continue;
            }
            let mut new_id = match self.compute(record, context) {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    errors.fail(record, e)?;
                    failed[position] = true;
                    failures.insert(old);
                    continue;
                }
            };
            if !assigned.insert(Key::single(&new_id)) {
                let replacement = Value::String(uuid::Uuid::new_v4().to_string());
                log::warn!(
                    "TaxonReidentify {}: identifier {} for {} already assigned, using {}",
                    self.id,
                    new_id,
                    old,
                    replacement
                );
                assigned.insert(Key::single(&replacement));
                new_id = replacement;
            }
            let original = old.to_values().into_iter().next().unwrap_or(Value::Null);
            rows.push(Record::from_pairs(
                record.line(),
                [(ORIGINAL_ID, original), (MAPPED_ID, new_id.clone())],
            ));
            mapping.insert(old, new_id);
        }

        // Pass 2: rewrite identifiers and references
        let mut result = Dataset::new(self.output.schema.clone());
        for (record, failed) in input.iter().zip(failed) {
            if !failed {
                result.push(self.rewrite(record, &mapping));
            }
        }

        log::debug!(
            "TaxonReidentify {}: mapped {} identifiers over {} records",
            self.id,
            rows.len(),
            input.len()
        );
        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::MAPPED, rows.len() as u64);
        context.count(&self.id, counter::ACCEPTED, result.len() as u64);
        context.bind(&self.output, result)?;
        context.bind(&self.mapping, rows)?;
        errors.bind(context, &self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxon::tests::{bind, ids, taxon};
    use dataflow_engine::NullEventSink;
    use serde_json::json;

    fn prefixed() -> Rule {
        Rule::function(|record: &Record, _: &Context, _: Option<&Value>| {
            Ok(json!(format!("urn:{}", record.get_str("taxonID").unwrap_or_default())))
        })
    }

    #[tokio::test]
    async fn test_rewrites_references() {
        let mut context = Context::new();
        let port = bind(
            &mut context,
            "source",
            vec![
                taxon(1, "1", "", "", "Plantae"),
                taxon(2, "2", "1", "", "Acacia"),
                taxon(3, "3", "2", "2", "Racosperma"),
                taxon(4, "4", "99", "", "Outside"),
                taxon(5, "", "1", "", "Nameless"),
            ],
        );
        let node = TaxonReidentify::new("reid", &port, TaxonKeys::darwin_core(), prefixed()).unwrap();
        node.execute(&mut context, &NullEventSink).await.unwrap();

        assert_eq!(ids(&context, node.output()), vec!["urn:1", "urn:2", "urn:3", "urn:4", ""]);
        let output = context.resolve(node.output()).unwrap();
        let acacia = &output.records()[2];
        assert_eq!(acacia.get_str("parentNameUsageID"), Some("urn:2"));
        assert_eq!(acacia.get_str("acceptedNameUsageID"), Some("urn:2"));
        assert_eq!(output.records()[3].get_str("parentNameUsageID"), Some("99"));
        assert_eq!(output.records()[4].get_str("parentNameUsageID"), Some("urn:1"));

        let mapping = context.resolve(node.mapping()).unwrap();
        assert_eq!(mapping.len(), 4);
        assert_eq!(mapping.records()[0].get(ORIGINAL_ID), Some(&json!("1")));
        assert_eq!(mapping.records()[0].get(MAPPED_ID), Some(&json!("urn:1")));
    }

    #[tokio::test]
    async fn test_collisions_get_fresh_identifiers() {
        let mut context = Context::new();
        let port = bind(
            &mut context,
            "source",
            vec![
                taxon(1, "1", "", "", "Plantae"),
                taxon(2, "2", "1", "", "Acacia"),
                taxon(3, "2", "1", "", "Acacia again"),
            ],
        );
        let node =
            TaxonReidentify::new("reid", &port, TaxonKeys::darwin_core(), Rule::constant(json!("same"))).unwrap();
        node.execute(&mut context, &NullEventSink).await.unwrap();

        let mapping = context.resolve(node.mapping()).unwrap();
        assert_eq!(mapping.len(), 2);
        let first = mapping.records()[0].get_str(MAPPED_ID).unwrap();
        let second = mapping.records()[1].get_str(MAPPED_ID).unwrap();
        assert_eq!(first, "same");
        assert_ne!(first, second);

        // The repeated identifier reuses its mapping
        let output = ids(&context, node.output());
        assert_eq!(output[1], output[2]);
        assert_eq!(output[1], second);
    }

    #[tokio::test]
    async fn test_failed_identifiers() {
        let mut context = Context::new();
        let port = bind(
            &mut context,
            "source",
            vec![taxon(1, "1", "", "", "Plantae"), taxon(2, "2", "1", "", "Acacia")],
        );
        let rule = Rule::function(|record: &Record, _: &Context, _: Option<&Value>| {
            match record.get_str("taxonID") {
                Some("2") => Err(EngineError::row("no identifier for Acacia")),
                _ => Ok(json!("A")),
            }
        });
        let node = TaxonReidentify::new("reid", &port, TaxonKeys::darwin_core(), rule)
            .unwrap()
            .with_options(NodeOptions::tolerant());
        node.execute(&mut context, &NullEventSink).await.unwrap();

        assert_eq!(ids(&context, node.output()), vec!["A"]);
        let errors = context.resolve(node.error()).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.records()[0].line(), 2);
    }

    #[tokio::test]
    async fn test_failed_identifier_attempted_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut context = Context::new();
        let port = bind(
            &mut context,
            "source",
            vec![
                taxon(1, "1", "", "", "Plantae"),
                taxon(2, "2", "1", "", "Acacia"),
                taxon(3, "2", "1", "", "Acacia again"),
                taxon(4, "3", "2", "", "Acacia dealbata"),
            ],
        );
        let attempts = Arc::new(AtomicUsize::new(0));
        let counted = attempts.clone();
        let rule = Rule::function(move |record: &Record, _: &Context, _: Option<&Value>| {
            match record.get_str("taxonID") {
                Some("2") => {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::row("no identifier for Acacia"))
                }
                Some(id) => Ok(json!(format!("urn:{}", id))),
                None => Ok(Value::Null),
            }
        });
        let node = TaxonReidentify::new("reid", &port, TaxonKeys::darwin_core(), rule)
            .unwrap()
            .with_options(NodeOptions::tolerant());
        node.execute(&mut context, &NullEventSink).await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let errors = context.resolve(node.error()).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.records()[0].line(), 2);
        assert_eq!(ids(&context, node.output()), vec!["urn:1", "urn:3"]);
        assert_eq!(context.resolve(node.mapping()).unwrap().len(), 2);
    }
}
