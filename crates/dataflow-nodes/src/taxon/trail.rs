use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EventSink, Index, Issue, Key, MatchPolicy, Node, NodeOptions, Port,
    Record, Result, RowErrors,
};
use serde_json::Value;

use super::{TaxonFields, TaxonKeys};
use crate::processing::Predicate;

/// Where a reference leads once ancestors failing the predicate are skipped
enum Target<'a> {
    /// Already in the output
    Present(Key),
    /// To be pulled from the reference list
    Pull(Key, &'a Record),
    /// Not in either list
    Unresolved,
    /// Every ancestor up the chain was skipped
    Nothing,
}

/// Taxon Trail
///
/// Completes a partial taxon list from a reference list: every ancestor
/// (parent or accepted) that an output record refers to, and that is not
/// already present, is pulled in from the reference until every used
/// reference is present or unresolvable. Input records come first, laid
/// out on the reference schema, then pulled ancestors in the order they
/// were first needed. A reference found in neither list gets a single
/// `unresolved-reference` warning on the referring record.
///
/// With a predicate, reference records that fail it are never pulled: the
/// reference is relinked to the nearest ancestor up the parent chain that
/// passes, or set to null when none does. Input records are always kept.
///
/// When a reference entry is required, input records whose identifier is
/// not in the reference list go to the error port instead of the output.
///
/// Running the trail over its own output changes nothing.
///
/// # Inputs (from context)
/// - the partial port (required)
/// - the reference port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - The completed list, on the reference schema
/// - `{id}.error` - Input records missing from the reference list
#[derive(Clone)]
pub struct TaxonTrail {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    fields: TaxonFields,
    predicate: Option<Predicate>,
    require_reference: bool,
    input: Port,
    reference: Port,
    output: Port,
    error: Port,
}

impl fmt::Debug for TaxonTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaxonTrail")
            .field("id", &self.id)
            .field("fields", &self.fields)
            .field("predicate", &self.predicate.is_some())
            .field("require_reference", &self.require_reference)
            .finish()
    }
}

impl TaxonTrail {
    /// Port name for the completed list
    pub const PORT_OUTPUT: &'static str = "output";

    /// Trail `input` through `reference`; both must carry the taxon keys
    pub fn new(id: impl Into<String>, input: &Port, reference: &Port, keys: TaxonKeys) -> Result<Self> {
        let id = id.into();
        keys.resolve(&input.schema)?;
        Ok(Self {
            fields: keys.resolve(&reference.schema)?,
            output: Port::of(&id, Self::PORT_OUTPUT, reference.schema.clone()),
            error: Port::error_port(&id, &input.schema),
            options: NodeOptions::default(),
            predicate: None,
            require_reference: false,
            input: input.clone(),
            reference: reference.clone(),
            id,
        })
    }

    /// Only pull reference records for which `predicate` holds
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> Result<bool> + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Send input records without a reference entry to the error port
    pub fn requiring_reference(mut self) -> Self {
        self.require_reference = true;
        self
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

    fn accepts(&self, record: &Record) -> Result<bool> {
        match &self.predicate {
            Some(predicate) => predicate(record),
            None => Ok(true),
        }
    }

    /// Follow `key` up the parent chain past ancestors the predicate rejects
    fn target<'a>(
        &self,
        index: &Index<'a>,
        present: &HashSet<Key>,
        key: &Key,
        skipped: &mut HashSet<Key>,
    ) -> Result<Target<'a>> {
        let mut current = key.clone();
        let mut visited = HashSet::new();
        loop {
            if present.contains(&current) {
                return Ok(Target::Present(current));
            }
            let Some(ancestor) = index.find(&current) else {
                return Ok(if &current == key { Target::Unresolved } else { Target::Nothing });
            };
            if self.accepts(ancestor)? {
                return Ok(Target::Pull(current, ancestor));
            }
            skipped.insert(current.clone());
            if !visited.insert(current.clone()) {
                return Ok(Target::Nothing);
            }
            current = self.fields.parent_of(ancestor);
            if current.is_null() {
                return Ok(Target::Nothing);
            }
        }
    }
}

#[async_trait]
impl Node for TaxonTrail {
    fn id(&self) -> &str {
        &self.id
    }

    fn options(&self) -> &NodeOptions {
        &self.options
    }

    fn inputs(&self) -> Vec<&Port> {
        vec![&self.input, &self.reference]
    }

    fn outputs(&self) -> Vec<&Port> {
        vec![&self.output]
    }

    fn errors(&self) -> Vec<&Port> {
        vec![&self.error]
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        let reference = context.resolve(&self.reference)?;
        let index = Index::build(&reference, self.fields.identifier.clone(), MatchPolicy::First)?;
        let schema = &self.output.schema;
        let mut errors = RowErrors::new(&self.id, &self.options);

        // The output doubles as the breadth-first worklist
        let mut output: Vec<Record> = Vec::with_capacity(input.len());
        for record in input.iter() {
            let id = self.fields.id_of(record);
            if self.require_reference && (id.is_null() || !index.contains(&id)) {
                errors.quarantine(
                    record.clone(),
                    vec![Issue::error("missing-reference", format!("Missing reference entry for {}", id))],
                );
            } else {
                output.push(record.mapped(schema));
            }
        }
        let mut present: HashSet<_> = output
            .iter()
            .map(|r| self.fields.id_of(r))
            .filter(|key| !key.is_null())
            .collect();
        let mut skipped = HashSet::new();
        let mut pulled = 0;
        let mut unresolved = 0;

        let mut position = 0;
        while position < output.len() {
            let mut missing = Vec::new();
            for keys in &self.fields.references {
                let key = keys.key_of(&output[position]);
                if key.is_null() || present.contains(&key) {
                    continue;
                }
                let field = keys.fields()[0].as_str();
                let relinked = match self.target(&index, &present, &key, &mut skipped)? {
                    Target::Present(found) => found,
                    Target::Pull(found, ancestor) => {
                        present.insert(found.clone());
                        output.push(ancestor.mapped(schema));
                        pulled += 1;
                        found
                    }
                    Target::Unresolved => {
                        missing.push(
                            Issue::warning("unresolved-reference", format!("{} {} cannot be found", field, key))
                                .on_field(field),
                        );
                        continue;
                    }
                    Target::Nothing => Key::single(&Value::Null),
                };
                if relinked != key {
                    log::trace!("TaxonTrail {}: {} {} relinked to {}", self.id, field, key, relinked);
                    let record = std::mem::take(&mut output[position]);
                    output[position] = keys.set(record, &relinked)?;
                }
            }
            if !missing.is_empty() {
                unresolved += missing.len() as u64;
                let record = std::mem::take(&mut output[position]);
                output[position] = missing.into_iter().fold(record, |r, issue| r.with_issue_once(issue));
            }
            position += 1;
        }

        log::debug!(
            "TaxonTrail {}: {} input records, {} ancestors pulled, {} skipped, {} unresolved references",
            self.id,
            input.len(),
            pulled,
            skipped.len(),
            unresolved
        );
        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        context.count(&self.id, counter::PULLED, pulled);
        context.count(&self.id, counter::SKIPPED, skipped.len() as u64);
        context.count(&self.id, counter::UNRESOLVED, unresolved);
        context.count(&self.id, counter::ACCEPTED, output.len() as u64);
        context.bind(&self.output, Dataset::from_records(schema.clone(), output))?;
        errors.bind(context, &self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxon::tests::{bind, ids, taxon};
    use dataflow_engine::{NullEventSink, Record};

    fn reference() -> Vec<Record> {
        vec![
            taxon(1, "1", "", "", "Plantae"),
            taxon(2, "2", "1", "", "Fabaceae"),
            taxon(3, "3", "2", "", "Acacia"),
            taxon(4, "4", "3", "", "Acacia dealbata"),
            taxon(5, "5", "2", "4", "Racosperma dealbatum"),
            taxon(6, "6", "3", "", "Acacia pycnantha"),
        ]
    }

    #[tokio::test]
    async fn test_pulls_ancestors_breadth_first() {
        let mut context = Context::new();
        let partial = bind(
            &mut context,
            "partial",
            vec![taxon(1, "5", "2", "4", "Racosperma dealbatum"), taxon(2, "6", "3", "", "Acacia pycnantha")],
        );
        let reference = bind(&mut context, "reference", reference());
        let node = TaxonTrail::new("trail", &partial, &reference, TaxonKeys::darwin_core()).unwrap();
        node.execute(&mut context, &NullEventSink).await.unwrap();

        assert_eq!(ids(&context, node.output()), vec!["5", "6", "2", "4", "3", "1"]);
        assert_eq!(context.count_of("trail", counter::PULLED), 4);
        assert_eq!(context.count_of("trail", counter::UNRESOLVED), 0);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let mut context = Context::new();
        let partial = bind(&mut context, "partial", vec![taxon(1, "a", "b", "", "A")]);
        let reference = bind(
            &mut context,
            "reference",
            vec![taxon(1, "a", "b", "", "A"), taxon(2, "b", "c", "", "B"), taxon(3, "c", "a", "", "C")],
        );
        let node = TaxonTrail::new("trail", &partial, &reference, TaxonKeys::darwin_core()).unwrap();
        node.execute(&mut context, &NullEventSink).await.unwrap();
        assert_eq!(ids(&context, node.output()), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_unresolved_warning_once() {
        let mut context = Context::new();
        let partial = bind(&mut context, "partial", vec![taxon(1, "7", "99", "99", "Lost")]);
        let reference = bind(&mut context, "reference", reference());
        let node = TaxonTrail::new("trail", &partial, &reference, TaxonKeys::darwin_core()).unwrap();
        node.execute(&mut context, &NullEventSink).await.unwrap();

        let output = context.resolve(node.output()).unwrap();
        assert_eq!(output.len(), 1);
        let record = &output.records()[0];
        // One warning per referring field
        assert_eq!(record.issues().len(), 2);
        assert!(record.issues().iter().all(|i| i.code == "unresolved-reference"));
        assert!(!record.has_errors());
        assert_eq!(context.count_of("trail", counter::UNRESOLVED), 2);
    }

    #[tokio::test]
    async fn test_predicate_relinks_past_skipped_ancestors() {
        let mut context = Context::new();
        let partial = bind(
            &mut context,
            "partial",
            vec![taxon(1, "4", "3", "", "Acacia dealbata"), taxon(2, "5", "2", "4", "Racosperma dealbatum")],
        );
        let reference = bind(&mut context, "reference", reference());
        // Genera and families are left out of the trail
        let node = TaxonTrail::new("trail", &partial, &reference, TaxonKeys::darwin_core())
            .unwrap()
            .with_predicate(|record: &Record| Ok(!matches!(record.get_str("taxonID"), Some("2") | Some("3"))));
        node.execute(&mut context, &NullEventSink).await.unwrap();

        assert_eq!(ids(&context, node.output()), vec!["4", "5", "1"]);
        let output = context.resolve(node.output()).unwrap();
        assert_eq!(output.records()[0].get_str("parentNameUsageID"), Some("1"));
        assert_eq!(output.records()[1].get_str("parentNameUsageID"), Some("1"));
        assert_eq!(output.records()[1].get_str("acceptedNameUsageID"), Some("4"));
        assert_eq!(context.count_of("trail", counter::SKIPPED), 2);

        // Nothing left to pull or relink on a second pass
        let again = TaxonTrail::new("again", node.output(), &reference, TaxonKeys::darwin_core())
            .unwrap()
            .with_predicate(|record: &Record| Ok(!matches!(record.get_str("taxonID"), Some("2") | Some("3"))));
        again.execute(&mut context, &NullEventSink).await.unwrap();
        assert_eq!(ids(&context, again.output()), vec!["4", "5", "1"]);
        assert_eq!(context.count_of("again", counter::PULLED), 0);
    }

    #[tokio::test]
    async fn test_predicate_rejecting_every_ancestor_clears_reference() {
        let mut context = Context::new();
        let partial = bind(&mut context, "partial", vec![taxon(1, "6", "3", "", "Acacia pycnantha")]);
        let reference = bind(&mut context, "reference", reference());
        let node = TaxonTrail::new("trail", &partial, &reference, TaxonKeys::darwin_core())
            .unwrap()
            .with_predicate(|_: &Record| Ok(false));
        node.execute(&mut context, &NullEventSink).await.unwrap();

        let output = context.resolve(node.output()).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output.records()[0].get("parentNameUsageID"), None);
        assert!(output.records()[0].issues().is_empty());
    }

    #[tokio::test]
    async fn test_missing_reference_entry() {
        let mut context = Context::new();
        let partial = bind(
            &mut context,
            "partial",
            vec![taxon(1, "6", "3", "", "Acacia pycnantha"), taxon(2, "77", "3", "", "Acacia nova")],
        );
        let reference = bind(&mut context, "reference", reference());
        let node = TaxonTrail::new("trail", &partial, &reference, TaxonKeys::darwin_core())
            .unwrap()
            .requiring_reference()
            .with_options(NodeOptions::tolerant());
        node.execute(&mut context, &NullEventSink).await.unwrap();

        assert_eq!(ids(&context, node.output()), vec!["6", "3", "2", "1"]);
        let errors = context.resolve(node.error()).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.records()[0].line(), 2);
        assert_eq!(errors.records()[0].issues()[0].code, "missing-reference");
        assert!(errors.records()[0].issues()[0].message.starts_with("Missing reference entry"));
    }
}
