//! Parent Lookup Task
//!
//! A lookup that climbs the input's own parent chain when a record has no
//! match of its own.

use std::collections::HashSet;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, EventSink, Index, Keys, MatchPolicy, Node, NodeOptions, Port, Result,
};

use super::lookup::{Lookup, LookupConfig};

/// Parent Lookup
///
/// Joins like [`Lookup`], but when a record's key has no match the key of
/// its parent (found by identifier within the input) is tried, then the
/// grandparent's, until a match is found or the chain ends. The output
/// record is always the original input record combined with the ancestor's
/// match. A chain that loops back on itself ends as unmatched.
///
/// # Inputs (from context)
/// - the input port (required)
/// - the lookup port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Joined records
/// - `{id}.unmatched` - Unmatched input records (only with `record_unmatched`)
/// - `{id}.error` - Rejected unmatched records (with `reject`)
#[derive(Debug, Clone)]
pub struct ParentLookup {
    lookup: Lookup,
    identifier: Keys,
    parent: Keys,
}

impl ParentLookup {
    /// Look `input` up in `lookup`, walking `parent` references to
    /// `identifier`s within `input` when a record does not match
    pub fn new(
        id: impl Into<String>,
        input: &Port,
        lookup: &Port,
        config: LookupConfig,
        identifier: &str,
        parent: &str,
    ) -> Result<Self> {
        Ok(Self {
            identifier: Keys::single(&input.schema, identifier)?,
            parent: Keys::single(&input.schema, parent)?,
            lookup: Lookup::new(id, input, lookup, config)?,
        })
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.lookup = self.lookup.with_options(options);
        self
    }

    pub fn output(&self) -> &Port {
        self.lookup.output()
    }

    pub fn unmatched(&self) -> Option<&Port> {
        self.lookup.unmatched()
    }

    pub fn error(&self) -> &Port {
        self.lookup.error()
    }
}

#[async_trait]
impl Node for ParentLookup {
    fn id(&self) -> &str {
        self.lookup.id()
    }

    fn options(&self) -> &NodeOptions {
        self.lookup.options()
    }

    fn inputs(&self) -> Vec<&Port> {
        self.lookup.inputs()
    }

    fn outputs(&self) -> Vec<&Port> {
        self.lookup.outputs()
    }

    fn extras(&self) -> Vec<&Port> {
        self.lookup.extras()
    }

    fn errors(&self) -> Vec<&Port> {
        self.lookup.errors()
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(self.lookup.input())?;
        let table = context.resolve(self.lookup.table())?;
        let index = self.lookup.index(&table)?;
        let ancestors = Index::build(&input, self.identifier.clone(), MatchPolicy::Unique)?;

        let mut climbed = 0;
        let joined = self.lookup.join(&input, |record| {
            let mut current = record;
            let mut visited = HashSet::new();
            loop {
                let links = self.lookup.matches(&index, current);
                if !links.is_empty() {
                    return links;
                }
                let Some(parent) = ancestors.lookup(current, &self.parent) else {
                    return links;
                };
                if !visited.insert(self.identifier.key_of(parent)) {
                    return Vec::new();
                }
                climbed += 1;
                current = parent;
            }
        });

        log::debug!("ParentLookup {}: climbed {} parents", self.id(), climbed);
        context.count(self.id(), counter::PARENTS, climbed);
        self.lookup.publish(context, joined, index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::FieldSelection;
    use dataflow_engine::{Dataset, Field, NullEventSink, Record, Schema, SchemaRef};
    use serde_json::json;

    fn taxa() -> SchemaRef {
        Schema::shared(
            "taxa",
            vec![Field::string("id"), Field::string("parent"), Field::string("name")],
        )
        .unwrap()
    }

    fn taxon(line: u64, id: &str, parent: Option<&str>, name: &str) -> Record {
        Record::from_pairs(
            line,
            [("id", json!(id)), ("parent", json!(parent)), ("name", json!(name))],
        )
    }

    fn bound(input: Vec<Record>) -> (Context, Port, Port) {
        let distributions = Schema::shared(
            "distributions",
            vec![Field::string("taxonId"), Field::string("region")],
        )
        .unwrap();
        let input_port = Port::of("taxa", "output", taxa());
        let table = Port::of("distributions", "output", distributions.clone());
        let regions = vec![
            Record::from_pairs(1, [("taxonId", json!("genus")), ("region", json!("NSW"))]),
            Record::from_pairs(2, [("taxonId", json!("family")), ("region", json!("Australia"))]),
        ];
        let mut context = Context::new();
        context.bind(&input_port, Dataset::from_records(taxa(), input)).unwrap();
        context.bind(&table, Dataset::from_records(distributions, regions)).unwrap();
        (context, input_port, table)
    }

    fn config() -> LookupConfig {
        LookupConfig {
            lookup: FieldSelection::include(&["region"]),
            record_unmatched: true,
            ..LookupConfig::on("id", "taxonId")
        }
    }

    #[tokio::test]
    async fn test_inherits_nearest_ancestor_match() {
        let (mut context, input, table) = bound(vec![
            taxon(1, "family", None, "Fabaceae"),
            taxon(2, "genus", Some("family"), "Acacia"),
            taxon(3, "species", Some("genus"), "Acacia dealbata"),
            taxon(4, "subspecies", Some("species"), "Acacia dealbata subsp. dealbata"),
            taxon(5, "orphan", Some("missing"), "Orphan"),
        ]);
        let node = ParentLookup::new("regions", &input, &table, config(), "id", "parent").unwrap();
        node.execute(&mut context, &NullEventSink).await.unwrap();

        let output = context.resolve(node.output()).unwrap();
        let regions: Vec<(&str, Option<&str>)> = output
            .iter()
            .map(|r| (r.get_str("id").unwrap_or_default(), r.get_str("region")))
            .collect();
        assert_eq!(
            regions,
            vec![
                ("family", Some("Australia")),
                ("genus", Some("NSW")),
                ("species", Some("NSW")),
                ("subspecies", Some("NSW")),
                ("orphan", None),
            ]
        );
        // species climbs one parent, subspecies two
        assert_eq!(context.count_of("regions", counter::PARENTS), 3);
        assert_eq!(context.count_of("regions", counter::UNMATCHED), 1);
        let missing = context.resolve(node.unmatched().unwrap()).unwrap();
        assert_eq!(missing.records()[0].get_str("id"), Some("orphan"));
    }

    #[tokio::test]
    async fn test_parent_cycle_is_unmatched() {
        let (mut context, input, table) = bound(vec![
            taxon(1, "a", Some("b"), "A"),
            taxon(2, "b", Some("a"), "B"),
        ]);
        let node = ParentLookup::new("regions", &input, &table, config(), "id", "parent").unwrap();
        node.execute(&mut context, &NullEventSink).await.unwrap();

        assert_eq!(context.count_of("regions", counter::UNMATCHED), 2);
        assert_eq!(context.resolve(node.output()).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_parent_field() {
        let input = Port::of("taxa", "output", taxa());
        let err = ParentLookup::new("regions", &input, &input, config(), "id", "parentId").unwrap_err();
        assert!(err.is_configuration());
    }
}
