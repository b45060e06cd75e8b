//! Dataflow Nodes
//!
//! Concrete node implementations for the dataflow engine. Each node is a
//! building block wired to others through typed ports.
//!
//! # Categories
//!
//! - **Input**: Nodes that bring records into a run
//! - **Output**: Nodes that write records out of a run
//! - **Processing**: Relational-style transforms (filter, map, lookup, etc.)
//! - **Control**: Nodes that run sub-pipelines
//! - **Taxon**: Referential-integrity repair over hierarchical records
//!
//! [`Operator`] closes the set: an orchestrator over `Operator` runs any
//! mix of these nodes without boxing.

pub mod control;
pub mod input;
pub mod output;
pub mod processing;
pub mod taxon;

// Re-export all tasks for convenience
pub use control::*;
pub use input::*;
pub use output::*;
pub use processing::*;
pub use taxon::*;

use async_trait::async_trait;
use dataflow_engine::{Context, EventSink, Node, NodeOptions, Port, Result};

macro_rules! operators {
    ($($variant:ident),+ $(,)?) => {
        /// Every concrete node
        #[derive(Debug)]
        pub enum Operator {
            $($variant($variant),)+
        }

        $(
            impl From<$variant> for Operator {
                fn from(node: $variant) -> Self {
                    Operator::$variant(node)
                }
            }
        )+

        impl Operator {
            /// The node type name, e.g. `Lookup`
            pub fn kind(&self) -> &'static str {
                match self {
                    $(Operator::$variant(_) => stringify!($variant),)+
                }
            }

            fn node(&self) -> &dyn Node {
                match self {
                    $(Operator::$variant(node) => node,)+
                }
            }
        }
    };
}

operators! {
    DatasetSource,
    JsonLinesSource,
    NullSink,
    JsonLinesSink,
    LogSink,
    Filter,
    Project,
    Merge,
    Map,
    Denormalise,
    Lookup,
    ParentLookup,
    Accept,
    Deduplicate,
    Sort,
    Variant,
    Cluster,
    Selector,
    TaxonValidate,
    TaxonClean,
    TaxonTrail,
    TaxonReidentify,
}

#[async_trait]
impl Node for Operator {
    fn id(&self) -> &str {
        self.node().id()
    }

    fn options(&self) -> &NodeOptions {
        self.node().options()
    }

    fn inputs(&self) -> Vec<&Port> {
        self.node().inputs()
    }

    fn outputs(&self) -> Vec<&Port> {
        self.node().outputs()
    }

    fn extras(&self) -> Vec<&Port> {
        self.node().extras()
    }

    fn errors(&self) -> Vec<&Port> {
        self.node().errors()
    }

    async fn execute(&self, context: &mut Context, events: &dyn EventSink) -> Result<()> {
        self.node().execute(context, events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxon::tests::{bind, ids, taxon};
    use dataflow_engine::{
        counter, Dataset, EngineError, EngineEvent, Field, Key, Keys, Orchestrator, Record, Schema,
        SchemaRef, VecEventSink,
    };
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use tempfile::tempdir;

    /// A(1, parent 2), B(2), C(3, parent 99)
    fn scenario() -> Vec<Record> {
        vec![
            taxon(1, "1", "2", "", "A"),
            taxon(2, "2", "", "", "B"),
            taxon(3, "3", "99", "", "C"),
        ]
    }

    fn urn() -> Rule {
        Rule::function(|record: &Record, _: &Context, _: Option<&Value>| {
            Ok(json!(format!("urn:{}", record.get_str("taxonID").unwrap_or_default())))
        })
    }

    /// Every non-null reference in the dataset resolves within it
    fn is_closed(dataset: &Dataset) -> bool {
        let present: HashSet<Key> = dataset
            .iter()
            .map(|r| Key::single(r.data().get("taxonID").unwrap_or(&Value::Null)))
            .collect();
        dataset.iter().all(|r| {
            ["parentNameUsageID", "acceptedNameUsageID"].iter().all(|field| match r.get(field) {
                None => true,
                Some(value) => present.contains(&Key::single(value)),
            })
        })
    }

    #[tokio::test]
    async fn test_scenario_validate_clean_trail() {
        let mut context = Context::new();
        let source = bind(&mut context, "source", scenario());
        let partial = bind(&mut context, "partial", vec![taxon(3, "3", "99", "", "C")]);

        let validate = TaxonValidate::new("validate", &source, TaxonKeys::darwin_core()).unwrap();
        let clean = TaxonClean::new("clean", &source, TaxonKeys::darwin_core()).unwrap();
        let trail = TaxonTrail::new("trail", &partial, &source, TaxonKeys::darwin_core()).unwrap();
        validate.execute(&mut context, &dataflow_engine::NullEventSink).await.unwrap();
        clean.execute(&mut context, &dataflow_engine::NullEventSink).await.unwrap();
        trail.execute(&mut context, &dataflow_engine::NullEventSink).await.unwrap();

        assert_eq!(ids(&context, validate.output()), vec!["1", "2"]);
        assert_eq!(ids(&context, validate.error()), vec!["3"]);
        assert_eq!(ids(&context, clean.output()), vec!["1", "2"]);
        assert_eq!(ids(&context, trail.output()), vec!["3"]);
        let trailed = context.resolve(trail.output()).unwrap();
        assert_eq!(trailed.records()[0].issues()[0].code, "unresolved-reference");
    }

    #[tokio::test]
    async fn test_trail_is_idempotent() {
        let mut context = Context::new();
        let reference = bind(
            &mut context,
            "reference",
            vec![
                taxon(1, "1", "", "", "Plantae"),
                taxon(2, "2", "1", "", "Fabaceae"),
                taxon(3, "3", "2", "", "Acacia"),
                taxon(4, "4", "3", "77", "Racosperma"),
                taxon(5, "5", "3", "", "Acacia dealbata"),
            ],
        );
        let partial = bind(
            &mut context,
            "partial",
            vec![taxon(1, "4", "3", "77", "Racosperma"), taxon(2, "8", "5", "", "Acacia dealbata subsp. x")],
        );
        let once = TaxonTrail::new("once", &partial, &reference, TaxonKeys::darwin_core()).unwrap();
        once.execute(&mut context, &dataflow_engine::NullEventSink).await.unwrap();
        let twice = TaxonTrail::new("twice", once.output(), &reference, TaxonKeys::darwin_core()).unwrap();
        twice.execute(&mut context, &dataflow_engine::NullEventSink).await.unwrap();

        let first = context.resolve(once.output()).unwrap();
        let second = context.resolve(twice.output()).unwrap();
        assert_eq!(ids(&context, once.output()), vec!["4", "8", "3", "5", "2", "1"]);
        assert_eq!(first.records(), second.records());
        assert_eq!(context.count_of("twice", counter::PULLED), 0);
    }

    #[tokio::test]
    async fn test_clean_is_closed_and_idempotent() {
        let mut context = Context::new();
        let source = bind(
            &mut context,
            "source",
            vec![
                taxon(1, "1", "", "", "Plantae"),
                taxon(2, "2", "1", "9", "Synonym of missing"),
                taxon(3, "3", "2", "", "Child of synonym"),
                taxon(4, "4", "1", "", "Fabaceae"),
                taxon(5, "5", "4", "4", "Acacia"),
            ],
        );
        let once = TaxonClean::new("once", &source, TaxonKeys::darwin_core()).unwrap();
        once.execute(&mut context, &dataflow_engine::NullEventSink).await.unwrap();
        let twice = TaxonClean::new("twice", once.output(), TaxonKeys::darwin_core()).unwrap();
        twice.execute(&mut context, &dataflow_engine::NullEventSink).await.unwrap();

        let first = context.resolve(once.output()).unwrap();
        assert_eq!(ids(&context, once.output()), vec!["1", "4", "5"]);
        assert!(is_closed(&first));
        assert_eq!(first.records(), context.resolve(twice.output()).unwrap().records());
        assert!(context.resolve(twice.removed()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reidentify_mapping_reproduced_by_lookup() {
        let mut context = Context::new();
        let source = bind(
            &mut context,
            "source",
            vec![
                taxon(1, "1", "", "", "Plantae"),
                taxon(2, "2", "1", "", "Fabaceae"),
                taxon(3, "2", "1", "", "Fabaceae again"),
                taxon(4, "3", "2", "", "Acacia"),
            ],
        );
        let reidentify = TaxonReidentify::new("reid", &source, TaxonKeys::darwin_core(), urn()).unwrap();
        reidentify.execute(&mut context, &dataflow_engine::NullEventSink).await.unwrap();

        // Each distinct identifier exactly once
        let mapping = context.resolve(reidentify.mapping()).unwrap();
        let originals: Vec<&str> = mapping.iter().filter_map(|r| r.get_str(ORIGINAL_ID)).collect();
        assert_eq!(originals, vec!["1", "2", "3"]);

        let config = LookupConfig {
            lookup: FieldSelection::mapped([(MAPPED_ID, "newID")]),
            ..LookupConfig::on("taxonID", ORIGINAL_ID)
        };
        let lookup = Lookup::new("check", &source, reidentify.mapping(), config).unwrap();
        lookup.execute(&mut context, &dataflow_engine::NullEventSink).await.unwrap();

        let expected = ids(&context, reidentify.output());
        let joined: Vec<String> = context
            .resolve(lookup.output())
            .unwrap()
            .iter()
            .map(|r| r.get_str("newID").unwrap_or_default().to_string())
            .collect();
        assert_eq!(joined, expected);
    }

    #[tokio::test]
    async fn test_existence_lookup_is_subset() {
        let mut context = Context::new();
        let source = bind(&mut context, "source", scenario());
        let known = bind(&mut context, "known", vec![taxon(1, "3", "", "", "C"), taxon(2, "1", "", "", "A")]);
        let config = LookupConfig {
            merge: false,
            reject: true,
            ..LookupConfig::on("taxonID", "taxonID")
        };
        let lookup = Lookup::new("exists", &source, &known, config)
            .unwrap()
            .with_options(NodeOptions::tolerant());
        lookup.execute(&mut context, &dataflow_engine::NullEventSink).await.unwrap();

        let input = context.resolve(&source).unwrap();
        let output = context.resolve(lookup.output()).unwrap();
        let expected: Vec<Record> = input
            .iter()
            .filter(|r| r.get_str("taxonID") != Some("2"))
            .cloned()
            .collect();
        assert_eq!(output.records(), expected.as_slice());
        let names: Vec<&str> = output.schema().field_names().collect();
        assert_eq!(names, input.schema().field_names().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_unique_index_rejects_duplicates() {
        let schema = crate::taxon::tests::schema();
        let dataset = Dataset::from_records(
            schema.clone(),
            vec![taxon(1, "1", "", "", "first"), taxon(2, "1", "", "", "second")],
        );
        let keys = Keys::single(&schema, "taxonID").unwrap();
        assert!(matches!(
            dataflow_engine::Index::build(&dataset, keys.clone(), dataflow_engine::MatchPolicy::Unique),
            Err(EngineError::DuplicateKey { .. })
        ));
        let index = dataflow_engine::Index::build(&dataset, keys, dataflow_engine::MatchPolicy::First).unwrap();
        let found = index.find(&Key::single(&json!("1"))).unwrap();
        assert_eq!(found.get_str("scientificName"), Some("first"));
    }

    fn tagged() -> SchemaRef {
        Schema::shared(
            "tagged",
            vec![
                Field::string("taxonID").required(),
                Field::string("parentNameUsageID"),
                Field::string("acceptedNameUsageID"),
                Field::string("scientificName"),
                Field::string("tags"),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_orchestrated_pipeline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("joined.jsonl");

        let records = vec![
            Record::from_pairs(1, [("taxonID", json!("1")), ("parentNameUsageID", json!("2")), ("scientificName", json!("A")), ("tags", json!("tree|shrub"))]),
            Record::from_pairs(2, [("taxonID", json!("2")), ("scientificName", json!("B"))]),
            Record::from_pairs(3, [("taxonID", json!("3")), ("parentNameUsageID", json!("99")), ("scientificName", json!("C"))]),
        ];
        let source = DatasetSource::new("taxa", tagged(), records);
        let validate = TaxonValidate::new("validate", source.output(), TaxonKeys::darwin_core())
            .unwrap()
            .with_options(NodeOptions::tolerant());
        let clean = TaxonClean::new("clean", source.output(), TaxonKeys::darwin_core()).unwrap();
        let reidentify = TaxonReidentify::new("reid", clean.output(), TaxonKeys::darwin_core(), urn()).unwrap();
        let config = LookupConfig {
            lookup: FieldSelection::mapped([(MAPPED_ID, "newID")]),
            ..LookupConfig::on("taxonID", ORIGINAL_ID)
        };
        let lookup = Lookup::new("join", source.output(), reidentify.mapping(), config).unwrap();
        let split = Denormalise::new("split", clean.output(), "tags").unwrap();
        let write = JsonLinesSink::new("write", lookup.output(), path.clone());

        let mut orchestrator: Orchestrator<Operator> = Orchestrator::new();
        // Declared out of dependency order on purpose
        orchestrator.add(write.into()).unwrap();
        orchestrator.add(NullSink::of(split.output()).into()).unwrap();
        orchestrator.add(NullSink::of(validate.output()).into()).unwrap();
        orchestrator.add(NullSink::of(reidentify.output()).into()).unwrap();
        orchestrator.add(lookup.into()).unwrap();
        orchestrator.add(split.into()).unwrap();
        orchestrator.add(reidentify.into()).unwrap();
        orchestrator.add(clean.into()).unwrap();
        orchestrator.add(validate.into()).unwrap();
        orchestrator.add(source.into()).unwrap();
        assert_eq!(orchestrator.node("join").map(Operator::kind), Some("Lookup"));

        let mut context = Context::new();
        let events = VecEventSink::new();
        let report = orchestrator.execute(&mut context, &events).await.unwrap();
        assert_eq!(
            report.executed,
            vec![
                "taxa",
                "clean",
                "split",
                "split.output_sink",
                "reid",
                "reid.output_sink",
                "join",
                "write",
                "validate",
                "validate.output_sink",
            ]
        );
        let position = |id: &str| report.executed.iter().position(|e| e == id).unwrap();
        assert_eq!(position("taxa"), 0);
        assert!(position("clean") < position("reid"));
        assert!(position("reid") < position("join"));
        assert!(position("join") < position("write"));
        assert!(position("split") < position("split.output_sink"));

        assert_eq!(context.count_of("validate", counter::INVALID), 1);
        assert_eq!(context.count_of("clean", counter::CLEANED), 1);
        assert_eq!(context.count_of("split", counter::ACCEPTED), 3);

        let written = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<Value> = written.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        let new_ids: Vec<&Value> = rows.iter().map(|r| &r["newID"]).collect();
        assert_eq!(new_ids, vec![&json!("urn:1"), &json!("urn:2"), &Value::Null]);

        let events = events.events();
        assert!(matches!(events.first(), Some(EngineEvent::RunStarted { nodes: 10, .. })));
        assert!(matches!(events.last(), Some(EngineEvent::RunCompleted { executed: 10, .. })));
    }

    #[tokio::test]
    async fn test_invalid_records_halt_run() {
        let source = DatasetSource::new("taxa", crate::taxon::tests::schema(), scenario());
        let validate = TaxonValidate::new("validate", source.output(), TaxonKeys::darwin_core()).unwrap();
        let error = validate.error().clone();
        let sink = NullSink::of(validate.output());

        let mut orchestrator: Orchestrator<Operator> = Orchestrator::new();
        orchestrator.add(source.into()).unwrap();
        orchestrator.add(validate.into()).unwrap();
        orchestrator.add(sink.into()).unwrap();

        let mut context = Context::new();
        let err = orchestrator
            .execute(&mut context, &dataflow_engine::NullEventSink)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IssuesPresent { ref node, count: 1, .. } if node == "validate"));
        // Bindings made before the halt stay inspectable
        assert_eq!(ids(&context, &error), vec!["3"]);
        assert!(!context.is_completed("validate.output_sink"));
    }
}
