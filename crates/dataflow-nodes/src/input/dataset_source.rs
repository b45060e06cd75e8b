//! In-memory dataset source
//!
//! Binds a set of records supplied at construction time.

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EventSink, Node, NodeOptions, Port, Record, Result, RowErrors,
    SchemaRef,
};

use super::conform;

/// Dataset Source
///
/// Publishes records held in memory. Records are conformed to the schema;
/// any that carry undeclared fields or fail coercion go to the error port.
///
/// # Outputs (to context)
/// - `{id}.output` - Conforming records, in the order supplied
/// - `{id}.error` - Rejected records
#[derive(Debug, Clone)]
pub struct DatasetSource {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    records: Vec<Record>,
    output: Port,
    error: Port,
}

impl DatasetSource {
    /// Port name for the output
    pub const PORT_OUTPUT: &'static str = "output";

    /// Create a new dataset source
    pub fn new(id: impl Into<String>, schema: SchemaRef, records: Vec<Record>) -> Self {
        let id = id.into();
        Self {
            output: Port::of(&id, Self::PORT_OUTPUT, schema.clone()),
            error: Port::error_port(&id, &schema),
            options: NodeOptions::default(),
            records,
            id,
        }
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
}

#[async_trait]
impl Node for DatasetSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn options(&self) -> &NodeOptions {
        &self.options
    }

    fn inputs(&self) -> Vec<&Port> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<&Port> {
        vec![&self.output]
    }

    fn errors(&self) -> Vec<&Port> {
        vec![&self.error]
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let schema = &self.output.schema;
        let mut result = Dataset::new(schema.clone());
        let mut errors = RowErrors::new(&self.id, &self.options);

        for record in &self.records {
            match conform(record, schema) {
                Ok(conformed) => result.push(conformed),
                Err(e) => errors.fail(record, e)?,
            }
            context.count(&self.id, counter::PROCESSED, 1);
        }

        log::debug!("DatasetSource {}: {} records accepted", self.id, result.len());
        context.count(&self.id, counter::ACCEPTED, result.len() as u64);
        context.bind(&self.output, result)?;
        errors.bind(context, &self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_engine::{Field, NullEventSink, Schema, MESSAGES_FIELD};
    use serde_json::json;

    #[tokio::test]
    async fn test_undeclared_fields_rejected() {
        let schema = Schema::shared("s", vec![Field::string("id"), Field::integer("n")]).unwrap();
        let source = DatasetSource::new(
            "source",
            schema,
            vec![
                Record::from_pairs(1, [("id", json!("a")), ("n", json!("1"))]),
                Record::from_pairs(2, [("id", json!("b")), ("extra", json!(true))]),
                Record::from_pairs(3, [("id", json!("c"))]),
            ],
        );
        assert_eq!(source.id(), "source");

        let mut context = Context::new();
        source.execute(&mut context, &NullEventSink).await.unwrap();

        let output = context.resolve(source.output()).unwrap();
        let ids: Vec<&str> = output.iter().filter_map(|r| r.get_str("id")).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(output.records()[0].get("n"), Some(&json!(1)));

        let errors = context.resolve(source.error()).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.records()[0].line(), 2);
        assert!(errors.records()[0]
            .get_str(MESSAGES_FIELD)
            .unwrap_or_default()
            .contains("extra"));
        assert_eq!(context.count_of("source", counter::PROCESSED), 3);
    }
}
