//! Filter Task
//!
//! Passes records that satisfy a predicate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::{
    counter, Context, Dataset, EventSink, Node, NodeOptions, Port, Record, Result, RowErrors,
};

/// A record predicate. An `Err` is a per-record failure.
pub type Predicate = Arc<dyn Fn(&Record) -> Result<bool> + Send + Sync>;

/// Filter
///
/// Records for which the predicate holds pass unchanged and in order.
/// Others are dropped, or copied to the reject port when rejects are
/// recorded.
///
/// # Inputs (from context)
/// - the filtered port (required)
///
/// # Outputs (to context)
/// - `{id}.output` - Accepted records
/// - `{id}.reject` - Rejected records (only with `with_rejects`)
/// - `{id}.error` - Records whose predicate failed
#[derive(Clone)]
pub struct Filter {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    predicate: Predicate,
    input: Port,
    output: Port,
    reject: Option<Port>,
    error: Port,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("id", &self.id)
            .field("input", &self.input.id)
            .field("reject", &self.reject.as_ref().map(|p| &p.id))
            .finish()
    }
}

impl Filter {
    /// Port name for accepted records
    pub const PORT_OUTPUT: &'static str = "output";
    /// Port name for rejected records
    pub const PORT_REJECT: &'static str = "reject";

    /// Create a new filter
    pub fn new<F>(id: impl Into<String>, input: &Port, predicate: F) -> Self
    where
        F: Fn(&Record) -> Result<bool> + Send + Sync + 'static,
    {
        let id = id.into();
        Self {
            output: Port::of(&id, Self::PORT_OUTPUT, input.schema.clone()),
            error: Port::error_port(&id, &input.schema),
            reject: None,
            options: NodeOptions::default(),
            predicate: Arc::new(predicate),
            input: input.clone(),
            id,
        }
    }

    /// Copy rejected records to a `reject` port
    pub fn with_rejects(mut self) -> Self {
        self.reject = Some(Port::of(&self.id, Self::PORT_REJECT, self.input.schema.clone()));
        self
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
}

#[async_trait]
impl Node for Filter {
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
        let mut accepted = Dataset::new(self.output.schema.clone());
        let mut rejected = Vec::new();
        let mut errors = RowErrors::new(&self.id, &self.options);

        for record in input.iter() {
            match (self.predicate)(record) {
                Ok(true) => accepted.push(record.clone()),
                Ok(false) => rejected.push(record.clone()),
                Err(e) => errors.fail(record, e)?,
            }
            context.count(&self.id, counter::PROCESSED, 1);
        }

        context.count(&self.id, counter::ACCEPTED, accepted.len() as u64);
        context.count(&self.id, counter::REJECTED, rejected.len() as u64);
        context.bind(&self.output, accepted)?;
        if let Some(port) = &self.reject {
            context.bind(port, Dataset::from_records(port.schema.clone(), rejected))?;
        }
        errors.bind(context, &self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_engine::{EngineError, Field, NullEventSink, Schema, SchemaRef};
    use serde_json::json;

    fn bound() -> (Context, Port) {
        let schema: SchemaRef =
            Schema::shared("s", vec![Field::string("id"), Field::integer("n")]).unwrap();
        let port = Port::of("source", "output", schema.clone());
        let records = (1..=4)
            .map(|n| Record::from_pairs(n, [("id", json!(format!("r{n}"))), ("n", json!(n))]))
            .chain(std::iter::once(Record::from_pairs(5, [("id", json!("r5"))])))
            .collect();
        let mut context = Context::new();
        context.bind(&port, Dataset::from_records(schema, records)).unwrap();
        (context, port)
    }

    fn even(record: &Record) -> Result<bool> {
        record
            .get("n")
            .and_then(|v| v.as_i64())
            .map(|n| n % 2 == 0)
            .ok_or_else(|| EngineError::row("n is missing"))
    }

    #[tokio::test]
    async fn test_filter_with_rejects() {
        let (mut context, port) = bound();
        let filter = Filter::new("even", &port, even)
            .with_rejects()
            .with_options(NodeOptions::tolerant());
        filter.execute(&mut context, &NullEventSink).await.unwrap();

        let ids = |port: &Port| -> Vec<String> {
            context
                .resolve(port)
                .unwrap()
                .iter()
                .filter_map(|r| r.get_str("id").map(str::to_string))
                .collect()
        };
        assert_eq!(ids(filter.output()), vec!["r2", "r4"]);
        assert_eq!(ids(filter.reject().unwrap()), vec!["r1", "r3"]);
        assert_eq!(ids(filter.error()), vec!["r5"]);
        assert_eq!(context.count_of("even", counter::PROCESSED), 5);
        assert_eq!(context.count_of("even", counter::ERROR), 1);
    }

    #[tokio::test]
    async fn test_rejects_dropped_by_default() {
        let (mut context, port) = bound();
        let filter = Filter::new("small", &port, |r: &Record| {
            Ok(r.get("n").and_then(|v| v.as_i64()).unwrap_or(0) < 3)
        });
        assert!(filter.extras().is_empty());
        filter.execute(&mut context, &NullEventSink).await.unwrap();
        assert_eq!(context.resolve(filter.output()).unwrap().len(), 3);
        assert!(context.resolve(filter.error()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_on_exception_aborts() {
        let (mut context, port) = bound();
        let filter = Filter::new("even", &port, even)
            .with_options(NodeOptions::default().with_fail_on_exception(true));
        let err = filter.execute(&mut context, &NullEventSink).await.unwrap_err();
        assert!(matches!(err, EngineError::RecordFailed { line: 5, .. }));
        assert!(!context.is_bound(filter.output()));
    }
}
