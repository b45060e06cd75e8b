//! Null Sink
//!
//! Consumes a port and discards it. Declaring one marks the port as
//! intentionally unconsumed.

use async_trait::async_trait;
use dataflow_engine::{counter, Context, EventSink, Node, NodeOptions, Port, Result};

/// Null Sink
///
/// # Inputs (from context)
/// - the consumed port (required)
#[derive(Debug, Clone)]
pub struct NullSink {
    /// Unique identifier for this node instance
    id: String,
    options: NodeOptions,
    input: Port,
}

impl NullSink {
    /// Create a new null sink
    pub fn new(id: impl Into<String>, input: &Port) -> Self {
        Self {
            id: id.into(),
            options: NodeOptions::default(),
            input: input.clone(),
        }
    }

    /// A null sink named after the port it drains, e.g. `lookup.unmatched_sink`
    pub fn of(input: &Port) -> Self {
        Self::new(format!("{}_sink", input.id), input)
    }
}

#[async_trait]
impl Node for NullSink {
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
        Vec::new()
    }

    fn errors(&self) -> Vec<&Port> {
        Vec::new()
    }

    async fn execute(&self, context: &mut Context, _events: &dyn EventSink) -> Result<()> {
        let input = context.resolve(&self.input)?;
        context.count(&self.id, counter::PROCESSED, input.len() as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataflow_engine::{Dataset, Field, NullEventSink, Record, Schema};

    #[tokio::test]
    async fn test_discards() {
        let schema = Schema::shared("s", vec![Field::string("id")]).unwrap();
        let port = Port::of("source", "output", schema.clone());
        let sink = NullSink::of(&port);
        assert_eq!(sink.id(), "source.output_sink");

        let mut context = Context::new();
        context
            .bind(&port, Dataset::from_records(schema, vec![Record::new(1), Record::new(2)]))
            .unwrap();
        sink.execute(&mut context, &NullEventSink).await.unwrap();
        assert_eq!(context.count_of(sink.id(), counter::PROCESSED), 2);
    }
}
