//! The node contract
//!
//! A node declares its ports, reads bound inputs from the [`Context`],
//! and binds every output and error port it declares exactly once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::{counter, Context};
use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::events::EventSink;
use crate::port::Port;
use crate::record::{Issue, Record};

/// Options shared by every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeOptions {
    /// Abort the run if this node produces error records
    pub no_errors: bool,
    /// Abort on the first per-record failure instead of quarantining it
    pub fail_on_exception: bool,
    pub description: Option<String>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            no_errors: true,
            fail_on_exception: false,
            description: None,
        }
    }
}

impl NodeOptions {
    /// Options that tolerate error records
    pub fn tolerant() -> Self {
        Self {
            no_errors: false,
            ..Self::default()
        }
    }

    pub fn with_no_errors(mut self, no_errors: bool) -> Self {
        self.no_errors = no_errors;
        self
    }

    pub fn with_fail_on_exception(mut self, fail_on_exception: bool) -> Self {
        self.fail_on_exception = fail_on_exception;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A processing unit in an orchestrated graph
#[async_trait]
pub trait Node: Send + Sync {
    /// Identifier, unique within one graph
    fn id(&self) -> &str;

    fn options(&self) -> &NodeOptions;

    /// Ports that must be bound before this node can run
    fn inputs(&self) -> Vec<&Port>;

    /// Main output ports; these are expected to be consumed downstream
    fn outputs(&self) -> Vec<&Port>;

    /// Auxiliary outputs (rejects, unmatched, mappings) that may be left unconsumed
    fn extras(&self) -> Vec<&Port> {
        Vec::new()
    }

    /// Error ports, typed by the error form of the records they carry
    fn errors(&self) -> Vec<&Port>;

    /// Every port this node binds
    fn produces(&self) -> Vec<&Port> {
        let mut ports = self.outputs();
        ports.extend(self.extras());
        ports.extend(self.errors());
        ports
    }

    /// Whether every input is bound
    fn is_runnable(&self, context: &Context) -> bool {
        self.inputs().iter().all(|p| context.is_bound(p))
    }

    /// Run the node over its bound inputs
    async fn execute(&self, context: &mut Context, events: &dyn EventSink) -> Result<()>;
}

#[async_trait]
impl<T: Node + ?Sized> Node for Box<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn options(&self) -> &NodeOptions {
        (**self).options()
    }

    fn inputs(&self) -> Vec<&Port> {
        (**self).inputs()
    }

    fn outputs(&self) -> Vec<&Port> {
        (**self).outputs()
    }

    fn extras(&self) -> Vec<&Port> {
        (**self).extras()
    }

    fn errors(&self) -> Vec<&Port> {
        (**self).errors()
    }

    async fn execute(&self, context: &mut Context, events: &dyn EventSink) -> Result<()> {
        (**self).execute(context, events).await
    }
}

/// Collects the error records of one node execution
///
/// A per-record failure either aborts the node (`fail_on_exception`) or
/// becomes an error-form record destined for the node's error port.
#[derive(Debug)]
pub struct RowErrors {
    node: String,
    fail_on_exception: bool,
    records: Vec<Record>,
}

impl RowErrors {
    pub fn new(node: &str, options: &NodeOptions) -> Self {
        Self {
            node: node.to_string(),
            fail_on_exception: options.fail_on_exception,
            records: Vec::new(),
        }
    }

    /// Route a record that failed with an error
    pub fn fail(&mut self, record: &Record, error: EngineError) -> Result<()> {
        if self.fail_on_exception {
            return Err(EngineError::RecordFailed {
                node: self.node.clone(),
                line: record.line(),
                message: error.to_string(),
            });
        }
        let issue = match &error {
            EngineError::Coercion { field, .. } => {
                Issue::error("coercion", error.to_string()).on_field(field.clone())
            }
            EngineError::UnknownField { field, .. } => {
                Issue::error("unknown-field", error.to_string()).on_field(field.clone())
            }
            _ => Issue::error("exception", error.to_string()),
        };
        log::debug!("{}: line {} quarantined: {}", self.node, record.line(), error);
        self.records.push(record.clone().error(issue));
        Ok(())
    }

    /// Quarantine a record with the issues found in it.
    ///
    /// These are data findings rather than failures, so they never abort.
    pub fn quarantine(&mut self, record: Record, issues: Vec<Issue>) {
        let record = issues.into_iter().fold(record, Record::with_issue);
        self.records.push(record.error_form());
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count the collected errors and bind them to the error port
    pub fn bind(self, context: &mut Context, port: &Port) -> Result<()> {
        context.count(&self.node, counter::ERROR, self.records.len() as u64);
        context.bind(port, Dataset::from_records(port.schema.clone(), self.records))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Schema, MESSAGES_FIELD};
    use serde_json::json;

    fn record() -> Record {
        Record::from_pairs(4, [("id", json!("x"))])
    }

    #[test]
    fn test_options_default() {
        let options: NodeOptions = serde_json::from_str("{}").unwrap();
        assert!(options.no_errors);
        assert!(!options.fail_on_exception);
        let options: NodeOptions = serde_json::from_str(r#"{"noErrors": false}"#).unwrap();
        assert_eq!(options, NodeOptions::tolerant());
    }

    #[test]
    fn test_row_errors_quarantine() {
        let schema = Schema::new("s", vec![Field::string("id")]).unwrap();
        let port = Port::error_port("map", &schema);
        let mut errors = RowErrors::new("map", &NodeOptions::default());
        errors.fail(&record(), EngineError::row("bad value")).unwrap();
        errors.quarantine(
            record(),
            vec![Issue::error("a", "first"), Issue::error("b", "second")],
        );
        assert_eq!(errors.len(), 2);

        let mut context = Context::new();
        errors.bind(&mut context, &port).unwrap();
        let bound = context.resolve(&port).unwrap();
        assert_eq!(bound.records()[0].get_str(MESSAGES_FIELD), Some("bad value"));
        assert_eq!(bound.records()[1].get_str(MESSAGES_FIELD), Some("first, second"));
        assert_eq!(context.count_of("map", counter::ERROR), 2);
    }

    #[test]
    fn test_row_errors_fail_on_exception() {
        let options = NodeOptions::default().with_fail_on_exception(true);
        let mut errors = RowErrors::new("map", &options);
        let err = errors.fail(&record(), EngineError::row("bad value")).unwrap_err();
        match err {
            EngineError::RecordFailed { node, line, message } => {
                assert_eq!(node, "map");
                assert_eq!(line, 4);
                assert_eq!(message, "bad value");
            }
            other => panic!("Expected RecordFailed, got {other:?}"),
        }
        assert!(errors.is_empty());
    }
}
