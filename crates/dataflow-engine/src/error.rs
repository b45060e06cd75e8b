//! Error types for the dataflow engine

use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the dataflow engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Two nodes share an id within one orchestration
    #[error("Node '{0}' is already present")]
    DuplicateNode(String),

    /// Two nodes declare the same output port
    #[error("Port '{port}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        port: String,
        first: String,
        second: String,
    },

    /// An input port has no producer and no binding
    #[error("Node '{node}' has dangling input '{port}'")]
    DanglingInput { node: String, port: String },

    /// The producer/consumer graph contains a cycle
    #[error("Cycle detected between nodes {nodes:?}")]
    Cycle { nodes: Vec<String> },

    /// Pending nodes remain but none can run
    #[error("Unable to complete nodes {pending:?}")]
    Stalled { pending: Vec<String> },

    /// A main output is consumed by nothing (strict mode only)
    #[error("Output '{port}' of node '{node}' is not consumed")]
    UnconsumedOutput { node: String, port: String },

    /// A port already has a dataset (single-writer rule)
    #[error("Dataset for port '{0}' is already bound")]
    DuplicateBinding(String),

    /// A port has no dataset yet
    #[error("No dataset bound for port '{0}'")]
    UnboundPort(String),

    /// Two schemas that must line up do not
    #[error("Incompatible schemas: {left} vs {right}")]
    IncompatibleSchema { left: String, right: String },

    /// A field name is not declared in a schema
    #[error("Field '{field}' is not in schema '{schema}'")]
    UnknownField { field: String, schema: String },

    /// A unique index saw the same key twice
    #[error("Duplicate key {key}")]
    DuplicateKey { key: String },

    /// A value could not be coerced into the declared field type
    #[error("Unable to convert {value} to {expected} for field '{field}'")]
    Coercion {
        field: String,
        expected: String,
        value: String,
    },

    /// A per-record failure (predicate, mapping rule, reference check)
    #[error("{0}")]
    Row(String),

    /// A per-record failure escalated because the node fails on exceptions
    #[error("Node '{node}' failed on record at line {line}: {message}")]
    RecordFailed {
        node: String,
        line: u64,
        message: String,
    },

    /// A node with `no_errors` produced issues
    #[error("Node '{node}' produced {count} issue(s): {sample:?}")]
    IssuesPresent {
        node: String,
        count: usize,
        sample: Vec<String>,
    },

    /// A node failed while executing
    #[error("Node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: Box<EngineError>,
    },

    /// Invalid node or graph configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a row-level error with a message
    pub fn row(msg: impl Into<String>) -> Self {
        Self::Row(msg.into())
    }

    /// Create a configuration error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Wrap an error with the id of the node that raised it
    pub fn in_node(self, node: impl Into<String>) -> Self {
        match self {
            // Already attributed
            Self::NodeFailed { .. } | Self::RecordFailed { .. } | Self::IssuesPresent { .. } => self,
            other => Self::NodeFailed {
                node: node.into(),
                source: Box::new(other),
            },
        }
    }

    /// Whether this error is a graph/configuration problem rather than a data problem
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateNode(_)
                | Self::DuplicateProducer { .. }
                | Self::DanglingInput { .. }
                | Self::Cycle { .. }
                | Self::Stalled { .. }
                | Self::UnconsumedOutput { .. }
                | Self::DuplicateBinding(_)
                | Self::UnboundPort(_)
                | Self::IncompatibleSchema { .. }
                | Self::UnknownField { .. }
                | Self::Configuration(_)
        )
    }
}
