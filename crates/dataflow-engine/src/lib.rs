//! Dataflow Engine - record-oriented dataflow over typed ports
//!
//! This crate provides the data model and scheduler for batch record
//! pipelines. It supports:
//!
//! - Schemas, records with attached issues, and immutable datasets
//! - Composite keys and unique / first / multiple indexes
//! - Port bindings in a run-scoped context with a single writer per port
//! - Dependency-ordered execution with cycle and dangling-input checks
//!
//! # Architecture
//!
//! - `Node`: async processing unit declaring input, output and error ports
//! - `Orchestrator`: runs the first ready node in declaration order until done
//! - `EventSink`: generic event streaming, passed into each run
//!
//! Concrete nodes live in the `dataflow-nodes` crate.
//!
//! # Example
//!
//! ```ignore
//! use dataflow_engine::{Context, NullEventSink, Orchestrator};
//!
//! let mut orchestrator: Orchestrator = Orchestrator::new();
//! orchestrator.add(Box::new(source))?;
//! orchestrator.add(Box::new(filter))?;
//! let report = orchestrator.execute(&mut Context::new(), &NullEventSink).await?;
//! ```

pub mod context;
pub mod dataset;
pub mod error;
pub mod events;
pub mod index;
pub mod keys;
pub mod node;
pub mod orchestrator;
pub mod port;
pub mod record;
pub mod schema;
pub mod validation;

// Re-export key types
pub use context::{counter, Context, Counts};
pub use dataset::{Dataset, DatasetRef};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventError, EventSink, LogEventSink, NullEventSink, VecEventSink};
pub use index::{Index, MatchPolicy};
pub use keys::{Key, KeyPart, Keys};
pub use node::{Node, NodeOptions, RowErrors};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunReport};
pub use port::Port;
pub use record::{Issue, Record, Severity};
pub use schema::{Field, FieldType, Schema, SchemaRef, LINE_FIELD, MESSAGES_FIELD};
pub use validation::validate_graph;
