//! Control flow nodes
//!
//! Nodes that route records into nested pipelines.

mod selector;

pub use selector::Selector;
