//! Run-scoped execution context
//!
//! The context binds port ids to published datasets and keeps the
//! per-node bookkeeping for one run. It is created once per run and
//! discarded with it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::dataset::{Dataset, DatasetRef};
use crate::error::{EngineError, Result};
use crate::port::Port;

/// Counter names used by the provided nodes
pub mod counter {
    pub const PROCESSED: &str = "processed";
    pub const ACCEPTED: &str = "accepted";
    pub const ERROR: &str = "error";
    pub const REJECTED: &str = "rejected";
    pub const UNMATCHED: &str = "unmatched";
    pub const INVALID: &str = "invalid";
    pub const DUPLICATE: &str = "duplicate";
    pub const CLEANED: &str = "cleaned";
    pub const MAPPED: &str = "mapped";
    pub const UNRESOLVED: &str = "unresolved";
    pub const PULLED: &str = "pulled";
    pub const PARENTS: &str = "parents";
    pub const SKIPPED: &str = "skipped";
    pub const VARIANTS: &str = "variants";
    pub const CLUSTERS: &str = "clusters";
}

/// Default number of processed records between progress lines
pub const DEFAULT_LOG_INTERVAL: u64 = 100_000;

/// Per-node counters, ordered by name for stable reports
pub type Counts = BTreeMap<String, u64>;

/// Port bindings and bookkeeping for one run
#[derive(Debug)]
pub struct Context {
    datasets: HashMap<String, DatasetRef>,
    counters: HashMap<String, Counts>,
    defaults: HashMap<String, Value>,
    log_interval: u64,
    completed: Vec<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            datasets: HashMap::new(),
            counters: HashMap::new(),
            defaults: HashMap::new(),
            log_interval: DEFAULT_LOG_INTERVAL,
            completed: Vec::new(),
        }
    }

    /// Set the progress logging interval (0 disables progress lines)
    pub fn with_log_interval(mut self, log_interval: u64) -> Self {
        self.log_interval = log_interval;
        self
    }

    /// Add a named default value readable by mapping rules
    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    pub fn set_default(&mut self, key: impl Into<String>, value: Value) {
        self.defaults.insert(key.into(), value);
    }

    /// A named default value
    pub fn default_value(&self, key: &str) -> Option<&Value> {
        self.defaults.get(key)
    }

    pub fn log_interval(&self) -> u64 {
        self.log_interval
    }

    pub(crate) fn set_log_interval(&mut self, log_interval: u64) {
        self.log_interval = log_interval;
    }

    /// A fresh context for a nested run, sharing defaults and log interval
    /// but no bindings or counters
    pub fn subcontext(&self) -> Context {
        Self {
            defaults: self.defaults.clone(),
            log_interval: self.log_interval,
            ..Self::new()
        }
    }

    /// Publish a dataset on a port.
    ///
    /// Each port is written once per run, and the dataset's schema must be
    /// structurally compatible with the port's.
    pub fn bind(&mut self, port: &Port, dataset: Dataset) -> Result<DatasetRef> {
        if self.datasets.contains_key(&port.id) {
            return Err(EngineError::DuplicateBinding(port.id.clone()));
        }
        if !Arc::ptr_eq(dataset.schema(), &port.schema) {
            port.schema.ensure_compatible(dataset.schema())?;
        }
        log::debug!("Bound {} records to {}", dataset.len(), port.id);
        let dataset = Arc::new(dataset);
        self.datasets.insert(port.id.clone(), dataset.clone());
        Ok(dataset)
    }

    /// The dataset bound to a port
    pub fn resolve(&self, port: &Port) -> Result<DatasetRef> {
        self.datasets
            .get(&port.id)
            .cloned()
            .ok_or_else(|| EngineError::UnboundPort(port.id.clone()))
    }

    /// The dataset bound to a port id, if any
    pub fn dataset(&self, port_id: &str) -> Option<&DatasetRef> {
        self.datasets.get(port_id)
    }

    pub fn is_bound(&self, port: &Port) -> bool {
        self.datasets.contains_key(&port.id)
    }

    /// Whether the port is bound to a non-empty dataset
    pub fn has_data(&self, port: &Port) -> bool {
        self.datasets
            .get(&port.id)
            .map(|d| !d.is_empty())
            .unwrap_or(false)
    }

    /// Add `n` to a node counter, logging progress every `log_interval`
    /// processed records
    pub fn count(&mut self, node: &str, name: &str, n: u64) {
        let counts = self.counters.entry(node.to_string()).or_default();
        let value = counts.entry(name.to_string()).or_insert(0);
        let before = *value;
        *value += n;
        if name == counter::PROCESSED
            && self.log_interval > 0
            && before / self.log_interval != *value / self.log_interval
        {
            log::info!("{}: processed {} records", node, value);
        }
    }

    /// One counter of a node, zero if never counted
    pub fn count_of(&self, node: &str, name: &str) -> u64 {
        self.counters
            .get(node)
            .and_then(|c| c.get(name))
            .copied()
            .unwrap_or(0)
    }

    /// All counters of a node
    pub fn counts(&self, node: &str) -> Counts {
        self.counters.get(node).cloned().unwrap_or_default()
    }

    /// Counters of a node as `node: a=1, b=2`
    pub fn report(&self, node: &str) -> String {
        let counts = self.counts(node);
        if counts.is_empty() {
            return format!("{}: no records", node);
        }
        let parts: Vec<String> = counts.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}: {}", node, parts.join(", "))
    }

    /// Node ids that have finished, in execution order
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn is_completed(&self, node: &str) -> bool {
        self.completed.iter().any(|n| n == node)
    }

    pub(crate) fn mark_completed(&mut self, node: &str) {
        self.completed.push(node.to_string());
    }
}
