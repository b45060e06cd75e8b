//! Dependency-ordered execution of a node graph
//!
//! The orchestrator holds nodes in declaration order. Each step runs the
//! first pending node whose inputs are all bound, so ties between ready
//! nodes are broken by declaration order. One node runs at a time.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink};
use crate::node::Node;
use crate::schema::MESSAGES_FIELD;
use crate::validation::validate_graph;

/// Maximum number of messages carried by an `IssuesPresent` error
const ISSUE_SAMPLE: usize = 5;

/// Orchestrator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Overrides the context's progress logging interval
    pub log_interval: Option<u64>,
    /// Treat unconsumed main outputs as an error rather than a warning
    pub strict_outputs: bool,
}

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub execution_id: String,
    /// Node ids in execution order
    pub executed: Vec<String>,
    pub elapsed_ms: u64,
}

/// Schedules and runs a graph of nodes over one context
pub struct Orchestrator<N: Node = Box<dyn Node>> {
    nodes: Vec<N>,
    config: OrchestratorConfig,
    execution_id: String,
}

impl<N: Node> Default for Orchestrator<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Node> Orchestrator<N> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            config: OrchestratorConfig::default(),
            execution_id: format!("run-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the execution ID.
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Add a node; ids must be unique
    pub fn add(&mut self, node: N) -> Result<()> {
        if self.nodes.iter().any(|n| n.id() == node.id()) {
            return Err(EngineError::DuplicateNode(node.id().to_string()));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Builder form of [`Orchestrator::add`]
    pub fn with_node(mut self, node: N) -> Result<Self> {
        self.add(node)?;
        Ok(self)
    }

    pub fn nodes(&self) -> &[N] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&N> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Static checks performed before any node executes
    pub fn validate(&self, context: &Context) -> Result<()> {
        validate_graph(&self.nodes, context, self.config.strict_outputs)
    }

    /// Validate, then run every node once in dependency order
    pub async fn execute(&self, context: &mut Context, events: &dyn EventSink) -> Result<RunReport> {
        let start_time = Instant::now();
        self.emit(
            events,
            EngineEvent::RunStarted {
                execution_id: self.execution_id.clone(),
                nodes: self.nodes.len(),
            },
        );

        match self.run(context, events).await {
            Ok(executed) => {
                let elapsed_ms = start_time.elapsed().as_millis() as u64;
                log::info!(
                    "Run {} executed {} nodes in {}ms",
                    self.execution_id,
                    executed.len(),
                    elapsed_ms
                );
                self.emit(
                    events,
                    EngineEvent::RunCompleted {
                        execution_id: self.execution_id.clone(),
                        executed: executed.len(),
                        elapsed_ms,
                    },
                );
                Ok(RunReport {
                    execution_id: self.execution_id.clone(),
                    executed,
                    elapsed_ms,
                })
            }
            Err(e) => {
                self.emit(
                    events,
                    EngineEvent::RunFailed {
                        execution_id: self.execution_id.clone(),
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn run(&self, context: &mut Context, events: &dyn EventSink) -> Result<Vec<String>> {
        self.validate(context)?;
        if let Some(log_interval) = self.config.log_interval {
            context.set_log_interval(log_interval);
        }

        let mut done = vec![false; self.nodes.len()];
        let mut executed = Vec::with_capacity(self.nodes.len());
        loop {
            let next = self
                .nodes
                .iter()
                .enumerate()
                .find(|(i, node)| !done[*i] && node.is_runnable(context));
            let Some((index, node)) = next else {
                let pending: Vec<String> = self
                    .nodes
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !done[*i])
                    .map(|(_, n)| n.id().to_string())
                    .collect();
                if pending.is_empty() {
                    return Ok(executed);
                }
                log::error!("Unable to complete nodes {:?}", pending);
                return Err(EngineError::Stalled { pending });
            };

            self.run_node(node, context, events).await?;
            done[index] = true;
            executed.push(node.id().to_string());
        }
    }

    async fn run_node(&self, node: &N, context: &mut Context, events: &dyn EventSink) -> Result<()> {
        let id = node.id();
        log::debug!("Executing {}", id);
        self.emit(
            events,
            EngineEvent::NodeStarted {
                execution_id: self.execution_id.clone(),
                node_id: id.to_string(),
            },
        );
        let node_start = Instant::now();

        let result = match node.execute(context, events).await {
            Ok(()) => ensure_bound(node, context),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            let e = e.in_node(id);
            log::error!("Error processing node {} - {}", id, e);
            self.emit_node_failed(events, id, &e);
            return Err(e);
        }

        context.mark_completed(id);
        log::info!("{}", context.report(id));
        self.emit(
            events,
            EngineEvent::NodeCompleted {
                execution_id: self.execution_id.clone(),
                node_id: id.to_string(),
                counts: context.counts(id),
                elapsed_ms: node_start.elapsed().as_millis() as u64,
            },
        );

        if node.options().no_errors {
            if let Some(e) = issues_present(node, context) {
                log::warn!("Halting on errors from {}", id);
                self.emit_node_failed(events, id, &e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Render the graph in Graphviz dot form.
    ///
    /// Bound ports show their record counts; completed nodes are green and
    /// nodes that cannot run yet are pink.
    pub fn to_dot(&self, context: &Context) -> String {
        let mut producers: HashMap<&str, (&str, usize)> = HashMap::new();
        for node in &self.nodes {
            for (slot, port) in node.produces().into_iter().enumerate() {
                producers.insert(port.id.as_str(), (node.id(), slot));
            }
        }

        let mut dot = String::new();
        let _ = writeln!(dot, "strict digraph \"{}\" {{", quote(&self.execution_id));
        for node in &self.nodes {
            let fill = if context.is_completed(node.id()) {
                "palegreen"
            } else if node.is_runnable(context) {
                "white"
            } else {
                "pink"
            };
            let inputs: Vec<String> = node
                .inputs()
                .iter()
                .enumerate()
                .map(|(slot, port)| format!("<i{}> {}", slot, escape(&port.id)))
                .collect();
            let outputs: Vec<String> = node
                .produces()
                .iter()
                .enumerate()
                .map(|(slot, port)| match context.dataset(&port.id) {
                    Some(dataset) => format!("<o{}> {} ({})", slot, escape(port.name()), dataset.len()),
                    None => format!("<o{}> {}", slot, escape(port.name())),
                })
                .collect();
            let mut label = String::new();
            if !inputs.is_empty() {
                let _ = write!(label, "{{ {} }} | ", inputs.join("|"));
            }
            label.push_str(&escape(node.id()));
            if !outputs.is_empty() {
                let _ = write!(label, " | {{ {} }}", outputs.join("|"));
            }
            let _ = writeln!(
                dot,
                "  \"{}\" [ shape=record label=\"{{ {} }}\" style=filled fillcolor={} ]",
                quote(node.id()),
                label,
                fill
            );
        }
        for node in &self.nodes {
            for (slot, port) in node.inputs().iter().enumerate() {
                if let Some((producer, out)) = producers.get(port.id.as_str()) {
                    let _ = writeln!(
                        dot,
                        "  \"{}\":\"o{}\" -> \"{}\":\"i{}\"",
                        quote(producer),
                        out,
                        quote(node.id()),
                        slot
                    );
                }
            }
        }
        dot.push_str("}\n");
        dot
    }

    fn emit(&self, events: &dyn EventSink, event: EngineEvent) {
        if let Err(e) = events.send(event) {
            log::debug!("Dropped event: {}", e);
        }
    }

    fn emit_node_failed(&self, events: &dyn EventSink, node_id: &str, error: &EngineError) {
        self.emit(
            events,
            EngineEvent::NodeFailed {
                execution_id: self.execution_id.clone(),
                node_id: node_id.to_string(),
                error: error.to_string(),
            },
        );
    }
}

/// Every declared port must be bound once a node finishes
fn ensure_bound<N: Node>(node: &N, context: &Context) -> Result<()> {
    let missing: Vec<&str> = node
        .produces()
        .into_iter()
        .filter(|p| !context.is_bound(p))
        .map(|p| p.id.as_str())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EngineError::config(format!(
            "Node '{}' did not bind {:?}",
            node.id(),
            missing
        )))
    }
}

/// Error records on error ports, plus error-severity records on other outputs
fn issues_present<N: Node>(node: &N, context: &Context) -> Option<EngineError> {
    let mut count = 0;
    let mut sample = Vec::new();
    let mut note = |message: String| {
        count += 1;
        if sample.len() < ISSUE_SAMPLE {
            sample.push(message);
        }
    };

    for port in node.errors() {
        if let Some(dataset) = context.dataset(&port.id) {
            for record in dataset.iter() {
                let message = record
                    .get_str(MESSAGES_FIELD)
                    .map(str::to_string)
                    .unwrap_or_else(|| record.messages());
                note(format!("line {}: {}", record.line(), message));
            }
        }
    }
    for port in node.outputs().into_iter().chain(node.extras()) {
        if let Some(dataset) = context.dataset(&port.id) {
            for record in dataset.iter().filter(|r| r.has_errors()) {
                note(format!("line {}: {}", record.line(), record.messages()));
            }
        }
    }

    if count == 0 {
        None
    } else {
        Some(EngineError::IssuesPresent {
            node: node.id().to_string(),
            count,
            sample,
        })
    }
}

/// Escape text for a quoted DOT identifier
fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted
}

/// Escape text inside a record label
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '{' | '}' | '|' | '<' | '>' | '"' | '\\' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
