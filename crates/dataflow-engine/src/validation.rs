//! Static validation of node graphs
//!
//! Checks producer uniqueness, dangling inputs, cycles and unconsumed
//! outputs before any node executes.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::node::Node;

/// Validate a node graph against the bindings already present in `context`
///
/// Unconsumed main outputs are logged, or fail when `strict_outputs` is set.
pub fn validate_graph<N: Node>(nodes: &[N], context: &Context, strict_outputs: bool) -> Result<()> {
    let producers = producers(nodes)?;
    check_inputs(nodes, &producers, context)?;
    detect_cycles(nodes, &producers)?;
    check_unconsumed(nodes, strict_outputs)
}

/// Map each produced port id to the index of its producing node
fn producers<N: Node>(nodes: &[N]) -> Result<HashMap<&str, usize>> {
    let mut producers: HashMap<&str, usize> = HashMap::new();
    for (index, node) in nodes.iter().enumerate() {
        for port in node.produces() {
            if let Some(&first) = producers.get(port.id.as_str()) {
                return Err(EngineError::DuplicateProducer {
                    port: port.id.clone(),
                    first: nodes[first].id().to_string(),
                    second: node.id().to_string(),
                });
            }
            producers.insert(port.id.as_str(), index);
        }
    }
    Ok(producers)
}

/// Every input must have a producer or an existing binding
fn check_inputs<N: Node>(nodes: &[N], producers: &HashMap<&str, usize>, context: &Context) -> Result<()> {
    for node in nodes {
        for port in node.inputs() {
            if !producers.contains_key(port.id.as_str()) && !context.is_bound(port) {
                return Err(EngineError::DanglingInput {
                    node: node.id().to_string(),
                    port: port.id.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Detect cycles using Kahn's algorithm (topological sort)
fn detect_cycles<N: Node>(nodes: &[N], producers: &HashMap<&str, usize>) -> Result<()> {
    // producer -> consumers, one entry per consumed port
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree = vec![0usize; nodes.len()];
    for (consumer, node) in nodes.iter().enumerate() {
        for port in node.inputs() {
            if let Some(&producer) = producers.get(port.id.as_str()) {
                edges[producer].push(consumer);
                in_degree[consumer] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = HashSet::new();
    while let Some(index) = queue.pop_front() {
        visited.insert(index);
        for &consumer in &edges[index] {
            in_degree[consumer] -= 1;
            if in_degree[consumer] == 0 {
                queue.push_back(consumer);
            }
        }
    }

    if visited.len() < nodes.len() {
        let cycle: Vec<String> = (0..nodes.len())
            .filter(|i| !visited.contains(i))
            .map(|i| nodes[i].id().to_string())
            .collect();
        return Err(EngineError::Cycle { nodes: cycle });
    }
    Ok(())
}

/// Main outputs consumed by nothing are warned about, or rejected when strict
fn check_unconsumed<N: Node>(nodes: &[N], strict_outputs: bool) -> Result<()> {
    let consumed: HashSet<&str> = nodes
        .iter()
        .flat_map(|n| n.inputs())
        .map(|p| p.id.as_str())
        .collect();
    for node in nodes {
        for port in node.outputs() {
            if consumed.contains(port.id.as_str()) {
                continue;
            }
            if strict_outputs {
                return Err(EngineError::UnconsumedOutput {
                    node: node.id().to_string(),
                    port: port.id.clone(),
                });
            }
            log::warn!("Output {} of {} is not consumed", port.id, node.id());
        }
    }
    Ok(())
}
