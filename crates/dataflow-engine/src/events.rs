//! Event types for streaming run progress
//!
//! Events are sent from the orchestrator to any consumer to report node
//! progress, record counts and failures. Nothing here is global: the sink
//! is passed into each run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Counts;

/// Trait for sending run events
///
/// This abstracts over the transport mechanism (channel, log, collector)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: EngineEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone, Error)]
#[error("Event error: {message}")]
pub struct EventError {
    pub message: String,
}

/// Events emitted during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Run started
    #[serde(rename_all = "camelCase")]
    RunStarted { execution_id: String, nodes: usize },

    /// A node started executing
    #[serde(rename_all = "camelCase")]
    NodeStarted { execution_id: String, node_id: String },

    /// A node completed and bound its outputs
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        execution_id: String,
        node_id: String,
        counts: Counts,
        elapsed_ms: u64,
    },

    /// A node failed, or produced issues while `no_errors` was set
    #[serde(rename_all = "camelCase")]
    NodeFailed {
        execution_id: String,
        node_id: String,
        error: String,
    },

    /// Run completed successfully
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        execution_id: String,
        executed: usize,
        elapsed_ms: u64,
    },

    /// Run aborted
    #[serde(rename_all = "camelCase")]
    RunFailed { execution_id: String, error: String },
}

impl EngineEvent {
    /// The node this event concerns, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: EngineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<EngineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Clear all collected events
    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: EngineEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError {
                message: "Event collector poisoned".to_string(),
            })?
            .push(event);
        Ok(())
    }
}

/// An event sink that writes events to the `log` facade
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn send(&self, event: EngineEvent) -> Result<(), EventError> {
        match &event {
            EngineEvent::NodeFailed { node_id, error, .. } => {
                log::error!("Node {} failed: {}", node_id, error)
            }
            EngineEvent::RunFailed {
                execution_id,
                error,
            } => log::error!("Run {} failed: {}", execution_id, error),
            EngineEvent::NodeCompleted {
                node_id,
                counts,
                elapsed_ms,
                ..
            } => log::info!("Node {} completed in {}ms {:?}", node_id, elapsed_ms, counts),
            other => log::debug!("{:?}", other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();

        sink.send(EngineEvent::NodeStarted {
            execution_id: "run-1".to_string(),
            node_id: "filter".to_string(),
        })
        .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].node_id(), Some("filter"));

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::RunCompleted {
            execution_id: "run-1".to_string(),
            executed: 3,
            elapsed_ms: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "runCompleted");
        assert_eq!(json["executionId"], "run-1");
        let back: EngineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_null_and_log_sinks() {
        let event = EngineEvent::RunFailed {
            execution_id: "run-1".to_string(),
            error: "boom".to_string(),
        };
        NullEventSink.send(event.clone()).unwrap();
        LogEventSink.send(event).unwrap();
    }
}
