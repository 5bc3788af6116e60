use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DagoError;

/// Kind of node outcome published to the event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "node.completed")]
    NodeCompleted,
    #[serde(rename = "node.failed")]
    NodeFailed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeCompleted => "node.completed",
            Self::NodeFailed => "node.failed",
        }
    }

    /// Stream the event is appended to, e.g. `events:node.completed`.
    pub fn stream_name(&self) -> String {
        format!("events:{}", self.as_str())
    }
}

/// Structured completion/failure event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub graph_id: String,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl NodeEvent {
    pub fn completed(graph_id: &str, node_id: &str, output: Value) -> Self {
        Self::new(
            EventType::NodeCompleted,
            graph_id,
            node_id,
            serde_json::json!({
                "graph_id": graph_id,
                "node_id": node_id,
                "output": output,
            }),
        )
    }

    pub fn failed(graph_id: &str, node_id: &str, error: &DagoError) -> Self {
        Self::new(
            EventType::NodeFailed,
            graph_id,
            node_id,
            serde_json::json!({
                "graph_id": graph_id,
                "node_id": node_id,
                "error": error.to_string(),
                "error_kind": error.kind(),
            }),
        )
    }

    fn new(event_type: EventType, graph_id: &str, node_id: &str, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            graph_id: graph_id.to_string(),
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
            data,
        }
    }
}
