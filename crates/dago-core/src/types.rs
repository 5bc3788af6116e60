use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shared, mutable record of one execution graph's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub graph_id: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub node_states: HashMap<String, NodeState>,
}

impl GraphState {
    pub fn new(graph_id: impl Into<String>, inputs: Map<String, Value>) -> Self {
        Self {
            graph_id: graph_id.into(),
            inputs,
            node_states: HashMap::new(),
        }
    }

    /// Output of a completed node, if any. A null output counts as absent.
    pub fn node_output(&self, node_id: &str) -> Option<&Value> {
        self.node_states
            .get(node_id)
            .and_then(|s| s.output.as_ref())
            .filter(|v| !v.is_null())
    }

    /// Resolve a placeholder name: graph inputs first, then node outputs.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).or_else(|| self.node_output(name))
    }
}

/// Lifecycle of a node within a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// Per-node execution record within a [`GraphState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub node_id: String,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeState {
    pub fn pending(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            output: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Record a successful execution. Status, output and `completed_at` are
    /// always set together.
    pub fn complete(&mut self, output: Value, now: DateTime<Utc>) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.output = Some(output);
        self.status = NodeStatus::Completed;
        self.completed_at = Some(now);
    }
}

/// Node kind carried on the work item. Unknown kinds are accepted as `Other`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Executor,
    Router,
    #[serde(other)]
    Other,
}

/// A unit of dispatch read from the intake stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub graph_id: String,
    pub node_id: String,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Informational only; dependency ordering is the scheduler's job.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl WorkItem {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            node_id: self.node_id.clone(),
            config: self.config.clone(),
        }
    }
}

/// The execution engine's view of a work item.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub node_id: String,
    pub config: Map<String, Value>,
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, config: Map<String, Value>) -> Self {
        Self {
            node_id: node_id.into(),
            config,
        }
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A chat message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Tool definition for sending to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
}

impl ToolDefinition {
    /// A definition that only carries a name and an open object schema.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: default_input_schema(),
        }
    }
}

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    #[serde(default)]
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// A tool invocation proposed by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Completion result returned by an [`LlmClient`](crate::traits::LlmClient).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// One entry delivered from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}
