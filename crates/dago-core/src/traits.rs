use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::*;

/// LLM backend, one completion per call.
pub trait LlmClient: Send + Sync + 'static {
    fn generate_completion(&self, request: LlmRequest) -> BoxFuture<'_, Result<LlmResponse>>;
}

/// A provider of named tools (MCP servers, the local function registry, a router).
pub trait ToolBackend: Send + Sync + 'static {
    /// Backend name, used in logs.
    fn name(&self) -> &str;

    /// Execute a tool by name.
    fn execute(&self, tool: &str, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>>;

    /// Names of the tools this backend can execute.
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// A single local function registered with the function registry.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls and `tool_name` node configs).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given parameters.
    fn execute(&self, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Persistence for graph state, keyed by graph id.
pub trait StateStore: Send + Sync + 'static {
    /// Load the current state of a graph.
    fn load(&self, graph_id: &str) -> BoxFuture<'_, Result<GraphState>>;

    /// Save a whole graph state, refreshing its retention window.
    fn save(&self, state: &GraphState) -> BoxFuture<'_, Result<()>>;

    /// Save one node's state without touching any other node's entry.
    fn save_node(&self, graph_id: &str, node: &NodeState) -> BoxFuture<'_, Result<()>>;

    /// Storage reachability check.
    fn ping(&self) -> BoxFuture<'_, Result<()>>;
}

/// Append-only streams with consumer-group delivery.
pub trait StreamBroker: Send + Sync + 'static {
    /// Create the consumer group (and the stream) if it does not exist yet.
    fn ensure_group(&self, stream: &str, group: &str) -> BoxFuture<'_, Result<()>>;

    /// Append an entry, returning its id.
    fn add(&self, stream: &str, fields: Vec<(String, String)>) -> BoxFuture<'_, Result<String>>;

    /// Deliver at most one never-delivered entry to `consumer`, waiting up to `block`.
    fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> BoxFuture<'_, Result<Option<StreamEntry>>>;

    /// Take over the oldest pending entry idle for at least `min_idle`.
    fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> BoxFuture<'_, Result<Option<StreamEntry>>>;

    /// Acknowledge a delivered entry, removing it from the pending list.
    fn ack(&self, stream: &str, group: &str, id: &str) -> BoxFuture<'_, Result<()>>;
}
