//! Test doubles for the capability traits plus small fixtures.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

use dago_core::error::{DagoError, Result};
use dago_core::traits::{LlmClient, ToolBackend};
use dago_core::types::*;

// ── LLM doubles ─────────────────────────────────────────────────

/// Replays a fixed sequence of responses and records every request.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<LlmResponse>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<LlmResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A script of plain-text replies.
    pub fn texts(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(LlmResponse::text(*r))).collect())
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl LlmClient for ScriptedLlm {
    fn generate_completion(&self, request: LlmRequest) -> BoxFuture<'_, Result<LlmResponse>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DagoError::LlmRequest("script exhausted".into())))
        })
    }
}

/// Answers every request with the same tool call, never finishing.
pub struct AlwaysToolCallLlm {
    call: ToolCall,
    calls: AtomicUsize,
}

impl AlwaysToolCallLlm {
    pub fn new(tool: &str, input: Value) -> Self {
        Self {
            call: ToolCall {
                id: None,
                name: tool.to_string(),
                input,
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for AlwaysToolCallLlm {
    fn generate_completion(&self, _request: LlmRequest) -> BoxFuture<'_, Result<LlmResponse>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LlmResponse {
                tool_calls: vec![self.call.clone()],
                stop_reason: Some(StopReason::ToolUse),
                ..Default::default()
            })
        })
    }
}

/// Build a response that requests one tool call.
pub fn tool_call_response(tool: &str, input: Value) -> LlmResponse {
    LlmResponse {
        tool_calls: vec![ToolCall {
            id: None,
            name: tool.to_string(),
            input,
        }],
        stop_reason: Some(StopReason::ToolUse),
        ..Default::default()
    }
}

// ── Tool backend doubles ────────────────────────────────────────

/// Serves fixed results for a known set of tools.
pub struct StaticBackend {
    name: String,
    results: HashMap<String, Value>,
}

impl StaticBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            results: HashMap::new(),
        }
    }

    pub fn with_tool(mut self, tool: &str, result: Value) -> Self {
        self.results.insert(tool.to_string(), result);
        self
    }
}

impl ToolBackend for StaticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, tool: &str, _params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        let result = self
            .results
            .get(tool)
            .cloned()
            .ok_or_else(|| DagoError::ToolNotFound(tool.to_string()));
        Box::pin(async move { result })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        let mut names: Vec<String> = self.results.keys().cloned().collect();
        names.sort();
        Box::pin(async move { Ok(names) })
    }
}

/// Fails every call and every listing.
pub struct FailingBackend {
    name: String,
    message: String,
}

impl FailingBackend {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

impl ToolBackend for FailingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, tool: &str, _params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        let err = DagoError::ToolExecution {
            tool: tool.to_string(),
            message: self.message.clone(),
        };
        Box::pin(async move { Err(err) })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        let err = DagoError::Transport(self.message.clone());
        Box::pin(async move { Err(err) })
    }
}

/// Returns the same value for any tool and records each call.
pub struct RecordingBackend {
    name: String,
    result: Value,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl RecordingBackend {
    pub fn new(name: &str, result: Value) -> Self {
        Self {
            name: name.to_string(),
            result,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolBackend for RecordingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, tool: &str, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        self.calls.lock().unwrap().push((tool.to_string(), params));
        let result = self.result.clone();
        Box::pin(async move { Ok(result) })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { Ok(Vec::new()) })
    }
}

// ── Fixtures ────────────────────────────────────────────────────

/// Convert a `json!({...})` literal into a map. Panics on non-objects.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// A graph state with the given inputs and no node states.
pub fn graph_state(graph_id: &str, inputs: Value) -> GraphState {
    GraphState::new(graph_id, object(inputs))
}

/// Add a completed node with `output` to `state`.
pub fn with_completed_node(mut state: GraphState, node_id: &str, output: Value) -> GraphState {
    let mut node = NodeState::pending(node_id);
    node.complete(output, Utc::now());
    state.node_states.insert(node_id.to_string(), node);
    state
}

pub fn node_config(node_id: &str, config: Value) -> NodeConfig {
    NodeConfig::new(node_id, object(config))
}

/// Stream fields carrying a serialized work item.
pub fn work_item_fields(graph_id: &str, node_id: &str, config: Value) -> Vec<(String, String)> {
    let item = WorkItem {
        graph_id: graph_id.to_string(),
        node_id: node_id.to_string(),
        node_type: NodeType::Executor,
        config: object(config),
        dependencies: Vec::new(),
    };
    vec![(
        "data".to_string(),
        serde_json::to_string(&item).unwrap(),
    )]
}
