//! Work items flowing from the intake stream through a running worker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use dago_core::traits::{LlmClient, StateStore, StreamBroker, ToolBackend};
use dago_core::types::NodeStatus;
use dago_engine::{Executor, ExecutorOptions};
use dago_store::SqliteStore;
use dago_test_utils::{
    graph_state, tool_call_response, work_item_fields, FailingBackend, ScriptedLlm,
};
use dago_tools::{FunctionRegistry, ToolRouter};
use dago_worker::{Worker, WorkerConfig};

const WORK: &str = "executor.work";
const GROUP: &str = "executor-workers";
const COMPLETED: &str = "events:node.completed";
const FAILED: &str = "events:node.failed";

struct Deployment {
    store: Arc<SqliteStore>,
    llm: Arc<ScriptedLlm>,
    worker: Arc<Worker>,
}

impl Deployment {
    /// A worker whose MCP side is down, so every tool falls through to the
    /// local function registry.
    async fn start(llm: ScriptedLlm) -> Self {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let llm = Arc::new(llm);

        let mcp: Arc<dyn ToolBackend> = Arc::new(FailingBackend::new("mcp", "no servers connected"));
        let functions: Arc<dyn ToolBackend> = Arc::new(FunctionRegistry::with_builtins());
        let tools: Arc<dyn ToolBackend> = Arc::new(ToolRouter::with_fallback(mcp, functions));

        let client: Arc<dyn LlmClient> = llm.clone();
        let executor = Arc::new(Executor::new(client, tools, ExecutorOptions::default()));
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(50),
            ..WorkerConfig::default()
        };
        let worker = Arc::new(Worker::new(config, store.clone(), store.clone(), executor));
        worker.start().await.unwrap();

        Self { store, llm, worker }
    }

    async fn submit(&self, graph_id: &str, node_id: &str, config: Value) {
        self.store
            .add(WORK, work_item_fields(graph_id, node_id, config))
            .await
            .unwrap();
    }

    fn events(&self, stream: &str) -> Vec<Value> {
        self.store
            .range(stream)
            .unwrap()
            .iter()
            .map(|e| serde_json::from_str(e.field("data").unwrap()).unwrap())
            .collect()
    }

    /// Wait until `count` outcome events (of either kind) exist.
    async fn wait_for_events(&self, count: usize) {
        for _ in 0..250 {
            if self.events(COMPLETED).len() + self.events(FAILED).len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {} events", count);
    }

    async fn shutdown(self) {
        self.worker.stop().await.unwrap();
        assert!(self.store.pending(WORK, GROUP).unwrap().is_empty());
    }
}

#[tokio::test]
async fn tool_node_resolves_params_from_graph_inputs() {
    let d = Deployment::start(ScriptedLlm::texts(&[])).await;
    d.store.save(&graph_state("g1", json!({"greeting": "hi"}))).await.unwrap();

    d.submit(
        "g1",
        "greet",
        json!({"tool_name": "echo", "tool_params": {"msg": "{{greeting}}", "n": 2}}),
    )
    .await;
    d.wait_for_events(1).await;

    let completed = d.events(COMPLETED);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["type"], "node.completed");
    assert_eq!(completed[0]["data"]["output"], json!({"msg": "hi", "n": 2}));

    let state = d.store.load("g1").await.unwrap();
    assert_eq!(state.node_states["greet"].status, NodeStatus::Completed);
    assert_eq!(state.node_output("greet"), Some(&json!({"msg": "hi", "n": 2})));

    d.shutdown().await;
}

#[tokio::test]
async fn downstream_llm_node_sees_upstream_output() {
    let d = Deployment::start(ScriptedLlm::texts(&["Summary: ok"])).await;
    d.store.save(&graph_state("g1", json!({"topic": "rust"}))).await.unwrap();

    d.submit("g1", "fetch", json!({"tool_name": "echo", "tool_params": {"rows": 3}})).await;
    d.wait_for_events(1).await;
    d.submit(
        "g1",
        "summarize",
        json!({"llm_config": {"prompt": "Summarize {{fetch}} about {{topic}}", "model": "m1"}}),
    )
    .await;
    d.wait_for_events(2).await;

    let requests = d.llm.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "m1");
    assert_eq!(
        requests[0].messages[0].content,
        r#"Summarize {"rows":3} about rust"#
    );

    let completed = d.events(COMPLETED);
    assert_eq!(completed.len(), 2);
    assert_eq!(completed[1]["node_id"], "summarize");
    assert_eq!(completed[1]["data"]["output"]["content"], "Summary: ok");

    let state = d.store.load("g1").await.unwrap();
    assert_eq!(state.node_states.len(), 2);

    d.shutdown().await;
}

#[tokio::test]
async fn agent_node_calls_local_tools_until_done() {
    let llm = ScriptedLlm::new(vec![
        Ok(tool_call_response("echo", json!({"ping": true}))),
        Ok(dago_core::types::LlmResponse::text("pong received")),
    ]);
    let d = Deployment::start(llm).await;
    d.store.save(&graph_state("g2", json!({}))).await.unwrap();

    d.submit(
        "g2",
        "agent",
        json!({"llm_config": {}, "tools": ["echo"], "task": "Ping the echo tool"}),
    )
    .await;
    d.wait_for_events(1).await;

    let completed = d.events(COMPLETED);
    assert_eq!(
        completed[0]["data"]["output"],
        json!({"result": "pong received", "iterations": 2})
    );

    let requests = d.llm.requests();
    assert_eq!(requests[0].tools[0].name, "echo");
    let feedback = &requests[1].messages.last().unwrap().content;
    assert_eq!(feedback, r#"Tool result for echo: {"ping":true}"#);

    d.shutdown().await;
}

#[tokio::test]
async fn bad_entries_never_stop_the_worker() {
    let d = Deployment::start(ScriptedLlm::texts(&[])).await;
    d.store.save(&graph_state("g3", json!({}))).await.unwrap();

    d.store
        .add(WORK, vec![("data".to_string(), "not json".to_string())])
        .await
        .unwrap();
    d.submit("g3", "unknown", json!({"tool_name": "no_such_tool"})).await;
    d.submit("missing-graph", "n1", json!({"tool_name": "echo"})).await;
    d.submit("g3", "ok", json!({"tool_name": "echo", "tool_params": {"v": 1}})).await;
    d.wait_for_events(3).await;

    let failed = d.events(FAILED);
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0]["node_id"], "unknown");
    assert!(failed[0]["data"]["error"]
        .as_str()
        .unwrap()
        .starts_with("tool execution failed"));
    assert_eq!(failed[1]["graph_id"], "missing-graph");

    let completed = d.events(COMPLETED);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["node_id"], "ok");
    assert!(d.worker.last_processed().is_some());

    d.shutdown().await;
}
