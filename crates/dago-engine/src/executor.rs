use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use dago_core::error::{DagoError, Result};
use dago_core::traits::{LlmClient, ToolBackend};
use dago_core::types::*;

use crate::spec::{AgentSpec, LlmSettings, LlmSpec, NodeSpec, ToolSpec};
use crate::template;

/// Engine-wide defaults.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Agent-loop bound when the node does not set `max_iterations`.
    pub max_iterations: usize,
    /// Model used when `llm_config.model` is absent.
    pub default_model: String,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            default_model: "claude-sonnet-4-20250514".to_string(),
        }
    }
}

/// Runs one node against a freshly loaded graph state.
///
/// The executor never mutates the state it is given; writing the result
/// back is the caller's job.
pub struct Executor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolBackend>,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolBackend>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            llm,
            tools,
            options,
        }
    }

    pub fn tools(&self) -> &Arc<dyn ToolBackend> {
        &self.tools
    }

    /// Execute a node, dispatching on its detected mode.
    pub async fn execute(&self, state: &GraphState, node: &NodeConfig) -> Result<Value> {
        let spec = NodeSpec::from_config(node)?;
        info!(node_id = %node.node_id, graph_id = %state.graph_id, mode = %spec.mode(), "Executing node");

        match spec {
            NodeSpec::Tool(tool) => self.execute_tool(state, node, tool).await,
            NodeSpec::Llm(llm) => self.execute_llm(state, node, llm).await,
            NodeSpec::Agent(agent) => self.execute_agent(node, agent).await,
        }
    }

    async fn execute_tool(&self, state: &GraphState, node: &NodeConfig, spec: ToolSpec) -> Result<Value> {
        let params = template::resolve(&spec.tool_params, state);
        debug!(node_id = %node.node_id, tool = %spec.tool_name, "Calling tool");

        let result = self
            .tools
            .execute(&spec.tool_name, params)
            .await
            .map_err(|e| DagoError::execution(format!("tool execution failed: {}", e)))?;

        info!(node_id = %node.node_id, tool = %spec.tool_name, "Tool executed");
        Ok(result)
    }

    async fn execute_llm(&self, state: &GraphState, node: &NodeConfig, spec: LlmSpec) -> Result<Value> {
        let prompt = template::render(&spec.prompt, state);
        let request = self.build_request(
            &spec.settings,
            spec.settings.system.clone().unwrap_or_default(),
            vec![ChatMessage::user(prompt)],
            Vec::new(),
        );

        let response = self
            .llm
            .generate_completion(request)
            .await
            .map_err(|e| DagoError::execution(format!("LLM call failed: {}", e)))?;

        info!(
            node_id = %node.node_id,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "LLM completion received"
        );

        Ok(json!({
            "content": response.content,
            "usage": response.usage,
        }))
    }

    /// The reasoning-action loop. Tool failures are reported back to the
    /// model; LLM failures and an exhausted bound end the node.
    async fn execute_agent(&self, node: &NodeConfig, spec: AgentSpec) -> Result<Value> {
        let max_iterations = spec.max_iterations.unwrap_or(self.options.max_iterations);
        let system = spec.system_prompt().to_string();
        let mut messages = vec![ChatMessage::user(spec.task.clone())];

        for iteration in 0..max_iterations {
            debug!(node_id = %node.node_id, iteration, "Agent iteration");

            let request = self.build_request(
                &spec.settings,
                system.clone(),
                messages.clone(),
                spec.tools.clone(),
            );

            let response = self.llm.generate_completion(request).await.map_err(|e| {
                DagoError::execution(format!("LLM call failed at iteration {}: {}", iteration, e))
            })?;

            messages.push(ChatMessage::assistant(response.content.clone()));

            if response.tool_calls.is_empty() {
                info!(node_id = %node.node_id, iterations = iteration + 1, "Agent completed");
                return Ok(json!({
                    "result": response.content,
                    "iterations": iteration + 1,
                }));
            }

            debug!(node_id = %node.node_id, tool_count = response.tool_calls.len(), "Executing tools");

            for call in &response.tool_calls {
                let params = match &call.input {
                    Value::Object(map) => map.clone(),
                    _ => Map::new(),
                };
                let result = match self.tools.execute(&call.name, params).await {
                    Ok(value) => value,
                    Err(e) => {
                        error!(tool = %call.name, error = %e, "Tool execution failed");
                        json!({ "error": e.to_string() })
                    }
                };
                messages.push(ChatMessage::user(format!(
                    "Tool result for {}: {}",
                    call.name, result
                )));
            }
        }

        Err(DagoError::MaxIterations(max_iterations))
    }

    fn build_request(
        &self,
        settings: &LlmSettings,
        system: String,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
    ) -> LlmRequest {
        LlmRequest {
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| self.options.default_model.clone()),
            system,
            messages,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            tools,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dago_test_utils::*;

    fn executor(llm: Arc<dyn LlmClient>, tools: Arc<dyn ToolBackend>) -> Executor {
        Executor::new(llm, tools, ExecutorOptions::default())
    }

    fn no_tools() -> Arc<dyn ToolBackend> {
        Arc::new(StaticBackend::new("none"))
    }

    #[tokio::test]
    async fn tool_mode_resolves_params_before_calling() {
        let backend = Arc::new(RecordingBackend::new("functions", json!({"echoed": true})));
        let exec = executor(Arc::new(ScriptedLlm::texts(&[])), backend.clone());
        let state = graph_state("g1", json!({"greeting": "hi"}));
        let node = node_config("n1", json!({"tool_name": "echo", "tool_params": {"msg": "{{greeting}}"}}));

        let out = exec.execute(&state, &node).await.unwrap();
        assert_eq!(out, json!({"echoed": true}));

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "echo");
        assert_eq!(Value::Object(calls[0].1.clone()), json!({"msg": "hi"}));
    }

    #[tokio::test]
    async fn tool_mode_wraps_router_errors() {
        let exec = executor(
            Arc::new(ScriptedLlm::texts(&[])),
            Arc::new(FailingBackend::new("mcp", "connection refused")),
        );
        let state = graph_state("g1", json!({}));
        let err = exec
            .execute(&state, &node_config("n1", json!({"tool_name": "search"})))
            .await
            .unwrap_err();
        assert!(matches!(err, DagoError::Execution(_)));
        assert!(err.to_string().starts_with("tool execution failed: "));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn empty_config_fails_with_tool_name_error() {
        let exec = executor(Arc::new(ScriptedLlm::texts(&[])), no_tools());
        let err = exec
            .execute(&graph_state("g1", json!({})), &node_config("n1", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), dago_core::ErrorKind::Config);
        assert!(err.to_string().contains("tool_name"));
    }

    #[tokio::test]
    async fn llm_mode_renders_prompt_and_applies_defaults() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(LlmResponse {
            content: "Bonjour".into(),
            usage: Usage {
                input_tokens: 5,
                output_tokens: 2,
            },
            ..Default::default()
        })]));
        let exec = executor(llm.clone(), no_tools());
        let state = graph_state("g1", json!({"word": "hello"}));
        let node = node_config("n1", json!({"llm_config": {"prompt": "Translate {{word}}"}}));

        let out = exec.execute(&state, &node).await.unwrap();
        assert_eq!(out["content"], "Bonjour");
        assert_eq!(out["usage"]["input_tokens"], 5);

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.model, "claude-sonnet-4-20250514");
        assert_eq!(req.system, "");
        assert_eq!(req.temperature, 0.7);
        assert_eq!(req.max_tokens, 4096);
        assert_eq!(req.messages, vec![ChatMessage::user("Translate hello")]);
        assert!(req.tools.is_empty());
    }

    #[tokio::test]
    async fn llm_mode_wraps_backend_errors() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(DagoError::LlmRequest("HTTP 500".into()))]));
        let exec = executor(llm, no_tools());
        let err = exec
            .execute(
                &graph_state("g1", json!({})),
                &node_config("n1", json!({"llm_config": {"prompt": "x"}})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DagoError::Execution(_)));
    }

    #[tokio::test]
    async fn agent_finishes_after_one_iteration_without_tool_calls() {
        let llm = Arc::new(ScriptedLlm::texts(&["All done"]));
        let exec = executor(llm.clone(), no_tools());
        let node = node_config("n1", json!({"llm_config": {}, "tools": ["search"]}));

        let out = exec.execute(&graph_state("g1", json!({})), &node).await.unwrap();
        assert_eq!(out, json!({"result": "All done", "iterations": 1}));

        let req = &llm.requests()[0];
        assert_eq!(req.system, "You are a helpful AI assistant with access to tools.");
        assert_eq!(req.messages, vec![ChatMessage::user("Complete the assigned task.")]);
        assert_eq!(req.tools, vec![ToolDefinition::named("search")]);
    }

    #[tokio::test]
    async fn agent_stops_at_the_iteration_bound() {
        let llm = Arc::new(AlwaysToolCallLlm::new("search", json!({"q": "rust"})));
        let exec = executor(llm.clone(), Arc::new(StaticBackend::new("s").with_tool("search", json!([]))));
        let node = node_config(
            "n1",
            json!({"llm_config": {}, "tools": ["search"], "max_iterations": 3}),
        );

        let err = exec.execute(&graph_state("g1", json!({})), &node).await.unwrap_err();
        assert!(matches!(err, DagoError::MaxIterations(3)));
        assert_eq!(err.to_string(), "max iterations (3) reached without completion");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn agent_uses_engine_default_bound() {
        let llm = Arc::new(AlwaysToolCallLlm::new("search", json!({})));
        let exec = Executor::new(
            llm.clone(),
            no_tools(),
            ExecutorOptions {
                max_iterations: 2,
                ..Default::default()
            },
        );
        let node = node_config("n1", json!({"llm_config": {}, "tools": ["search"]}));
        assert!(exec.execute(&graph_state("g1", json!({})), &node).await.is_err());
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn agent_feeds_tool_results_and_errors_back() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_call_response("lookup", json!({"id": 7}))),
            Ok(tool_call_response("missing", json!("not an object"))),
            Ok(LlmResponse::text("answer")),
        ]));
        let tools = Arc::new(StaticBackend::new("s").with_tool("lookup", json!({"name": "widget"})));
        let exec = executor(llm.clone(), tools);
        let node = node_config(
            "n1",
            json!({"llm_config": {"model": "custom"}, "tools": ["lookup"], "task": "Find item 7"}),
        );

        let out = exec.execute(&graph_state("g1", json!({})), &node).await.unwrap();
        assert_eq!(out, json!({"result": "answer", "iterations": 3}));

        let last = llm.requests().pop().unwrap();
        assert_eq!(last.model, "custom");
        let contents: Vec<&str> = last.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[0], "Find item 7");
        assert_eq!(contents[2], r#"Tool result for lookup: {"name":"widget"}"#);
        assert!(contents[4].starts_with(r#"Tool result for missing: {"error":"#));
        assert_eq!(last.messages[4].role, Role::User);
    }

    #[tokio::test]
    async fn agent_llm_failure_names_the_iteration() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_call_response("search", json!({}))),
            Err(DagoError::LlmRequest("HTTP 503".into())),
        ]));
        let exec = executor(llm, no_tools());
        let node = node_config("n1", json!({"llm_config": {}, "tools": ["search"]}));
        let err = exec.execute(&graph_state("g1", json!({})), &node).await.unwrap_err();
        assert!(err.to_string().starts_with("LLM call failed at iteration 1: "));
    }
}
