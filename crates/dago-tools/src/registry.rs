use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use dago_core::error::{DagoError, Result};
use dago_core::traits::{Tool, ToolBackend};
use dago_core::types::ToolDefinition;

type Handler = Box<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A tool backed by a closure.
pub struct FnTool {
    name: String,
    description: String,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            handler: Box::new(move |params| Box::pin(f(params))),
        }
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }
    fn execute(&self, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        (self.handler)(params)
    }
}

/// Registry of in-process tools. Serves as the secondary tool backend.
pub struct FunctionRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Register a closure as a tool.
    pub fn register_fn<F, Fut>(&mut self, name: &str, description: &str, f: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(FnTool::new(name, description, f));
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name, bounded by the tool's timeout.
    pub async fn call(&self, name: &str, params: Map<String, Value>) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| DagoError::ToolNotFound(name.to_string()))?;

        let timeout = Duration::from_secs(tool.timeout_secs());
        debug!(tool = %name, "Executing local function");

        match tokio::time::timeout(timeout, tool.execute(params)).await {
            Ok(result) => result,
            Err(_) => Err(DagoError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::EchoTool);
        registry.register(crate::builtin::JsonQueryTool);
        registry.register(crate::builtin::TextTemplateTool);
        registry.register(crate::builtin::HttpRequestTool);
        registry
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolBackend for FunctionRegistry {
    fn name(&self) -> &str {
        "functions"
    }

    fn execute(&self, tool: &str, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        let tool = tool.to_string();
        Box::pin(async move { self.call(&tool, params).await })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.tools.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn execute(&self, _params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            })
        }
        fn timeout_secs(&self) -> u64 {
            1
        }
    }

    #[tokio::test]
    async fn registered_closure_is_callable() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("double", "Double x", |params| async move {
            let x = params.get("x").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(x * 2))
        });
        assert!(registry.has("double"));

        let mut params = Map::new();
        params.insert("x".into(), json!(21));
        let out = ToolBackend::execute(&registry, "double", params).await.unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry.call("nope", Map::new()).await.unwrap_err();
        assert!(matches!(err, DagoError::ToolNotFound(name) if name == "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut registry = FunctionRegistry::new();
        registry.register(SlowTool);
        let err = registry.call("slow", Map::new()).await.unwrap_err();
        assert!(matches!(err, DagoError::ToolTimeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn builtins_are_listed_sorted() {
        let registry = FunctionRegistry::with_builtins();
        let names = registry.list_tools().await.unwrap();
        assert_eq!(
            names,
            vec!["echo", "http_request", "json_query", "text_template"]
        );
        assert_eq!(registry.definitions().len(), 4);
    }

    #[test]
    fn unregister_removes_tool() {
        let mut registry = FunctionRegistry::with_builtins();
        assert!(registry.unregister("echo"));
        assert!(!registry.has("echo"));
        assert!(!registry.unregister("echo"));
    }
}
