use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a node is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Reasoning-action loop with tools.
    Agent,
    /// Single LLM completion.
    Llm,
    /// Direct tool execution.
    Tool,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Llm => "llm",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the execution mode for a node config. Total: never fails.
///
/// An explicit `tool_name` always wins. Without `llm_config` the node falls
/// back to tool mode, which then rejects the missing `tool_name`.
pub fn detect_mode(config: &Map<String, Value>) -> ExecutionMode {
    let has_tool_name = config
        .get("tool_name")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    if has_tool_name {
        return ExecutionMode::Tool;
    }

    if !config.get("llm_config").is_some_and(Value::is_object) {
        return ExecutionMode::Tool;
    }

    let has_tools = config
        .get("tools")
        .and_then(Value::as_array)
        .is_some_and(|tools| !tools.is_empty());
    if has_tools {
        ExecutionMode::Agent
    } else {
        ExecutionMode::Llm
    }
}
