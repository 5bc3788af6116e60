//! Typed, validated node configurations, one per execution mode.

use serde::Deserialize;
use serde_json::{Map, Value};

use dago_core::error::{DagoError, Result};
use dago_core::types::{NodeConfig, ToolDefinition};

use crate::mode::{detect_mode, ExecutionMode};

pub const DEFAULT_AGENT_SYSTEM: &str = "You are a helpful AI assistant with access to tools.";
pub const DEFAULT_AGENT_TASK: &str = "Complete the assigned task.";

/// Model parameters carried in a node's `llm_config`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LlmSettings {
    /// Falls back to the engine-wide default model when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

impl LlmSettings {
    fn parse(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| DagoError::config(format!("invalid llm_config: {}", e)))
    }
}

/// Direct tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub tool_name: String,
    pub tool_params: Map<String, Value>,
}

/// Single completion.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSpec {
    pub settings: LlmSettings,
    pub prompt: String,
}

/// Reasoning-action loop.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub settings: LlmSettings,
    pub tools: Vec<ToolDefinition>,
    pub task: String,
    /// Per-node bound; the engine default applies when absent.
    pub max_iterations: Option<usize>,
}

impl AgentSpec {
    pub fn system_prompt(&self) -> &str {
        self.settings.system.as_deref().unwrap_or(DEFAULT_AGENT_SYSTEM)
    }
}

/// A node configuration validated for the mode it will run in.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSpec {
    Tool(ToolSpec),
    Llm(LlmSpec),
    Agent(AgentSpec),
}

impl NodeSpec {
    /// Detect the mode and validate the config for it.
    pub fn from_config(node: &NodeConfig) -> Result<Self> {
        let config = &node.config;
        match detect_mode(config) {
            ExecutionMode::Tool => Self::tool(config),
            ExecutionMode::Llm => Self::llm(config),
            ExecutionMode::Agent => Self::agent(config),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Tool(_) => ExecutionMode::Tool,
            Self::Llm(_) => ExecutionMode::Llm,
            Self::Agent(_) => ExecutionMode::Agent,
        }
    }

    fn tool(config: &Map<String, Value>) -> Result<Self> {
        let tool_name = config
            .get("tool_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DagoError::config("tool_name required for tool mode"))?;

        let tool_params = match config.get("tool_params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(params)) => params.clone(),
            Some(_) => return Err(DagoError::config("tool_params must be an object")),
        };

        Ok(Self::Tool(ToolSpec {
            tool_name: tool_name.to_string(),
            tool_params,
        }))
    }

    fn llm(config: &Map<String, Value>) -> Result<Self> {
        let raw = config
            .get("llm_config")
            .filter(|v| v.is_object())
            .ok_or_else(|| DagoError::config("llm_config required for LLM mode"))?;
        let settings = LlmSettings::parse(raw)?;

        let prompt = settings
            .prompt
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| DagoError::config("prompt required in llm_config"))?;

        Ok(Self::Llm(LlmSpec { settings, prompt }))
    }

    fn agent(config: &Map<String, Value>) -> Result<Self> {
        let raw = config
            .get("llm_config")
            .filter(|v| v.is_object())
            .ok_or_else(|| DagoError::config("llm_config required for agent mode"))?;
        let settings = LlmSettings::parse(raw)?;

        let entries = config
            .get("tools")
            .and_then(Value::as_array)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DagoError::config("tools required for agent mode"))?;
        let tools = entries
            .iter()
            .map(parse_tool_entry)
            .collect::<Result<Vec<_>>>()?;

        let task = match config.get("task") {
            Some(Value::String(task)) => task.clone(),
            _ => DEFAULT_AGENT_TASK.to_string(),
        };

        let max_iterations = match config.get("max_iterations") {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_max_iterations(v)?),
        };

        Ok(Self::Agent(AgentSpec {
            settings,
            tools,
            task,
            max_iterations,
        }))
    }
}

/// A `tools` entry is either a bare name or `{name, description?, input_schema?}`.
fn parse_tool_entry(entry: &Value) -> Result<ToolDefinition> {
    match entry {
        Value::String(name) if !name.is_empty() => Ok(ToolDefinition::named(name.as_str())),
        Value::Object(_) => {
            let def: ToolDefinition = serde_json::from_value(entry.clone())
                .map_err(|e| DagoError::config(format!("invalid tools entry: {}", e)))?;
            if def.name.is_empty() {
                return Err(DagoError::config("tools entry has an empty name"));
            }
            Ok(def)
        }
        other => Err(DagoError::config(format!("invalid tools entry: {}", other))),
    }
}

/// Whole numbers >= 1. Integral floats (`3.0`) are accepted.
fn parse_max_iterations(value: &Value) -> Result<usize> {
    let n = value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| f as u64)
        })
        .ok_or_else(|| DagoError::config(format!("max_iterations must be an integer, got {}", value)))?;
    if n < 1 {
        return Err(DagoError::config("max_iterations must be at least 1"));
    }
    Ok(n as usize)
}
