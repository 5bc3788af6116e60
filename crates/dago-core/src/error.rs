use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagoError {
    // Node configuration errors
    #[error("{0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Execution errors
    #[error("{0}")]
    Execution(String),

    #[error("max iterations ({0}) reached without completion")]
    MaxIterations(usize),

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    // Tool errors
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("tool input validation failed: {0}")]
    ToolValidation(String),

    // MCP errors
    #[error("MCP error: {0}")]
    Mcp(String),

    // State errors
    #[error("state not found for graph {0}")]
    StateNotFound(String),

    #[error("failed to deserialize {what}: {message}")]
    Deserialization { what: String, message: String },

    #[error("failed to serialize {what}: {message}")]
    Serialization { what: String, message: String },

    // Transport errors (stream and storage I/O)
    #[error("store error: {0}")]
    Store(String),

    #[error("transport error: {0}")]
    Transport(String),

    // Worker lifecycle
    #[error("worker stop timed out after {0}s")]
    StopTimeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error class carried in failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Execution,
    Transport,
    Deserialization,
    NotFound,
}

impl DagoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::ConfigNotFound(_) | Self::UnsupportedProvider(_) => {
                ErrorKind::Config
            }
            Self::Execution(_)
            | Self::MaxIterations(_)
            | Self::LlmRequest(_)
            | Self::LlmParse(_)
            | Self::ToolNotFound(_)
            | Self::ToolExecution { .. }
            | Self::ToolTimeout { .. }
            | Self::ToolValidation(_)
            | Self::Mcp(_) => ErrorKind::Execution,
            Self::StateNotFound(_) => ErrorKind::NotFound,
            Self::Deserialization { .. } | Self::Json(_) => ErrorKind::Deserialization,
            Self::Serialization { .. }
            | Self::Store(_)
            | Self::Transport(_)
            | Self::StopTimeout(_)
            | Self::Io(_) => ErrorKind::Transport,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DagoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(DagoError::config("tool_name required").kind(), ErrorKind::Config);
        assert_eq!(DagoError::MaxIterations(3).kind(), ErrorKind::Execution);
        assert_eq!(DagoError::Store("locked".into()).kind(), ErrorKind::Transport);
        assert_eq!(
            DagoError::StateNotFound("g1".into()).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn config_error_displays_bare_message() {
        let err = DagoError::config("tool_name required for tool mode");
        assert_eq!(err.to_string(), "tool_name required for tool mode");
    }
}
