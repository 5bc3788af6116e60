use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DagoError, Result};

/// Top-level worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_worker_id")]
    pub id: String,
    #[serde(default = "default_stream")]
    pub stream: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// How long a single stream read may block.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause after a transport error before reading again.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Claim entries other consumers left unacknowledged this long (0 = off).
    #[serde(default)]
    pub reclaim_idle_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            stream: default_stream(),
            consumer_group: default_consumer_group(),
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            reclaim_idle_secs: 0,
        }
    }
}

fn default_worker_id() -> String { "executor-1".to_string() }
fn default_stream() -> String { "executor.work".to_string() }
fn default_consumer_group() -> String { "executor-workers".to_string() }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_error_backoff_ms() -> u64 { 1000 }
fn default_shutdown_timeout() -> u64 { 30 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Retention window for graph state, refreshed on every write.
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            state_ttl_secs: default_state_ttl(),
        }
    }
}

impl StoreConfig {
    /// Resolve the database path (expand ~).
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.path)
    }
}

fn default_store_path() -> String { "~/.dago/dago.db".to_string() }
fn default_state_ttl() -> u64 { 24 * 60 * 60 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Engine-wide default model for nodes that do not name one.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            extra_headers: HashMap::new(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "anthropic".to_string() }
fn default_model_id() -> String { "claude-sonnet-4-20250514".to_string() }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default agent-loop bound when a node does not override it.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> usize { 10 }

/// MCP (Model Context Protocol) configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub transport: McpTransport,
    /// Per-tool-call timeout in seconds. Default: 120.
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
}

fn default_mcp_timeout() -> u64 { 120 }

/// MCP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Streamable HTTP transport.
    Http {
        url: String,
        /// Custom HTTP headers (e.g., auth tokens).
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    #[serde(default = "default_health_bind")]
    pub bind: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            bind: default_health_bind(),
        }
    }
}

fn default_health_enabled() -> bool { true }
fn default_health_bind() -> String { "0.0.0.0:8081".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }

const SUPPORTED_PROVIDERS: &[&str] = &[
    "anthropic", "claude", "openai", "gpt", "gemini", "google", "ollama", "local", "groq",
    "openrouter", "together", "mistral", "deepseek",
];

const KEYLESS_PROVIDERS: &[&str] = &["ollama", "local"];

const LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| DagoError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| DagoError::Config(e.to_string()))
    }

    /// Load from `path` when it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply deployment environment variables on top of the file config.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("WORKER_ID") {
            self.worker.id = v;
        }
        if let Some(v) = get("DAGO_DB_PATH") {
            self.store.path = v;
        }
        if let Some(v) = get("LLM_PROVIDER") {
            self.model.provider = v;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.model.api_key = Some(v);
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.model.base_url = Some(v);
        }
        if let Some(v) = get("LLM_MODEL") {
            self.model.model_id = v;
        }
        if let Some(v) = get("MCP_SERVERS") {
            for (i, url) in v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .enumerate()
            {
                self.mcp.servers.insert(
                    format!("server-{}", i + 1),
                    McpServerConfig {
                        transport: McpTransport::Http {
                            url: url.to_string(),
                            headers: HashMap::new(),
                        },
                        timeout_secs: default_mcp_timeout(),
                    },
                );
            }
        }
        if let Some(v) = get("MAX_ITERATIONS") {
            self.agent.max_iterations = v
                .trim()
                .parse()
                .map_err(|_| DagoError::Config(format!("invalid MAX_ITERATIONS: {}", v)))?;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = get("HEALTH_PORT") {
            let port: u16 = v
                .trim()
                .parse()
                .map_err(|_| DagoError::Config(format!("invalid HEALTH_PORT: {}", v)))?;
            let host = self
                .health
                .bind
                .rsplit_once(':')
                .map(|(h, _)| h.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.health.bind = format!("{}:{}", host, port);
        }
        Ok(())
    }

    /// Check the configuration for values the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker.id.trim().is_empty() {
            return Err(DagoError::Config("worker ID is required".into()));
        }
        if self.worker.stream.trim().is_empty() || self.worker.consumer_group.trim().is_empty() {
            return Err(DagoError::Config(
                "work stream and consumer group names are required".into(),
            ));
        }

        let provider = self.model.provider.as_str();
        if !SUPPORTED_PROVIDERS.contains(&provider) {
            return Err(DagoError::Config(format!(
                "unsupported LLM provider: {} (supported: {})",
                provider,
                SUPPORTED_PROVIDERS.join(", ")
            )));
        }
        let has_key = self
            .model
            .api_key
            .as_deref()
            .map(|k| !k.is_empty())
            .unwrap_or(false);
        if !has_key && !KEYLESS_PROVIDERS.contains(&provider) {
            return Err(DagoError::Config(format!(
                "LLM API key is required for provider: {}",
                provider
            )));
        }

        if self.agent.max_iterations < 1 {
            return Err(DagoError::Config("max iterations must be at least 1".into()));
        }
        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(DagoError::Config(format!("invalid log level: {}", self.log.level)));
        }
        if self.store.state_ttl_secs == 0 {
            return Err(DagoError::Config("state TTL must be at least 1 second".into()));
        }
        Ok(())
    }

    /// Copy of the config that is safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.model.api_key.is_some() {
            copy.model.api_key = Some("********".to_string());
        }
        copy
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep the reference as written if the variable is unset
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_DAGO_CORE_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_DAGO_CORE_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_DAGO_CORE_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_DAGO_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_DAGO_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.worker.id, "executor-1");
        assert_eq!(config.worker.stream, "executor.work");
        assert_eq!(config.worker.consumer_group, "executor-workers");
        assert_eq!(config.worker.poll_interval_ms, 1000);
        assert_eq!(config.worker.shutdown_timeout_secs, 30);
        assert_eq!(config.store.state_ttl_secs, 86_400);
        assert_eq!(config.model.model_id, "claude-sonnet-4-20250514");
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.health.bind, "0.0.0.0:8081");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_mcp_transports_parse() {
        let toml_str = r#"
[mcp.servers.files]
transport = { type = "stdio", command = "npx", args = ["-y", "server-files"] }

[mcp.servers.remote]
timeout_secs = 15
transport = { type = "http", url = "http://localhost:9000/mcp" }
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.mcp.servers.len(), 2);
        assert!(matches!(
            config.mcp.servers["files"].transport,
            McpTransport::Stdio { .. }
        ));
        assert_eq!(config.mcp.servers["remote"].timeout_secs, 15);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("WORKER_ID", "executor-7"),
                ("LLM_PROVIDER", "ollama"),
                ("MCP_SERVERS", "http://a/mcp, ,http://b/mcp"),
                ("MAX_ITERATIONS", "4"),
                ("HEALTH_PORT", "9090"),
            ]))
            .unwrap();
        assert_eq!(config.worker.id, "executor-7");
        assert_eq!(config.model.provider, "ollama");
        assert_eq!(config.mcp.servers.len(), 2);
        assert!(config.mcp.servers.contains_key("server-2"));
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.health.bind, "0.0.0.0:9090");
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("MAX_ITERATIONS", "many")]))
            .unwrap_err();
        assert!(matches!(err, DagoError::Config(_)));
    }

    #[test]
    fn test_validate() {
        let mut config = AppConfig::default();
        // anthropic needs a key
        assert!(config.validate().is_err());
        config.model.api_key = Some("sk-test".into());
        assert!(config.validate().is_ok());

        config.model.provider = "ollama".into();
        config.model.api_key = None;
        assert!(config.validate().is_ok());

        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
        config.agent.max_iterations = 1;

        config.log.level = "verbose".into();
        assert!(config.validate().is_err());
        config.log.level = "debug".into();

        config.model.provider = "carrier-pigeon".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redacted_hides_key() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-secret".into());
        assert_eq!(config.redacted().model.api_key.as_deref(), Some("********"));
    }
}
