use std::io::Write;

use dago_core::config::{AppConfig, McpTransport};
use dago_core::DagoError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[worker]
id = "executor-7"
stream = "executor.work"
consumer_group = "executor-workers"
poll_interval_ms = 500
reclaim_idle_secs = 300

[store]
path = "/var/lib/dago/dago.db"
state_ttl_secs = 3600

[model]
provider = "anthropic"
model_id = "claude-sonnet-4-20250514"
api_key = "sk-test-key"

[model.retry]
max_retries = 5

[agent]
max_iterations = 4

[health]
bind = "127.0.0.1:9090"

[log]
level = "debug"

[mcp.servers.web-search]
timeout_secs = 30

[mcp.servers.web-search.transport]
type = "stdio"
command = "npx"
args = ["-y", "@anthropic/web-search-mcp"]

[mcp.servers.files.transport]
type = "http"
url = "http://localhost:9000/mcp"
headers = { Authorization = "Bearer abc" }
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.worker.id, "executor-7");
    assert_eq!(config.worker.poll_interval_ms, 500);
    assert_eq!(config.worker.error_backoff_ms, 1000);
    assert_eq!(config.worker.reclaim_idle_secs, 300);
    assert_eq!(config.store.state_ttl_secs, 3600);
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.retry.as_ref().map(|r| r.max_retries), Some(5));
    assert_eq!(config.agent.max_iterations, 4);
    assert_eq!(config.health.bind, "127.0.0.1:9090");
    assert_eq!(config.log.level, "debug");

    let search = &config.mcp.servers["web-search"];
    assert_eq!(search.timeout_secs, 30);
    assert!(matches!(search.transport, McpTransport::Stdio { ref command, .. } if command == "npx"));
    let files = &config.mcp.servers["files"];
    assert_eq!(files.timeout_secs, 120);
    assert!(matches!(files.transport, McpTransport::Http { ref headers, .. } if headers.len() == 1));

    config.validate().expect("valid config");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("DAGO_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
model_id = "test-model"
api_key = "${DAGO_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("DAGO_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[model]
provider = "ollama"
model_id = "llama3.2"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.worker.id, "executor-1");
    assert_eq!(config.worker.stream, "executor.work");
    assert_eq!(config.worker.consumer_group, "executor-workers");
    assert_eq!(config.worker.shutdown_timeout_secs, 30);
    assert_eq!(config.store.state_ttl_secs, 86_400);
    assert_eq!(config.agent.max_iterations, 10);
    assert!(config.health.enabled);
    assert_eq!(config.health.bind, "0.0.0.0:8081");
    assert!(config.mcp.servers.is_empty());
    assert!(config.model.retry.is_none());

    // ollama needs no key
    config.validate().expect("valid config");
}

#[test]
fn test_missing_file_is_reported_and_defaulted() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("absent.toml");

    let err = AppConfig::load(&path).unwrap_err();
    assert!(matches!(err, DagoError::ConfigNotFound(_)));

    let config = AppConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.model.provider, "anthropic");
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[agent]\nmax_iterations = \"many\"\n").expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, DagoError::Config(_)));
}
