use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use dago_core::config::McpConfig;
use dago_core::error::{DagoError, Result};
use dago_core::traits::ToolBackend;

use crate::client::{McpClientManager, McpToolOutput};
use crate::handler::McpEvent;

const QUALIFIER: &str = "__";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Primary tool backend: tools served by connected MCP servers.
///
/// Tools are addressed by bare name (resolved through a tool -> server index)
/// or as `server__tool`. The index is rebuilt lazily on first use and after a
/// server announces that its tool list changed.
pub struct McpToolBackend {
    manager: Arc<McpClientManager>,
    index: RwLock<HashMap<String, String>>,
    stale: AtomicBool,
    events: Mutex<broadcast::Receiver<McpEvent>>,
}

impl McpToolBackend {
    pub fn new(manager: Arc<McpClientManager>) -> Self {
        let events = manager.subscribe_events();
        Self {
            manager,
            index: RwLock::new(HashMap::new()),
            stale: AtomicBool::new(true),
            events: Mutex::new(events),
        }
    }

    /// Connect every configured server. A server that fails to connect is
    /// logged and skipped.
    pub async fn connect_all(config: &McpConfig) -> Self {
        let manager = Arc::new(McpClientManager::new());
        let mut names: Vec<&String> = config.servers.keys().collect();
        names.sort();

        for name in names {
            let server = &config.servers[name];
            match manager.connect(name, server).await {
                Ok(()) => {}
                Err(e) => warn!(server = %name, error = %e, "MCP server unavailable, skipping"),
            }
        }

        Self::new(manager)
    }

    pub fn manager(&self) -> &Arc<McpClientManager> {
        &self.manager
    }

    /// Mark the index stale if any server announced a tool-list change.
    async fn drain_events(&self) {
        let mut rx = self.events.lock().await;
        loop {
            match rx.try_recv() {
                Ok(McpEvent::ToolsChanged { server }) => {
                    debug!(server = %server, "MCP tool index invalidated");
                    self.stale.store(true, Ordering::SeqCst);
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    self.stale.store(true, Ordering::SeqCst);
                }
                Err(_) => break,
            }
        }
    }

    /// Rebuild the tool -> server index. Earlier servers (by name) win ties.
    async fn refresh_index(&self) {
        let mut index = HashMap::new();
        for server in self.manager.connected_servers().await {
            match self.manager.list_tools(&server).await {
                Ok(tools) => {
                    for tool in tools {
                        index
                            .entry(tool.name.to_string())
                            .or_insert_with(|| server.clone());
                    }
                }
                Err(e) => warn!(server = %server, error = %e, "Failed to list MCP tools"),
            }
        }
        info!(tools = index.len(), "MCP tool index rebuilt");
        *self.index.write().await = index;
        self.stale.store(false, Ordering::SeqCst);
    }

    async fn ensure_index(&self) {
        self.drain_events().await;
        if self.stale.load(Ordering::SeqCst) {
            self.refresh_index().await;
        }
    }

    /// Find the server that serves `tool`, returning (server, bare tool name).
    async fn resolve(&self, tool: &str) -> Option<(String, String)> {
        if let Some((server, bare)) = split_qualified(tool) {
            if self.manager.is_connected(server).await {
                return Some((server.to_string(), bare.to_string()));
            }
        }

        self.ensure_index().await;
        if let Some(server) = self.index.read().await.get(tool) {
            return Some((server.clone(), tool.to_string()));
        }
        None
    }

    async fn call(&self, tool: &str, params: Map<String, Value>) -> Result<Value> {
        let (server, bare) = self
            .resolve(tool)
            .await
            .ok_or_else(|| DagoError::ToolNotFound(tool.to_string()))?;

        let timeout_secs = self
            .manager
            .get_config(&server)
            .await
            .map(|c| c.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        debug!(server = %server, tool = %bare, "Calling MCP tool");

        let output = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.manager.call_tool(&server, &bare, params),
        )
        .await
        .map_err(|_| DagoError::ToolTimeout {
            tool: tool.to_string(),
            timeout_secs,
        })??;

        into_value(tool, output)
    }
}

fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once(QUALIFIER)
        .filter(|(server, tool)| !server.is_empty() && !tool.is_empty())
}

/// Tool text that parses as JSON is returned as that value, anything else as a string.
fn into_value(tool: &str, output: McpToolOutput) -> Result<Value> {
    if output.is_error {
        return Err(DagoError::ToolExecution {
            tool: tool.to_string(),
            message: output.text,
        });
    }
    Ok(serde_json::from_str(&output.text).unwrap_or(Value::String(output.text)))
}

impl ToolBackend for McpToolBackend {
    fn name(&self) -> &str {
        "mcp"
    }

    fn execute(&self, tool: &str, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        let tool = tool.to_string();
        Box::pin(async move { self.call(&tool, params).await })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            self.ensure_index().await;
            let mut names: Vec<String> = self.index.read().await.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }
}
