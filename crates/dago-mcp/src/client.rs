use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use rmcp::model::{CallToolRequestParams, Tool as McpTool};
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::{
    StreamableHttpClientTransport, StreamableHttpClientTransportConfig,
};
use rmcp::{RoleClient, ServiceExt};

use dago_core::config::{McpServerConfig, McpTransport};
use dago_core::error::DagoError;

use crate::handler::{McpEvent, ToolListWatcher};

type McpConnection = RunningService<RoleClient, ToolListWatcher>;

/// Text output of one MCP tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct McpToolOutput {
    pub text: String,
    pub is_error: bool,
}

/// Manages connections to multiple MCP servers.
pub struct McpClientManager {
    connections: Mutex<HashMap<String, McpConnection>>,
    server_configs: Mutex<HashMap<String, McpServerConfig>>,
    event_tx: broadcast::Sender<McpEvent>,
}

impl Default for McpClientManager {
    fn default() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            connections: Mutex::new(HashMap::new()),
            server_configs: Mutex::new(HashMap::new()),
            event_tx,
        }
    }
}

fn build_http_client(headers: &HashMap<String, String>) -> Result<reqwest::Client, DagoError> {
    let mut map = http::HeaderMap::new();
    for (k, v) in headers {
        let name = http::HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| DagoError::Mcp(format!("Invalid header name '{}': {}", k, e)))?;
        let value = http::HeaderValue::from_str(v)
            .map_err(|e| DagoError::Mcp(format!("Invalid header value for '{}': {}", k, e)))?;
        map.insert(name, value);
    }
    reqwest::Client::builder()
        .default_headers(map)
        .build()
        .map_err(|e| DagoError::Mcp(e.to_string()))
}

impl McpClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to MCP events (tools_changed).
    pub fn subscribe_events(&self) -> broadcast::Receiver<McpEvent> {
        self.event_tx.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn event_sender(&self) -> broadcast::Sender<McpEvent> {
        self.event_tx.clone()
    }

    /// Connect to an MCP server.
    pub async fn connect(&self, name: &str, config: &McpServerConfig) -> Result<(), DagoError> {
        let handler = ToolListWatcher::new(name, self.event_tx.clone());

        let client = match &config.transport {
            McpTransport::Stdio { command, args, env } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args);
                for (k, v) in env {
                    cmd.env(k, v);
                }

                let transport = rmcp::transport::TokioChildProcess::new(cmd)
                    .map_err(|e| DagoError::Mcp(format!("Failed to spawn {}: {}", command, e)))?;

                handler.serve(transport).await.map_err(|e| {
                    DagoError::Mcp(format!(
                        "Failed to initialize MCP client for {}: {}",
                        name, e
                    ))
                })?
            }
            McpTransport::Http { url, headers } => {
                let transport = if headers.is_empty() {
                    StreamableHttpClientTransport::from_uri(url.as_str())
                } else {
                    StreamableHttpClientTransport::with_client(
                        build_http_client(headers)?,
                        StreamableHttpClientTransportConfig::with_uri(url.as_str()),
                    )
                };

                <ToolListWatcher as ServiceExt<RoleClient>>::serve(handler, transport)
                    .await
                    .map_err(|e| DagoError::Mcp(format!("MCP init for '{}' failed: {}", name, e)))?
            }
        };

        info!(server = %name, "MCP server connected");

        self.connections
            .lock()
            .await
            .insert(name.to_string(), client);
        self.server_configs
            .lock()
            .await
            .insert(name.to_string(), config.clone());
        Ok(())
    }

    /// Attempt to reconnect to a server using its stored config.
    pub async fn reconnect(&self, server_name: &str) -> Result<(), DagoError> {
        let config = self.get_config(server_name).await.ok_or_else(|| {
            DagoError::Mcp(format!("No stored config for server '{}'", server_name))
        })?;

        // Remove old connection
        {
            let mut conns = self.connections.lock().await;
            if let Some(mut old) = conns.remove(server_name) {
                let _ = old.close().await;
            }
        }

        self.connect(server_name, &config).await
    }

    /// Check if a server connection is still alive.
    pub async fn is_connected(&self, server_name: &str) -> bool {
        let conns = self.connections.lock().await;
        conns
            .get(server_name)
            .map(|c| !c.is_closed())
            .unwrap_or(false)
    }

    /// Connected server names, sorted.
    pub async fn connected_servers(&self) -> Vec<String> {
        let conns = self.connections.lock().await;
        let mut names: Vec<String> = conns.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the stored config for a server.
    pub async fn get_config(&self, server_name: &str) -> Option<McpServerConfig> {
        let configs = self.server_configs.lock().await;
        configs.get(server_name).cloned()
    }

    /// List tools from a connected server.
    pub async fn list_tools(&self, server_name: &str) -> Result<Vec<McpTool>, DagoError> {
        let conns = self.connections.lock().await;
        let client = conns
            .get(server_name)
            .ok_or_else(|| DagoError::Mcp(format!("Server '{}' not connected", server_name)))?;

        let tools = client.list_all_tools().await.map_err(|e| {
            DagoError::Mcp(format!("Failed to list tools from '{}': {}", server_name, e))
        })?;

        debug!(server = %server_name, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Call a tool on a connected server, with automatic reconnect on transport failure.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<McpToolOutput, DagoError> {
        let result = self
            .call_tool_inner(server_name, tool_name, arguments.clone())
            .await;

        // If transport closed, attempt one reconnect
        if let Err(ref e) = result {
            let err_str = e.to_string();
            if err_str.contains("closed") || err_str.contains("Transport") {
                warn!(server = %server_name, "MCP transport closed, attempting reconnect");
                if self.reconnect(server_name).await.is_ok() {
                    return self.call_tool_inner(server_name, tool_name, arguments).await;
                }
            }
        }

        result
    }

    async fn call_tool_inner(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<McpToolOutput, DagoError> {
        let conns = self.connections.lock().await;
        let client = conns
            .get(server_name)
            .ok_or_else(|| DagoError::Mcp(format!("Server '{}' not connected", server_name)))?;

        let params = CallToolRequestParams {
            name: tool_name.to_string().into(),
            arguments: Some(arguments),
            meta: None,
            task: None,
        };

        let result = client.call_tool(params).await.map_err(|e| {
            DagoError::Mcp(format!(
                "Tool call '{}.{}' failed: {}",
                server_name, tool_name, e
            ))
        })?;

        let content: Vec<String> = result
            .content
            .iter()
            .map(|c| match c.raw {
                rmcp::model::RawContent::Text(ref t) => t.text.to_string(),
                _ => format!("{:?}", c.raw),
            })
            .collect();

        Ok(McpToolOutput {
            text: content.join("\n"),
            is_error: result.is_error.unwrap_or(false),
        })
    }

    /// Disconnect from all servers.
    pub async fn disconnect_all(&self) {
        let mut conns = self.connections.lock().await;
        let names: Vec<String> = conns.keys().cloned().collect();
        for name in names {
            if let Some(mut client) = conns.remove(&name) {
                let _ = client.close().await;
                info!(server = %name, "MCP server disconnected");
            }
        }
    }
}
