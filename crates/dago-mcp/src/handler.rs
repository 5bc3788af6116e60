use std::future::Future;

use tokio::sync::broadcast;
use tracing::debug;

use rmcp::handler::client::ClientHandler;
use rmcp::model::{ClientInfo, Implementation};
use rmcp::service::NotificationContext;
use rmcp::RoleClient;

/// Notifications the tool backend cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpEvent {
    ToolsChanged { server: String },
}

/// Per-connection client handler. Reports when a server's tool list changes
/// so the backend can rebuild its routing index; every other server request
/// gets the library's default answer.
pub struct ToolListWatcher {
    server: String,
    events: broadcast::Sender<McpEvent>,
}

impl ToolListWatcher {
    pub fn new(server: &str, events: broadcast::Sender<McpEvent>) -> Self {
        Self {
            server: server.to_string(),
            events,
        }
    }
}

impl ClientHandler for ToolListWatcher {
    #[allow(clippy::manual_async_fn)]
    fn on_tool_list_changed(
        &self,
        _ctx: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async move {
            debug!(server = %self.server, "Tool list changed");
            // No receiver just means nobody is routing yet.
            let _ = self.events.send(McpEvent::ToolsChanged {
                server: self.server.clone(),
            });
        }
    }

    fn get_info(&self) -> ClientInfo {
        let mut info = ClientInfo::default();
        info.client_info = Implementation {
            name: "dago-worker".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            ..Implementation::default()
        };
        info
    }
}
