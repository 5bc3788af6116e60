mod backend;
mod client;
mod handler;

pub use backend::McpToolBackend;
pub use client::{McpClientManager, McpToolOutput};
pub use handler::{McpEvent, ToolListWatcher};
