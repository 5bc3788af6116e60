use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use dago_core::error::{DagoError, Result};
use dago_core::traits::ToolBackend;

/// Composite tool backend. Backends are tried in order and the first
/// success wins; when every backend fails the last backend's error is
/// returned unchanged.
pub struct ToolRouter {
    backends: Vec<Arc<dyn ToolBackend>>,
}

impl ToolRouter {
    pub fn new(backends: Vec<Arc<dyn ToolBackend>>) -> Self {
        Self { backends }
    }

    /// Router over a primary backend with a secondary fallback.
    pub fn with_fallback(primary: Arc<dyn ToolBackend>, secondary: Arc<dyn ToolBackend>) -> Self {
        Self::new(vec![primary, secondary])
    }

    /// Append a backend with the lowest priority.
    pub fn push(&mut self, backend: Arc<dyn ToolBackend>) {
        self.backends.push(backend);
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Execute `tool` against each backend in priority order.
    pub async fn route(&self, tool: &str, params: Map<String, Value>) -> Result<Value> {
        let mut last_err = None;

        for backend in &self.backends {
            match backend.execute(tool, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(tool = %tool, backend = %backend.name(), error = %e, "Tool backend failed, trying next");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DagoError::ToolNotFound(tool.to_string())))
    }

    /// Union of every backend's listing, deduplicated and sorted. Backends
    /// whose listing fails are skipped.
    pub async fn all_tools(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for backend in &self.backends {
            match backend.list_tools().await {
                Ok(list) => names.extend(list),
                Err(e) => {
                    debug!(backend = %backend.name(), error = %e, "Tool listing failed");
                }
            }
        }
        names.into_iter().collect()
    }
}

impl ToolBackend for ToolRouter {
    fn name(&self) -> &str {
        "router"
    }

    fn execute(&self, tool: &str, params: Map<String, Value>) -> BoxFuture<'_, Result<Value>> {
        let tool = tool.to_string();
        Box::pin(async move { self.route(&tool, params).await })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { Ok(self.all_tools().await) })
    }
}
