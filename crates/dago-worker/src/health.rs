use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use dago_core::error::Result;

use crate::worker::Worker;

/// Liveness and readiness endpoints for a worker.
pub struct HealthServer {
    listener: TcpListener,
    worker: Arc<Worker>,
}

impl HealthServer {
    /// Bind the listening socket. Failing to bind is a startup error.
    pub async fn bind(addr: &str, worker: Arc<Worker>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, worker })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(worker: Arc<Worker>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .with_state(worker)
    }

    /// Serve until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(bind = %self.local_addr()?, "Health server listening");

        axum::serve(self.listener, Self::router(self.worker))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Health server shut down");
        Ok(())
    }
}

// GET /health
async fn health(State(worker): State<Arc<Worker>>) -> (StatusCode, Json<Value>) {
    let (status, code) = if worker.is_healthy().await {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    let body = json!({
        "status": status,
        "worker_id": worker.id(),
        "last_processed": worker.last_processed(),
        "timestamp": Utc::now(),
    });
    (code, Json(body))
}

// GET /ready
async fn ready(State(worker): State<Arc<Worker>>) -> (StatusCode, &'static str) {
    if worker.is_healthy().await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dago_core::error::DagoError;
    use dago_core::traits::{LlmClient, StateStore, ToolBackend};
    use dago_core::types::{GraphState, NodeState};
    use dago_engine::{Executor, ExecutorOptions};
    use dago_store::SqliteStore;
    use dago_test_utils::{ScriptedLlm, StaticBackend};
    use futures::future::BoxFuture;

    use crate::worker::WorkerConfig;

    /// A store whose backing database is unreachable.
    struct DownStore;

    impl StateStore for DownStore {
        fn load(&self, graph_id: &str) -> BoxFuture<'_, dago_core::Result<GraphState>> {
            let err = DagoError::StateNotFound(graph_id.to_string());
            Box::pin(async move { Err(err) })
        }

        fn save(&self, _state: &GraphState) -> BoxFuture<'_, dago_core::Result<()>> {
            Box::pin(async move { Err(DagoError::Store("unreachable".into())) })
        }

        fn save_node(&self, _graph_id: &str, _node: &NodeState) -> BoxFuture<'_, dago_core::Result<()>> {
            Box::pin(async move { Err(DagoError::Store("unreachable".into())) })
        }

        fn ping(&self) -> BoxFuture<'_, dago_core::Result<()>> {
            Box::pin(async move { Err(DagoError::Store("unreachable".into())) })
        }
    }

    fn worker(store: Arc<dyn StateStore>) -> Arc<Worker> {
        let broker = Arc::new(SqliteStore::in_memory().unwrap());
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::texts(&[]));
        let tools: Arc<dyn ToolBackend> = Arc::new(StaticBackend::new("tools"));
        let executor = Arc::new(Executor::new(llm, tools, ExecutorOptions::default()));
        let config = WorkerConfig {
            id: "executor-test".into(),
            ..WorkerConfig::default()
        };
        Arc::new(Worker::new(config, broker, store, executor))
    }

    async fn spawn_server(worker: Arc<Worker>) -> (String, CancellationToken) {
        let server = HealthServer::bind("127.0.0.1:0", worker).await.unwrap();
        let base = format!("http://{}", server.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));
        (base, shutdown)
    }

    #[tokio::test]
    async fn healthy_worker_reports_ok() {
        let (base, shutdown) = spawn_server(worker(Arc::new(SqliteStore::in_memory().unwrap()))).await;

        let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["worker_id"], "executor-test");
        assert!(body["last_processed"].is_null());
        assert!(body["timestamp"].is_string());

        let resp = reqwest::get(format!("{}/ready", base)).await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.text().await.unwrap(), "ready");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        let (base, shutdown) = spawn_server(worker(Arc::new(DownStore))).await;

        let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(resp.status().as_u16(), 503);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "unhealthy");

        let resp = reqwest::get(format!("{}/ready", base)).await.unwrap();
        assert_eq!(resp.status().as_u16(), 503);
        assert_eq!(resp.text().await.unwrap(), "not ready");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let result = HealthServer::bind("not-an-address", worker(Arc::new(DownStore))).await;
        assert!(result.is_err());
    }
}
