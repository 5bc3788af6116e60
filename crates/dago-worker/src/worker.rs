use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use dago_core::config::WorkerSection;
use dago_core::error::{DagoError, Result};
use dago_core::traits::{StateStore, StreamBroker};
use dago_core::types::{NodeState, StreamEntry, WorkItem};
use dago_engine::Executor;

use crate::events::EventPublisher;

/// Intake field holding the JSON work item.
pub const WORK_FIELD: &str = "data";

/// Runtime settings of one worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer name within the group.
    pub id: String,
    pub stream: String,
    pub consumer_group: String,
    /// How long one read blocks waiting for work.
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub shutdown_timeout: Duration,
    /// Take over entries left pending this long by other consumers.
    pub reclaim_idle: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&WorkerSection::default())
    }
}

impl From<&WorkerSection> for WorkerConfig {
    fn from(section: &WorkerSection) -> Self {
        Self {
            id: section.id.clone(),
            stream: section.stream.clone(),
            consumer_group: section.consumer_group.clone(),
            poll_interval: Duration::from_millis(section.poll_interval_ms),
            error_backoff: Duration::from_millis(section.error_backoff_ms),
            shutdown_timeout: Duration::from_secs(section.shutdown_timeout_secs),
            reclaim_idle: (section.reclaim_idle_secs > 0)
                .then(|| Duration::from_secs(section.reclaim_idle_secs)),
        }
    }
}

/// Reads work items one at a time from a consumer group, executes them,
/// records the node result, publishes an outcome event and acknowledges
/// the entry.
pub struct Worker {
    config: WorkerConfig,
    broker: Arc<dyn StreamBroker>,
    store: Arc<dyn StateStore>,
    executor: Arc<Executor>,
    events: EventPublisher,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    last_processed: RwLock<Option<DateTime<Utc>>>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn StreamBroker>,
        store: Arc<dyn StateStore>,
        executor: Arc<Executor>,
    ) -> Self {
        let events = EventPublisher::new(broker.clone());
        Self {
            config,
            broker,
            store,
            executor,
            events,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            last_processed: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Create the consumer group if needed and spawn the intake loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!(worker_id = %self.config.id, "Starting worker");
        self.broker
            .ensure_group(&self.config.stream, &self.config.consumer_group)
            .await?;

        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!(worker_id = %self.config.id, "Worker already running");
            return Ok(());
        }
        let worker = Arc::clone(self);
        *task = Some(tokio::spawn(async move { worker.run().await }));

        info!(
            worker_id = %self.config.id,
            stream = %self.config.stream,
            group = %self.config.consumer_group,
            "Worker started"
        );
        Ok(())
    }

    /// Signal the loop to stop and wait for the in-flight entry to finish.
    pub async fn stop(&self) -> Result<()> {
        info!(worker_id = %self.config.id, "Stopping worker");
        self.cancel.cancel();

        let Some(mut handle) = self.task.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!(worker_id = %self.config.id, "Worker stopped gracefully");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(worker_id = %self.config.id, error = %e, "Worker task ended abnormally");
                Ok(())
            }
            Err(_) => {
                // Leave the task running; in-flight work is never killed
                warn!(worker_id = %self.config.id, "Worker stop timed out");
                Err(DagoError::StopTimeout(self.config.shutdown_timeout.as_secs()))
            }
        }
    }

    /// Storage reachability.
    pub async fn is_healthy(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(worker_id = %self.config.id, error = %e, "Health check failed");
                false
            }
        }
    }

    /// When the last entry finished processing.
    pub fn last_processed(&self) -> Option<DateTime<Utc>> {
        self.last_processed.read().ok().and_then(|guard| *guard)
    }

    async fn run(&self) {
        info!(worker_id = %self.config.id, "Worker loop running");

        while !self.cancel.is_cancelled() {
            let next = tokio::select! {
                next = self.next_entry() => next,
                _ = self.cancel.cancelled() => break,
            };

            match next {
                Ok(Some(entry)) => self.handle_entry(entry).await,
                Ok(None) => {}
                Err(e) => {
                    error!(worker_id = %self.config.id, error = %e, "Failed to read from stream");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }
            }
        }

        info!(worker_id = %self.config.id, "Worker loop exited");
    }

    /// Stale entries of crashed consumers first, then new work.
    async fn next_entry(&self) -> Result<Option<StreamEntry>> {
        let WorkerConfig {
            id,
            stream,
            consumer_group,
            ..
        } = &self.config;

        if let Some(min_idle) = self.config.reclaim_idle {
            if let Some(entry) = self
                .broker
                .claim_idle(stream, consumer_group, id, min_idle)
                .await?
            {
                warn!(worker_id = %id, message_id = %entry.id, "Reclaimed idle entry");
                return Ok(Some(entry));
            }
        }

        self.broker
            .read_group(stream, consumer_group, id, self.config.poll_interval)
            .await
    }

    /// Process one delivered entry. Every entry is acknowledged exactly once,
    /// whatever happens to it.
    pub(crate) async fn handle_entry(&self, entry: StreamEntry) {
        info!(worker_id = %self.config.id, message_id = %entry.id, "Processing work");

        match decode_work(&entry) {
            Ok(work) => match self.process(&work).await {
                Ok(output) => {
                    info!(
                        worker_id = %self.config.id,
                        graph_id = %work.graph_id,
                        node_id = %work.node_id,
                        "Node completed"
                    );
                    self.events
                        .node_completed(&work.graph_id, &work.node_id, output)
                        .await;
                }
                Err(e) => {
                    warn!(
                        worker_id = %self.config.id,
                        graph_id = %work.graph_id,
                        node_id = %work.node_id,
                        error = %e,
                        "Node failed"
                    );
                    self.events.node_failed(&work.graph_id, &work.node_id, &e).await;
                }
            },
            Err(e) => {
                // Poison entries are dropped, never redelivered
                error!(worker_id = %self.config.id, message_id = %entry.id, error = %e, "Invalid work entry");
            }
        }

        self.ack(&entry.id).await;

        if let Ok(mut last) = self.last_processed.write() {
            *last = Some(Utc::now());
        }
    }

    async fn process(&self, work: &WorkItem) -> Result<Value> {
        let mut state = self.store.load(&work.graph_id).await?;
        let started = Utc::now();

        let output = self.executor.execute(&state, &work.node_config()).await?;

        let mut node = state
            .node_states
            .remove(&work.node_id)
            .unwrap_or_else(|| NodeState::pending(&work.node_id));
        node.started_at.get_or_insert(started);
        node.complete(output.clone(), Utc::now());

        // The output is still published when persisting it fails
        if let Err(e) = self.store.save_node(&work.graph_id, &node).await {
            error!(
                graph_id = %work.graph_id,
                node_id = %work.node_id,
                error = %e,
                "Failed to save node state"
            );
        }

        Ok(output)
    }

    async fn ack(&self, message_id: &str) {
        match self
            .broker
            .ack(&self.config.stream, &self.config.consumer_group, message_id)
            .await
        {
            Ok(()) => debug!(message_id, "Entry acknowledged"),
            Err(e) => error!(message_id, error = %e, "Failed to ack entry"),
        }
    }
}

fn decode_work(entry: &StreamEntry) -> Result<WorkItem> {
    let data = entry
        .field(WORK_FIELD)
        .ok_or_else(|| DagoError::Deserialization {
            what: "work item".to_string(),
            message: format!("entry has no '{}' field", WORK_FIELD),
        })?;
    serde_json::from_str(data).map_err(|e| DagoError::Deserialization {
        what: "work item".to_string(),
        message: e.to_string(),
    })
}
