use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use dago_core::error::{DagoError, Result};
use dago_core::event::NodeEvent;
use dago_core::traits::StreamBroker;

/// Entry field carrying the serialized event.
pub const EVENT_FIELD: &str = "data";

/// Appends node outcome events to `events:<type>` streams.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn StreamBroker>,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn StreamBroker>) -> Self {
        Self { broker }
    }

    /// Publish one event, returning the stream entry id.
    pub async fn publish(&self, event: &NodeEvent) -> Result<String> {
        let payload = serde_json::to_string(event).map_err(|e| DagoError::Serialization {
            what: "node event".to_string(),
            message: e.to_string(),
        })?;
        let stream = event.event_type.stream_name();
        let id = self
            .broker
            .add(&stream, vec![(EVENT_FIELD.to_string(), payload)])
            .await?;
        debug!(stream = %stream, entry_id = %id, event_id = %event.id, "Event published");
        Ok(id)
    }

    pub async fn node_completed(&self, graph_id: &str, node_id: &str, output: Value) {
        let event = NodeEvent::completed(graph_id, node_id, output);
        self.publish_logged(&event).await;
    }

    pub async fn node_failed(&self, graph_id: &str, node_id: &str, err: &DagoError) {
        let event = NodeEvent::failed(graph_id, node_id, err);
        self.publish_logged(&event).await;
    }

    async fn publish_logged(&self, event: &NodeEvent) {
        if let Err(e) = self.publish(event).await {
            error!(
                graph_id = %event.graph_id,
                node_id = %event.node_id,
                event_type = event.event_type.as_str(),
                error = %e,
                "Failed to publish event"
            );
        }
    }
}
