//! Wiring the configured sync transport.

use crate::config::{SyncConfig, TransportKind};
use anyhow::{Context, Result};
use hlcsync_core::OwnerId;
use hlcsync_proto::TopicScheme;
use hlcsync_transport::{
    pump_responses, DisabledTransport, HttpBackend, HttpBackendConfig, MqttBackend, ReceivedSync,
    SyncTransport, SyncWorker,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A running sync transport.
pub struct SyncHandle {
    /// Transport to hand to the replica
    pub transport: Arc<dyn SyncTransport>,
    /// Peer answers, if the transport produces any
    pub responses: Option<mpsc::Receiver<ReceivedSync>>,
}

/// Start the transport described by `config` on the current runtime.
///
/// # Errors
///
/// Returns error if the backend cannot be created or subscribed.
pub async fn start_sync(config: &SyncConfig, owner: &OwnerId, node_id: Uuid) -> Result<SyncHandle> {
    match config.transport {
        TransportKind::None => {
            tracing::info!("Sync disabled");
            Ok(SyncHandle {
                transport: Arc::new(DisabledTransport),
                responses: None,
            })
        }
        TransportKind::Http => {
            let backend = HttpBackend::new(&HttpBackendConfig {
                timeout: config.timeout,
            })
            .context("Failed to create HTTP backend")?;
            let (queue, responses, _worker) = SyncWorker::spawn(backend, config.queue_capacity);

            tracing::info!(sync_url = %config.sync_url, "HTTP sync started");
            Ok(SyncHandle {
                transport: Arc::new(queue),
                responses: Some(responses),
            })
        }
        TransportKind::Mqtt => {
            let topic_scheme = TopicScheme::default();
            let (backend, eventloop) = MqttBackend::new(
                &config.mqtt_broker,
                &format!("hlcsync-{}", node_id.simple()),
                topic_scheme.clone(),
            )
            .context("Failed to create MQTT backend")?;
            backend.subscribe(owner).await?;

            let (tx, responses) = mpsc::channel(config.queue_capacity);
            tokio::spawn(pump_responses(eventloop, topic_scheme, tx));
            // Answers arrive through the event loop, not the worker.
            let (queue, _unused, _worker) = SyncWorker::spawn(backend, config.queue_capacity);

            tracing::info!(broker = %config.mqtt_broker, "MQTT sync started");
            Ok(SyncHandle {
                transport: Arc::new(queue),
                responses: Some(responses),
            })
        }
    }
}
