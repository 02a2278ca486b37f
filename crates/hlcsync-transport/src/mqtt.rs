//! MQTT sync backend.
//!
//! Requests are published to the owner's request topic. The peer answers on
//! the response topic, so answers arrive through the event loop rather than
//! from [`SyncBackend::exchange`]; [`pump_responses`] turns them into
//! [`ReceivedSync`] values.

use crate::error::TransportError;
use crate::worker::{ReceivedSync, SyncBackend};
use async_trait::async_trait;
use hlcsync_core::OwnerId;
use hlcsync_proto::{MessageType, SyncRequest, SyncResponse, TopicScheme};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Sync backend publishing requests over MQTT.
pub struct MqttBackend {
    client: AsyncClient,
    topic_scheme: TopicScheme,
}

impl MqttBackend {
    /// Create a new MQTT backend.
    ///
    /// The returned event loop must be driven (see [`pump_responses`]) for
    /// publishes to leave the process.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn new(
        mqtt_broker: &str,
        client_id: &str,
        topic_scheme: TopicScheme,
    ) -> Result<(Self, EventLoop), TransportError> {
        let (host, port) = parse_mqtt_url(mqtt_broker)?;

        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);

        Ok((
            Self {
                client,
                topic_scheme,
            },
            eventloop,
        ))
    }

    /// Subscribe to sync responses for an owner.
    ///
    /// # Errors
    ///
    /// Returns error if subscription fails.
    pub async fn subscribe(&self, owner: &OwnerId) -> Result<(), TransportError> {
        let topic = self.topic_scheme.sync_response(owner);

        tracing::info!(topic, "Subscribing to sync responses");

        self.client
            .subscribe(&topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl SyncBackend for MqttBackend {
    async fn exchange(
        &self,
        _endpoint: &str,
        request: SyncRequest,
    ) -> Result<Option<SyncResponse>, TransportError> {
        let owner = OwnerId::new(request.owner_id.clone());
        let topic = self.topic_scheme.sync_request(&owner);
        let payload = request.to_bytes();

        tracing::debug!(topic, payload_len = payload.len(), "Publishing sync request");

        self.client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        Ok(None)
    }
}

/// Drive the MQTT event loop, forwarding sync responses until the receiver
/// is dropped.
pub async fn pump_responses(
    mut eventloop: EventLoop,
    topic_scheme: TopicScheme,
    responses: mpsc::Sender<ReceivedSync>,
) {
    loop {
        let publish = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => publish,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection error");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        tracing::debug!(
            topic = %publish.topic,
            payload_len = publish.payload.len(),
            "Received sync message"
        );

        match topic_scheme.parse(&publish.topic) {
            Some((_, MessageType::SyncResponse)) => {}
            _ => continue,
        }

        let received = match decode_response(&publish.payload) {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode sync response");
                continue;
            }
        };

        if responses.send(received).await.is_err() {
            tracing::debug!("Response receiver dropped, stopping MQTT pump");
            return;
        }
    }
}

fn decode_response(payload: &[u8]) -> Result<ReceivedSync, TransportError> {
    let (mutations, digest) = SyncResponse::from_bytes(payload)
        .and_then(SyncResponse::into_parts)
        .map_err(|e| TransportError::Parse(e.to_string()))?;
    Ok(ReceivedSync {
        mutations,
        digest,
        previous_diff: None,
    })
}

/// Parse MQTT URL into host and port.
fn parse_mqtt_url(input: &str) -> Result<(String, u16), TransportError> {
    if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| TransportError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(TransportError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TransportError::InvalidBrokerUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port.parse().map_err(|_| {
            TransportError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'"))
        })?,
    };
    if parts.next().is_some() {
        return Err(TransportError::InvalidBrokerUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}
