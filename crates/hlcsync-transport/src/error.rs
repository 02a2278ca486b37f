//! Transport errors.

/// Errors that can occur while handing data to a sync peer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The sync queue is at capacity
    #[error("sync queue is full")]
    QueueFull,
    /// The sync worker has shut down
    #[error("sync worker is not running")]
    WorkerGone,
    /// Client initialization failed
    #[error("client init error: {0}")]
    Init(String),
    /// Invalid MQTT broker URL
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// HTTP request failed
    #[error("request error: {0}")]
    Request(String),
    /// Peer returned an error status
    #[error("sync peer error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error body from the peer
        message: String,
    },
    /// Subscription failed
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),
    /// Encoding a request failed
    #[error("serialize error: {0}")]
    Serialize(String),
    /// Decoding a response failed
    #[error("parse error: {0}")]
    Parse(String),
}
