//! HTTP sync backend.
//!
//! Each exchange is a single `POST` of a protobuf [`SyncRequest`] to the sync
//! URL; the body of a successful answer is a protobuf [`SyncResponse`].

use crate::error::TransportError;
use crate::worker::SyncBackend;
use async_trait::async_trait;
use hlcsync_proto::{SyncRequest, SyncResponse};
use reqwest::Client;
use std::time::Duration;

/// Content type of both request and response bodies.
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// HTTP backend configuration.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Request timeout
    pub timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Sync backend speaking protobuf over HTTP.
pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    /// Create a new HTTP backend.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: &HttpBackendConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| TransportError::Init(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SyncBackend for HttpBackend {
    async fn exchange(
        &self,
        endpoint: &str,
        request: SyncRequest,
    ) -> Result<Option<SyncResponse>, TransportError> {
        let body = request.to_bytes();
        tracing::debug!(endpoint, body_len = body.len(), "POST sync request");

        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", PROTOBUF_CONTENT_TYPE)
            .header("Accept", PROTOBUF_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::ApiError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        SyncResponse::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| TransportError::Parse(e.to_string()))
    }
}
