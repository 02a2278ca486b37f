//! Background worker that performs sync exchanges.

use crate::error::TransportError;
use crate::queue::{sync_queue, SyncInput, SyncQueue};
use async_trait::async_trait;
use hlcsync_core::{DigestNode, DivergentRange, Mutation};
use hlcsync_proto::{SyncRequest, SyncResponse};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One request/response round trip with a sync peer.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Deliver a request to `endpoint`.
    ///
    /// Returns the peer's answer when the backend is request/response;
    /// backends that deliver answers out of band return `None`.
    async fn exchange(
        &self,
        endpoint: &str,
        request: SyncRequest,
    ) -> Result<Option<SyncResponse>, TransportError>;
}

#[async_trait]
impl<B: SyncBackend + ?Sized> SyncBackend for Arc<B> {
    async fn exchange(
        &self,
        endpoint: &str,
        request: SyncRequest,
    ) -> Result<Option<SyncResponse>, TransportError> {
        (**self).exchange(endpoint, request).await
    }
}

/// What a peer sent back, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedSync {
    /// Mutations this replica is missing
    pub mutations: Vec<Mutation>,
    /// The peer's pruned digest
    pub digest: DigestNode,
    /// The divergence hint sent with the request that produced this answer
    pub previous_diff: Option<DivergentRange>,
}

/// Drains a [`SyncQueue`] and runs each exchange through a backend.
pub struct SyncWorker<B> {
    backend: B,
    responses: mpsc::Sender<ReceivedSync>,
}

impl<B: SyncBackend + 'static> SyncWorker<B> {
    /// Start a worker on the current runtime.
    ///
    /// Returns the queue to dispatch into, the stream of peer answers, and
    /// the task handle. The worker stops once every queue handle is dropped.
    #[must_use]
    pub fn spawn(
        backend: B,
        capacity: usize,
    ) -> (SyncQueue, mpsc::Receiver<ReceivedSync>, JoinHandle<()>) {
        let (queue, inputs) = sync_queue(capacity);
        let (responses, received) = mpsc::channel(capacity);
        let worker = Self { backend, responses };
        let handle = tokio::spawn(worker.run(inputs));
        (queue, received, handle)
    }

    async fn run(self, mut inputs: mpsc::Receiver<SyncInput>) {
        tracing::info!("Sync worker started");
        while let Some(input) = inputs.recv().await {
            if let Err(e) = self.process(input).await {
                tracing::warn!(error = %e, "Sync exchange failed");
            }
        }
        tracing::info!("Sync worker stopped");
    }

    async fn process(&self, input: SyncInput) -> Result<(), TransportError> {
        let request = SyncRequest::new(
            &input.mutations,
            &input.clock,
            &input.owner,
            input.previous_diff.as_ref(),
        )
        .map_err(|e| TransportError::Serialize(e.to_string()))?;

        tracing::debug!(
            endpoint = %input.sync_url,
            owner = %input.owner,
            mutations = request.mutations.len(),
            "Sending sync request"
        );

        let Some(response) = self.backend.exchange(&input.sync_url, request).await? else {
            return Ok(());
        };

        let (mutations, digest) = response
            .into_parts()
            .map_err(|e| TransportError::Parse(e.to_string()))?;

        tracing::debug!(mutations = mutations.len(), "Received sync response");

        let received = ReceivedSync {
            mutations,
            digest,
            previous_diff: input.previous_diff,
        };
        if self.responses.send(received).await.is_err() {
            tracing::debug!("Response receiver dropped");
        }
        Ok(())
    }
}
