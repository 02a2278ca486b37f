//! The dispatch side of the sync transport.

use crate::error::TransportError;
use hlcsync_core::{Clock, DivergentRange, Mutation, OwnerId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Everything the sync peer needs for one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncInput {
    /// Peer endpoint
    pub sync_url: String,
    /// Mutations to push; empty for a digest-only exchange
    pub mutations: Vec<Mutation>,
    /// The replica's clock after the mutations were applied
    pub clock: Clock,
    /// Owner whose data this is
    pub owner: OwnerId,
    /// Divergence found by the previous exchange, if any
    pub previous_diff: Option<DivergentRange>,
}

/// Fire-and-forget hand-off to the sync layer.
///
/// Implementations must not wait on the network; failures here only mean the
/// input could not be accepted at all.
pub trait SyncTransport: Send + Sync {
    /// Accept an exchange for delivery.
    ///
    /// # Errors
    ///
    /// Returns error if the input cannot be queued.
    fn dispatch(&self, input: SyncInput) -> Result<(), TransportError>;
}

/// Bounded queue feeding a [`crate::SyncWorker`].
#[derive(Debug, Clone)]
pub struct SyncQueue {
    tx: mpsc::Sender<SyncInput>,
}

/// Create a queue and the receiver a worker drains.
#[must_use]
pub fn sync_queue(capacity: usize) -> (SyncQueue, mpsc::Receiver<SyncInput>) {
    let (tx, rx) = mpsc::channel(capacity);
    (SyncQueue { tx }, rx)
}

impl SyncTransport for SyncQueue {
    fn dispatch(&self, input: SyncInput) -> Result<(), TransportError> {
        let count = input.mutations.len();
        self.tx.try_send(input).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::WorkerGone,
        })?;
        tracing::debug!(mutations = count, "Queued sync exchange");
        Ok(())
    }
}

/// Transport for replicas running without a sync peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTransport;

impl SyncTransport for DisabledTransport {
    fn dispatch(&self, input: SyncInput) -> Result<(), TransportError> {
        tracing::debug!(
            mutations = input.mutations.len(),
            "Sync disabled, dropping exchange"
        );
        Ok(())
    }
}
