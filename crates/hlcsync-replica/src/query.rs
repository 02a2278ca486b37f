//! Query cache hook.
//!
//! The replica does not run queries itself. After rows change it tells a
//! [`QueryCache`] which queries to invalidate and re-run, and which caller
//! callbacks are now complete.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Opaque identifier of a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub String);

/// Opaque identifier of a caller completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnCompleteId(pub String);

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRefresh {
    /// A local batch committed
    AfterSend {
        /// Queries to re-run
        queries: Vec<QueryId>,
        /// Callbacks to fire
        on_complete_ids: Vec<OnCompleteId>,
    },
    /// Remote mutations were applied; every query may be stale
    AfterReceive,
}

/// Receives refresh requests from the replica.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Invalidate and re-run the affected queries.
    async fn invalidate_and_rerun(&self, refresh: QueryRefresh) -> Result<(), QueryError>;
}

/// Broadcasts refresh requests to any number of subscribers.
///
/// Having no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct QueryNotifier {
    tx: broadcast::Sender<QueryRefresh>,
}

impl QueryNotifier {
    /// Create a notifier buffering up to `capacity` refreshes per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to refreshes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueryRefresh> {
        self.tx.subscribe()
    }
}

impl Default for QueryNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl QueryCache for QueryNotifier {
    async fn invalidate_and_rerun(&self, refresh: QueryRefresh) -> Result<(), QueryError> {
        match self.tx.send(refresh) {
            Ok(subscribers) => tracing::trace!(subscribers, "Query refresh broadcast"),
            Err(_) => tracing::trace!("No query subscribers"),
        }
        Ok(())
    }
}

/// Errors reported by a query cache.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    /// The cache could not process the refresh
    #[error("query cache unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_refreshes() {
        let notifier = QueryNotifier::new(4);
        let mut rx = notifier.subscribe();

        let refresh = QueryRefresh::AfterSend {
            queries: vec![QueryId("todos".to_string())],
            on_complete_ids: vec![OnCompleteId("cb-1".to_string())],
        };
        notifier.invalidate_and_rerun(refresh.clone()).await.unwrap();
        notifier
            .invalidate_and_rerun(QueryRefresh::AfterReceive)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), refresh);
        assert_eq!(rx.recv().await.unwrap(), QueryRefresh::AfterReceive);
    }

    #[tokio::test]
    async fn no_subscribers_is_fine() {
        let notifier = QueryNotifier::default();
        assert!(notifier
            .invalidate_and_rerun(QueryRefresh::AfterReceive)
            .await
            .is_ok());
    }
}
