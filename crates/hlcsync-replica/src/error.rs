//! Error types for the replica.

use crate::query::QueryError;
use crate::send::SendStage;
use hlcsync_core::ClockError;
use hlcsync_proto::MessageError;
use hlcsync_transport::TransportError;

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No clock has been seeded for this replica
    #[error("clock not initialized")]
    ClockNotInitialized,
    /// `SQLite` failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// A stored blob could not be encoded or decoded
    #[error("encoding error: {0}")]
    Encoding(String),
    /// Failure injected by a test store
    #[error("injected fault: {0}")]
    Injected(String),
}

impl From<MessageError> for StoreError {
    fn from(err: MessageError) -> Self {
        Self::Encoding(err.to_string())
    }
}

/// An underlying failure the write path does not interpret.
#[derive(Debug, thiserror::Error)]
pub enum UnknownError {
    /// Storage failed
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The sync transport refused the exchange
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The query cache failed
    #[error(transparent)]
    Query(#[from] QueryError),
    /// A clock failure that is not a drift or overflow
    #[error(transparent)]
    Clock(ClockError),
}

/// Errors returned by [`crate::Replica::send`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The wall clock lags too far behind causal history. Nothing was written.
    #[error("clock drift: next timestamp {next_millis}ms is more than {max_drift_ms}ms ahead of wall clock {now}ms")]
    Drift {
        /// Millis the next timestamp would carry
        next_millis: u64,
        /// Wall-clock reading
        now: u64,
        /// Configured tolerance
        max_drift_ms: u64,
    },
    /// Too many timestamps in one millisecond. Nothing was written.
    #[error("timestamp counter overflow at {millis}ms")]
    CounterOverflow {
        /// The saturated millisecond
        millis: u64,
    },
    /// A collaborator failed at `stage`.
    ///
    /// Failures before [`SendStage::Syncing`] leave local state untouched;
    /// from `Syncing` on, the batch is already committed.
    #[error("send failed while {stage}: {source}")]
    Unknown {
        /// Stage that failed
        stage: SendStage,
        /// Underlying failure
        #[source]
        source: UnknownError,
    },
}

impl SendError {
    pub(crate) fn unknown<E: Into<UnknownError>>(stage: SendStage) -> impl FnOnce(E) -> Self {
        move |err| Self::Unknown {
            stage,
            source: err.into(),
        }
    }

    /// Whether the batch was committed locally before the failure.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            Self::Unknown {
                stage: SendStage::Syncing | SendStage::Requerying,
                ..
            }
        )
    }
}

impl From<ClockError> for SendError {
    fn from(err: ClockError) -> Self {
        match err {
            ClockError::Drift {
                next_millis,
                now,
                max_drift_ms,
            } => Self::Drift {
                next_millis,
                now,
                max_drift_ms,
            },
            ClockError::CounterOverflow { millis } => Self::CounterOverflow { millis },
            other @ ClockError::DuplicateNode { .. } => Self::Unknown {
                stage: SendStage::Stamping,
                source: UnknownError::Clock(other),
            },
        }
    }
}

/// Errors returned by [`crate::Replica::receive`].
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    /// A remote timestamp could not be merged into the local clock.
    /// Nothing was written.
    #[error(transparent)]
    Clock(#[from] ClockError),
    /// A collaborator failed
    #[error(transparent)]
    Unknown(#[from] UnknownError),
}

impl From<StoreError> for ReceiveError {
    fn from(err: StoreError) -> Self {
        Self::Unknown(err.into())
    }
}

impl From<TransportError> for ReceiveError {
    fn from(err: TransportError) -> Self {
        Self::Unknown(err.into())
    }
}

impl From<QueryError> for ReceiveError {
    fn from(err: QueryError) -> Self {
        Self::Unknown(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn clock_errors_map_to_send_errors() {
        let drift = SendError::from(ClockError::Drift {
            next_millis: 200_000,
            now: 100_000,
            max_drift_ms: 60_000,
        });
        assert!(matches!(drift, SendError::Drift { now: 100_000, .. }));
        assert!(!drift.is_committed());

        let overflow = SendError::from(ClockError::CounterOverflow { millis: 7 });
        assert!(matches!(overflow, SendError::CounterOverflow { millis: 7 }));

        let duplicate = SendError::from(ClockError::DuplicateNode {
            node_id: Uuid::nil(),
        });
        assert!(matches!(
            duplicate,
            SendError::Unknown {
                stage: SendStage::Stamping,
                source: UnknownError::Clock(_)
            }
        ));
    }

    #[test]
    fn committed_only_after_persisting() {
        let failed_at = |stage| SendError::Unknown {
            stage,
            source: StoreError::ClockNotInitialized.into(),
        };
        assert!(!failed_at(SendStage::ReadingClock).is_committed());
        assert!(!failed_at(SendStage::PersistingClock).is_committed());
        assert!(failed_at(SendStage::Syncing).is_committed());
        assert!(failed_at(SendStage::Requerying).is_committed());
    }
}
