//! The send pipeline: stamp, apply, persist, dispatch, requery.

use crate::applier::apply_mutations;
use crate::error::{SendError, StoreError};
use crate::query::{OnCompleteId, QueryId, QueryRefresh};
use crate::replica::Replica;
use crate::store::{ClockStore, Storage, Transaction};
use crate::time::TimeSource;
use hlcsync_core::{stamp_batch, Batch, Clock, ClockGenerator, Mutation};
use hlcsync_transport::SyncInput;
use std::fmt;

/// A step of [`Replica::send`]. Each runs only after the previous succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStage {
    /// Loading the clock
    ReadingClock,
    /// Timestamping the batch
    Stamping,
    /// Folding the batch into digest and rows
    Applying,
    /// Writing the new clock and committing
    PersistingClock,
    /// Handing the batch to the sync transport
    Syncing,
    /// Notifying the query cache
    Requerying,
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadingClock => "reading clock",
            Self::Stamping => "stamping",
            Self::Applying => "applying",
            Self::PersistingClock => "persisting clock",
            Self::Syncing => "syncing",
            Self::Requerying => "requerying",
        };
        f.write_str(name)
    }
}

impl<S: Storage> Replica<S> {
    /// Commit a batch of local writes and hand it to the sync transport.
    ///
    /// Every write in `batch` gets its own timestamp, strictly increasing in
    /// batch order and after every earlier local timestamp. The batch and the
    /// new clock are committed in a single transaction before anything is
    /// dispatched, so on any error up to and including
    /// [`SendStage::PersistingClock`] no write is visible. Afterwards the
    /// query cache is told to re-run `queries` and fire `on_complete_ids`.
    ///
    /// # Errors
    ///
    /// - [`SendError::Drift`] / [`SendError::CounterOverflow`] from stamping;
    ///   nothing was written and the call may be retried.
    /// - [`SendError::Unknown`] for storage, transport, or query failures;
    ///   see [`SendError::is_committed`].
    pub async fn send(
        &self,
        batch: Batch,
        on_complete_ids: Vec<OnCompleteId>,
        queries: Vec<QueryId>,
    ) -> Result<(), SendError> {
        let (clock, mutations) = {
            let mut storage = self.storage.lock().await;
            commit_batch(&mut *storage, &self.generator, self.time.as_ref(), &batch)?
        };

        tracing::debug!(
            count = mutations.len(),
            timestamp = %clock.timestamp,
            "Committed batch"
        );

        self.transport
            .dispatch(SyncInput {
                sync_url: self.sync_url.clone(),
                mutations,
                clock,
                owner: self.owner.clone(),
                previous_diff: None,
            })
            .map_err(SendError::unknown(SendStage::Syncing))?;

        self.queries
            .invalidate_and_rerun(QueryRefresh::AfterSend {
                queries,
                on_complete_ids,
            })
            .await
            .map_err(SendError::unknown(SendStage::Requerying))
    }
}

/// Steps up to and including `PersistingClock`, in one transaction.
fn commit_batch<S: Storage>(
    storage: &mut S,
    generator: &ClockGenerator,
    time: &dyn TimeSource,
    batch: &Batch,
) -> Result<(Clock, Vec<Mutation>), SendError> {
    let mut tx = storage
        .begin()
        .map_err(SendError::unknown(SendStage::ReadingClock))?;
    let clock = tx
        .read_clock()
        .and_then(|clock| clock.ok_or(StoreError::ClockNotInitialized))
        .map_err(SendError::unknown(SendStage::ReadingClock))?;

    let stamped = stamp_batch(generator, clock.timestamp, batch, || time.now_millis())?;

    let digest = apply_mutations(&mut tx, clock.digest, &stamped.mutations)
        .map_err(SendError::unknown(SendStage::Applying))?;

    let clock = Clock {
        timestamp: stamped.timestamp,
        digest,
    };
    tx.write_clock(&clock)
        .map_err(SendError::unknown(SendStage::PersistingClock))?;
    tx.commit()
        .map_err(SendError::unknown(SendStage::PersistingClock))?;

    Ok((clock, stamped.mutations))
}
