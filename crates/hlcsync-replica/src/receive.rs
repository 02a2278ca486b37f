//! The receive path: merge a peer's answer and push back what it lacks.

use crate::applier::apply_mutations;
use crate::error::{ReceiveError, StoreError};
use crate::query::QueryRefresh;
use crate::replica::Replica;
use crate::store::{ClockStore, RowStore, Storage, Transaction};
use crate::time::TimeSource;
use hlcsync_core::{Clock, ClockGenerator, DivergentRange, Mutation};
use hlcsync_transport::{ReceivedSync, SyncInput};
use std::collections::BTreeMap;

/// How the local digest compares to the peer's after merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Divergence {
    /// Digests match
    None,
    /// Local mutations from this range were sent to the peer
    Requested(DivergentRange),
    /// The peer still differs on the range we already sent; not retried
    Stalled(DivergentRange),
}

/// Result of [`Replica::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Remote mutations that were new to this replica
    pub applied: usize,
    /// Digest comparison after merging
    pub divergence: Divergence,
}

struct Merged {
    clock: Clock,
    applied: usize,
    diff: Option<DivergentRange>,
    pending: Vec<Mutation>,
}

impl<S: Storage> Replica<S> {
    /// Merge a peer's answer into this replica.
    ///
    /// Mutations not yet in the local digest are applied and the clock is
    /// advanced past their timestamps, all in one transaction. The digests
    /// are then compared: if they still disagree, every local mutation from
    /// the start of the first divergent range is sent back with that range
    /// as the hint. If the peer answers with the same divergence again the
    /// exchange stops there instead of looping.
    ///
    /// # Errors
    ///
    /// - [`ReceiveError::Clock`] if a remote timestamp carries this node's
    ///   ID, drifts too far, or overflows the counter; nothing was written.
    /// - [`ReceiveError::Unknown`] for storage, transport, or query failures.
    pub async fn receive(&self, received: ReceivedSync) -> Result<ReceiveOutcome, ReceiveError> {
        let merged = {
            let mut storage = self.storage.lock().await;
            merge_remote(&mut *storage, &self.generator, self.time.as_ref(), &received)?
        };

        let divergence = match merged.diff {
            None => Divergence::None,
            Some(range) if received.previous_diff.as_ref() == Some(&range) => {
                tracing::warn!(
                    prefix = %range.prefix,
                    start_millis = range.start_millis,
                    "Sync made no progress on divergent range"
                );
                Divergence::Stalled(range)
            }
            Some(range) => {
                tracing::debug!(
                    prefix = %range.prefix,
                    start_millis = range.start_millis,
                    pending = merged.pending.len(),
                    "Digests diverge, pushing local mutations"
                );
                self.transport.dispatch(SyncInput {
                    sync_url: self.sync_url.clone(),
                    mutations: merged.pending,
                    clock: merged.clock,
                    owner: self.owner.clone(),
                    previous_diff: Some(range.clone()),
                })?;
                Divergence::Requested(range)
            }
        };

        if merged.applied > 0 {
            self.queries
                .invalidate_and_rerun(QueryRefresh::AfterReceive)
                .await?;
        }

        Ok(ReceiveOutcome {
            applied: merged.applied,
            divergence,
        })
    }
}

fn merge_remote<S: Storage>(
    storage: &mut S,
    generator: &ClockGenerator,
    time: &dyn TimeSource,
    received: &ReceivedSync,
) -> Result<Merged, ReceiveError> {
    let mut tx = storage.begin()?;
    let clock = tx.read_clock()?.ok_or(StoreError::ClockNotInitialized)?;

    // A response may repeat a mutation; each timestamp is merged once.
    let fresh: Vec<Mutation> = received
        .mutations
        .iter()
        .filter(|m| !clock.digest.contains(&m.timestamp))
        .map(|m| (m.timestamp, m.clone()))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect();

    let clock = if fresh.is_empty() {
        clock
    } else {
        let mut timestamp = clock.timestamp;
        for mutation in &fresh {
            timestamp = generator.receive(&timestamp, &mutation.timestamp, time.now_millis())?;
        }
        let digest = apply_mutations(&mut tx, clock.digest, &fresh)?;
        let clock = Clock { timestamp, digest };
        tx.write_clock(&clock)?;
        clock
    };

    let diff = clock.digest.diff(&received.digest).into_iter().next();
    let pending = match &diff {
        Some(range) => tx.mutations_since(range.start_millis)?,
        None => Vec::new(),
    };
    tx.commit()?;

    tracing::debug!(
        received = received.mutations.len(),
        applied = fresh.len(),
        timestamp = %clock.timestamp,
        "Merged sync response"
    );

    Ok(Merged {
        clock,
        applied: fresh.len(),
        diff,
        pending,
    })
}
