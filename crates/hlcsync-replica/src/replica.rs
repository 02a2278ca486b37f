//! The replica handle and its builder.

use crate::error::{StoreError, UnknownError};
use crate::query::{QueryCache, QueryNotifier};
use crate::store::{ClockStore, RowStore, Storage, Transaction};
use crate::time::{SystemClock, TimeSource};
use hlcsync_core::{CellKey, Clock, ClockGenerator, LwwRegister, OwnerId, Value};
use hlcsync_transport::{DisabledTransport, ReceivedSync, SyncInput, SyncTransport};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// One replica of an owner's data.
///
/// The storage lock serializes every operation that reads and advances the
/// clock, so two sends on the same replica can never stamp from the same
/// previous timestamp.
pub struct Replica<S> {
    pub(crate) storage: Mutex<S>,
    pub(crate) generator: ClockGenerator,
    pub(crate) time: Arc<dyn TimeSource>,
    pub(crate) transport: Arc<dyn SyncTransport>,
    pub(crate) queries: Arc<dyn QueryCache>,
    pub(crate) owner: OwnerId,
    pub(crate) sync_url: String,
    node_id: Uuid,
}

impl<S: Storage> Replica<S> {
    /// Start building a replica over `storage`.
    #[must_use]
    pub fn builder(storage: S) -> ReplicaBuilder<S> {
        ReplicaBuilder::new(storage)
    }

    /// This replica's node ID.
    #[must_use]
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Owner whose data this replica holds.
    #[must_use]
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// The persisted clock.
    ///
    /// # Errors
    ///
    /// Returns error if the clock cannot be read.
    pub async fn clock(&self) -> Result<Clock, StoreError> {
        let mut storage = self.storage.lock().await;
        let tx = storage.begin()?;
        let clock = tx.read_clock()?;
        clock.ok_or(StoreError::ClockNotInitialized)
    }

    /// Current register of a cell.
    ///
    /// # Errors
    ///
    /// Returns error if the read fails.
    pub async fn value(&self, key: &CellKey) -> Result<Option<LwwRegister<Value>>, StoreError> {
        let mut storage = self.storage.lock().await;
        let tx = storage.begin()?;
        let register = tx.read_value(key)?;
        Ok(register)
    }

    /// Run `f` with exclusive access to the storage backend.
    pub async fn with_storage<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut storage = self.storage.lock().await;
        f(&mut storage)
    }

    /// Dispatch the persisted clock with no mutations.
    ///
    /// This is how a replica that committed a batch but failed to hand it to
    /// the transport (or crashed before doing so) catches up: the peer
    /// compares digests and asks for whatever it is missing.
    ///
    /// # Errors
    ///
    /// Returns error if the clock cannot be read or the transport refuses.
    pub async fn resync(&self) -> Result<(), UnknownError> {
        let clock = self.clock().await?;
        tracing::info!(
            timestamp = %clock.timestamp,
            digest = format_args!("{:016x}", clock.digest.hash()),
            "Resyncing"
        );
        self.transport.dispatch(SyncInput {
            sync_url: self.sync_url.clone(),
            mutations: Vec::new(),
            clock,
            owner: self.owner.clone(),
            previous_diff: None,
        })?;
        Ok(())
    }

    /// Apply peer responses until the channel closes.
    pub async fn process_responses(&self, mut responses: mpsc::Receiver<ReceivedSync>) {
        while let Some(received) = responses.recv().await {
            match self.receive(received).await {
                Ok(outcome) => tracing::debug!(?outcome, "Processed sync response"),
                Err(e) => tracing::warn!(error = %e, "Failed to process sync response"),
            }
        }
    }
}

/// Configures and opens a [`Replica`].
pub struct ReplicaBuilder<S> {
    storage: S,
    node_id: Option<Uuid>,
    owner: OwnerId,
    sync_url: String,
    generator: ClockGenerator,
    time: Arc<dyn TimeSource>,
    transport: Arc<dyn SyncTransport>,
    queries: Arc<dyn QueryCache>,
}

impl<S: Storage> ReplicaBuilder<S> {
    /// Defaults: random node ID, owner `default`, system clock, sync
    /// disabled, and a [`QueryNotifier`] with no subscribers.
    #[must_use]
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            node_id: None,
            owner: OwnerId::new("default"),
            sync_url: String::new(),
            generator: ClockGenerator::default(),
            time: Arc::new(SystemClock),
            transport: Arc::new(DisabledTransport),
            queries: Arc::new(QueryNotifier::default()),
        }
    }

    /// Node ID to seed a fresh store with. Ignored if the store already has a clock.
    #[must_use]
    pub fn node_id(mut self, node_id: Uuid) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Owner identity passed through to the transport.
    #[must_use]
    pub fn owner(mut self, owner: OwnerId) -> Self {
        self.owner = owner;
        self
    }

    /// Sync peer endpoint.
    #[must_use]
    pub fn sync_url(mut self, sync_url: impl Into<String>) -> Self {
        self.sync_url = sync_url.into();
        self
    }

    /// Maximum tolerated clock drift.
    #[must_use]
    pub fn max_drift_ms(mut self, max_drift_ms: u64) -> Self {
        self.generator = ClockGenerator::new(max_drift_ms);
        self
    }

    /// Wall-clock source.
    #[must_use]
    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Sync transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Query cache notified after writes.
    #[must_use]
    pub fn query_cache(mut self, queries: Arc<dyn QueryCache>) -> Self {
        self.queries = queries;
        self
    }

    /// Open the replica, seeding the clock if the store has none.
    ///
    /// # Errors
    ///
    /// Returns error if the clock cannot be read or seeded.
    pub fn open(mut self) -> Result<Replica<S>, StoreError> {
        let node_id = seed_clock(&mut self.storage, self.node_id)?;

        tracing::info!(%node_id, owner = %self.owner, "Replica opened");

        Ok(Replica {
            storage: Mutex::new(self.storage),
            generator: self.generator,
            time: self.time,
            transport: self.transport,
            queries: self.queries,
            owner: self.owner,
            sync_url: self.sync_url,
            node_id,
        })
    }
}

fn seed_clock<S: Storage>(storage: &mut S, requested: Option<Uuid>) -> Result<Uuid, StoreError> {
    let mut tx = storage.begin()?;
    if let Some(clock) = tx.read_clock()? {
        let node_id = clock.node_id();
        if let Some(requested) = requested {
            if requested != node_id {
                tracing::warn!(
                    %requested,
                    stored = %node_id,
                    "Store already has a node ID, ignoring configured one"
                );
            }
        }
        return Ok(node_id);
    }

    let node_id = requested.unwrap_or_else(Uuid::new_v4);
    tx.write_clock(&Clock::seed(node_id))?;
    tx.commit()?;
    tracing::info!(%node_id, "Seeded replica clock");
    Ok(node_id)
}
