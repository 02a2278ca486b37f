//! # hlcsync Replica
//!
//! The per-replica runtime: durable state, the send pipeline that stamps and
//! commits local writes, and the receive path that merges what a sync peer
//! sends back.
//!
//! ## Send pipeline
//!
//! ```text
//! ReadingClock → Stamping → Applying → PersistingClock → Syncing → Requerying
//! ```
//!
//! The first four stages run inside one storage transaction while the
//! replica's lock is held, so a batch is either fully committed or not
//! visible at all. Dispatch to the sync transport happens only after the
//! clock is durable.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod applier;
pub mod config;
pub mod error;
pub mod memory;
pub mod persistence;
pub mod query;
pub mod receive;
pub mod replica;
pub mod runtime;
pub mod send;
pub mod store;
pub mod time;

pub use applier::apply_mutations;
pub use config::{PersistenceConfig, ReplicaConfig, StoreKind, SyncConfig, TransportKind};
pub use error::{ReceiveError, SendError, StoreError, UnknownError};
pub use memory::MemoryStore;
pub use persistence::SqliteStore;
pub use query::{OnCompleteId, QueryCache, QueryError, QueryId, QueryNotifier, QueryRefresh};
pub use receive::{Divergence, ReceiveOutcome};
pub use replica::{Replica, ReplicaBuilder};
pub use runtime::{start_sync, SyncHandle};
pub use send::SendStage;
pub use store::{ClockStore, RowStore, Storage, Transaction};
pub use time::{ManualClock, SystemClock, TimeSource};
