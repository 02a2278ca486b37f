//! Storage contracts for replica state.
//!
//! A replica owns two kinds of durable state: cells resolved by
//! last-writer-wins (plus the log of every mutation applied), and the single
//! [`Clock`] record. Both are only touched inside a [`Transaction`], so the
//! send pipeline can make a batch and its clock visible together or not at
//! all.

use crate::error::StoreError;
use hlcsync_core::{CellKey, Clock, LwwRegister, Mutation, Value};

/// Cell values and the mutation log.
pub trait RowStore {
    /// Current register for a cell, if it was ever written.
    ///
    /// # Errors
    ///
    /// Returns error if the read fails.
    fn read_value(&self, key: &CellKey) -> Result<Option<LwwRegister<Value>>, StoreError>;

    /// Replace the register for a cell.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn write_value(&mut self, key: &CellKey, register: &LwwRegister<Value>)
        -> Result<(), StoreError>;

    /// Append to the mutation log. Re-recording a known timestamp is a no-op.
    ///
    /// Returns `true` if the mutation was new.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn record_mutation(&mut self, mutation: &Mutation) -> Result<bool, StoreError>;

    /// Logged mutations with `millis >= since`, in timestamp order.
    ///
    /// # Errors
    ///
    /// Returns error if the read fails.
    fn mutations_since(&self, since: u64) -> Result<Vec<Mutation>, StoreError>;
}

/// The single clock record.
pub trait ClockStore {
    /// Read the clock; `None` if it was never seeded.
    ///
    /// # Errors
    ///
    /// Returns error if the read fails.
    fn read_clock(&self) -> Result<Option<Clock>, StoreError>;

    /// Overwrite the clock.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn write_clock(&mut self, clock: &Clock) -> Result<(), StoreError>;
}

/// A unit of work over replica state. Dropping it without [`Transaction::commit`]
/// discards every write made through it.
pub trait Transaction: RowStore + ClockStore {
    /// Make every write visible at once.
    ///
    /// # Errors
    ///
    /// Returns error if the commit fails; nothing is then visible.
    fn commit(self) -> Result<(), StoreError>;
}

/// A storage backend.
pub trait Storage: Send {
    /// Transaction type borrowed from the backend.
    type Transaction<'a>: Transaction
    where
        Self: 'a;

    /// Start a transaction. Only one may be open at a time.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot start one.
    fn begin(&mut self) -> Result<Self::Transaction<'_>, StoreError>;
}
