//! In-memory replica storage.

use crate::error::StoreError;
use crate::store::{ClockStore, RowStore, Storage, Transaction};
use hlcsync_core::{CellKey, Clock, LwwRegister, Mutation, Timestamp, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    clock: Option<Clock>,
    cells: BTreeMap<CellKey, LwwRegister<Value>>,
    log: BTreeMap<Timestamp, Mutation>,
}

/// In-memory store for tests and ephemeral replicas.
///
/// A transaction works on a copy of the state that replaces the original on
/// commit. Clock writes can be made to fail to exercise the rollback path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: MemoryState,
    fail_clock_writes: bool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent clock write fail (or succeed again).
    pub fn set_fail_clock_writes(&mut self, fail: bool) {
        self.fail_clock_writes = fail;
    }
}

impl Storage for MemoryStore {
    type Transaction<'a> = MemoryTransaction<'a>;

    fn begin(&mut self) -> Result<MemoryTransaction<'_>, StoreError> {
        let staged = self.state.clone();
        Ok(MemoryTransaction {
            store: self,
            staged,
        })
    }
}

/// A staged copy of [`MemoryStore`] state.
pub struct MemoryTransaction<'a> {
    store: &'a mut MemoryStore,
    staged: MemoryState,
}

impl RowStore for MemoryTransaction<'_> {
    fn read_value(&self, key: &CellKey) -> Result<Option<LwwRegister<Value>>, StoreError> {
        Ok(self.staged.cells.get(key).cloned())
    }

    fn write_value(
        &mut self,
        key: &CellKey,
        register: &LwwRegister<Value>,
    ) -> Result<(), StoreError> {
        self.staged.cells.insert(key.clone(), register.clone());
        Ok(())
    }

    fn record_mutation(&mut self, mutation: &Mutation) -> Result<bool, StoreError> {
        if self.staged.log.contains_key(&mutation.timestamp) {
            return Ok(false);
        }
        self.staged
            .log
            .insert(mutation.timestamp, mutation.clone());
        Ok(true)
    }

    fn mutations_since(&self, since: u64) -> Result<Vec<Mutation>, StoreError> {
        Ok(self
            .staged
            .log
            .values()
            .filter(|m| m.timestamp.millis >= since)
            .cloned()
            .collect())
    }
}

impl ClockStore for MemoryTransaction<'_> {
    fn read_clock(&self) -> Result<Option<Clock>, StoreError> {
        Ok(self.staged.clock.clone())
    }

    fn write_clock(&mut self, clock: &Clock) -> Result<(), StoreError> {
        if self.store.fail_clock_writes {
            return Err(StoreError::Injected("clock write refused".to_string()));
        }
        self.staged.clock = Some(clock.clone());
        Ok(())
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn commit(self) -> Result<(), StoreError> {
        self.store.state = self.staged;
        Ok(())
    }
}
