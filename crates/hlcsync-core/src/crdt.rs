//! Field-level Last-Writer-Wins register.

use crate::hlc::Timestamp;
use serde::{Deserialize, Serialize};

/// A Last-Writer-Wins register holding a value with a timestamp.
///
/// Writes only take effect when they carry a higher timestamp, so applying
/// the same set of writes in any order converges to the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    /// The stored value
    pub value: T,
    /// Timestamp of the last write
    pub timestamp: Timestamp,
}

impl<T> LwwRegister<T> {
    /// Create a new register with an initial value.
    #[must_use]
    pub fn new(value: T, timestamp: Timestamp) -> Self {
        Self { value, timestamp }
    }

    /// Update the register value if the new timestamp is higher.
    ///
    /// Returns `true` if the value was updated.
    pub fn set(&mut self, value: T, timestamp: Timestamp) -> bool {
        if timestamp > self.timestamp {
            self.value = value;
            self.timestamp = timestamp;
            true
        } else {
            false
        }
    }
}
