//! Mutations: field-level writes to `(table, row, column)` cells.
//!
//! A [`NewMutation`] is what the caller asks for; stamping it with a
//! [`Timestamp`] turns it into a [`Mutation`], the permanent unit of CRDT
//! state. Cells resolve by last-writer-wins over those timestamps.

use crate::hlc::{ClockError, ClockGenerator, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL
    Null,
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Real(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Blob(Vec<u8>),
}

impl Value {
    /// Convert a JSON scalar into a value.
    ///
    /// Arrays and objects are stored as their JSON text.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Integer)
                .or_else(|| n.as_f64().map(Value::Real))
                .unwrap_or_else(|| Value::Text(n.to_string())),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }

    /// Render as JSON. Blobs become arrays of byte values.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Real(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::from(s.as_str()),
            Value::Blob(b) => serde_json::Value::from(b.clone()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

/// Address of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    /// Table name
    pub table: String,
    /// Row identifier
    pub row: String,
    /// Column name
    pub column: String,
}

impl CellKey {
    /// Create a new cell key.
    #[must_use]
    pub fn new(table: impl Into<String>, row: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            row: row.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.table, self.row, self.column)
    }
}

/// A pending write that has not been timestamped yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMutation {
    /// Target cell
    pub key: CellKey,
    /// Value to write
    pub value: Value,
}

impl NewMutation {
    /// Create a pending write.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            key: CellKey::new(table, row, column),
            value: value.into(),
        }
    }

    /// Attach a timestamp.
    #[must_use]
    pub fn stamp(self, timestamp: Timestamp) -> Mutation {
        Mutation {
            timestamp,
            key: self.key,
            value: self.value,
        }
    }
}

/// A timestamped write: the unit of replicated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// When the write happened
    pub timestamp: Timestamp,
    /// Target cell
    pub key: CellKey,
    /// Written value
    pub value: Value,
}

/// A non-empty, ordered batch of pending writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch(Vec<NewMutation>);

impl Batch {
    /// Start a batch with its first write.
    #[must_use]
    pub fn new(first: NewMutation) -> Self {
        Self(vec![first])
    }

    /// Append a write.
    pub fn push(&mut self, mutation: NewMutation) {
        self.0.push(mutation);
    }

    /// Number of writes. Always at least one.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; present for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterate in batch order.
    pub fn iter(&self) -> std::slice::Iter<'_, NewMutation> {
        self.0.iter()
    }
}

impl TryFrom<Vec<NewMutation>> for Batch {
    type Error = EmptyBatchError;

    fn try_from(mutations: Vec<NewMutation>) -> Result<Self, Self::Error> {
        if mutations.is_empty() {
            Err(EmptyBatchError)
        } else {
            Ok(Self(mutations))
        }
    }
}

impl IntoIterator for Batch {
    type Item = NewMutation;
    type IntoIter = std::vec::IntoIter<NewMutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A batch must hold at least one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("mutation batch is empty")]
pub struct EmptyBatchError;

/// Output of [`stamp_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct StampedBatch {
    /// The batch, timestamped in order
    pub mutations: Vec<Mutation>,
    /// Timestamp of the last mutation; the new local clock value
    pub timestamp: Timestamp,
}

/// Timestamp every write of `batch` in order, starting after `previous`.
///
/// `now` is read once per write. Either the whole batch is stamped or an
/// error is returned and nothing is.
///
/// # Errors
///
/// Propagates [`ClockError`] from [`ClockGenerator::next`].
pub fn stamp_batch(
    generator: &ClockGenerator,
    previous: Timestamp,
    batch: &Batch,
    mut now: impl FnMut() -> u64,
) -> Result<StampedBatch, ClockError> {
    let mut timestamp = previous;
    let mut mutations = Vec::with_capacity(batch.len());

    for pending in batch.iter() {
        timestamp = generator.next(&timestamp, now())?;
        mutations.push(pending.clone().stamp(timestamp));
    }

    tracing::trace!(
        count = mutations.len(),
        last = %timestamp,
        "Stamped mutation batch"
    );

    Ok(StampedBatch {
        mutations,
        timestamp,
    })
}
