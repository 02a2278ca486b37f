//! Hybrid Logical Clock (HLC) timestamps for the write path.
//!
//! A [`Timestamp`] combines:
//! - Physical wall-clock time (milliseconds)
//! - A 16-bit logical counter for events within the same millisecond
//! - The replica's node ID for deterministic tiebreaking
//!
//! The [`ClockGenerator`] never reads the wall clock itself; callers pass the
//! current reading in, which keeps every transition deterministic.
//!
//! # References
//!
//! Kulkarni, Demirbas, et al. "Logical Physical Clocks and Consistent Snapshots
//! in Globally Distributed Databases" (2014)

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of the binary form: millis (8) + counter (2) + node ID (16).
pub const TIMESTAMP_BYTES: usize = 26;

/// Length of the encoded string form.
pub const TIMESTAMP_STRING_LEN: usize = 16 + 1 + 4 + 1 + 32;

/// Default tolerated distance between the wall clock and issued timestamps.
pub const DEFAULT_MAX_DRIFT_MS: u64 = 60_000;

/// A globally unique timestamp combining physical time, logical counter, and node ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Physical wall-clock time in milliseconds since UNIX epoch
    pub millis: u64,
    /// Logical counter for events at the same physical time
    pub counter: u16,
    /// Replica identifier, assigned once when the replica is created
    pub node_id: Uuid,
}

impl Timestamp {
    /// Create a timestamp from its parts.
    #[must_use]
    pub fn new(millis: u64, counter: u16, node_id: Uuid) -> Self {
        Self {
            millis,
            counter,
            node_id,
        }
    }

    /// The zero timestamp for a replica, used to seed a fresh clock.
    #[must_use]
    pub fn epoch(node_id: Uuid) -> Self {
        Self::new(0, 0, node_id)
    }

    /// Encode to the fixed-width, lexicographically sortable string form.
    ///
    /// The format is `{millis:016x}-{counter:04x}-{node_id:032x}`, so string
    /// comparison agrees with [`Ord`].
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{:016x}-{:04x}-{}",
            self.millis,
            self.counter,
            self.node_id.simple()
        )
    }

    /// Decode the string form produced by [`Timestamp::encode`].
    ///
    /// # Errors
    ///
    /// Returns error if the length, separators, or hex digits are wrong.
    pub fn decode(encoded: &str) -> Result<Self, TimestampError> {
        if encoded.len() != TIMESTAMP_STRING_LEN || !encoded.is_ascii() {
            return Err(TimestampError::InvalidLength {
                expected: TIMESTAMP_STRING_LEN,
                actual: encoded.len(),
            });
        }
        if &encoded[16..17] != "-" || &encoded[21..22] != "-" {
            return Err(TimestampError::InvalidFormat(encoded.to_string()));
        }

        let millis = parse_hex_u64(&encoded[0..16], encoded)?;
        let counter = u16::try_from(parse_hex_u64(&encoded[17..21], encoded)?)
            .map_err(|_| TimestampError::InvalidFormat(encoded.to_string()))?;
        let node_hex = &encoded[22..];
        if !node_hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(TimestampError::InvalidFormat(encoded.to_string()));
        }
        let node_id = Uuid::parse_str(node_hex)
            .map_err(|_| TimestampError::InvalidFormat(encoded.to_string()))?;

        Ok(Self {
            millis,
            counter,
            node_id,
        })
    }

    /// Serialize to bytes for wire transmission.
    ///
    /// Big-endian throughout, so byte order also matches [`Ord`].
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(TIMESTAMP_BYTES);
        bytes.extend_from_slice(&self.millis.to_be_bytes());
        bytes.extend_from_slice(&self.counter.to_be_bytes());
        bytes.extend_from_slice(self.node_id.as_bytes());
        bytes
    }

    /// Deserialize from bytes.
    ///
    /// # Errors
    ///
    /// Returns error unless exactly [`TIMESTAMP_BYTES`] bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TimestampError> {
        let wrong_length = || TimestampError::InvalidByteLength {
            expected: TIMESTAMP_BYTES,
            actual: bytes.len(),
        };
        if bytes.len() != TIMESTAMP_BYTES {
            return Err(wrong_length());
        }

        let millis = u64::from_be_bytes(bytes[0..8].try_into().map_err(|_| wrong_length())?);
        let counter = u16::from_be_bytes(bytes[8..10].try_into().map_err(|_| wrong_length())?);
        let node_id = Uuid::from_bytes(bytes[10..26].try_into().map_err(|_| wrong_length())?);

        Ok(Self {
            millis,
            counter,
            node_id,
        })
    }

    /// Wall-clock component as a UTC date, if it is representable.
    #[must_use]
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.millis).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

fn parse_hex_u64(digits: &str, whole: &str) -> Result<u64, TimestampError> {
    if !digits.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(TimestampError::InvalidFormat(whole.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| TimestampError::InvalidFormat(whole.to_string()))
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        // First compare physical time
        match self.millis.cmp(&other.millis) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Then logical counter
        match self.counter.cmp(&other.counter) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Finally node ID for deterministic tiebreaking
        self.node_id.cmp(&other.node_id)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Produces timestamps for local sends and merges remote ones.
///
/// Stateless: the previous timestamp and the wall-clock reading are inputs,
/// and the caller owns persisting the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockGenerator {
    max_drift_ms: u64,
}

impl Default for ClockGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DRIFT_MS)
    }
}

impl ClockGenerator {
    /// Create a generator tolerating `max_drift_ms` of clock skew.
    #[must_use]
    pub fn new(max_drift_ms: u64) -> Self {
        Self { max_drift_ms }
    }

    /// Maximum tolerated drift in milliseconds.
    #[must_use]
    pub fn max_drift_ms(&self) -> u64 {
        self.max_drift_ms
    }

    /// Generate the timestamp following `previous` for a local event.
    ///
    /// The result is strictly greater than `previous` and keeps its node ID.
    ///
    /// # Errors
    ///
    /// - [`ClockError::Drift`] if `previous` is more than `max_drift_ms`
    ///   ahead of `now`.
    /// - [`ClockError::CounterOverflow`] if the counter for this millisecond
    ///   is exhausted.
    pub fn next(&self, previous: &Timestamp, now: u64) -> Result<Timestamp, ClockError> {
        let millis = now.max(previous.millis);
        self.check_drift(millis, now)?;

        let counter = if millis == previous.millis {
            previous
                .counter
                .checked_add(1)
                .ok_or(ClockError::CounterOverflow { millis })?
        } else {
            0
        };

        Ok(Timestamp {
            millis,
            counter,
            node_id: previous.node_id,
        })
    }

    /// Advance the local clock past a timestamp received from a peer.
    ///
    /// # Errors
    ///
    /// - [`ClockError::DuplicateNode`] if the remote timestamp carries our node ID.
    /// - [`ClockError::Drift`] / [`ClockError::CounterOverflow`] as for [`ClockGenerator::next`].
    pub fn receive(
        &self,
        local: &Timestamp,
        remote: &Timestamp,
        now: u64,
    ) -> Result<Timestamp, ClockError> {
        if local.node_id == remote.node_id {
            return Err(ClockError::DuplicateNode {
                node_id: local.node_id,
            });
        }

        let millis = now.max(local.millis).max(remote.millis);
        self.check_drift(millis, now)?;

        let overflow = ClockError::CounterOverflow { millis };
        let counter = match (millis == local.millis, millis == remote.millis) {
            (true, true) => local
                .counter
                .max(remote.counter)
                .checked_add(1)
                .ok_or(overflow)?,
            (true, false) => local.counter.checked_add(1).ok_or(overflow)?,
            (false, true) => remote.counter.checked_add(1).ok_or(overflow)?,
            (false, false) => 0,
        };

        Ok(Timestamp {
            millis,
            counter,
            node_id: local.node_id,
        })
    }

    fn check_drift(&self, millis: u64, now: u64) -> Result<(), ClockError> {
        if millis - now > self.max_drift_ms {
            return Err(ClockError::Drift {
                next_millis: millis,
                now,
                max_drift_ms: self.max_drift_ms,
            });
        }
        Ok(())
    }
}

/// Errors that can occur with timestamp encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    /// Binary form has the wrong length
    #[error("invalid timestamp byte length: expected {expected}, got {actual}")]
    InvalidByteLength {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },
    /// Encoded string has the wrong length
    #[error("invalid timestamp length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected string length
        expected: usize,
        /// Actual string length
        actual: usize,
    },
    /// Encoded string is malformed
    #[error("invalid timestamp: {0}")]
    InvalidFormat(String),
}

/// Errors raised while generating timestamps.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// The wall clock lags too far behind causal history
    #[error("clock drift: next timestamp {next_millis}ms is more than {max_drift_ms}ms ahead of wall clock {now}ms")]
    Drift {
        /// Millis the next timestamp would carry
        next_millis: u64,
        /// Wall-clock reading
        now: u64,
        /// Configured tolerance
        max_drift_ms: u64,
    },
    /// More timestamps were requested within one millisecond than the counter holds
    #[error("timestamp counter overflow at {millis}ms")]
    CounterOverflow {
        /// The saturated millisecond
        millis: u64,
    },
    /// A peer sent a timestamp with this replica's node ID
    #[error("duplicate node id {node_id}")]
    DuplicateNode {
        /// The shared node ID
        node_id: Uuid,
    },
}
