//! Causal digest: a Merkle trie over applied mutation timestamps.
//!
//! Timestamps are keyed by their minute (`millis / 60_000`) written as
//! [`KEY_DIGITS`] base-3 digits, most significant first. Each leaf holds the
//! set of timestamps that fall in its minute. Every node's hash is the XOR of
//! the hashes of all timestamps below it, so:
//!
//! - the root hash depends only on the *set* of timestamps, never on the
//!   order they were inserted in;
//! - a single differing mutation changes hashes along exactly one
//!   root-to-leaf path, and [`DigestNode::diff`] finds it by descending only
//!   into subtrees whose hashes disagree.
//!
//! ```text
//! root ── 0 ── 0 ── … ── 1 ── {t1, t2}
//!              └─ 2 ── … ── 0 ── {t3}
//! ```

use crate::hlc::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Depth of the trie. 3^31 minutes exceeds every `u64` millisecond value.
pub const KEY_DIGITS: usize = 31;

/// Width of one leaf bucket in milliseconds.
pub const MINUTE_MS: u64 = 60_000;

const RADIX: u8 = 3;

/// One node of the causal digest. The root node represents the whole history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestNode {
    hash: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    children: BTreeMap<u8, DigestNode>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    timestamps: BTreeSet<Timestamp>,
}

impl DigestNode {
    /// An empty digest. Its hash is zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate hash of this subtree.
    #[must_use]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Whether no timestamp has been inserted below this node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.timestamps.is_empty()
    }

    /// Number of timestamps tracked below this node.
    ///
    /// Pruned trees report zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len() + self.children.values().map(DigestNode::len).sum::<usize>()
    }

    /// Whether `timestamp` has been inserted.
    #[must_use]
    pub fn contains(&self, timestamp: &Timestamp) -> bool {
        let digits = minute_key(timestamp.millis);
        let mut node = self;
        for digit in digits {
            match node.children.get(&digit) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.timestamps.contains(timestamp)
    }

    /// Insert a mutation timestamp.
    ///
    /// Returns `true` if the timestamp was new. Re-inserting a present
    /// timestamp leaves the digest untouched.
    pub fn insert(&mut self, timestamp: &Timestamp) -> bool {
        let digits = minute_key(timestamp.millis);
        self.insert_at(&digits, timestamp, timestamp_hash(timestamp))
    }

    fn insert_at(&mut self, digits: &[u8], timestamp: &Timestamp, hash: u64) -> bool {
        let inserted = match digits.split_first() {
            None => self.timestamps.insert(*timestamp),
            Some((digit, rest)) => self
                .children
                .entry(*digit)
                .or_default()
                .insert_at(rest, timestamp, hash),
        };
        if inserted {
            self.hash ^= hash;
        }
        inserted
    }

    /// Copy of the tree without leaf membership, suitable for the wire.
    ///
    /// Hashes and shape are preserved, so [`DigestNode::diff`] against a
    /// pruned tree gives the same answer as against the full one.
    #[must_use]
    pub fn pruned(&self) -> Self {
        Self {
            hash: self.hash,
            children: self
                .children
                .iter()
                .map(|(digit, child)| (*digit, child.pruned()))
                .collect(),
            timestamps: BTreeSet::new(),
        }
    }

    /// Find the time ranges where `self` and `other` disagree.
    ///
    /// Only subtrees with differing hashes are visited. A subtree present on
    /// one side only is reported as a single range without descending
    /// further. Ranges are returned in ascending time order.
    #[must_use]
    pub fn diff(&self, other: &DigestNode) -> Vec<DivergentRange> {
        let mut ranges = Vec::new();
        let mut prefix = Vec::with_capacity(KEY_DIGITS);
        diff_nodes(Some(self), Some(other), &mut prefix, &mut ranges);
        ranges
    }

    /// Start of the earliest divergence, in milliseconds.
    #[must_use]
    pub fn first_divergence(&self, other: &DigestNode) -> Option<u64> {
        self.diff(other).first().map(|range| range.start_millis)
    }
}

fn diff_nodes(
    a: Option<&DigestNode>,
    b: Option<&DigestNode>,
    prefix: &mut Vec<u8>,
    out: &mut Vec<DivergentRange>,
) {
    match (a, b) {
        (None, None) => {}
        (Some(a), Some(b)) if a.hash == b.hash => {}
        (Some(a), Some(b)) if prefix.len() < KEY_DIGITS => {
            for digit in 0..RADIX {
                prefix.push(digit);
                diff_nodes(a.children.get(&digit), b.children.get(&digit), prefix, out);
                prefix.pop();
            }
        }
        _ => out.push(DivergentRange::from_prefix(prefix)),
    }
}

/// A span of time, addressed by a digest key prefix, where two digests disagree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DivergentRange {
    /// Base-3 key prefix, one `'0'..='2'` character per trie level
    pub prefix: String,
    /// First millisecond covered (inclusive)
    pub start_millis: u64,
    /// End of the range (exclusive), saturating at `u64::MAX`
    pub end_millis: u64,
}

impl DivergentRange {
    fn from_prefix(digits: &[u8]) -> Self {
        let mut prefix = String::with_capacity(digits.len());
        let mut start_minute: u128 = 0;
        for digit in digits {
            prefix.push(char::from(b'0' + digit));
            start_minute = start_minute * u128::from(RADIX) + u128::from(*digit);
        }

        let remaining = u32::try_from(KEY_DIGITS - digits.len()).unwrap_or(0);
        let span = u128::from(RADIX).pow(remaining);
        let to_millis =
            |minute: u128| u64::try_from(minute * u128::from(MINUTE_MS)).unwrap_or(u64::MAX);

        Self {
            prefix,
            start_millis: to_millis(start_minute * span),
            end_millis: to_millis((start_minute + 1) * span),
        }
    }

    /// Whether `timestamp` falls inside this range.
    #[must_use]
    pub fn contains(&self, timestamp: &Timestamp) -> bool {
        (self.start_millis..self.end_millis).contains(&timestamp.millis)
    }
}

/// Digest key of a millisecond value: its minute in base 3, fixed width.
fn minute_key(millis: u64) -> [u8; KEY_DIGITS] {
    let mut minutes = millis / MINUTE_MS;
    let mut digits = [0u8; KEY_DIGITS];
    for slot in digits.iter_mut().rev() {
        // remainder is always < RADIX
        *slot = u8::try_from(minutes % u64::from(RADIX)).unwrap_or(0);
        minutes /= u64::from(RADIX);
    }
    digits
}

/// Leaf hash: the first 8 bytes of `blake3(encoded timestamp)`.
fn timestamp_hash(timestamp: &Timestamp) -> u64 {
    let digest = blake3::hash(timestamp.encode().as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(head)
}
