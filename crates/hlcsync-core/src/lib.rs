//! # hlcsync Core
//!
//! Timestamps, causal digest, and mutation model for the hlcsync write path.
//!
//! This crate provides:
//! - Hybrid Logical Clock timestamps with drift and overflow detection
//! - A Merkle trie digest over applied mutation timestamps for anti-entropy
//! - Field-level mutations resolved by Last-Writer-Wins
//! - The per-replica [`Clock`] record tying timestamp and digest together

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod crdt;
pub mod digest;
pub mod hlc;
pub mod mutation;
pub mod owner;

pub use clock::Clock;
pub use crdt::LwwRegister;
pub use digest::{DigestNode, DivergentRange};
pub use hlc::{ClockError, ClockGenerator, Timestamp, TimestampError};
pub use mutation::{
    stamp_batch, Batch, CellKey, EmptyBatchError, Mutation, NewMutation, StampedBatch, Value,
};
pub use owner::OwnerId;
