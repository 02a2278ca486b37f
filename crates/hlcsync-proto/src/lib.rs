//! # hlcsync Protocol
//!
//! Wire protocol definitions and MQTT topic scheme for pushing mutations to a
//! sync peer.
//!
//! ## Messages
//!
//! - `SyncRequest`: stamped mutations, owner and node identity, pruned digest,
//!   and an optional divergence hint
//! - `SyncResponse`: mutations the peer thinks we lack, plus its digest
//!
//! The envelope is protobuf; cell values and digests inside it are CBOR.
//!
//! ## MQTT Topics
//!
//! Topic scheme: `hlcsync/v1/{owner}/sync/{request|response}`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cbor;
pub mod messages;
pub mod topics;

pub use messages::{MessageError, SyncRequest, SyncResponse, WireMutation, WireRange};
pub use topics::{MessageType, TopicScheme};
