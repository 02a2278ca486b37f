//! # hlcsync Transport
//!
//! Hands stamped mutations to a sync peer without blocking the write path.
//!
//! - [`SyncQueue`]: the [`SyncTransport`] the replica dispatches into; a
//!   bounded channel, so dispatch never waits on the network
//! - [`SyncWorker`]: drains the queue, talks to a [`SyncBackend`], and
//!   forwards peer responses as [`ReceivedSync`]
//! - [`HttpBackend`]: protobuf over `POST {sync_url}`
//! - [`MqttBackend`]: protobuf published under the owner's topic

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod http;
pub mod mqtt;
pub mod queue;
pub mod worker;

pub use error::TransportError;
pub use http::{HttpBackend, HttpBackendConfig};
pub use mqtt::{pump_responses, MqttBackend};
pub use queue::{sync_queue, DisabledTransport, SyncInput, SyncQueue, SyncTransport};
pub use worker::{ReceivedSync, SyncBackend, SyncWorker};
