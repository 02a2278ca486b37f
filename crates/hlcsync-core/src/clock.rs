//! The per-replica clock record.

use crate::digest::DigestNode;
use crate::hlc::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Last issued or observed timestamp together with the causal digest.
///
/// This is the only mutable durable state the write path owns. It is read at
/// the start of every send and written once at the end, as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    /// Last timestamp issued or observed locally
    pub timestamp: Timestamp,
    /// Root of the causal digest over every applied mutation
    pub digest: DigestNode,
}

impl Clock {
    /// The clock of a freshly created replica.
    #[must_use]
    pub fn seed(node_id: Uuid) -> Self {
        Self {
            timestamp: Timestamp::epoch(node_id),
            digest: DigestNode::new(),
        }
    }

    /// Node ID of the owning replica.
    #[must_use]
    pub fn node_id(&self) -> Uuid {
        self.timestamp.node_id
    }
}
