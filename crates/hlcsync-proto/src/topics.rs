//! MQTT topic scheme for sync exchanges.
//!
//! Topic structure: `hlcsync/v1/{owner}/sync/{request|response}`
//!
//! The owner segment is percent-encoded so identifiers containing MQTT
//! wildcards or separators cannot escape their subtree.

use hlcsync_core::OwnerId;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

/// Protocol version for topic scheme.
pub const PROTOCOL_VERSION: &str = "v1";

/// Characters escaped inside a topic segment.
const SEGMENT_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'#')
    .add(b'+')
    .add(b'/')
    .add(b'%');

/// Topic scheme configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicScheme {
    /// Topic prefix (default: "hlcsync")
    pub prefix: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            prefix: "hlcsync".to_string(),
        }
    }
}

impl TopicScheme {
    /// Create a topic scheme with a custom prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Build the base topic path.
    fn base(&self, owner: &OwnerId) -> String {
        format!(
            "{}/{}/{}",
            self.prefix,
            PROTOCOL_VERSION,
            utf8_percent_encode(owner.as_str(), SEGMENT_ESCAPE)
        )
    }

    /// Topic for sync requests.
    #[must_use]
    pub fn sync_request(&self, owner: &OwnerId) -> String {
        format!("{}/sync/request", self.base(owner))
    }

    /// Topic for sync responses.
    #[must_use]
    pub fn sync_response(&self, owner: &OwnerId) -> String {
        format!("{}/sync/response", self.base(owner))
    }

    /// Parse a topic to extract components.
    ///
    /// Returns `(owner, message_type)` if valid.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<(OwnerId, MessageType)> {
        let expected_prefix = format!("{}/{}/", self.prefix, PROTOCOL_VERSION);
        let remainder = topic.strip_prefix(&expected_prefix)?;

        let (owner, kind) = remainder.split_once('/')?;
        let msg_type = match kind {
            "sync/request" => MessageType::SyncRequest,
            "sync/response" => MessageType::SyncResponse,
            _ => return None,
        };
        let owner = percent_decode_str(owner).decode_utf8().ok()?;

        Some((OwnerId::new(owner), msg_type))
    }
}

/// Message types in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Mutations pushed to the peer
    SyncRequest,
    /// Peer answer
    SyncResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_generation() {
        let scheme = TopicScheme::default();
        let owner = OwnerId::new("owner-a");

        assert_eq!(
            scheme.sync_request(&owner),
            "hlcsync/v1/owner-a/sync/request"
        );
        assert_eq!(
            scheme.sync_response(&owner),
            "hlcsync/v1/owner-a/sync/response"
        );
    }

    #[test]
    fn topic_parsing() {
        let scheme = TopicScheme::default();

        let (owner, msg_type) = scheme.parse("hlcsync/v1/owner-a/sync/response").unwrap();
        assert_eq!(owner, OwnerId::new("owner-a"));
        assert_eq!(msg_type, MessageType::SyncResponse);

        assert!(scheme.parse("hlcsync/v1/owner-a/hello").is_none());
        assert!(scheme.parse("other/v1/owner-a/sync/request").is_none());
    }

    #[test]
    fn owner_with_wildcards_is_escaped() {
        let scheme = TopicScheme::new("tenant");
        let owner = OwnerId::new("a/b+#");

        let topic = scheme.sync_request(&owner);
        assert_eq!(topic, "tenant/v1/a%2Fb%2B%23/sync/request");

        let (parsed, msg_type) = scheme.parse(&topic).unwrap();
        assert_eq!(parsed, owner);
        assert_eq!(msg_type, MessageType::SyncRequest);
    }
}
