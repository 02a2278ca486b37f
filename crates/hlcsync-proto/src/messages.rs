//! Protocol messages for pushing mutations to a sync peer.

use crate::cbor::{from_cbor, to_cbor};
use hlcsync_core::{CellKey, Clock, DigestNode, DivergentRange, Mutation, OwnerId, Timestamp};
use prost::Message;

/// A mutation on the wire.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WireMutation {
    /// Encoded timestamp string
    #[prost(string, tag = "1")]
    pub timestamp: String,
    /// Table name
    #[prost(string, tag = "2")]
    pub table: String,
    /// Row identifier
    #[prost(string, tag = "3")]
    pub row: String,
    /// Column name
    #[prost(string, tag = "4")]
    pub column: String,
    /// CBOR-encoded cell value
    #[prost(bytes = "vec", tag = "5")]
    pub value: Vec<u8>,
}

impl WireMutation {
    /// Encode a mutation.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    pub fn from_mutation(mutation: &Mutation) -> Result<Self, MessageError> {
        Ok(Self {
            timestamp: mutation.timestamp.encode(),
            table: mutation.key.table.clone(),
            row: mutation.key.row.clone(),
            column: mutation.key.column.clone(),
            value: to_cbor(&mutation.value)?,
        })
    }

    /// Decode back into a mutation.
    ///
    /// # Errors
    ///
    /// Returns error if the timestamp or value is malformed.
    pub fn into_mutation(self) -> Result<Mutation, MessageError> {
        let timestamp = Timestamp::decode(&self.timestamp)
            .map_err(|e| MessageError::Deserialize(e.to_string()))?;
        Ok(Mutation {
            timestamp,
            key: CellKey::new(self.table, self.row, self.column),
            value: from_cbor(&self.value)?,
        })
    }
}

/// A divergence hint on the wire.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WireRange {
    /// Base-3 digest key prefix
    #[prost(string, tag = "1")]
    pub prefix: String,
    /// First millisecond covered
    #[prost(uint64, tag = "2")]
    pub start_millis: u64,
    /// End of the range (exclusive)
    #[prost(uint64, tag = "3")]
    pub end_millis: u64,
}

impl From<&DivergentRange> for WireRange {
    fn from(range: &DivergentRange) -> Self {
        Self {
            prefix: range.prefix.clone(),
            start_millis: range.start_millis,
            end_millis: range.end_millis,
        }
    }
}

impl From<WireRange> for DivergentRange {
    fn from(range: WireRange) -> Self {
        Self {
            prefix: range.prefix,
            start_millis: range.start_millis,
            end_millis: range.end_millis,
        }
    }
}

/// Push of local mutations to the sync peer.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SyncRequest {
    /// Mutations being pushed, possibly none
    #[prost(message, repeated, tag = "1")]
    pub mutations: Vec<WireMutation>,
    /// Owner whose data this is
    #[prost(string, tag = "2")]
    pub owner_id: String,
    /// Sending replica
    #[prost(string, tag = "3")]
    pub node_id: String,
    /// CBOR-encoded pruned digest
    #[prost(bytes = "vec", tag = "4")]
    pub digest: Vec<u8>,
    /// Range the previous exchange found divergent, if any
    #[prost(message, optional, tag = "5")]
    pub previous_diff: Option<WireRange>,
}

impl SyncRequest {
    /// Build a request from a replica's state.
    ///
    /// # Errors
    ///
    /// Returns error if a value or the digest cannot be serialized.
    pub fn new(
        mutations: &[Mutation],
        clock: &Clock,
        owner: &OwnerId,
        previous_diff: Option<&DivergentRange>,
    ) -> Result<Self, MessageError> {
        Ok(Self {
            mutations: mutations
                .iter()
                .map(WireMutation::from_mutation)
                .collect::<Result<_, _>>()?,
            owner_id: owner.to_string(),
            node_id: clock.node_id().simple().to_string(),
            digest: to_cbor(&clock.digest.pruned())?,
            previous_diff: previous_diff.map(WireRange::from),
        })
    }

    /// Decode the carried mutations.
    ///
    /// # Errors
    ///
    /// Returns error if any mutation is malformed.
    pub fn decode_mutations(&self) -> Result<Vec<Mutation>, MessageError> {
        self.mutations
            .iter()
            .cloned()
            .map(WireMutation::into_mutation)
            .collect()
    }

    /// Decode the carried digest.
    ///
    /// # Errors
    ///
    /// Returns error if the digest bytes are malformed.
    pub fn decode_digest(&self) -> Result<DigestNode, MessageError> {
        from_cbor(&self.digest)
    }

    /// The divergence hint, if any.
    #[must_use]
    pub fn divergence(&self) -> Option<DivergentRange> {
        self.previous_diff.clone().map(DivergentRange::from)
    }

    /// Serialize to protobuf bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Deserialize from protobuf bytes.
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        Self::decode(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// The sync peer's answer to a [`SyncRequest`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct SyncResponse {
    /// Mutations the requester is missing
    #[prost(message, repeated, tag = "1")]
    pub mutations: Vec<WireMutation>,
    /// CBOR-encoded pruned digest of the peer
    #[prost(bytes = "vec", tag = "2")]
    pub digest: Vec<u8>,
}

impl SyncResponse {
    /// Build a response.
    ///
    /// # Errors
    ///
    /// Returns error if a value or the digest cannot be serialized.
    pub fn new(mutations: &[Mutation], digest: &DigestNode) -> Result<Self, MessageError> {
        Ok(Self {
            mutations: mutations
                .iter()
                .map(WireMutation::from_mutation)
                .collect::<Result<_, _>>()?,
            digest: to_cbor(&digest.pruned())?,
        })
    }

    /// Split into decoded mutations and digest.
    ///
    /// # Errors
    ///
    /// Returns error if any part is malformed.
    pub fn into_parts(self) -> Result<(Vec<Mutation>, DigestNode), MessageError> {
        let digest = from_cbor(&self.digest)?;
        let mutations = self
            .mutations
            .into_iter()
            .map(WireMutation::into_mutation)
            .collect::<Result<_, _>>()?;
        Ok((mutations, digest))
    }

    /// Serialize to protobuf bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Deserialize from protobuf bytes.
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        Self::decode(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlcsync_core::{NewMutation, Value};
    use uuid::Uuid;

    fn clock_with(mutations: &[Mutation], node_id: Uuid) -> Clock {
        let mut clock = Clock::seed(node_id);
        for m in mutations {
            clock.digest.insert(&m.timestamp);
            clock.timestamp = m.timestamp;
        }
        clock
    }

    fn sample_mutations(node_id: Uuid) -> Vec<Mutation> {
        vec![
            NewMutation::new("todos", "r1", "title", "buy milk")
                .stamp(Timestamp::new(1_704_067_200_000, 0, node_id)),
            NewMutation::new("todos", "r1", "done", Value::Integer(1))
                .stamp(Timestamp::new(1_704_067_200_000, 1, node_id)),
            NewMutation::new("files", "f", "data", Value::Blob(vec![0, 255]))
                .stamp(Timestamp::new(1_704_067_200_001, 0, node_id)),
        ]
    }

    #[test]
    fn sync_request_through_bytes() {
        let node_id = Uuid::new_v4();
        let mutations = sample_mutations(node_id);
        let clock = clock_with(&mutations, node_id);
        let owner = OwnerId::new("owner-1");

        let request = SyncRequest::new(&mutations, &clock, &owner, None).unwrap();
        let decoded = SyncRequest::from_bytes(&request.to_bytes()).unwrap();

        assert_eq!(decoded.owner_id, "owner-1");
        assert_eq!(decoded.node_id, node_id.simple().to_string());
        assert_eq!(decoded.decode_mutations().unwrap(), mutations);
        assert!(decoded.divergence().is_none());

        let digest = decoded.decode_digest().unwrap();
        assert_eq!(digest.hash(), clock.digest.hash());
        assert!(digest.diff(&clock.digest).is_empty());
    }

    #[test]
    fn sync_request_carries_divergence_hint() {
        let node_id = Uuid::new_v4();
        let clock = Clock::seed(node_id);
        let mut other = DigestNode::new();
        other.insert(&Timestamp::new(90_000, 0, Uuid::new_v4()));
        let range = clock.digest.diff(&other).remove(0);

        let request =
            SyncRequest::new(&[], &clock, &OwnerId::new("o"), Some(&range)).unwrap();
        let decoded = SyncRequest::from_bytes(&request.to_bytes()).unwrap();

        assert!(decoded.mutations.is_empty());
        assert_eq!(decoded.divergence(), Some(range));
    }

    #[test]
    fn sync_response_into_parts() {
        let node_id = Uuid::new_v4();
        let mutations = sample_mutations(node_id);
        let clock = clock_with(&mutations, node_id);

        let response = SyncResponse::new(&mutations[..1], &clock.digest).unwrap();
        let (decoded, digest) = SyncResponse::from_bytes(&response.to_bytes())
            .unwrap()
            .into_parts()
            .unwrap();

        assert_eq!(decoded, mutations[..1].to_vec());
        assert_eq!(digest.hash(), clock.digest.hash());
    }

    #[test]
    fn malformed_timestamp_rejected() {
        let wire = WireMutation {
            timestamp: "not-a-timestamp".to_string(),
            table: "t".to_string(),
            row: "r".to_string(),
            column: "c".to_string(),
            value: Vec::new(),
        };
        assert!(matches!(wire.into_mutation(), Err(MessageError::Deserialize(_))));
        assert!(SyncResponse::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}
