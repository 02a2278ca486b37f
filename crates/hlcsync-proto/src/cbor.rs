//! CBOR helpers shared by the wire format and the stores.

use crate::messages::MessageError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize to CBOR bytes.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, MessageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| MessageError::Serialize(e.to_string()))?;
    Ok(bytes)
}

/// Deserialize from CBOR bytes.
///
/// # Errors
///
/// Returns error if deserialization fails.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MessageError> {
    ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
}
