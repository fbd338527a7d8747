//! Message envelope and wire model.
//!
//! An [`EventMessage`] is the publish-side envelope: `topic` and `key` travel
//! as transport headers / record keys, while `data` and `metadata` form the
//! JSON wire payload:
//!
//! ```json
//! {
//!   "data":     { "...": "arbitrary payload" },
//!   "metadata": { "hash": "...", "timestamp": 1700000000, "event": "...", "version": 1 }
//! }
//! ```
//!
//! [`EventConsumeMessage`] is the consume-side view: the same envelope with
//! `data` kept as raw bytes so handlers decode into their own types via
//! [`EventConsumeMessage::data_as`].
//!
//! Metadata is a `BTreeMap` on purpose: serialization order is deterministic,
//! so content hashes (and the outbox record ids derived from them) are stable
//! across processes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Metadata key carrying the payload content hash.
pub const META_HASH: &str = "hash";
/// Metadata key carrying the publish timestamp (unix seconds).
pub const META_TIMESTAMP: &str = "timestamp";
/// Metadata key carrying the logical event name.
pub const META_EVENT: &str = "event";
/// Metadata key carrying the message schema version.
pub const META_VERSION: &str = "version";
/// Reserved configuration key for defaults (metadata templates, worker pools).
pub const META_DEFAULT: &str = "default";

/// Message metadata. Ordered so serialization, and therefore hashing, is
/// deterministic.
pub type Metadata = BTreeMap<String, Value>;

/// Errors from encoding or decoding message envelopes.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Failed to serialize a payload or envelope to wire JSON.
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Failed to deserialize wire bytes into an envelope or payload.
    #[error("failed to deserialize message: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Publish-side message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventMessage {
    /// Logical destination; carried outside the wire payload.
    #[serde(skip)]
    pub topic: String,

    /// Partitioning key; carried outside the wire payload.
    #[serde(skip)]
    pub key: String,

    /// Caller payload, already converted to JSON.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,

    /// Enriched metadata (hash, timestamp, event name, version, templates).
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl EventMessage {
    /// Wire bytes of the envelope (`{"data":..., "metadata":...}`).
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Serialize`] if the payload cannot be encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(MessageError::Serialize)
    }

    /// Content hash of the whole envelope: base64 of SHA-256 over the wire
    /// bytes. Identical envelopes always produce identical hashes.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Serialize`] if the payload cannot be encoded.
    pub fn hash(&self) -> Result<String, MessageError> {
        Ok(hash_bytes(&self.to_bytes()?))
    }
}

/// Base64 of SHA-256 over arbitrary bytes.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    BASE64.encode(Sha256::digest(bytes))
}

/// Content hash of a payload: base64 of SHA-256 over its JSON serialization.
///
/// # Errors
///
/// Returns [`MessageError::Serialize`] if the payload cannot be encoded.
pub fn payload_hash<T>(payload: &T) -> Result<String, MessageError>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(payload).map_err(MessageError::Serialize)?;
    Ok(hash_bytes(&bytes))
}

/// Consume-side message view. `data` is kept as the raw wire bytes of the
/// payload so handlers decode into their own types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventConsumeMessage {
    /// Topic the message was pulled from.
    pub topic: String,
    /// Record key, when the transport exposes one.
    pub key: String,
    /// Metadata decoded from the wire payload.
    pub metadata: Metadata,
    /// Raw JSON bytes of the `data` field.
    pub data: Vec<u8>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    data: Option<Box<RawValue>>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

impl EventConsumeMessage {
    /// Parse the wire payload (`{"data":..., "metadata":...}`). Topic and key
    /// are transport concerns and are filled in by the listener driver.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Deserialize`] if the bytes are not a valid
    /// envelope.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }

        let envelope: WireEnvelope =
            serde_json::from_slice(bytes).map_err(MessageError::Deserialize)?;

        Ok(Self {
            topic: String::new(),
            key: String::new(),
            metadata: envelope.metadata.unwrap_or_default(),
            data: envelope
                .data
                .map(|raw| raw.get().as_bytes().to_vec())
                .unwrap_or_default(),
        })
    }

    /// Decode the raw `data` bytes into a caller type.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Deserialize`] if the payload does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        serde_json::from_slice(&self.data).map_err(MessageError::Deserialize)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_message() -> EventMessage {
        let mut metadata = Metadata::new();
        metadata.insert(META_EVENT.into(), json!("order_created"));
        metadata.insert(META_VERSION.into(), json!(1));
        EventMessage {
            topic: "orders".into(),
            key: "o-1".into(),
            data: json!({"order_id": "o-1", "total": 125}),
            metadata,
        }
    }

    #[test]
    fn wire_payload_excludes_topic_and_key() {
        let message = sample_message();
        let bytes = message.to_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("data").is_some());
        assert!(value.get("metadata").is_some());
        assert!(value.get("topic").is_none());
        assert!(value.get("key").is_none());
    }

    #[test]
    fn consume_message_round_trips_the_wire_payload() {
        let message = sample_message();
        let bytes = message.to_bytes().unwrap();

        let consumed = EventConsumeMessage::from_wire(&bytes).unwrap();
        assert_eq!(consumed.metadata, message.metadata);

        #[derive(Deserialize)]
        struct Order {
            order_id: String,
            total: u64,
        }
        let order: Order = consumed.data_as().unwrap();
        assert_eq!(order.order_id, "o-1");
        assert_eq!(order.total, 125);
    }

    #[test]
    fn empty_wire_payload_is_an_empty_message() {
        let consumed = EventConsumeMessage::from_wire(b"").unwrap();
        assert!(consumed.metadata.is_empty());
        assert!(consumed.data.is_empty());
    }

    #[test]
    fn identical_envelopes_hash_identically() {
        assert_eq!(
            sample_message().hash().unwrap(),
            sample_message().hash().unwrap()
        );
    }

    proptest! {
        #[test]
        fn payload_hash_is_deterministic(payload in "[a-z0-9 ]{0,64}", n in 0u64..1_000_000) {
            let a = payload_hash(&json!({"text": payload, "n": n})).unwrap();
            let b = payload_hash(&json!({"text": payload, "n": n})).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn different_payloads_hash_differently(a in "[a-z]{1,32}", b in "[A-Z]{1,32}") {
            let ha = payload_hash(&json!({ "v": a })).unwrap();
            let hb = payload_hash(&json!({ "v": b })).unwrap();
            prop_assert_ne!(ha, hb);
        }
    }
}
