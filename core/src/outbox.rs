//! Outbox record and store contract.
//!
//! In hybrid mode every publish first lands in a durable outbox; the row is
//! removed only after the downstream transport confirms the send. A row that
//! exists means "delivery of this exact message has not been confirmed";
//! absence means it was never appended or already confirmed.
//!
//! The record id is a content hash, which makes appends naturally idempotent:
//! a driver that hits a duplicate primary key swallows the error as success.

use crate::context::{Context, ContextError};
use crate::message::{EventMessage, MessageError, hash_bytes};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by outbox store drivers.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The driver failed to append a row (duplicate keys are not failures).
    #[error("failed to append outbox record: {0}")]
    Append(String),

    /// The driver failed to delete a row (absent rows are not failures).
    #[error("failed to delete outbox record: {0}")]
    Delete(String),

    /// The operation observed context cancellation or a deadline.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// One row of the outbox table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Content-derived primary key: base64 of SHA-256 over
    /// `[topic, key, value]`. Deterministic, so identical messages collide
    /// and the append dedups them.
    pub id: String,
    /// Destination topic.
    pub topic: String,
    /// Partitioning key.
    pub key: String,
    /// Wire payload of the message, as a JSON string.
    pub value: String,
    /// Append time. Not part of the id.
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Build the outbox row for a message.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Serialize`] if the message payload cannot be
    /// encoded.
    pub fn from_message(message: &EventMessage) -> Result<Self, MessageError> {
        let value = serde_json::to_string(message).map_err(MessageError::Serialize)?;
        let id = record_id(&message.topic, &message.key, &value)?;
        Ok(Self {
            id,
            topic: message.topic.clone(),
            key: message.key.clone(),
            value,
            created_at: Utc::now(),
        })
    }
}

/// Deterministic record id over the content fields.
///
/// # Errors
///
/// Returns [`MessageError::Serialize`] if the fields cannot be encoded.
pub fn record_id(topic: &str, key: &str, value: &str) -> Result<String, MessageError> {
    let bytes = serde_json::to_vec(&(topic, key, value)).map_err(MessageError::Serialize)?;
    Ok(hash_bytes(&bytes))
}

/// Durable store backing a hybrid-mode writer.
///
/// Implementations must be safe for concurrent `append`/`delete` from the
/// emitter and its flush worker.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a row by primary key `id`. A duplicate key is success — the
    /// content hash already dedups structurally identical messages.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Append`] for any failure other than a duplicate
    /// key.
    async fn append(&self, ctx: &Context, record: &OutboxRecord) -> Result<(), OutboxError>;

    /// Best-effort removal by id. An absent row is success.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Delete`] when the driver cannot perform the
    /// delete.
    async fn delete(&self, ctx: &Context, id: &str) -> Result<(), OutboxError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::{META_EVENT, META_TIMESTAMP, Metadata};
    use serde_json::json;

    fn message_at(timestamp: i64) -> EventMessage {
        let mut metadata = Metadata::new();
        metadata.insert(META_EVENT.into(), json!("signup"));
        metadata.insert(META_TIMESTAMP.into(), json!(timestamp));
        EventMessage {
            topic: "users".into(),
            key: "u-7".into(),
            data: json!({"user": "u-7"}),
            metadata,
        }
    }

    #[test]
    fn identical_messages_share_an_id() {
        let a = OutboxRecord::from_message(&message_at(1_700_000_000)).unwrap();
        let b = OutboxRecord::from_message(&message_at(1_700_000_000)).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn a_different_publish_second_changes_the_id() {
        let a = OutboxRecord::from_message(&message_at(1_700_000_000)).unwrap();
        let b = OutboxRecord::from_message(&message_at(1_700_000_001)).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn created_at_does_not_feed_the_id() {
        let mut record = OutboxRecord::from_message(&message_at(1_700_000_000)).unwrap();
        let id_before = record.id.clone();
        record.created_at = DateTime::<Utc>::MIN_UTC;
        assert_eq!(
            record_id(&record.topic, &record.key, &record.value).unwrap(),
            id_before
        );
    }
}
