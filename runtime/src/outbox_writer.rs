//! Writer over any outbox store.
//!
//! Bridges the [`OutboxStore`] contract into the transport [`Writer`]
//! capability: a send appends the message's outbox row, a delete removes it
//! by content id. Store drivers stay oblivious to the transport types.

use async_trait::async_trait;
use conveyor_core::context::Context;
use conveyor_core::message::EventMessage;
use conveyor_core::outbox::{OutboxError, OutboxRecord, OutboxStore};
use conveyor_core::transport::{Sender, TransportError, Writer};
use std::sync::Arc;
use tracing::debug;

/// [`Writer`] implementation backed by an [`OutboxStore`].
pub struct OutboxWriter {
    store: Arc<dyn OutboxStore>,
}

impl OutboxWriter {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self { store }
    }

    fn record_for(message: &EventMessage) -> Result<OutboxRecord, TransportError> {
        OutboxRecord::from_message(message).map_err(|err| TransportError::SendFailed {
            topic: message.topic.clone(),
            reason: err.to_string(),
        })
    }
}

fn map_outbox_error(topic: &str, err: OutboxError) -> TransportError {
    match err {
        OutboxError::Context(ctx_err) => TransportError::Context(ctx_err),
        OutboxError::Append(reason) => TransportError::SendFailed {
            topic: topic.to_string(),
            reason,
        },
        OutboxError::Delete(reason) => TransportError::DeleteFailed {
            topic: topic.to_string(),
            reason,
        },
    }
}

#[async_trait]
impl Sender for OutboxWriter {
    async fn send(&self, ctx: &Context, message: &EventMessage) -> Result<(), TransportError> {
        let record = Self::record_for(message)?;
        self.store
            .append(ctx, &record)
            .await
            .map_err(|err| map_outbox_error(&message.topic, err))?;
        debug!(id = %record.id, topic = %record.topic, "outbox record appended");
        Ok(())
    }
}

#[async_trait]
impl Writer for OutboxWriter {
    async fn delete(&self, ctx: &Context, message: &EventMessage) -> Result<(), TransportError> {
        let record = Self::record_for(message)?;
        self.store
            .delete(ctx, &record.id)
            .await
            .map_err(|err| map_outbox_error(&message.topic, err))?;
        debug!(id = %record.id, topic = %record.topic, "outbox record deleted");
        Ok(())
    }
}
