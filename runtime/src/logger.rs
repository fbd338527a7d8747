//! Logger reference driver.
//!
//! Implements every transport capability by writing structured log lines:
//! sends and deletes are recorded at info, and the listener's iterator blocks
//! until its context ends. Useful as a wiring smoke-test and as the reference
//! for driver authors; registered under the `logger` tag.

use async_trait::async_trait;
use conveyor_core::context::{Context, ContextError};
use conveyor_core::message::EventMessage;
use conveyor_core::transport::{
    ConsumeMessage, Listener, MessageIterator, Sender, TransportError, Writer,
};
use std::sync::Arc;
use tracing::info;

/// The driver behind the `logger` tag.
#[derive(Debug, Clone, Default)]
pub struct LoggerDriver;

impl LoggerDriver {
    /// Create the driver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn message_hash(message: &EventMessage) -> Result<String, TransportError> {
        message
            .hash()
            .map_err(|err| TransportError::Other(err.to_string()))
    }
}

#[async_trait]
impl Sender for LoggerDriver {
    async fn send(&self, _ctx: &Context, message: &EventMessage) -> Result<(), TransportError> {
        let hash = Self::message_hash(message)?;
        info!(
            topic = %message.topic,
            key = %message.key,
            data = %message.data,
            metadata = ?message.metadata,
            hash = %hash,
            "event message"
        );
        Ok(())
    }
}

#[async_trait]
impl Writer for LoggerDriver {
    async fn delete(&self, _ctx: &Context, message: &EventMessage) -> Result<(), TransportError> {
        let hash = Self::message_hash(message)?;
        info!(hash = %hash, "message successfully sent");
        Ok(())
    }
}

#[async_trait]
impl Listener for LoggerDriver {
    async fn listen(
        &self,
        _ctx: &Context,
        topic: &str,
        group: &str,
    ) -> Result<Arc<dyn MessageIterator>, TransportError> {
        info!(topic = %topic, group = %group, "listen request");
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl MessageIterator for LoggerDriver {
    async fn next(&self, ctx: &Context) -> Result<Box<dyn ConsumeMessage>, TransportError> {
        ctx.cancelled().await;
        Err(TransportError::Context(
            ctx.error().unwrap_or(ContextError::Canceled),
        ))
    }
}
