//! Registry factories returning fixed instances.
//!
//! Production factories construct a fresh driver from opaque config; tests
//! instead need the construction to hand back the exact instance the test
//! body holds, so assertions can observe what the pipeline did with it.

use async_trait::async_trait;
use conveyor_core::transport::{Listener, Sender, Writer};
use conveyor_runtime::registry::{ConfigError, ListenerFactory, SenderFactory, WriterFactory};
use serde_json::Value;
use std::sync::Arc;

/// Factory that always returns one shared sender instance.
pub struct FixedSenderFactory {
    sender: Arc<dyn Sender>,
}

impl FixedSenderFactory {
    /// Wrap a sender.
    #[must_use]
    pub fn new(sender: Arc<dyn Sender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl SenderFactory for FixedSenderFactory {
    async fn create(&self, _config: Value) -> Result<Arc<dyn Sender>, ConfigError> {
        Ok(Arc::clone(&self.sender))
    }
}

/// Factory that always returns one shared writer instance.
pub struct FixedWriterFactory {
    writer: Arc<dyn Writer>,
}

impl FixedWriterFactory {
    /// Wrap a writer.
    #[must_use]
    pub fn new(writer: Arc<dyn Writer>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl WriterFactory for FixedWriterFactory {
    async fn create(&self, _config: Value) -> Result<Arc<dyn Writer>, ConfigError> {
        Ok(Arc::clone(&self.writer))
    }
}

/// Factory that always returns one shared listener instance, so the test
/// body keeps a handle to the listener the consumer uses.
pub struct FixedListenerFactory {
    listener: Arc<dyn Listener>,
}

impl FixedListenerFactory {
    /// Wrap a listener.
    #[must_use]
    pub fn new(listener: Arc<dyn Listener>) -> Self {
        Self { listener }
    }
}

#[async_trait]
impl ListenerFactory for FixedListenerFactory {
    async fn create(&self, _config: Value) -> Result<Arc<dyn Listener>, ConfigError> {
        Ok(Arc::clone(&self.listener))
    }
}
