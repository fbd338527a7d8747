//! Transport capability traits.
//!
//! Transports plug into the pipeline through four small capability sets:
//!
//! - [`Sender`]: push an [`EventMessage`] to a destination.
//! - [`Writer`]: a `Sender` that can also delete what it wrote — the contract
//!   an outbox-backed driver implements for hybrid publishing.
//! - [`Listener`]: open a pull [`MessageIterator`] for a topic/group pair.
//! - [`ConsumeMessage`]: one pulled message, with decode and commit.
//!
//! Driver implementations live behind these traits and register with the
//! runtime registry by string tag; the pipeline never names a concrete
//! transport.
//!
//! # Thread safety
//!
//! Iterators are shared by every worker of a subscription pool, so
//! [`MessageIterator::next`] takes `&self` and implementations handle their
//! own interior mutability.

use crate::context::{Context, ContextError};
use crate::message::{EventConsumeMessage, EventMessage, MessageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by transport drivers.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The driver could not reach its backend.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A send was rejected or lost.
    #[error("send failed for topic '{topic}': {reason}")]
    SendFailed {
        /// Destination topic.
        topic: String,
        /// Driver-reported reason.
        reason: String,
    },

    /// A delete of a previously written message failed.
    #[error("delete failed for topic '{topic}': {reason}")]
    DeleteFailed {
        /// Destination topic.
        topic: String,
        /// Driver-reported reason.
        reason: String,
    },

    /// A listen request was rejected.
    #[error("listen failed for topic '{topic}' group '{group}': {reason}")]
    ListenFailed {
        /// Requested topic.
        topic: String,
        /// Requested consumer group.
        group: String,
        /// Driver-reported reason.
        reason: String,
    },

    /// A commit acknowledgement failed.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// The operation observed context cancellation or a deadline.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Anything else a driver needs to report.
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether this error is the shutdown path (context canceled / deadline),
    /// as opposed to a real transport failure.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Context(_))
    }
}

/// Push capability.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Send one message to its topic.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the driver cannot deliver the message.
    async fn send(&self, ctx: &Context, message: &EventMessage) -> Result<(), TransportError>;
}

impl std::fmt::Debug for dyn Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Sender")
    }
}

/// Push-and-retract capability, implemented by outbox-backed drivers.
///
/// `delete` must be idempotent: deleting a message that was never written, or
/// was already deleted, is success.
#[async_trait]
pub trait Writer: Sender {
    /// Remove a previously sent message (identified by its content).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the driver cannot perform the delete.
    async fn delete(&self, ctx: &Context, message: &EventMessage) -> Result<(), TransportError>;
}

/// Pull-subscription capability.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Open an iterator over `topic` for consumer `group`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the subscription cannot be established.
    async fn listen(
        &self,
        ctx: &Context,
        topic: &str,
        group: &str,
    ) -> Result<Arc<dyn MessageIterator>, TransportError>;
}

/// A pull iterator over one subscription.
#[async_trait]
pub trait MessageIterator: Send + Sync {
    /// Block until the next message arrives or the context ends.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Context`] on the shutdown path, or a driver
    /// error when the pull fails.
    async fn next(&self, ctx: &Context) -> Result<Box<dyn ConsumeMessage>, TransportError>;

    /// Release driver resources. Called once when the worker pool drains.
    /// The default is a no-op for drivers with nothing to release.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the driver fails to shut down cleanly.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// One message pulled from a [`MessageIterator`].
///
/// A message is either committed or uncommitted; [`ConsumeMessage::commit`] is
/// idempotent and transport-specific.
#[async_trait]
pub trait ConsumeMessage: Send + Sync {
    /// Decode the wire payload into an [`EventConsumeMessage`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] when the payload is not a valid envelope.
    async fn event_message(&self, ctx: &Context) -> Result<EventConsumeMessage, MessageError>;

    /// Acknowledge the message to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::CommitFailed`] when the acknowledgement is
    /// rejected.
    async fn commit(&self, ctx: &Context) -> Result<(), TransportError>;

    /// Trace-propagation headers attached by the producing side, when the
    /// transport carries any. Header keys are transport-defined.
    fn propagation_headers(&self) -> Option<HashMap<String, String>> {
        None
    }
}
