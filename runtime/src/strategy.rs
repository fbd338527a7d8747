//! Consume strategies: who commits, and when.
//!
//! A strategy sits between the worker pool and the handler. It decodes the
//! pulled message, decides the ordering of handler invocation and commit,
//! and is responsible for calling [`ConsumeMessage::commit`] at most once.
//!
//! Two strategies ship built in and are registered under the tags
//! `always_commit` and `commit_on_success` (the default). Additional
//! strategies register through
//! [`register_strategy`](crate::registry::register_strategy).

use crate::handler::EventHandler;
use async_trait::async_trait;
use conveyor_core::context::Context;
use conveyor_core::message::MessageError;
use conveyor_core::transport::{ConsumeMessage, TransportError};
use thiserror::Error;

/// Errors from running a strategy over one message.
#[derive(Error, Debug)]
pub enum StrategyError {
    /// The wire payload could not be decoded; treated like a handler error
    /// for commit purposes.
    #[error("failed to decode consume message: {0}")]
    Decode(#[from] MessageError),

    /// The handler rejected the message.
    #[error("handler failed to process message: {0}")]
    Handler(#[source] anyhow::Error),

    /// The transport rejected the commit.
    #[error("failed to commit message: {0}")]
    Commit(#[source] TransportError),
}

/// Decode, handle and commit one pulled message.
#[async_trait]
pub trait ConsumeStrategy: Send + Sync {
    /// Run the strategy over one message.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError`] describing which stage failed.
    async fn consume(
        &self,
        ctx: &Context,
        message: &dyn ConsumeMessage,
        handler: &EventHandler,
    ) -> Result<(), StrategyError>;
}

/// Commit before handling: the message is acknowledged no matter what the
/// handler does. Handler errors still propagate, but never roll back the
/// commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCommit;

#[async_trait]
impl ConsumeStrategy for AlwaysCommit {
    async fn consume(
        &self,
        ctx: &Context,
        message: &dyn ConsumeMessage,
        handler: &EventHandler,
    ) -> Result<(), StrategyError> {
        let event = message.event_message(ctx).await?;
        message.commit(ctx).await.map_err(StrategyError::Commit)?;
        handler
            .call(ctx.clone(), event)
            .await
            .map_err(StrategyError::Handler)
    }
}

/// Handle first, commit only when the handler succeeds. A failed handler
/// leaves the message uncommitted for redelivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOnSuccess;

#[async_trait]
impl ConsumeStrategy for CommitOnSuccess {
    async fn consume(
        &self,
        ctx: &Context,
        message: &dyn ConsumeMessage,
        handler: &EventHandler,
    ) -> Result<(), StrategyError> {
        let event = message.event_message(ctx).await?;
        handler
            .call(ctx.clone(), event)
            .await
            .map_err(StrategyError::Handler)?;
        message.commit(ctx).await.map_err(StrategyError::Commit)
    }
}
