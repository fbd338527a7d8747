//! Cancellation context threaded through every suspension point.
//!
//! Every async contract in this workspace (`Sender::send`, `MessageIterator::next`,
//! `Cache` operations, handler bodies, ...) receives a [`Context`] and must honor
//! it: return promptly once the context is canceled or its deadline passes.
//!
//! A [`Context`] is a cheap-to-clone handle over a [`CancellationToken`] plus an
//! optional deadline and an optional consumer-group tag. Clones share the same
//! token; [`Context::child`] derives a token that can be canceled independently
//! of the parent while still observing the parent's cancellation.
//!
//! # Example
//!
//! ```
//! use conveyor_core::context::Context;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx = Context::background().with_timeout(Duration::from_millis(10));
//! ctx.cancelled().await; // resolves when the deadline passes
//! assert!(ctx.is_cancelled());
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context stopped being active.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context was canceled explicitly.
    #[error("context canceled")]
    Canceled,
    /// The context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal, optional deadline and call-scoped values for one
/// logical operation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    group: Option<Arc<str>>,
}

impl Context {
    /// A root context with no deadline and no group, canceled only explicitly.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context whose token can be canceled without affecting the
    /// parent. Cancellation of the parent still propagates down.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            group: self.group.clone(),
        }
    }

    /// Cancel this context (and every context cloned or derived from it).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Derive a context carrying the consumer group that pulled the message.
    #[must_use]
    pub fn with_group(&self, group: impl Into<Arc<str>>) -> Self {
        Self {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            group: Some(group.into()),
        }
    }

    /// The consumer group attached by the worker pool, if any.
    #[must_use]
    pub fn consumer_group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Derive a context that expires `timeout` from now (or at the parent's
    /// deadline, whichever comes first).
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline` (or at the parent's
    /// deadline, whichever comes first).
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
            group: self.group.clone(),
        }
    }

    /// The deadline, if one is set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline. `None` when no deadline is set; zero when
    /// the deadline already passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the context has been canceled or its deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error().is_some()
    }

    /// The reason this context is no longer active, if any.
    #[must_use]
    pub fn error(&self) -> Option<ContextError> {
        if self.cancel.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Some(ContextError::DeadlineExceeded);
            }
        }
        None
    }

    /// Fail fast when the context already ended.
    ///
    /// # Errors
    ///
    /// Returns the [`ContextError`] describing why the context ended.
    pub fn ensure_active(&self) -> Result<(), ContextError> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolve once the context is canceled or its deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_expires() {
        let ctx = Context::background().with_timeout(Duration::from_millis(5));
        assert!(!ctx.is_cancelled());
        ctx.cancelled().await;
        assert_eq!(ctx.error(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn child_cancel_does_not_affect_parent() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancel_propagates_to_child() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        assert_eq!(child.error(), Some(ContextError::Canceled));
    }

    #[test]
    fn group_is_carried_by_derived_contexts() {
        let ctx = Context::background().with_group("billing");
        assert_eq!(ctx.consumer_group(), Some("billing"));
        assert_eq!(ctx.child().consumer_group(), Some("billing"));
    }

    #[test]
    fn nested_deadline_keeps_the_earlier_one() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let nested = ctx.with_timeout(Duration::from_secs(60));
        let remaining = nested.remaining().unwrap_or_default();
        assert!(remaining <= Duration::from_millis(10));
    }
}
