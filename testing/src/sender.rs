//! Test doubles for the push side.

use async_trait::async_trait;
use conveyor_core::context::Context;
use conveyor_core::message::EventMessage;
use conveyor_core::transport::{Sender, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// [`Sender`] that records every sent message, with optional injected
/// failures for retry-path tests.
#[derive(Default)]
pub struct CapturingSender {
    sent: Mutex<Vec<EventMessage>>,
    failures: AtomicUsize,
}

impl CapturingSender {
    /// Create a sender that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` sends before accepting again.
    pub fn fail_times(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Snapshot of accepted messages.
    #[must_use]
    pub fn sent(&self) -> Vec<EventMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sender for CapturingSender {
    async fn send(&self, ctx: &Context, message: &EventMessage) -> Result<(), TransportError> {
        ctx.ensure_active()?;
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::SendFailed {
                topic: message.topic.clone(),
                reason: "injected failure".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}
