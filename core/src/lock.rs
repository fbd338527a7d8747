//! Distributed lock contract.
//!
//! The pod-id allocator serializes slot acquisition through this trait.
//! Concrete drivers (Redis, etcd, ZooKeeper) live outside this workspace;
//! the in-process lock in `conveyor-testing` backs the tests.

use crate::context::{Context, ContextError};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by lock drivers.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another holder currently owns the resource.
    #[error("resource is already locked")]
    Contended,

    /// The driver could not reach or operate its backend.
    #[error("lock backend error: {0}")]
    Backend(String),

    /// The operation observed context cancellation or a deadline.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// Lease-based mutual exclusion across processes.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquire the lock or fail immediately when it is held.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Contended`] when another holder owns the
    /// resource, or a driver error.
    async fn try_lock(&self, ctx: &Context, id: &str, ttl: Duration) -> Result<(), LockError>;

    /// Acquire the lock, waiting until the holder releases it or the lease
    /// window elapses.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Contended`] when the resource never freed up
    /// within the lease window, or a driver error.
    async fn lock(&self, ctx: &Context, id: &str, ttl: Duration) -> Result<(), LockError>;

    /// Release the lock. Releasing an unheld lock is success.
    ///
    /// # Errors
    ///
    /// Returns a driver error when the release fails.
    async fn unlock(&self, ctx: &Context, id: &str) -> Result<(), LockError>;
}
