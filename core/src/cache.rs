//! Key-value cache contract.
//!
//! This is the minimal surface the pod-id allocator needs from a cache
//! backend: string reads, TTL-bounded writes, deletes. Concrete drivers
//! (Redis and friends) live outside this workspace behind the trait.

use crate::context::{Context, ContextError};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by cache drivers.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The key does not exist (or its TTL expired).
    #[error("cache entry not found")]
    NotFound,

    /// The driver could not reach or operate its backend.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// The operation observed context cancellation or a deadline.
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// TTL-aware key-value store.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Read a key as a string.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] when the key is absent or expired,
    /// or a driver error.
    async fn get_string(&self, ctx: &Context, key: &str) -> Result<String, CacheError>;

    /// Write a key with a time-to-live. A zero TTL means no expiry.
    ///
    /// # Errors
    ///
    /// Returns a driver error when the write fails.
    async fn set(
        &self,
        ctx: &Context,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Remove a key. Removing an absent key is success.
    ///
    /// # Errors
    ///
    /// Returns a driver error when the delete fails.
    async fn delete(&self, ctx: &Context, key: &str) -> Result<(), CacheError>;
}
