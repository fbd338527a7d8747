//! In-process distributed-lock stand-in.

use async_trait::async_trait;
use conveyor_core::context::Context;
use conveyor_core::lock::{DistributedLock, LockError};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// [`DistributedLock`] backed by a process-local map of lease expirations.
/// Gives real mutual exclusion between tasks of one process, which is all
/// the allocator tests need.
#[derive(Default)]
pub struct LocalLock {
    locked: Mutex<HashMap<String, Instant>>,
}

impl LocalLock {
    /// Create an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, id: &str, ttl: Duration) -> Result<(), LockError> {
        let mut locked = self.locked.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(expires_at) = locked.get(id) {
            if *expires_at > Instant::now() {
                return Err(LockError::Contended);
            }
        }
        locked.insert(id.to_string(), Instant::now() + ttl);
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn try_lock(&self, ctx: &Context, id: &str, ttl: Duration) -> Result<(), LockError> {
        ctx.ensure_active()?;
        self.acquire(id, ttl)
    }

    async fn lock(&self, ctx: &Context, id: &str, ttl: Duration) -> Result<(), LockError> {
        if self.acquire(id, ttl).is_ok() {
            return Ok(());
        }

        // poll until the holder releases or the lease window elapses
        let max_attempts = (ttl.as_millis() / POLL_INTERVAL.as_millis()).max(1);
        let mut attempts = 0;
        loop {
            ctx.ensure_active()?;
            tokio::time::sleep(POLL_INTERVAL).await;
            if self.acquire(id, ttl).is_ok() {
                return Ok(());
            }
            attempts += 1;
            if attempts > max_attempts {
                return Err(LockError::Contended);
            }
        }
    }

    async fn unlock(&self, ctx: &Context, id: &str) -> Result<(), LockError> {
        ctx.ensure_active()?;
        self.locked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_lock_contends_until_unlocked() {
        let lock = LocalLock::new();
        let ctx = Context::background();
        let ttl = Duration::from_secs(60);

        lock.try_lock(&ctx, "r", ttl).await.unwrap();
        assert!(matches!(
            lock.try_lock(&ctx, "r", ttl).await,
            Err(LockError::Contended)
        ));

        lock.unlock(&ctx, "r").await.unwrap();
        lock.try_lock(&ctx, "r", ttl).await.unwrap();
    }

    #[tokio::test]
    async fn expired_leases_are_reacquirable() {
        let lock = LocalLock::new();
        let ctx = Context::background();

        lock.try_lock(&ctx, "r", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        lock.try_lock(&ctx, "r", Duration::from_secs(1)).await.unwrap();
    }
}
