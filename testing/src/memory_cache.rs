//! TTL-aware in-memory cache.

use async_trait::async_trait;
use conveyor_core::cache::{Cache, CacheError};
use conveyor_core::context::Context;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory [`Cache`] for deterministic tests. Expired entries read as
/// [`CacheError::NotFound`]; a zero TTL means no expiry.
#[derive(Default)]
pub struct MemoryCache {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_string(&self, ctx: &Context, key: &str) -> Result<String, CacheError> {
        ctx.ensure_active()?;
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                Err(CacheError::NotFound)
            }
            Some(entry) => Ok(entry.value.clone()),
            None => Err(CacheError::NotFound),
        }
    }

    async fn set(
        &self,
        ctx: &Context,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        ctx.ensure_active()?;
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
        Ok(())
    }

    async fn delete(&self, ctx: &Context, key: &str) -> Result<(), CacheError> {
        ctx.ensure_active()?;
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryCache::new();
        let ctx = Context::background();

        cache.set(&ctx, "k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(cache.get_string(&ctx, "k").await.unwrap(), "v");

        cache.delete(&ctx, "k").await.unwrap();
        assert!(matches!(
            cache.get_string(&ctx, "k").await,
            Err(CacheError::NotFound)
        ));
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryCache::new();
        let ctx = Context::background();

        cache
            .set(&ctx, "k", "v", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            cache.get_string(&ctx, "k").await,
            Err(CacheError::NotFound)
        ));
    }
}
