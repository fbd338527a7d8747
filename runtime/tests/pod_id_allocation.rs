//! Pod-id allocator scenarios: uniqueness under contention, release and
//! reuse, lease renewal.

#![allow(clippy::unwrap_used)]

use conveyor_core::cache::{Cache, CacheError};
use conveyor_core::context::Context;
use conveyor_core::lock::DistributedLock;
use conveyor_runtime::pod_id::{DistributedPodId, MAX_NODE, PodIdError};
use conveyor_testing::{LocalLock, MemoryCache};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

async fn init_pod(
    prefix: &str,
    ip: &str,
    cache: Arc<dyn Cache>,
    lock: Arc<dyn DistributedLock>,
) -> Result<DistributedPodId, PodIdError> {
    DistributedPodId::builder(prefix, cache, lock)
        .ip(ip)
        .init(&Context::background().with_timeout(Duration::from_secs(10)))
        .await
}

#[tokio::test]
async fn concurrent_initializers_acquire_distinct_ids() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let lock: Arc<dyn DistributedLock> = Arc::new(LocalLock::new());
    let total = 100;

    let mut tasks = Vec::with_capacity(total);
    for n in 0..total {
        let cache = Arc::clone(&cache);
        let lock = Arc::clone(&lock);
        tasks.push(tokio::spawn(async move {
            init_pod("test", &n.to_string(), cache, lock).await
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        let pod = task.await.unwrap().unwrap();
        assert!(
            (0..MAX_NODE).contains(&pod.id()),
            "id out of range: {}",
            pod.id()
        );
        assert!(ids.insert(pod.id()), "duplicate id {}", pod.id());
    }
    assert_eq!(ids.len(), total);
}

#[tokio::test]
async fn released_slots_are_reused_by_later_initializers() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let lock: Arc<dyn DistributedLock> = Arc::new(LocalLock::new());
    let ctx = Context::background();

    let first = init_pod("test", "first", Arc::clone(&cache), Arc::clone(&lock))
        .await
        .unwrap();
    assert_eq!(first.id(), 0);

    let second = init_pod("test", "second", Arc::clone(&cache), Arc::clone(&lock))
        .await
        .unwrap();
    assert_eq!(second.id(), 1);

    let third = init_pod("test", "third", Arc::clone(&cache), Arc::clone(&lock))
        .await
        .unwrap();
    assert_eq!(third.id(), 2);

    second.release(&ctx).await.unwrap();

    let fourth = init_pod("test", "fourth", Arc::clone(&cache), Arc::clone(&lock))
        .await
        .unwrap();
    assert_eq!(fourth.id(), 1);
}

#[tokio::test]
async fn reinitializing_the_same_ip_keeps_its_slot() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let lock: Arc<dyn DistributedLock> = Arc::new(LocalLock::new());

    let first = init_pod("test", "10.0.0.7", Arc::clone(&cache), Arc::clone(&lock))
        .await
        .unwrap();
    assert_eq!(first.id(), 0);

    // a restart of the same machine re-claims its existing slot
    let again = init_pod("test", "10.0.0.7", Arc::clone(&cache), Arc::clone(&lock))
        .await
        .unwrap();
    assert_eq!(again.id(), 0);
}

#[tokio::test]
async fn exhausted_slot_space_is_a_fatal_error() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let lock: Arc<dyn DistributedLock> = Arc::new(LocalLock::new());
    let ctx = Context::background();

    for slot in 0..MAX_NODE {
        cache
            .set(
                &ctx,
                &format!("test:distributed_pod:id:{slot}"),
                "someone-else",
                Duration::ZERO,
            )
            .await
            .unwrap();
    }

    let err = init_pod("test", "latecomer", cache, lock).await.unwrap_err();
    assert!(matches!(err, PodIdError::Exhausted));
}

#[tokio::test]
async fn release_is_idempotent() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let lock: Arc<dyn DistributedLock> = Arc::new(LocalLock::new());
    let ctx = Context::background();

    let pod = init_pod("test", "solo", Arc::clone(&cache), lock).await.unwrap();
    let key = format!("test:distributed_pod:id:{}", pod.id());
    assert_eq!(cache.get_string(&ctx, &key).await.unwrap(), "solo");

    pod.release(&ctx).await.unwrap();
    assert!(matches!(
        cache.get_string(&ctx, &key).await,
        Err(CacheError::NotFound)
    ));

    // a second release is a no-op
    pod.release(&ctx).await.unwrap();
}

#[tokio::test]
async fn renewal_keeps_the_lease_alive_past_its_ttl() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let lock: Arc<dyn DistributedLock> = Arc::new(LocalLock::new());
    let ctx = Context::background();

    let pod = DistributedPodId::builder("test", Arc::clone(&cache), lock)
        .ip("10.0.0.9")
        .lease_ttl(Duration::from_millis(100))
        .renew_wait(Duration::from_millis(50))
        .init(&ctx)
        .await
        .unwrap();

    let key = format!("test:distributed_pod:id:{}", pod.id());

    // well past the original lease; only renewal can have kept it alive
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cache.get_string(&ctx, &key).await.unwrap(), "10.0.0.9");

    // release stops the renewal worker and drops the slot
    pod.release(&ctx).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(matches!(
        cache.get_string(&ctx, &key).await,
        Err(CacheError::NotFound)
    ));
}
