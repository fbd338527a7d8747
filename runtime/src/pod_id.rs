//! Distributed pod-id allocator.
//!
//! Assigns every process instance a stable integer in `[0, MAX_NODE)` so
//! downstream snowflake-style id generators cannot collide across pods. The
//! allocation is a lease in a shared key-value store, guarded by a
//! distributed lock and renewed by a background worker:
//!
//! - `<prefix>:distributed_pod:id:<slot>` → owner ip, TTL = lease (24h)
//! - `<prefix>:distributed_pod:lock:<slot>` → acquisition lock, TTL =
//!   remaining init deadline
//!
//! Initialization scans slots in order, skipping slots owned by another ip
//! and slots whose lock is contended; the first slot claimed under the lock
//! wins. The renewal worker re-sets the key every `renew_wait` (23h by
//! default — strictly less than the lease TTL, so a healthy process never
//! loses its slot to expiry). The first renewal fires only after a full
//! `renew_wait`; the lease written at acquisition covers the gap.
//!
//! # Example
//!
//! ```rust,ignore
//! let pod_id = DistributedPodId::builder("myapp", cache, lock)
//!     .init(&Context::background())
//!     .await?;
//! let node = pod_id.id(); // 0..=1022, unique among live pods
//! ```

use conveyor_core::cache::{Cache, CacheError};
use conveyor_core::context::Context;
use conveyor_core::lock::{DistributedLock, LockError};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Node bits of the downstream snowflake id layout; bounds the slot space.
pub const NODE_BITS: u32 = 10;

/// Exclusive upper bound of the slot space.
pub const MAX_NODE: i64 = (1 << NODE_BITS) - 1;

const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_RENEW_WAIT: Duration = Duration::from_secs(23 * 60 * 60);
const DEFAULT_RENEW_SET_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);
const UNLOCK_GRACE: Duration = Duration::from_secs(2);

/// Errors from pod-id allocation.
#[derive(Error, Debug)]
pub enum PodIdError {
    /// Every slot in `[0, MAX_NODE)` is owned by another pod.
    #[error("all available pod ids have been acquired")]
    Exhausted,

    /// No usable non-loopback IPv4 address on this machine.
    #[error("unable to determine machine ip address: {0}")]
    IpUnavailable(String),

    /// The cache backend failed mid-allocation.
    #[error("failed to access pod id slot: {0}")]
    Cache(#[source] CacheError),

    /// The lock backend failed (contention is not a failure — contended
    /// slots are skipped).
    #[error("failed to acquire pod id lock: {0}")]
    Lock(#[source] LockError),
}

enum AcquireError {
    /// Re-read under the lock showed another owner; skip the slot.
    AlreadyAcquired,
    /// Someone else holds the acquisition lock; skip the slot.
    Contended,
    Cache(CacheError),
    Lock(LockError),
}

/// Builder for [`DistributedPodId`]; every knob has a production default.
pub struct DistributedPodIdBuilder {
    prefix: String,
    cache: Arc<dyn Cache>,
    lock: Arc<dyn DistributedLock>,
    ip: Option<String>,
    renew_wait: Duration,
    renew_set_timeout: Duration,
    lease_ttl: Duration,
    init_timeout: Duration,
}

impl DistributedPodIdBuilder {
    /// Override the discovered machine ip (tests and multi-homed hosts).
    #[must_use]
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Override the renewal interval. Must stay strictly below the lease TTL.
    #[must_use]
    pub const fn renew_wait(mut self, renew_wait: Duration) -> Self {
        self.renew_wait = renew_wait;
        self
    }

    /// Override the per-renewal write timeout.
    #[must_use]
    pub const fn renew_set_timeout(mut self, timeout: Duration) -> Self {
        self.renew_set_timeout = timeout;
        self
    }

    /// Override the lease TTL on the slot key.
    #[must_use]
    pub const fn lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    /// Override the default init deadline used when the caller's context has
    /// none.
    #[must_use]
    pub const fn init_timeout(mut self, init_timeout: Duration) -> Self {
        self.init_timeout = init_timeout;
        self
    }

    /// Discover the machine ip (unless overridden), scan for a free slot and
    /// start the renewal worker.
    ///
    /// # Errors
    ///
    /// Returns [`PodIdError::Exhausted`] when no slot is free,
    /// [`PodIdError::IpUnavailable`] when discovery fails, or a backend
    /// error.
    pub async fn init(self, ctx: &Context) -> Result<DistributedPodId, PodIdError> {
        let ip = match self.ip {
            Some(ip) => ip,
            None => discover_ip()?,
        };

        let mut pod_id = DistributedPodId {
            prefix: self.prefix,
            cache: self.cache,
            lock: self.lock,
            ip,
            acquired_id: 0,
            key: String::new(),
            renew_wait: self.renew_wait,
            renew_set_timeout: self.renew_set_timeout,
            lease_ttl: self.lease_ttl,
            init_timeout: self.init_timeout,
            stopped: AtomicBool::new(false),
            release_guard: tokio::sync::Mutex::new(()),
            stop: CancellationToken::new(),
        };

        pod_id.init(ctx).await?;
        Ok(pod_id)
    }
}

/// A held pod-id lease. Keep it alive for the process lifetime and call
/// [`DistributedPodId::release`] on shutdown.
pub struct DistributedPodId {
    prefix: String,
    cache: Arc<dyn Cache>,
    lock: Arc<dyn DistributedLock>,
    ip: String,
    acquired_id: i64,
    key: String,
    renew_wait: Duration,
    renew_set_timeout: Duration,
    lease_ttl: Duration,
    init_timeout: Duration,
    stopped: AtomicBool,
    release_guard: tokio::sync::Mutex<()>,
    stop: CancellationToken,
}

impl std::fmt::Debug for DistributedPodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedPodId")
            .field("prefix", &self.prefix)
            .field("ip", &self.ip)
            .field("acquired_id", &self.acquired_id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl DistributedPodId {
    /// Start building an allocator over a cache and a distributed lock.
    #[must_use]
    pub fn builder(
        prefix: impl Into<String>,
        cache: Arc<dyn Cache>,
        lock: Arc<dyn DistributedLock>,
    ) -> DistributedPodIdBuilder {
        DistributedPodIdBuilder {
            prefix: prefix.into(),
            cache,
            lock,
            ip: None,
            renew_wait: DEFAULT_RENEW_WAIT,
            renew_set_timeout: DEFAULT_RENEW_SET_TIMEOUT,
            lease_ttl: DEFAULT_LEASE_TTL,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }

    /// The acquired pod id, in `[0, MAX_NODE)`.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.acquired_id
    }

    /// Release the slot: stop the renewal worker and delete the slot key.
    /// Idempotent — later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`PodIdError::Cache`] when the delete fails; the renewal
    /// worker is stopped regardless.
    pub async fn release(&self, ctx: &Context) -> Result<(), PodIdError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _guard = self.release_guard.lock().await;
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.stop.cancel();
        debug!(key = %self.key, "releasing pod id slot");
        self.cache
            .delete(ctx, &self.key)
            .await
            .map_err(PodIdError::Cache)
    }

    async fn init(&mut self, ctx: &Context) -> Result<(), PodIdError> {
        for slot in 0..MAX_NODE {
            let id_key = self.id_key(slot);

            let owner = self.read_slot(ctx, &id_key).await?;
            if !owner.is_empty() && owner != self.ip {
                continue;
            }

            match self.acquire_slot(ctx, slot).await {
                Ok(()) => {
                    self.acquired_id = slot;
                    self.key = id_key;
                    self.start_renew_worker();
                    info!(slot, ip = %self.ip, "pod id acquired");
                    return Ok(());
                }
                Err(AcquireError::AlreadyAcquired | AcquireError::Contended) => {}
                Err(AcquireError::Cache(err)) => return Err(PodIdError::Cache(err)),
                Err(AcquireError::Lock(err)) => return Err(PodIdError::Lock(err)),
            }
        }

        Err(PodIdError::Exhausted)
    }

    async fn read_slot(&self, ctx: &Context, key: &str) -> Result<String, PodIdError> {
        match self.cache.get_string(ctx, key).await {
            Ok(value) => Ok(value),
            Err(CacheError::NotFound) => Ok(String::new()),
            Err(err) => Err(PodIdError::Cache(err)),
        }
    }

    /// Claim one slot under its lock: re-read the owner (losing a race shows
    /// up here), then write our ip with the full lease TTL.
    async fn acquire_slot(&self, ctx: &Context, slot: i64) -> Result<(), AcquireError> {
        let ctx = if ctx.deadline().is_some() {
            ctx.clone()
        } else {
            ctx.with_timeout(self.init_timeout)
        };

        let lock_key = self.lock_key(slot);
        let lock_ttl = ctx.remaining().unwrap_or(self.init_timeout);

        match self.lock.try_lock(&ctx, &lock_key, lock_ttl).await {
            Ok(()) => {}
            Err(LockError::Contended) => return Err(AcquireError::Contended),
            Err(err) => return Err(AcquireError::Lock(err)),
        }

        let result = self.acquire_locked(&ctx, slot).await;
        self.unlock(&ctx, &lock_key).await;
        result
    }

    async fn acquire_locked(&self, ctx: &Context, slot: i64) -> Result<(), AcquireError> {
        let id_key = self.id_key(slot);

        let owner = match self.cache.get_string(ctx, &id_key).await {
            Ok(value) => value,
            Err(CacheError::NotFound) => String::new(),
            Err(err) => return Err(AcquireError::Cache(err)),
        };
        if !owner.is_empty() && owner != self.ip {
            return Err(AcquireError::AlreadyAcquired);
        }

        self.cache
            .set(ctx, &id_key, &self.ip, self.lease_ttl)
            .await
            .map_err(AcquireError::Cache)
    }

    async fn unlock(&self, ctx: &Context, key: &str) {
        // the acquisition context may already be done; give the unlock a
        // short grace window of its own
        let ctx = if ctx.is_cancelled() {
            Context::background().with_timeout(UNLOCK_GRACE)
        } else {
            ctx.clone()
        };

        if let Err(err) = self.lock.unlock(&ctx, key).await {
            error!(key = %key, error = %err, "failed to unlock pod id slot");
        }
    }

    fn start_renew_worker(&self) {
        let cache = Arc::clone(&self.cache);
        let key = self.key.clone();
        let ip = self.ip.clone();
        let lease_ttl = self.lease_ttl;
        let renew_set_timeout = self.renew_set_timeout;
        let renew_wait = self.renew_wait;
        let stop = self.stop.clone();

        tokio::spawn(async move {
            // first fire happens a full renew_wait from now, never at startup
            let start = tokio::time::Instant::now() + renew_wait;
            let mut ticker = tokio::time::interval_at(start, renew_wait);

            loop {
                tokio::select! {
                    () = stop.cancelled() => {
                        debug!(key = %key, "renewal worker stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if stop.is_cancelled() {
                            continue;
                        }
                        let ctx = Context::background().with_timeout(renew_set_timeout);
                        if let Err(err) = cache.set(&ctx, &key, &ip, lease_ttl).await {
                            error!(key = %key, error = %err, "failed to renew pod id lease");
                        }
                    }
                }
            }
        });
    }

    fn id_key(&self, slot: i64) -> String {
        format!("{}:distributed_pod:id:{slot}", self.prefix)
    }

    fn lock_key(&self, slot: i64) -> String {
        format!("{}:distributed_pod:lock:{slot}", self.prefix)
    }
}

fn discover_ip() -> Result<String, PodIdError> {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(ip)) if !ip.is_loopback() => Ok(ip.to_string()),
        Ok(addr) => Err(PodIdError::IpUnavailable(format!(
            "no usable non-loopback ipv4 address, got {addr}"
        ))),
        Err(err) => Err(PodIdError::IpUnavailable(err.to_string())),
    }
}
