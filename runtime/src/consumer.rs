//! Consume pipeline: subscription registry and lifecycle.
//!
//! A consumer is built from config (listener + strategy resolved from the
//! registry), wired up while idle — middlewares first, then subscriptions —
//! and then started. Stopping closes a shared stop signal and waits for every
//! worker in every pool to finish; [`Consumer::stop_with_context`] bounds the
//! wait by the caller's context.
//!
//! ```text
//! IDLE --start()--> RUNNING --stop()--> STOPPING --drained--> IDLE
//! ```
//!
//! Subscriptions are only legal while idle; middleware registration is only
//! legal before the first subscription.

use crate::handler::{EventHandler, EventMiddleware};
use crate::registry::{self, ConfigError};
use crate::strategy::{CommitOnSuccess, ConsumeStrategy};
use crate::worker_pool::ListenerWorkerPool;
use conveyor_core::config::{ConsumerConfig, EventConfig, WorkerPoolConfig};
use conveyor_core::context::{Context, ContextError};
use conveyor_core::transport::{Listener, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Errors from consumer construction and lifecycle.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// `start` or `subscribe` was called while the consumer was running.
    #[error("consumer already started")]
    AlreadyStarted,

    /// `use_middleware` was called after the first subscription. The chain
    /// is composed at subscribe time, so later registrations would silently
    /// miss earlier subscriptions.
    #[error("middlewares must be registered before the first subscribe")]
    MiddlewareAfterSubscribe,

    /// Driver resolution failed at construction.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listener refused the subscription.
    #[error("failed to get listener iterator for topic '{topic}': {source}")]
    Listen {
        /// The (already translated) topic.
        topic: String,
        /// The driver error.
        #[source]
        source: TransportError,
    },

    /// The stop wait hit the caller's deadline. The pools keep draining in
    /// the background and the consumer still returns to idle.
    #[error("timed out waiting for consumer to stop: {0}")]
    StopTimeout(#[source] ContextError),
}

struct RunningState {
    stop: CancellationToken,
    shutdown: oneshot::Receiver<()>,
}

/// Subscription registry and worker-pool lifecycle for one listener.
pub struct Consumer {
    listener: Arc<dyn Listener>,
    strategy: Arc<dyn ConsumeStrategy>,
    event_config: EventConfig,
    worker_pool_config: WorkerPoolConfig,
    middlewares: Vec<EventMiddleware>,
    pools: Vec<ListenerWorkerPool>,
    running: AtomicBool,
    state: Mutex<Option<RunningState>>,
}

impl Consumer {
    /// Build a consumer from config, resolving the listener and the consume
    /// strategy (default: `commit_on_success`) from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Config`] when a driver tag is unknown or its
    /// construction fails.
    pub async fn new(config: ConsumerConfig) -> Result<Self, ConsumerError> {
        let listener = registry::resolve_listener(&config.listener).await?;
        let strategy: Arc<dyn ConsumeStrategy> = match config.consume_strategy {
            Some(strategy_config) => registry::resolve_strategy(&strategy_config).await?,
            None => Arc::new(CommitOnSuccess),
        };

        Ok(Self {
            listener,
            strategy,
            event_config: config.event_config.unwrap_or_default(),
            worker_pool_config: config.worker_pool_config.unwrap_or_default(),
            middlewares: Vec::new(),
            pools: Vec::new(),
            running: AtomicBool::new(false),
            state: Mutex::new(None),
        })
    }

    /// Replace the consume strategy. Only meaningful before subscriptions
    /// are registered.
    pub fn with_consume_strategy(&mut self, strategy: Arc<dyn ConsumeStrategy>) {
        self.strategy = strategy;
    }

    /// Register a middleware. The first registered middleware runs outermost.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::MiddlewareAfterSubscribe`] once a
    /// subscription exists — a programmer error, reported as an error value
    /// rather than a panic.
    pub fn use_middleware(&mut self, middleware: EventMiddleware) -> Result<(), ConsumerError> {
        if !self.pools.is_empty() {
            return Err(ConsumerError::MiddlewareAfterSubscribe);
        }
        self.middlewares.push(middleware);
        Ok(())
    }

    /// Subscribe a handler to an event/group pair. Logical names are
    /// translated through the event config, the middleware chain is composed
    /// once here, and the worker count comes from the pool config precedence
    /// (topic.group → topic.default → root default → 1).
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::AlreadyStarted`] when called while running,
    /// or [`ConsumerError::Listen`] when the listener refuses the topic.
    pub async fn subscribe(
        &mut self,
        ctx: &Context,
        event: &str,
        group: &str,
        handler: EventHandler,
    ) -> Result<(), ConsumerError> {
        if self.is_running() {
            return Err(ConsumerError::AlreadyStarted);
        }

        let topic = self.event_config.topic_for(event).to_string();
        let group = self.event_config.group_for(group).to_string();

        let iterator =
            self.listener
                .listen(ctx, &topic, &group)
                .await
                .map_err(|source| ConsumerError::Listen {
                    topic: topic.clone(),
                    source,
                })?;

        let mut handler = handler;
        for middleware in self.middlewares.iter().rev() {
            handler = middleware.wrap(handler);
        }

        let workers = self.worker_pool_config.workers_for(&topic, &group);
        debug!(topic = %topic, group = %group, workers, "subscription registered");
        self.pools.push(ListenerWorkerPool::new(
            workers,
            iterator,
            handler,
            Arc::clone(&self.strategy),
            topic,
            group,
        ));

        Ok(())
    }

    /// Start every registered subscription pool. Must be called from within
    /// a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::AlreadyStarted`] on re-entry.
    pub fn start(&self) -> Result<(), ConsumerError> {
        if self.is_running() {
            return Err(ConsumerError::AlreadyStarted);
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        // double-checked: another task may have started between the atomic
        // check and taking the lock
        if self.is_running() {
            return Err(ConsumerError::AlreadyStarted);
        }

        let stop = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.pools.len());
        for pool in &self.pools {
            let pool = pool.clone();
            let stop = stop.clone();
            handles.push(tokio::spawn(pool.run(stop)));
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            for handle in handles {
                let _ = handle.await;
            }
            let _ = shutdown_tx.send(());
        });

        *state = Some(RunningState {
            stop,
            shutdown: shutdown_rx,
        });
        self.running.store(true, Ordering::SeqCst);
        info!(pools = self.pools.len(), "consumer started");

        Ok(())
    }

    /// Gracefully stop, waiting for every worker to complete.
    ///
    /// # Errors
    ///
    /// Never times out; see [`Consumer::stop_with_context`] for a bounded
    /// wait.
    pub async fn stop(&self) -> Result<(), ConsumerError> {
        self.stop_with_context(&Context::background()).await
    }

    /// Gracefully stop, waiting at most until the caller's context ends.
    /// On timeout the error surfaces but the pools keep draining in the
    /// background; either way the consumer returns to idle.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::StopTimeout`] when the context ends first.
    pub async fn stop_with_context(&self, ctx: &Context) -> Result<(), ConsumerError> {
        if !self.is_running() {
            return Ok(());
        }

        let state = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

            // double-checked: another task may have stopped first
            if !self.is_running() {
                return Ok(());
            }
            state.take()
        };

        let Some(mut state) = state else {
            return Ok(());
        };

        info!("stopping consumer");
        state.stop.cancel();

        debug!("waiting for all workers to stop");
        let result = tokio::select! {
            () = ctx.cancelled() => {
                error!("timeout waiting for consumer to stop");
                Err(ConsumerError::StopTimeout(
                    ctx.error().unwrap_or(ContextError::Canceled),
                ))
            }
            _ = &mut state.shutdown => Ok(()),
        };

        self.running.store(false, Ordering::SeqCst);
        info!("consumer stopped");
        result
    }

    /// Whether the consumer is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Total worker count across all registered subscriptions.
    #[must_use]
    pub fn total_workers(&self) -> usize {
        self.pools.iter().map(ListenerWorkerPool::workers).sum()
    }
}
