//! Per-subscription worker pool.
//!
//! One pool per subscription runs `workers` concurrent consumers over a
//! shared iterator. Each worker loops serially: pull one message, run the
//! consume strategy, pull the next. There is no cross-worker ordering.
//!
//! # Stop semantics
//!
//! Every retrieval runs as its own task under a child context. When the stop
//! signal fires, the worker cancels the in-flight job's context and then
//! waits for the job to finish before exiting; a handler can therefore
//! observe cancellation and complete cleanup, and stop never returns while a
//! handler is still executing. Cancellations are logged at warn on this path,
//! real failures at error. A panic inside a job surfaces as a join error and
//! is treated like a failed job.

use crate::handler::EventHandler;
use crate::metrics::EVENT_CONSUME_DURATION_SECONDS;
use crate::strategy::{ConsumeStrategy, StrategyError};
use conveyor_core::context::Context;
use conveyor_core::transport::{MessageIterator, TransportError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span, warn};

#[derive(Error, Debug)]
enum JobError {
    #[error("failed to get next item: {0}")]
    Next(#[source] TransportError),

    #[error("failed to consume message topic '{topic}' group '{group}': {source}")]
    Consume {
        topic: String,
        group: String,
        #[source]
        source: StrategyError,
    },
}

impl JobError {
    fn is_cancellation(&self) -> bool {
        matches!(self, Self::Next(err) if err.is_cancellation())
    }
}

struct PoolInner {
    workers: usize,
    iterator: Arc<dyn MessageIterator>,
    handler: EventHandler,
    strategy: Arc<dyn ConsumeStrategy>,
    topic: String,
    group: String,
}

/// Worker pool for one subscription.
#[derive(Clone)]
pub(crate) struct ListenerWorkerPool {
    inner: Arc<PoolInner>,
}

impl ListenerWorkerPool {
    pub(crate) fn new(
        workers: usize,
        iterator: Arc<dyn MessageIterator>,
        handler: EventHandler,
        strategy: Arc<dyn ConsumeStrategy>,
        topic: String,
        group: String,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                workers,
                iterator,
                handler,
                strategy,
                topic,
                group,
            }),
        }
    }

    pub(crate) fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Run the pool until the stop signal fires and every worker has drained,
    /// then close the iterator.
    pub(crate) async fn run(self, stop: CancellationToken) {
        let mut workers = JoinSet::new();
        for _ in 0..self.inner.workers {
            let pool = self.clone();
            let stop = stop.clone();
            workers.spawn(async move { pool.worker(stop).await });
        }

        while workers.join_next().await.is_some() {}

        if let Err(err) = self.inner.iterator.close().await {
            error!(topic = %self.inner.topic, error = %err, "failed to close iterator");
        }
    }

    async fn worker(&self, stop: CancellationToken) {
        loop {
            if stop.is_cancelled() {
                debug!(topic = %self.inner.topic, "stop processing jobs");
                return;
            }

            // The job owns a context that is NOT derived from the stop
            // signal: on stop the worker cancels it explicitly and then
            // waits for the job, so in-flight work always completes.
            let job_ctx = Context::background();
            let pool = self.clone();
            let ctx = job_ctx.clone();
            let mut job = tokio::spawn(async move { pool.retrieve_message(ctx).await });

            tokio::select! {
                () = stop.cancelled() => {
                    debug!(
                        topic = %self.inner.topic,
                        "stopping, cancel context and wait for the job to complete"
                    );
                    job_ctx.cancel();
                    match job.await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) if err.is_cancellation() => {
                            warn!(topic = %self.inner.topic, error = %err, "job canceled during shutdown");
                        }
                        Ok(Err(err)) => {
                            error!(topic = %self.inner.topic, error = %err, "unexpected error while canceling job");
                        }
                        Err(join_err) => log_join_error(&self.inner.topic, join_err),
                    }
                    return;
                }
                result = &mut job => {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            error!(
                                topic = %self.inner.topic,
                                group = %self.inner.group,
                                error = %err,
                                "failed to complete job"
                            );
                        }
                        Err(join_err) => log_join_error(&self.inner.topic, join_err),
                    }
                }
            }
        }
    }

    async fn retrieve_message(&self, ctx: Context) -> Result<(), JobError> {
        let ctx = ctx.with_group(self.inner.group.as_str());

        let message = self.inner.iterator.next(&ctx).await.map_err(JobError::Next)?;

        let span = info_span!(
            "consume_message",
            messaging.operation = "process",
            messaging.destination = %self.inner.topic,
            messaging.consumer_group = %self.inner.group,
        );
        if let Some(headers) = message.propagation_headers() {
            debug!(parent: &span, headers = ?headers, "extracted remote trace context");
        }

        let started = Instant::now();
        let result = self
            .inner
            .strategy
            .consume(&ctx, message.as_ref(), &self.inner.handler)
            .instrument(span)
            .await;

        let status = if result.is_ok() { "OK" } else { "ERROR" };
        metrics::histogram!(
            EVENT_CONSUME_DURATION_SECONDS,
            "topic" => self.inner.topic.clone(),
            "group" => self.inner.group.clone(),
            "status" => status,
        )
        .record(started.elapsed().as_secs_f64());

        result.map_err(|source| JobError::Consume {
            topic: self.inner.topic.clone(),
            group: self.inner.group.clone(),
            source,
        })
    }
}

fn log_join_error(topic: &str, err: JoinError) {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(topic = %topic, panic = %message, "job panicked");
    } else {
        debug!(topic = %topic, "job task aborted");
    }
}
