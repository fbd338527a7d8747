//! # Conveyor Runtime
//!
//! The engine of the Conveyor event pipeline: publishing, consuming, and the
//! pod-id coordination primitive, all over the contracts in `conveyor-core`.
//!
//! ## Components
//!
//! - [`emitter::Emitter`]: publish API with metadata enrichment and an
//!   optional transactional-outbox hybrid mode.
//! - [`consumer::Consumer`]: subscription registry, middleware chain, and
//!   lifecycle over per-subscription worker pools.
//! - [`strategy`]: pluggable commit strategies (`always_commit`,
//!   `commit_on_success`).
//! - [`registry`]: process-wide driver registries keyed by string tag, with
//!   the `logger` reference driver pre-registered.
//! - [`outbox_writer::OutboxWriter`]: adapts any `OutboxStore` into the
//!   transport `Writer` capability.
//! - [`pod_id::DistributedPodId`]: lease-based pod identity in
//!   `[0, MAX_NODE)` for snowflake-style generators.
//! - [`retry`] and [`metrics`]: backoff policy and Prometheus wiring.
//!
//! ## Publish flow
//!
//! ```text
//! publish → enrich metadata → (hybrid? outbox append, enqueue) → send → (hybrid? outbox delete)
//! ```
//!
//! ## Consume flow
//!
//! ```text
//! listen(topic, group) → iterator → worker pool → middleware chain → strategy → handler + commit
//! ```

pub mod consumer;
pub mod emitter;
pub mod handler;
pub mod logger;
pub mod metrics;
pub mod outbox_writer;
pub mod pod_id;
pub mod registry;
pub mod retry;
pub mod strategy;
mod worker_pool;

pub use consumer::{Consumer, ConsumerError};
pub use emitter::{Emitter, EmitterError};
pub use handler::{EventHandler, EventMiddleware, handler_fn, middleware_fn};
pub use logger::LoggerDriver;
pub use outbox_writer::OutboxWriter;
pub use pod_id::{DistributedPodId, MAX_NODE, NODE_BITS, PodIdError};
pub use registry::{
    ConfigError, ListenerFactory, SenderFactory, StrategyFactory, WriterFactory, register_listener,
    register_sender, register_strategy, register_writer,
};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use strategy::{AlwaysCommit, CommitOnSuccess, ConsumeStrategy, StrategyError};
