//! # Conveyor Core
//!
//! Contracts and data model for the Conveyor event pipeline.
//!
//! This crate defines everything the runtime and the transport drivers agree
//! on, and nothing else:
//!
//! - **Envelope**: [`message::EventMessage`] on the publish side,
//!   [`message::EventConsumeMessage`] on the consume side, with the JSON wire
//!   contract and content hashing.
//! - **Transport capabilities**: [`transport::Sender`], [`transport::Writer`],
//!   [`transport::Listener`], [`transport::MessageIterator`] and
//!   [`transport::ConsumeMessage`].
//! - **Outbox**: [`outbox::OutboxRecord`] with its content-derived id and the
//!   [`outbox::OutboxStore`] contract hybrid publishing writes through.
//! - **Coordination contracts**: [`cache::Cache`] and
//!   [`lock::DistributedLock`], the surface the pod-id allocator needs.
//! - **Cancellation**: [`context::Context`], threaded through every
//!   suspension point.
//! - **Configuration**: serde types mirroring the deployment config schema.
//!
//! Concrete drivers register with the runtime registry by string tag; this
//! crate never names one.

pub mod cache;
pub mod config;
pub mod context;
pub mod lock;
pub mod message;
pub mod outbox;
pub mod transport;

pub use cache::{Cache, CacheError};
pub use config::{
    ConsumerConfig, DEFAULT_CONSUMER_WORKERS, DriverConfig, EmitterConfig, EventConfig, PoolEntry,
    RetryPolicyConfig, WorkerPoolConfig,
};
pub use context::{Context, ContextError};
pub use lock::{DistributedLock, LockError};
pub use message::{
    EventConsumeMessage, EventMessage, META_DEFAULT, META_EVENT, META_HASH, META_TIMESTAMP,
    META_VERSION, MessageError, Metadata, payload_hash,
};
pub use outbox::{OutboxError, OutboxRecord, OutboxStore};
pub use transport::{
    ConsumeMessage, Listener, MessageIterator, Sender, TransportError, Writer,
};
