//! # Conveyor Testing
//!
//! In-memory implementations of the `conveyor-core` contracts plus test
//! helpers, for fast deterministic tests:
//!
//! - [`MemoryCache`]: TTL-aware key-value map.
//! - [`LocalLock`]: in-process lock with real mutual exclusion.
//! - [`MemoryOutboxStore`]: outbox rows with inspection helpers.
//! - [`ChannelListener`] / [`QueuedMessage`] / [`FuncIterator`]: scriptable
//!   pull side with commit tracking.
//! - [`CapturingSender`]: push side with recorded messages and injectable
//!   failures.
//! - `Fixed*Factory`: registry factories returning the instance the test
//!   body holds.
//! - [`LogCapture`]: shared-buffer `tracing` writer for log assertions.
//!
//! ## Example
//!
//! ```ignore
//! let listener = Arc::new(ChannelListener::new());
//! register_listener("my-test", Arc::new(FixedListenerFactory::new(listener.clone())));
//!
//! let mut consumer = Consumer::new(config).await?;
//! consumer.subscribe(&ctx, "topic", "group", handler).await?;
//! consumer.start()?;
//! listener.send_message(QueuedMessage::default().boxed());
//! ```

mod factories;
mod listener;
mod local_lock;
mod log_capture;
mod memory_cache;
mod memory_outbox;
mod sender;

pub use factories::{FixedListenerFactory, FixedSenderFactory, FixedWriterFactory};
pub use listener::{ChannelIterator, ChannelListener, FuncIterator, QueuedMessage};
pub use local_lock::LocalLock;
pub use log_capture::LogCapture;
pub use memory_cache::MemoryCache;
pub use memory_outbox::MemoryOutboxStore;
pub use sender::CapturingSender;
