//! Process-wide driver registries.
//!
//! Transports and strategies plug in by string tag: a factory is registered
//! once at program start, and emitter/consumer construction resolves the tag
//! from the deployment config. Lookup is strict — an unknown tag is a
//! configuration error, never a silent fallback.
//!
//! Registration must complete before the first emitter or consumer is built;
//! after that the registries are read-only by convention.
//!
//! The `logger` driver and the two built-in strategies are pre-registered.

use crate::logger::LoggerDriver;
use crate::strategy::{AlwaysCommit, CommitOnSuccess, ConsumeStrategy};
use async_trait::async_trait;
use conveyor_core::config::DriverConfig;
use conveyor_core::transport::{Listener, Sender, Writer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use thiserror::Error;

/// Built-in tag of the logger reference driver.
pub const LOGGER_DRIVER: &str = "logger";
/// Built-in tag of the commit-before-handle strategy.
pub const ALWAYS_COMMIT_STRATEGY: &str = "always_commit";
/// Built-in tag of the commit-after-success strategy (the default).
pub const COMMIT_ON_SUCCESS_STRATEGY: &str = "commit_on_success";

/// Configuration-time errors: unknown tags, bad driver config, failed
/// driver construction. All of them are fatal to the caller.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No factory is registered under the tag.
    #[error("unsupported {kind} driver: {tag}")]
    UnknownDriver {
        /// Which registry was consulted.
        kind: &'static str,
        /// The unresolved tag.
        tag: String,
    },

    /// The opaque driver config did not match what the driver expects.
    #[error("invalid {kind} driver config: {reason}")]
    InvalidDriverConfig {
        /// Which registry the driver belongs to.
        kind: &'static str,
        /// What the driver rejected.
        reason: String,
    },

    /// The factory ran but could not build the driver.
    #[error("failed to initialize {kind} driver '{tag}': {reason}")]
    DriverInit {
        /// Which registry the driver belongs to.
        kind: &'static str,
        /// The resolved tag.
        tag: String,
        /// What went wrong.
        reason: String,
    },
}

/// Builds a [`Sender`] from its opaque config.
#[async_trait]
pub trait SenderFactory: Send + Sync {
    /// Construct the driver.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the config is invalid or the backend is
    /// unreachable.
    async fn create(&self, config: Value) -> Result<Arc<dyn Sender>, ConfigError>;
}

/// Builds a [`Writer`] from its opaque config.
#[async_trait]
pub trait WriterFactory: Send + Sync {
    /// Construct the driver.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the config is invalid or the backend is
    /// unreachable.
    async fn create(&self, config: Value) -> Result<Arc<dyn Writer>, ConfigError>;
}

/// Builds a [`Listener`] from its opaque config.
#[async_trait]
pub trait ListenerFactory: Send + Sync {
    /// Construct the driver.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the config is invalid or the backend is
    /// unreachable.
    async fn create(&self, config: Value) -> Result<Arc<dyn Listener>, ConfigError>;
}

/// Builds a [`ConsumeStrategy`] from its opaque config.
#[async_trait]
pub trait StrategyFactory: Send + Sync {
    /// Construct the strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the config is invalid.
    async fn create(&self, config: Value) -> Result<Arc<dyn ConsumeStrategy>, ConfigError>;
}

/// Factory for strategies that take no configuration.
pub struct NoConfigStrategyFactory(Arc<dyn ConsumeStrategy>);

impl NoConfigStrategyFactory {
    /// Wrap an already-built strategy.
    pub fn new(strategy: impl ConsumeStrategy + 'static) -> Self {
        Self(Arc::new(strategy))
    }
}

#[async_trait]
impl StrategyFactory for NoConfigStrategyFactory {
    async fn create(&self, _config: Value) -> Result<Arc<dyn ConsumeStrategy>, ConfigError> {
        Ok(Arc::clone(&self.0))
    }
}

struct LoggerFactory;

#[async_trait]
impl SenderFactory for LoggerFactory {
    async fn create(&self, _config: Value) -> Result<Arc<dyn Sender>, ConfigError> {
        Ok(Arc::new(LoggerDriver::new()))
    }
}

#[async_trait]
impl WriterFactory for LoggerFactory {
    async fn create(&self, _config: Value) -> Result<Arc<dyn Writer>, ConfigError> {
        Ok(Arc::new(LoggerDriver::new()))
    }
}

#[async_trait]
impl ListenerFactory for LoggerFactory {
    async fn create(&self, _config: Value) -> Result<Arc<dyn Listener>, ConfigError> {
        Ok(Arc::new(LoggerDriver::new()))
    }
}

type Registry<F> = LazyLock<RwLock<HashMap<String, Arc<F>>>>;

static SENDERS: Registry<dyn SenderFactory> = LazyLock::new(|| {
    let mut registry: HashMap<String, Arc<dyn SenderFactory>> = HashMap::new();
    registry.insert(LOGGER_DRIVER.to_string(), Arc::new(LoggerFactory));
    RwLock::new(registry)
});

static WRITERS: Registry<dyn WriterFactory> = LazyLock::new(|| {
    let mut registry: HashMap<String, Arc<dyn WriterFactory>> = HashMap::new();
    registry.insert(LOGGER_DRIVER.to_string(), Arc::new(LoggerFactory));
    RwLock::new(registry)
});

static LISTENERS: Registry<dyn ListenerFactory> = LazyLock::new(|| {
    let mut registry: HashMap<String, Arc<dyn ListenerFactory>> = HashMap::new();
    registry.insert(LOGGER_DRIVER.to_string(), Arc::new(LoggerFactory));
    RwLock::new(registry)
});

static STRATEGIES: Registry<dyn StrategyFactory> = LazyLock::new(|| {
    let mut registry: HashMap<String, Arc<dyn StrategyFactory>> = HashMap::new();
    registry.insert(
        ALWAYS_COMMIT_STRATEGY.to_string(),
        Arc::new(NoConfigStrategyFactory::new(AlwaysCommit)),
    );
    registry.insert(
        COMMIT_ON_SUCCESS_STRATEGY.to_string(),
        Arc::new(NoConfigStrategyFactory::new(CommitOnSuccess)),
    );
    RwLock::new(registry)
});

/// Register a sender factory under a tag, replacing any previous one.
pub fn register_sender(tag: impl Into<String>, factory: Arc<dyn SenderFactory>) {
    SENDERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(tag.into(), factory);
}

/// Register a writer factory under a tag, replacing any previous one.
pub fn register_writer(tag: impl Into<String>, factory: Arc<dyn WriterFactory>) {
    WRITERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(tag.into(), factory);
}

/// Register a listener factory under a tag, replacing any previous one.
pub fn register_listener(tag: impl Into<String>, factory: Arc<dyn ListenerFactory>) {
    LISTENERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(tag.into(), factory);
}

/// Register a strategy factory under a tag, replacing any previous one.
pub fn register_strategy(tag: impl Into<String>, factory: Arc<dyn StrategyFactory>) {
    STRATEGIES
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(tag.into(), factory);
}

fn lookup<F: ?Sized>(
    registry: &'static Registry<F>,
    kind: &'static str,
    tag: &str,
) -> Result<Arc<F>, ConfigError> {
    registry
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(tag)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownDriver {
            kind,
            tag: tag.to_string(),
        })
}

/// Resolve and build the sender a config names.
///
/// # Errors
///
/// Returns [`ConfigError`] for unknown tags or failed construction.
pub async fn resolve_sender(config: &DriverConfig) -> Result<Arc<dyn Sender>, ConfigError> {
    let factory = lookup(&SENDERS, "sender", &config.kind)?;
    factory.create(config.config.clone()).await
}

/// Resolve and build the writer a config names.
///
/// # Errors
///
/// Returns [`ConfigError`] for unknown tags or failed construction.
pub async fn resolve_writer(config: &DriverConfig) -> Result<Arc<dyn Writer>, ConfigError> {
    let factory = lookup(&WRITERS, "writer", &config.kind)?;
    factory.create(config.config.clone()).await
}

/// Resolve and build the listener a config names.
///
/// # Errors
///
/// Returns [`ConfigError`] for unknown tags or failed construction.
pub async fn resolve_listener(config: &DriverConfig) -> Result<Arc<dyn Listener>, ConfigError> {
    let factory = lookup(&LISTENERS, "listener", &config.kind)?;
    factory.create(config.config.clone()).await
}

/// Resolve and build the consume strategy a config names.
///
/// # Errors
///
/// Returns [`ConfigError`] for unknown tags or failed construction.
pub async fn resolve_strategy(
    config: &DriverConfig,
) -> Result<Arc<dyn ConsumeStrategy>, ConfigError> {
    let factory = lookup(&STRATEGIES, "consume strategy", &config.kind)?;
    factory.create(config.config.clone()).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tags_are_config_errors() {
        let config = DriverConfig::tag("no-such-driver");
        let err = resolve_sender(&config).await.unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDriver { kind: "sender", .. }));
    }

    #[tokio::test]
    async fn builtin_drivers_resolve() {
        assert!(resolve_sender(&DriverConfig::tag(LOGGER_DRIVER)).await.is_ok());
        assert!(resolve_writer(&DriverConfig::tag(LOGGER_DRIVER)).await.is_ok());
        assert!(resolve_listener(&DriverConfig::tag(LOGGER_DRIVER)).await.is_ok());
        assert!(
            resolve_strategy(&DriverConfig::tag(COMMIT_ON_SUCCESS_STRATEGY))
                .await
                .is_ok()
        );
        assert!(
            resolve_strategy(&DriverConfig::tag(ALWAYS_COMMIT_STRATEGY))
                .await
                .is_ok()
        );
    }
}
