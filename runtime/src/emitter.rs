//! Publish pipeline.
//!
//! The emitter resolves its transport from the registry, enriches metadata on
//! every publish and runs in one of two modes:
//!
//! - **Direct**: `publish` calls the sender synchronously and returns its
//!   result.
//! - **Hybrid** (a writer is configured): `publish` appends the message to
//!   the outbox through the writer, hands it to a background flush worker and
//!   returns. The flush worker sends through the transport and deletes the
//!   outbox row only after the send succeeds. The caller observes a publish
//!   failure iff the outbox append fails.
//!
//! # Durability
//!
//! Hybrid mode is at-least-once with external catch-up: if the process dies
//! between the append and the send, the row survives and an outbox scanner
//! (outside this crate) re-emits it. On a send failure the row is never
//! deleted; configure `flush_retry` to also retry in-process with backoff
//! before leaving the row to the scanner.
//!
//! The flush worker runs on a background context rather than the caller's:
//! a request-scoped cancellation must not abort deliveries that are already
//! past their outbox append.

use crate::metrics::{EVENT_FLUSH_FAILURES_TOTAL, EVENT_PUBLISHED_TOTAL};
use crate::registry::{self, ConfigError};
use crate::retry::{RetryPolicy, retry_with_backoff};
use chrono::Utc;
use conveyor_core::config::{EmitterConfig, EventConfig};
use conveyor_core::context::Context;
use conveyor_core::message::{
    EventMessage, META_EVENT, META_HASH, META_TIMESTAMP, META_VERSION, MessageError, Metadata,
    payload_hash,
};
use conveyor_core::transport::{Sender, TransportError, Writer};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Errors from emitter construction and publishing.
#[derive(Error, Debug)]
pub enum EmitterError {
    /// Driver resolution failed at construction.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The caller payload could not be serialized.
    #[error(transparent)]
    Payload(#[from] MessageError),

    /// Hybrid mode: the outbox append failed, nothing was published.
    #[error("failed to append message to outbox: {0}")]
    Outbox(#[source] TransportError),

    /// Direct mode: the transport rejected the send.
    #[error("failed to send message: {0}")]
    Send(#[source] TransportError),
}

/// Publisher with optional transactional-outbox hybrid mode.
pub struct Emitter {
    sender: Arc<dyn Sender>,
    writer: Option<Arc<dyn Writer>>,
    flush_tx: Option<mpsc::UnboundedSender<EventMessage>>,
    event_config: EventConfig,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("hybrid_mode", &self.writer.is_some())
            .field("event_config", &self.event_config)
            .finish_non_exhaustive()
    }
}

impl Emitter {
    /// Build an emitter from config, resolving drivers from the registry.
    /// Configuring a writer enables hybrid mode and starts the flush worker.
    ///
    /// # Errors
    ///
    /// Returns [`EmitterError::Config`] when a driver tag is unknown or its
    /// construction fails.
    pub async fn new(config: EmitterConfig) -> Result<Self, EmitterError> {
        let sender = registry::resolve_sender(&config.sender).await?;
        let event_config = config.event_config.unwrap_or_default();

        let mut emitter = Self {
            sender: Arc::clone(&sender),
            writer: None,
            flush_tx: None,
            event_config,
        };

        if let Some(writer_config) = config.writer {
            let writer = registry::resolve_writer(&writer_config).await?;
            let (flush_tx, flush_rx) = mpsc::unbounded_channel();
            let retry = config.flush_retry.map(RetryPolicy::from);

            info!("hybrid mode enabled");
            tokio::spawn(flush_worker(flush_rx, sender, Arc::clone(&writer), retry));

            emitter.writer = Some(writer);
            emitter.flush_tx = Some(flush_tx);
        }

        Ok(emitter)
    }

    /// Whether a writer is configured (hybrid mode).
    #[must_use]
    pub const fn is_hybrid(&self) -> bool {
        self.writer.is_some()
    }

    /// Publish one event.
    ///
    /// The topic is resolved through the event map (an unmapped event is its
    /// own topic). Metadata is the value-copy merge of the default template,
    /// the event template and the caller's map — the caller's map is never
    /// mutated — enriched with the payload hash, the publish timestamp (unix
    /// seconds), the event name, and a version of 1 when absent.
    ///
    /// # Errors
    ///
    /// Returns [`EmitterError::Payload`] when the payload cannot be
    /// serialized, [`EmitterError::Outbox`] when the hybrid append fails, or
    /// [`EmitterError::Send`] when the direct-mode send fails.
    pub async fn publish<T>(
        &self,
        ctx: &Context,
        event: &str,
        key: &str,
        payload: &T,
        metadata: Option<&Metadata>,
    ) -> Result<(), EmitterError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let topic = self.event_config.topic_for(event).to_string();

        let mut enriched = self.event_config.metadata_for(event);
        if let Some(caller) = metadata {
            enriched.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        enriched.insert(META_HASH.to_string(), Value::String(payload_hash(payload)?));
        enriched.insert(META_TIMESTAMP.to_string(), Value::from(Utc::now().timestamp()));
        enriched.insert(META_EVENT.to_string(), Value::String(event.to_string()));
        enriched
            .entry(META_VERSION.to_string())
            .or_insert_with(|| Value::from(1));

        let message = EventMessage {
            topic: topic.clone(),
            key: key.to_string(),
            data: serde_json::to_value(payload).map_err(MessageError::Serialize)?,
            metadata: enriched,
        };

        match (&self.writer, &self.flush_tx) {
            (Some(writer), Some(flush_tx)) => {
                writer.send(ctx, &message).await.map_err(EmitterError::Outbox)?;
                metrics::counter!(EVENT_PUBLISHED_TOTAL, "topic" => topic, "mode" => "hybrid")
                    .increment(1);
                if flush_tx.send(message).is_err() {
                    warn!("flush worker is gone; outbox row awaits external catch-up");
                }
                Ok(())
            }
            _ => {
                self.sender
                    .send(ctx, &message)
                    .await
                    .map_err(EmitterError::Send)?;
                metrics::counter!(EVENT_PUBLISHED_TOTAL, "topic" => topic, "mode" => "direct")
                    .increment(1);
                Ok(())
            }
        }
    }
}

/// Drains published messages: send through the transport, then delete the
/// outbox row. Exits when the emitter is dropped and the channel closes.
async fn flush_worker(
    mut flush_rx: mpsc::UnboundedReceiver<EventMessage>,
    sender: Arc<dyn Sender>,
    writer: Arc<dyn Writer>,
    retry: Option<RetryPolicy>,
) {
    let ctx = Context::background();
    info!("running event emitter in hybrid mode");

    while let Some(message) = flush_rx.recv().await {
        let sent = match &retry {
            Some(policy) => {
                retry_with_backoff(policy.clone(), || sender.send(&ctx, &message)).await
            }
            None => sender.send(&ctx, &message).await,
        };

        if let Err(err) = sent {
            metrics::counter!(EVENT_FLUSH_FAILURES_TOTAL, "topic" => message.topic.clone())
                .increment(1);
            error!(
                topic = %message.topic,
                key = %message.key,
                error = %err,
                "failed to send outbox message; row retained for catch-up"
            );
            continue;
        }

        if let Err(err) = writer.delete(&ctx, &message).await {
            error!(
                topic = %message.topic,
                error = %err,
                "failed to delete outbox row after send"
            );
            continue;
        }
    }

    debug!("emitter flush worker stopped");
}
