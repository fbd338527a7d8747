//! Prometheus metrics for the pipeline.
//!
//! Metric collection goes through the `metrics` facade; this module names
//! the metrics, registers their descriptions, and exposes a Prometheus
//! recorder whose rendered output the host application serves however it
//! likes (most embed it in their existing HTTP surface).
//!
//! # Example
//!
//! ```rust,no_run
//! use conveyor_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // later, from a scrape endpoint:
//! let body = recorder.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Histogram of consume latencies, labeled `topic`, `group` and `status`
/// (`OK` / `ERROR`).
pub const EVENT_CONSUME_DURATION_SECONDS: &str = "event_consume_duration_seconds";

/// Counter of published messages, labeled `topic` and `mode`
/// (`direct` / `hybrid`).
pub const EVENT_PUBLISHED_TOTAL: &str = "event_published_total";

/// Counter of hybrid flush failures that left the outbox row for external
/// catch-up, labeled `topic`.
pub const EVENT_FLUSH_FAILURES_TOTAL: &str = "event_flush_failures_total";

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the Prometheus exporter.
    #[error("failed to build metrics exporter: {0}")]
    Build(String),

    /// Failed to install the global recorder.
    #[error("failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder with the pipeline's metric descriptions and latency
/// buckets pre-configured.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create an uninstalled recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] when a recorder is already
    /// installed — in tests, where several instances may race, that case is
    /// tolerated and logged instead.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|err| MetricsError::Build(err.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("metrics recorder installed");
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                if reason.contains("already") {
                    tracing::warn!("metrics recorder already installed, skipping");
                    Ok(())
                } else {
                    Err(MetricsError::Install(reason))
                }
            }
        }
    }

    /// Render current metrics in the Prometheus exposition format.
    /// `None` until the recorder is installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_histogram!(
        EVENT_CONSUME_DURATION_SECONDS,
        "Time taken to consume one message, by topic, group and status"
    );
    describe_counter!(
        EVENT_PUBLISHED_TOTAL,
        "Messages published, by topic and emitter mode"
    );
    describe_counter!(
        EVENT_FLUSH_FAILURES_TOTAL,
        "Hybrid flush failures that left the outbox row for external catch-up"
    );
}
