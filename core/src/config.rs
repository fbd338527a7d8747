//! Configuration model for emitters and consumers.
//!
//! Everything here is plain serde data; the runtime resolves `DriverConfig`
//! tags against its registry at construction time. A full consumer config
//! looks like:
//!
//! ```json
//! {
//!   "listener": { "type": "logger" },
//!   "event_config": {
//!     "metadata":  { "default": { "source": "billing" } },
//!     "event_map": { "invoice_paid": "billing.invoices" },
//!     "group_map": { "mailer": "billing-mailer" }
//!   },
//!   "worker_pool_config": {
//!     "default": 4,
//!     "billing.invoices": { "default": 8, "billing-mailer": 2 }
//!   },
//!   "consume_strategy": { "type": "commit_on_success" }
//! }
//! ```

use crate::message::{META_DEFAULT, META_EVENT, Metadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Fallback worker count when no pool configuration matches.
pub const DEFAULT_CONSUMER_WORKERS: usize = 1;

/// A driver selection: registry tag plus opaque driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Registry tag, e.g. `"logger"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Driver-specific configuration, passed through untouched.
    #[serde(default)]
    pub config: Value,
}

impl DriverConfig {
    /// A driver selection with no driver-specific configuration.
    #[must_use]
    pub fn tag(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            config: Value::Null,
        }
    }
}

/// Logical-to-physical name translation and metadata templates, used
/// symmetrically by the emitter and the consumer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventConfig {
    /// Metadata templates keyed by event name, with `"default"` reserved for
    /// the template applied to every event.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Metadata>,

    /// Logical event name → physical topic. Unmapped events use their own
    /// name as the topic.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub event_map: HashMap<String, String>,

    /// Logical group name → physical group. Unmapped groups pass through.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub group_map: HashMap<String, String>,
}

impl EventConfig {
    /// Physical topic for a logical event name.
    #[must_use]
    pub fn topic_for<'a>(&'a self, event: &'a str) -> &'a str {
        self.event_map.get(event).map_or(event, String::as_str)
    }

    /// Physical group for a logical group name.
    #[must_use]
    pub fn group_for<'a>(&'a self, group: &'a str) -> &'a str {
        self.group_map.get(group).map_or(group, String::as_str)
    }

    /// Template metadata for an event: the default template, overlaid with
    /// the event-specific template, with the event name set. Always a fresh
    /// copy — the configured templates are never handed out by reference.
    #[must_use]
    pub fn metadata_for(&self, event: &str) -> Metadata {
        let mut metadata = Metadata::new();
        if let Some(defaults) = self.metadata.get(META_DEFAULT) {
            metadata.extend(defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(specific) = self.metadata.get(event) {
            metadata.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        metadata.insert(META_EVENT.to_string(), Value::String(event.to_string()));
        metadata
    }
}

/// One entry of the worker-pool table: either a bare worker count (the root
/// `"default"` key) or a per-group map for one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PoolEntry {
    /// A bare worker count.
    Workers(usize),
    /// Per-group worker counts for one topic; `"default"` is reserved for
    /// the topic-wide fallback.
    Groups(HashMap<String, usize>),
}

/// Worker counts per topic and group.
///
/// Lookup precedence: `topic.group` → `topic."default"` → root `"default"` →
/// [`DEFAULT_CONSUMER_WORKERS`]. Zero counts are treated as unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerPoolConfig(HashMap<String, PoolEntry>);

impl WorkerPoolConfig {
    /// Worker count for a subscription.
    #[must_use]
    pub fn workers_for(&self, topic: &str, group: &str) -> usize {
        if let Some(PoolEntry::Groups(groups)) = self.0.get(topic) {
            if let Some(&count) = groups.get(group) {
                if count > 0 {
                    return count;
                }
            }
            if let Some(&count) = groups.get(META_DEFAULT) {
                if count > 0 {
                    return count;
                }
            }
        }
        self.default_workers()
    }

    /// The root default worker count.
    #[must_use]
    pub fn default_workers(&self) -> usize {
        match self.0.get(META_DEFAULT) {
            Some(PoolEntry::Workers(count)) if *count > 0 => *count,
            _ => DEFAULT_CONSUMER_WORKERS,
        }
    }
}

/// Backoff configuration for the emitter's hybrid flush worker.
///
/// Presence of this config opts the flush worker into in-process retries;
/// when absent, a failed send leaves the outbox row for an external scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    /// Maximum retry attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Cap on the backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier applied per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

const fn default_max_retries() -> usize {
    3
}

const fn default_initial_delay_ms() -> u64 {
    100
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_multiplier() -> f64 {
    2.0
}

/// Emitter construction config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Downstream transport. Required.
    pub sender: DriverConfig,

    /// Outbox-backed writer; configuring one enables hybrid mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer: Option<DriverConfig>,

    /// Name translation and metadata templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_config: Option<EventConfig>,

    /// In-process retry for the hybrid flush worker. Absent means a failed
    /// send leaves the row for external catch-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_retry: Option<RetryPolicyConfig>,
}

/// Consumer construction config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Pull transport. Required.
    pub listener: DriverConfig,

    /// Name translation for events and groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_config: Option<EventConfig>,

    /// Worker counts per subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_pool_config: Option<WorkerPoolConfig>,

    /// Commit strategy; defaults to `commit_on_success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consume_strategy: Option<DriverConfig>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unmapped_event_is_its_own_topic() {
        let config = EventConfig::default();
        assert_eq!(config.topic_for("signup"), "signup");
    }

    #[test]
    fn event_and_group_maps_translate() {
        let config: EventConfig = serde_json::from_value(json!({
            "event_map": { "signup": "users.signup" },
            "group_map": { "mailer": "users-mailer" }
        }))
        .unwrap();
        assert_eq!(config.topic_for("signup"), "users.signup");
        assert_eq!(config.group_for("mailer"), "users-mailer");
        assert_eq!(config.group_for("other"), "other");
    }

    #[test]
    fn metadata_merges_default_then_event_template() {
        let config: EventConfig = serde_json::from_value(json!({
            "metadata": {
                "default": { "source": "core", "version": 1 },
                "signup":  { "source": "signup-service" }
            }
        }))
        .unwrap();

        let metadata = config.metadata_for("signup");
        assert_eq!(metadata["source"], json!("signup-service"));
        assert_eq!(metadata["version"], json!(1));
        assert_eq!(metadata["event"], json!("signup"));
    }

    #[test]
    fn metadata_for_unknown_event_only_names_the_event() {
        let config = EventConfig::default();
        let metadata = config.metadata_for("ping");
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata["event"], json!("ping"));
    }

    #[test]
    fn worker_pool_precedence() {
        let config: WorkerPoolConfig = serde_json::from_value(json!({
            "default": 4,
            "orders": { "default": 8, "billing": 2 }
        }))
        .unwrap();

        assert_eq!(config.workers_for("orders", "billing"), 2);
        assert_eq!(config.workers_for("orders", "shipping"), 8);
        assert_eq!(config.workers_for("users", "billing"), 4);
    }

    #[test]
    fn zero_counts_fall_through() {
        let config: WorkerPoolConfig = serde_json::from_value(json!({
            "default": 0,
            "orders": { "billing": 0 }
        }))
        .unwrap();

        assert_eq!(config.workers_for("orders", "billing"), DEFAULT_CONSUMER_WORKERS);
        assert_eq!(config.default_workers(), DEFAULT_CONSUMER_WORKERS);
    }

    #[test]
    fn consumer_config_deserializes_the_documented_schema() {
        let config: ConsumerConfig = serde_json::from_value(json!({
            "listener": { "type": "logger" },
            "worker_pool_config": { "default": 10 },
            "consume_strategy": { "type": "always_commit" }
        }))
        .unwrap();

        assert_eq!(config.listener.kind, "logger");
        assert_eq!(config.worker_pool_config.unwrap().default_workers(), 10);
        assert_eq!(config.consume_strategy.unwrap().kind, "always_commit");
    }
}
