//! In-memory outbox store.

use async_trait::async_trait;
use conveyor_core::context::Context;
use conveyor_core::outbox::{OutboxError, OutboxRecord, OutboxStore};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// [`OutboxStore`] over an ordered in-memory map, with row inspection for
/// assertions. Append follows the contract exactly: a duplicate id leaves
/// the existing row untouched and reports success.
#[derive(Default)]
pub struct MemoryOutboxStore {
    rows: Mutex<BTreeMap<String, OutboxRecord>>,
}

impl MemoryOutboxStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current rows, ordered by id.
    #[must_use]
    pub fn rows(&self) -> Vec<OutboxRecord> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Whether a row with this id exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn append(&self, ctx: &Context, record: &OutboxRecord) -> Result<(), OutboxError> {
        ctx.ensure_active()?;
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(record.id.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn delete(&self, ctx: &Context, id: &str) -> Result<(), OutboxError> {
        ctx.ensure_active()?;
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, value: &str) -> OutboxRecord {
        OutboxRecord {
            id: id.to_string(),
            topic: "t".to_string(),
            key: "k".to_string(),
            value: value.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_append_keeps_one_row_without_error() {
        let store = MemoryOutboxStore::new();
        let ctx = Context::background();

        store.append(&ctx, &record("a", "first")).await.unwrap();
        store.append(&ctx, &record("a", "second")).await.unwrap();

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "first");
    }

    #[tokio::test]
    async fn delete_of_absent_row_is_success() {
        let store = MemoryOutboxStore::new();
        let ctx = Context::background();
        store.delete(&ctx, "missing").await.unwrap();
        assert!(store.is_empty());
    }
}
