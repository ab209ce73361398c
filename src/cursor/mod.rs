//! Durable per-subscriber stream positions.

mod storage;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::db::StorageError;

pub use storage::{CursorStorage, InMemoryCursorStorage, SeaOrmCursorStorage};

const LOG_TARGET: &str = "poker_event_core::cursor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub cursor_id: String,
    pub stream_id: String,
    pub subscriber_id: String,
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn cursor_id(stream_id: &str, subscriber_id: &str) -> String {
    format!("{stream_id}:{subscriber_id}")
}

/// Read-through, write-through cache over [`CursorStorage`], keyed on the
/// `(stream_id, subscriber_id)` pair. Updates are last-write-wins.
pub struct CursorStore {
    storage: Arc<dyn CursorStorage>,
    cache: DashMap<(String, String), Cursor>,
    clock: Arc<dyn Clock>,
}

impl CursorStore {
    pub fn new(storage: Arc<dyn CursorStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            cache: DashMap::new(),
            clock,
        }
    }

    pub async fn get_cursor(
        &self,
        stream_id: &str,
        subscriber_id: &str,
    ) -> Result<Option<Cursor>, StorageError> {
        let key = (stream_id.to_string(), subscriber_id.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Some(cached.clone()));
        }
        let loaded = self.storage.load(stream_id, subscriber_id).await?;
        if let Some(cursor) = &loaded {
            self.cache.insert(key, cursor.clone());
        }
        Ok(loaded)
    }

    pub async fn update_cursor(
        &self,
        stream_id: &str,
        subscriber_id: &str,
        position: i64,
    ) -> Result<Cursor, StorageError> {
        let id = cursor_id(stream_id, subscriber_id);
        let now = self.clock.now();
        let cursor = self
            .storage
            .upsert(Cursor {
                cursor_id: id.clone(),
                stream_id: stream_id.to_string(),
                subscriber_id: subscriber_id.to_string(),
                position,
                created_at: now,
                updated_at: now,
            })
            .await?;
        debug!(target: LOG_TARGET, cursor_id = %id, position, "cursor updated");
        self.cache
            .insert((stream_id.to_string(), subscriber_id.to_string()), cursor.clone());
        Ok(cursor)
    }
}
