use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Set};

use crate::db::entity::cursors;
use crate::db::StorageError;

use super::Cursor;

#[async_trait]
pub trait CursorStorage: Send + Sync {
    async fn load(
        &self,
        stream_id: &str,
        subscriber_id: &str,
    ) -> Result<Option<Cursor>, StorageError>;

    /// Insert or overwrite position and `updated_at`; an existing row keeps
    /// its `created_at`. Returns the stored row.
    async fn upsert(&self, cursor: Cursor) -> Result<Cursor, StorageError>;
}

fn model_to_cursor(model: cursors::Model) -> Cursor {
    Cursor {
        cursor_id: model.cursor_id,
        stream_id: model.stream_id,
        subscriber_id: model.subscriber_id,
        position: model.position,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

pub struct SeaOrmCursorStorage {
    connection: DatabaseConnection,
}

impl SeaOrmCursorStorage {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CursorStorage for SeaOrmCursorStorage {
    async fn load(
        &self,
        stream_id: &str,
        subscriber_id: &str,
    ) -> Result<Option<Cursor>, StorageError> {
        Ok(cursors::Entity::find_by_id((stream_id.to_string(), subscriber_id.to_string()))
            .one(&self.connection)
            .await?
            .map(model_to_cursor))
    }

    async fn upsert(&self, cursor: Cursor) -> Result<Cursor, StorageError> {
        let active = cursors::ActiveModel {
            cursor_id: Set(cursor.cursor_id.clone()),
            stream_id: Set(cursor.stream_id.clone()),
            subscriber_id: Set(cursor.subscriber_id.clone()),
            position: Set(cursor.position),
            created_at: Set(cursor.created_at),
            updated_at: Set(cursor.updated_at),
        };
        cursors::Entity::insert(active)
            .on_conflict(
                OnConflict::columns([cursors::Column::StreamId, cursors::Column::SubscriberId])
                    .update_columns([cursors::Column::Position, cursors::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.connection)
            .await?;
        self.load(&cursor.stream_id, &cursor.subscriber_id)
            .await?
            .ok_or_else(|| StorageError::corrupt(format!("cursor {} vanished", cursor.cursor_id)))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCursorStorage {
    rows: Arc<RwLock<HashMap<(String, String), Cursor>>>,
}

impl InMemoryCursorStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStorage for InMemoryCursorStorage {
    async fn load(
        &self,
        stream_id: &str,
        subscriber_id: &str,
    ) -> Result<Option<Cursor>, StorageError> {
        let key = (stream_id.to_string(), subscriber_id.to_string());
        Ok(self.rows.read().get(&key).cloned())
    }

    async fn upsert(&self, mut cursor: Cursor) -> Result<Cursor, StorageError> {
        let key = (cursor.stream_id.clone(), cursor.subscriber_id.clone());
        let mut rows = self.rows.write();
        if let Some(existing) = rows.get(&key) {
            cursor.created_at = existing.created_at;
        }
        rows.insert(key, cursor.clone());
        Ok(cursor)
    }
}
