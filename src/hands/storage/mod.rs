mod in_memory;
mod sea_orm;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::StorageError;
use crate::hands::record::{HandPage, HandRecord};

pub use self::in_memory::InMemoryHandStorage;
pub use self::sea_orm::SeaOrmHandStorage;

/// Keyed store of materialized hands. Listings are newest completion first.
#[async_trait]
pub trait HandRecordStorage: Send + Sync {
    /// Insert or replace the record for `record.hand_id` together with its
    /// participant index, atomically.
    async fn upsert(&self, record: &HandRecord, updated_at: DateTime<Utc>)
        -> Result<(), StorageError>;

    async fn get(&self, hand_id: &str) -> Result<Option<HandRecord>, StorageError>;

    async fn list_by_table(
        &self,
        table_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<HandPage, StorageError>;

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<HandPage, StorageError>;
}
