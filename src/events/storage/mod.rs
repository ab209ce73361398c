mod in_memory;
mod sea_orm;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::StorageError;
use crate::events::types::{EventFilter, EventId, EventPage, GameEvent, HandId};

pub use self::in_memory::{InMemoryEventStorage, RivalWrite};
pub use self::sea_orm::SeaOrmEventStorage;

/// Relational system of record for events and idempotency mappings.
#[async_trait]
pub trait EventStorage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn EventStorageTxn>, StorageError>;

    async fn find_idempotency(&self, key: &str) -> Result<Option<EventId>, StorageError>;

    async fn get_event(&self, event_id: &str) -> Result<Option<GameEvent>, StorageError>;

    /// Filtered page ordered by `(timestamp, sequence, event_id)` ascending.
    async fn query_events(&self, filter: &EventFilter) -> Result<EventPage, StorageError>;

    /// A hand's events ordered by ascending sequence.
    async fn load_hand_events(
        &self,
        hand_id: &HandId,
        limit: u64,
    ) -> Result<Vec<GameEvent>, StorageError>;
}

/// Writes staged inside one database transaction. Dropping without `commit`
/// discards every staged write.
#[async_trait]
pub trait EventStorageTxn: Send {
    async fn find_idempotency(&mut self, key: &str) -> Result<Option<EventId>, StorageError>;

    async fn insert_event(&mut self, event: &GameEvent) -> Result<(), StorageError>;

    async fn insert_idempotency(
        &mut self,
        key: &str,
        event_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>);
}
