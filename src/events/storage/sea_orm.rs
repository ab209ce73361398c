use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use tracing::{debug, Level};

use crate::db::entity::{event_idempotency, events};
use crate::db::StorageError;
use crate::events::types::{EventFilter, EventId, EventPage, GameEvent, GameEventType, HandId};

use super::{EventStorage, EventStorageTxn};

const LOG_TARGET: &str = "poker_event_core::events::storage";

pub struct SeaOrmEventStorage {
    connection: DatabaseConnection,
}

impl SeaOrmEventStorage {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

pub(crate) fn model_to_event(model: events::Model) -> Result<GameEvent, StorageError> {
    let event_type: GameEventType = model.event_type.parse().map_err(|_| {
        StorageError::corrupt(format!(
            "event {} has unknown type {}",
            model.event_id, model.event_type
        ))
    })?;
    let payload = match model.payload {
        JsonValue::Object(map) => map,
        JsonValue::Null => Default::default(),
        _ => {
            return Err(StorageError::corrupt(format!(
                "event {} payload is not an object",
                model.event_id
            )))
        }
    };
    Ok(GameEvent {
        event_id: model.event_id,
        event_type,
        table_id: model.table_id,
        hand_id: model.hand_id,
        user_id: model.user_id,
        seat_id: model.seat_id,
        payload,
        timestamp: model.timestamp,
        sequence: model.sequence,
    })
}

fn event_to_active(event: &GameEvent) -> events::ActiveModel {
    events::ActiveModel {
        event_id: Set(event.event_id.clone()),
        timestamp: Set(event.timestamp),
        event_type: Set(event.event_type.as_str().to_string()),
        table_id: Set(event.table_id.clone()),
        hand_id: Set(event.hand_id.clone()),
        user_id: Set(event.user_id.clone()),
        seat_id: Set(event.seat_id),
        payload: Set(JsonValue::Object(event.payload.clone())),
        sequence: Set(event.sequence),
    }
}

fn apply_filter(mut select: Select<events::Entity>, filter: &EventFilter) -> Select<events::Entity> {
    if let Some(table_id) = &filter.table_id {
        select = select.filter(events::Column::TableId.eq(table_id.clone()));
    }
    if let Some(hand_id) = &filter.hand_id {
        select = select.filter(events::Column::HandId.eq(hand_id.clone()));
    }
    if let Some(user_id) = &filter.user_id {
        select = select.filter(events::Column::UserId.eq(user_id.clone()));
    }
    if !filter.types.is_empty() {
        select = select.filter(
            events::Column::EventType.is_in(filter.types.iter().map(|ty| ty.as_str())),
        );
    }
    if let Some(start) = filter.start_time {
        select = select.filter(events::Column::Timestamp.gte(start));
    }
    if let Some(end) = filter.end_time {
        select = select.filter(events::Column::Timestamp.lte(end));
    }
    select
}

#[async_trait]
impl EventStorage for SeaOrmEventStorage {
    async fn begin(&self) -> Result<Box<dyn EventStorageTxn>, StorageError> {
        let txn = self.connection.begin().await?;
        Ok(Box::new(SeaOrmEventTxn { txn }))
    }

    async fn find_idempotency(&self, key: &str) -> Result<Option<EventId>, StorageError> {
        let row = event_idempotency::Entity::find_by_id(key.to_string())
            .one(&self.connection)
            .await?;
        Ok(row.map(|row| row.event_id))
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<GameEvent>, StorageError> {
        events::Entity::find()
            .filter(events::Column::EventId.eq(event_id))
            .one(&self.connection)
            .await?
            .map(model_to_event)
            .transpose()
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<EventPage, StorageError> {
        let select = apply_filter(events::Entity::find(), filter);
        let total = select.clone().count(&self.connection).await?;
        let rows = select
            .order_by_asc(events::Column::Timestamp)
            .order_by_asc(events::Column::Sequence)
            .order_by_asc(events::Column::EventId)
            .offset(filter.offset)
            .limit(filter.limit)
            .all(&self.connection)
            .await?;
        let events = rows
            .into_iter()
            .map(model_to_event)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EventPage { events, total })
    }

    async fn load_hand_events(
        &self,
        hand_id: &HandId,
        limit: u64,
    ) -> Result<Vec<GameEvent>, StorageError> {
        let rows = events::Entity::find()
            .filter(events::Column::HandId.eq(hand_id.clone()))
            .order_by_asc(events::Column::Sequence)
            .limit(limit)
            .all(&self.connection)
            .await?;
        rows.into_iter().map(model_to_event).collect()
    }
}

struct SeaOrmEventTxn {
    txn: DatabaseTransaction,
}

#[async_trait]
impl EventStorageTxn for SeaOrmEventTxn {
    async fn find_idempotency(&mut self, key: &str) -> Result<Option<EventId>, StorageError> {
        let row = event_idempotency::Entity::find_by_id(key.to_string())
            .one(&self.txn)
            .await?;
        Ok(row.map(|row| row.event_id))
    }

    async fn insert_event(&mut self, event: &GameEvent) -> Result<(), StorageError> {
        if tracing::enabled!(Level::DEBUG) {
            debug!(
                target: LOG_TARGET,
                event_id = %event.event_id,
                event_type = %event.event_type,
                hand_id = ?event.hand_id,
                sequence = ?event.sequence,
                "inserting event row"
            );
        }
        events::Entity::insert(event_to_active(event))
            .exec_without_returning(&self.txn)
            .await?;
        Ok(())
    }

    async fn insert_idempotency(
        &mut self,
        key: &str,
        event_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let active = event_idempotency::ActiveModel {
            idempotency_key: Set(key.to_string()),
            event_id: Set(event_id.to_string()),
            created_at: Set(created_at),
        };
        event_idempotency::Entity::insert(active)
            .exec_without_returning(&self.txn)
            .await
            .map_err(|err| StorageError::from_idempotency_insert(err, key))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        if let Err(err) = self.txn.rollback().await {
            tracing::warn!(target: LOG_TARGET, error = %err, "event transaction rollback failed");
        }
    }
}
