use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::db::entity::{hand_participants, hand_records};
use crate::db::StorageError;
use crate::hands::record::{HandPage, HandRecord};

use super::HandRecordStorage;

const LOG_TARGET: &str = "poker_event_core::hands::storage";

pub struct SeaOrmHandStorage {
    connection: DatabaseConnection,
}

impl SeaOrmHandStorage {
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }
}

fn record_to_active(
    record: &HandRecord,
    updated_at: DateTime<Utc>,
) -> Result<hand_records::ActiveModel, StorageError> {
    Ok(hand_records::ActiveModel {
        hand_id: Set(record.hand_id.clone()),
        table_id: Set(record.table_id.clone()),
        table_name: Set(record.table_name.clone()),
        config: Set(serde_json::to_value(record.config)?),
        participants: Set(serde_json::to_value(&record.participants)?),
        community_cards: Set(serde_json::to_value(&record.community_cards)?),
        pots: Set(serde_json::to_value(&record.pots)?),
        winners: Set(serde_json::to_value(&record.winners)?),
        started_at: Set(record.started_at),
        completed_at: Set(record.completed_at),
        duration_ms: Set(record.duration),
        updated_at: Set(updated_at),
    })
}

fn decode<T: serde::de::DeserializeOwned>(
    hand_id: &str,
    column: &str,
    value: JsonValue,
) -> Result<T, StorageError> {
    serde_json::from_value(value).map_err(|err| {
        StorageError::corrupt(format!("hand {hand_id} column {column}: {err}"))
    })
}

fn model_to_record(model: hand_records::Model) -> Result<HandRecord, StorageError> {
    let id = model.hand_id.as_str();
    Ok(HandRecord {
        config: decode(id, "config", model.config)?,
        participants: decode(id, "participants", model.participants)?,
        community_cards: decode(id, "community_cards", model.community_cards)?,
        pots: decode(id, "pots", model.pots)?,
        winners: decode(id, "winners", model.winners)?,
        hand_id: model.hand_id,
        table_id: model.table_id,
        table_name: model.table_name,
        started_at: model.started_at,
        completed_at: model.completed_at,
        duration: model.duration_ms,
    })
}

#[async_trait]
impl HandRecordStorage for SeaOrmHandStorage {
    async fn upsert(
        &self,
        record: &HandRecord,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let active = record_to_active(record, updated_at)?;
        let participants: Vec<hand_participants::ActiveModel> = record
            .participants
            .iter()
            .map(|p| hand_participants::ActiveModel {
                hand_id: Set(record.hand_id.clone()),
                user_id: Set(p.user_id.clone()),
                seat_id: Set(p.seat_id),
                completed_at: Set(record.completed_at),
            })
            .collect();

        let txn = self.connection.begin().await?;
        hand_records::Entity::insert(active)
            .on_conflict(
                OnConflict::column(hand_records::Column::HandId)
                    .update_columns([
                        hand_records::Column::TableId,
                        hand_records::Column::TableName,
                        hand_records::Column::Config,
                        hand_records::Column::Participants,
                        hand_records::Column::CommunityCards,
                        hand_records::Column::Pots,
                        hand_records::Column::Winners,
                        hand_records::Column::StartedAt,
                        hand_records::Column::CompletedAt,
                        hand_records::Column::DurationMs,
                        hand_records::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;
        hand_participants::Entity::delete_many()
            .filter(hand_participants::Column::HandId.eq(record.hand_id.clone()))
            .exec(&txn)
            .await?;
        if !participants.is_empty() {
            hand_participants::Entity::insert_many(participants)
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await?;
        debug!(
            target: LOG_TARGET,
            hand_id = %record.hand_id,
            participants = record.participants.len(),
            "hand record upserted"
        );
        Ok(())
    }

    async fn get(&self, hand_id: &str) -> Result<Option<HandRecord>, StorageError> {
        hand_records::Entity::find_by_id(hand_id.to_string())
            .one(&self.connection)
            .await?
            .map(model_to_record)
            .transpose()
    }

    async fn list_by_table(
        &self,
        table_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<HandPage, StorageError> {
        let select = hand_records::Entity::find()
            .filter(hand_records::Column::TableId.eq(table_id));
        let total = select.clone().count(&self.connection).await?;
        let hands = select
            .order_by_desc(hand_records::Column::CompletedAt)
            .order_by_asc(hand_records::Column::HandId)
            .offset(offset)
            .limit(limit)
            .all(&self.connection)
            .await?
            .into_iter()
            .map(model_to_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(HandPage { hands, total })
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<HandPage, StorageError> {
        let select = hand_participants::Entity::find()
            .filter(hand_participants::Column::UserId.eq(user_id));
        let total = select.clone().count(&self.connection).await?;
        let hand_ids: Vec<String> = select
            .order_by_desc(hand_participants::Column::CompletedAt)
            .order_by_asc(hand_participants::Column::HandId)
            .offset(offset)
            .limit(limit)
            .all(&self.connection)
            .await?
            .into_iter()
            .map(|row| row.hand_id)
            .collect();
        if hand_ids.is_empty() {
            return Ok(HandPage {
                hands: Vec::new(),
                total,
            });
        }

        let mut by_id: HashMap<String, HandRecord> = hand_records::Entity::find()
            .filter(hand_records::Column::HandId.is_in(hand_ids.clone()))
            .all(&self.connection)
            .await?
            .into_iter()
            .map(|model| model_to_record(model).map(|r| (r.hand_id.clone(), r)))
            .collect::<Result<_, _>>()?;
        let hands = hand_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
        Ok(HandPage { hands, total })
    }
}
