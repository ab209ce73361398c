use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::StorageError;
use crate::privacy::revealed_seats;
use crate::stream::log::LogStore;
use crate::stream::{FanoutQueue, StreamFanout};

use super::error::IngestError;
use super::storage::{EventStorage, EventStorageTxn};
use super::types::{
    EventFilter, EventPage, GameEvent, GameEventType, HandId, NewGameEvent, SeatId,
};
use super::validation::{validate_new_event, ValidatedEvent};

const LOG_TARGET: &str = "poker_event_core::events::store";

/// A lost idempotency race is resolved by one extra pass over the batch.
const MAX_PERSIST_ATTEMPTS: usize = 2;

/// Upper bound on events scanned when collecting a hand's reveals.
const REVEAL_SCAN_LIMIT: u64 = 1_000;

enum Slot {
    Existing(GameEvent),
    Staged(usize),
}

struct Staged {
    event: GameEvent,
    idempotency_key: Option<String>,
}

/// Idempotent, sequence-assigning persistence of game events.
pub struct EventStore {
    storage: Arc<dyn EventStorage>,
    log: Arc<dyn LogStore>,
    fanout: Arc<StreamFanout>,
    queue: FanoutQueue,
    clock: Arc<dyn Clock>,
}

impl EventStore {
    pub fn new(
        storage: Arc<dyn EventStorage>,
        log: Arc<dyn LogStore>,
        fanout: Arc<StreamFanout>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = FanoutQueue::spawn(Arc::clone(&fanout));
        Self {
            storage,
            log,
            fanout,
            queue,
            clock,
        }
    }

    pub fn storage(&self) -> &Arc<dyn EventStorage> {
        &self.storage
    }

    /// Persist one event. A repeated idempotency key returns the event it
    /// first produced without consuming a sequence number.
    pub async fn ingest(&self, event: NewGameEvent) -> Result<GameEvent, IngestError> {
        let validated = validate_new_event(&event)?;
        let mut persisted = self.persist(vec![validated]).await?;
        persisted
            .pop()
            .ok_or_else(|| StorageError::corrupt("ingest produced no event").into())
    }

    /// Persist a batch atomically. Nothing is written unless every element
    /// validates; results are returned in input order.
    pub async fn ingest_batch(
        &self,
        events: Vec<NewGameEvent>,
    ) -> Result<Vec<GameEvent>, IngestError> {
        let validated = events
            .iter()
            .enumerate()
            .map(|(index, event)| {
                validate_new_event(event)
                    .map_err(|error| IngestError::BatchValidation { index, error })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if validated.is_empty() {
            return Ok(Vec::new());
        }
        self.persist(validated).await
    }

    pub async fn query(&self, filter: &EventFilter) -> Result<EventPage, IngestError> {
        Ok(self.storage.query_events(filter).await?)
    }

    pub async fn get_by_id(&self, event_id: &str) -> Result<Option<GameEvent>, IngestError> {
        Ok(self.storage.get_event(event_id).await?)
    }

    /// Seats whose hole cards were shown, at showdown or voluntarily.
    pub async fn get_showdown_reveals(
        &self,
        hand_id: &HandId,
    ) -> Result<BTreeSet<SeatId>, IngestError> {
        let filter = EventFilter {
            hand_id: Some(hand_id.clone()),
            types: vec![GameEventType::Showdown, GameEventType::CardsRevealed],
            limit: REVEAL_SCAN_LIMIT,
            ..Default::default()
        };
        let page = self.storage.query_events(&filter).await?;
        Ok(revealed_seats(&page.events))
    }

    async fn persist(&self, batch: Vec<ValidatedEvent>) -> Result<Vec<GameEvent>, IngestError> {
        let mut attempt = 1;
        loop {
            match self.persist_once(&batch).await {
                Err(IngestError::Storage(StorageError::DuplicateIdempotencyKey(key)))
                    if attempt < MAX_PERSIST_ATTEMPTS =>
                {
                    warn!(
                        target: LOG_TARGET,
                        idempotency_key = %key,
                        "lost idempotency race; resolving winner"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn persist_once(&self, batch: &[ValidatedEvent]) -> Result<Vec<GameEvent>, IngestError> {
        let mut slots = Vec::with_capacity(batch.len());
        let mut staged: Vec<Staged> = Vec::new();
        let mut staged_keys: HashMap<&str, usize> = HashMap::new();

        for validated in batch {
            if let Some(key) = validated.idempotency_key.as_deref() {
                if let Some(idx) = staged_keys.get(key) {
                    slots.push(Slot::Staged(*idx));
                    continue;
                }
                if let Some(existing) = self.resolve_idempotent(key).await? {
                    debug!(
                        target: LOG_TARGET,
                        idempotency_key = %key,
                        event_id = %existing.event_id,
                        "idempotent replay"
                    );
                    slots.push(Slot::Existing(existing));
                    continue;
                }
                staged_keys.insert(key, staged.len());
            }
            let event = self.number(validated).await?;
            slots.push(Slot::Staged(staged.len()));
            staged.push(Staged {
                event,
                idempotency_key: validated.idempotency_key.clone(),
            });
        }

        if !staged.is_empty() {
            self.commit(&staged).await?;
            for entry in &staged {
                info!(
                    target: LOG_TARGET,
                    event_id = %entry.event.event_id,
                    event_type = %entry.event.event_type,
                    table_id = %entry.event.table_id,
                    hand_id = ?entry.event.hand_id,
                    sequence = ?entry.event.sequence,
                    "event persisted"
                );
            }
            self.queue
                .enqueue(staged.iter().map(|entry| entry.event.clone()).collect());
        }

        Ok(slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Existing(event) => event,
                Slot::Staged(idx) => staged[idx].event.clone(),
            })
            .collect())
    }

    /// The event a key already produced. A mapping without its event row is
    /// a corrupted dedup table and is never retried.
    async fn resolve_idempotent(&self, key: &str) -> Result<Option<GameEvent>, IngestError> {
        let Some(event_id) = self.storage.find_idempotency(key).await? else {
            return Ok(None);
        };
        match self.storage.get_event(&event_id).await? {
            Some(event) => Ok(Some(event)),
            None => {
                tracing::error!(
                    target: LOG_TARGET,
                    idempotency_key = %key,
                    %event_id,
                    "idempotency mapping points at a missing event"
                );
                Err(IngestError::Inconsistent {
                    key: key.to_string(),
                    event_id,
                })
            }
        }
    }

    /// Give the event its id, timestamp and, for hand events, the next value
    /// of the hand's counter. Counter values consumed by a failed commit are
    /// skipped, never reused.
    async fn number(&self, validated: &ValidatedEvent) -> Result<GameEvent, IngestError> {
        let sequence = match &validated.hand_id {
            Some(hand_id) => {
                let key = self.fanout.keys().hand_sequence(hand_id);
                Some(self.log.increment(&key).await?)
            }
            None => None,
        };
        Ok(GameEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: validated.event_type,
            table_id: validated.table_id.clone(),
            hand_id: validated.hand_id.clone(),
            user_id: validated.user_id.clone(),
            seat_id: validated.seat_id,
            payload: validated.payload.clone(),
            timestamp: self.clock.now(),
            sequence,
        })
    }

    async fn commit(&self, staged: &[Staged]) -> Result<(), StorageError> {
        let mut txn = self.storage.begin().await?;
        match stage(txn.as_mut(), staged).await {
            Ok(()) => txn.commit().await,
            Err(err) => {
                txn.rollback().await;
                Err(err)
            }
        }
    }
}

async fn stage(txn: &mut dyn EventStorageTxn, staged: &[Staged]) -> Result<(), StorageError> {
    for entry in staged {
        if let Some(key) = entry.idempotency_key.as_deref() {
            if txn.find_idempotency(key).await?.is_some() {
                return Err(StorageError::DuplicateIdempotencyKey(key.to_string()));
            }
        }
        txn.insert_event(&entry.event).await?;
        if let Some(key) = entry.idempotency_key.as_deref() {
            txn.insert_idempotency(key, &entry.event.event_id, entry.event.timestamp)
                .await?;
        }
    }
    Ok(())
}
