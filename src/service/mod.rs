//! Caller-facing operations over the event core, with viewer-aware privacy.

mod error;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::config::{CoreConfig, QueryConfig};
use crate::cursor::{Cursor, CursorStorage, CursorStore, InMemoryCursorStorage, SeaOrmCursorStorage};
use crate::db::connect_to_postgres_db;
use crate::events::storage::{EventStorage, InMemoryEventStorage, SeaOrmEventStorage};
use crate::events::types::{EventFilter, EventId, GameEvent, GameEventType, HandId, Sequence};
use crate::events::{EventStore, NewGameEvent};
use crate::hands::{
    HandMaterializer, HandPage, HandRecord, HandRecordStorage, InMemoryHandStorage,
    SeaOrmHandStorage,
};
use crate::privacy::{self, seated_users, EventRedactor, Viewer};
use crate::stream::log::{InMemoryLogStore, LogStore, RedisLogStore};
use crate::stream::{
    InvalidStreamId, StreamChannel, StreamFanout, StreamKeys, SubscribeRequest,
    SubscriptionEngine,
};

pub use error::{ErrorCategory, ServiceError};

const LOG_TARGET: &str = "poker_event_core::service";

/// Open hands whose redactors one subscription keeps at a time.
const MAX_CACHED_REDACTORS: usize = 64;

/// Concrete collaborators the core is assembled from.
#[derive(Clone)]
pub struct Backends {
    pub events: Arc<dyn EventStorage>,
    pub hands: Arc<dyn HandRecordStorage>,
    pub cursors: Arc<dyn CursorStorage>,
    pub log: Arc<dyn LogStore>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            events: Arc::new(InMemoryEventStorage::new()),
            hands: Arc::new(InMemoryHandStorage::new()),
            cursors: Arc::new(InMemoryCursorStorage::new()),
            log: Arc::new(InMemoryLogStore::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Postgres for records, Redis for streams and counters.
    pub async fn connect(database_url: &str, redis_url: &str) -> anyhow::Result<Self> {
        let db = connect_to_postgres_db(database_url).await?;
        let log = RedisLogStore::connect(redis_url)
            .await
            .with_context(|| format!("failed to connect to redis at {redis_url}"))?;
        Ok(Self {
            events: Arc::new(SeaOrmEventStorage::new(db.clone())),
            hands: Arc::new(SeaOrmHandStorage::new(db.clone())),
            cursors: Arc::new(SeaOrmCursorStorage::new(db)),
            log: Arc::new(log),
            clock: Arc::new(SystemClock),
        })
    }
}

/// The wired-up core: the request-facing service and the background
/// materializer, sharing one set of backends.
pub struct EventCore {
    pub service: Arc<EventService>,
    pub materializer: Arc<HandMaterializer>,
}

impl EventCore {
    pub fn assemble(backends: Backends, config: &CoreConfig) -> Self {
        let keys = StreamKeys::new(config.stream.prefix.clone());
        let fanout = Arc::new(StreamFanout::new(Arc::clone(&backends.log), keys.clone()));
        let store = Arc::new(EventStore::new(
            Arc::clone(&backends.events),
            Arc::clone(&backends.log),
            fanout,
            Arc::clone(&backends.clock),
        ));
        let subscriptions =
            SubscriptionEngine::new(Arc::clone(&backends.log), keys.clone(), config.stream.clone());
        let cursors = CursorStore::new(Arc::clone(&backends.cursors), Arc::clone(&backends.clock));
        let materializer = HandMaterializer::new(
            Arc::clone(&backends.log),
            Arc::clone(&backends.events),
            Arc::clone(&backends.hands),
            &keys,
            config.materializer.clone(),
            Arc::clone(&backends.clock),
        );
        let service = EventService {
            store,
            hands: backends.hands,
            cursors,
            subscriptions,
            query: config.query.clone(),
            hand_event_limit: config.materializer.hand_event_limit,
        };
        Self {
            service: Arc::new(service),
            materializer: Arc::new(materializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub event_id: EventId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    pub table_id: Option<String>,
    pub hand_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Opaque resume token from a previous page; wins over `offset`.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQueryPage {
    pub events: Vec<GameEvent>,
    pub total: u64,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandReplay {
    pub hand_id: HandId,
    pub events: Vec<GameEvent>,
}

pub fn encode_page_cursor(offset: u64) -> String {
    STANDARD.encode(offset.to_string())
}

pub fn decode_page_cursor(cursor: &str) -> Result<u64, ServiceError> {
    let invalid = || ServiceError::InvalidArgument(format!("invalid cursor `{cursor}`"));
    let bytes = STANDARD.decode(cursor).map_err(|_| invalid())?;
    std::str::from_utf8(&bytes)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(invalid)
}

/// Entry point for every exposed operation.
pub struct EventService {
    store: Arc<EventStore>,
    hands: Arc<dyn HandRecordStorage>,
    cursors: CursorStore,
    subscriptions: SubscriptionEngine,
    query: QueryConfig,
    hand_event_limit: u64,
}

impl EventService {
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub async fn ingest_event(&self, event: NewGameEvent) -> Result<IngestReceipt, ServiceError> {
        let event = self.store.ingest(event).await?;
        Ok(IngestReceipt {
            event_id: event.event_id,
        })
    }

    pub async fn ingest_events(
        &self,
        events: Vec<NewGameEvent>,
    ) -> Result<Vec<IngestReceipt>, ServiceError> {
        let events = self.store.ingest_batch(events).await?;
        Ok(events
            .into_iter()
            .map(|event| IngestReceipt {
                event_id: event.event_id,
            })
            .collect())
    }

    pub async fn query_events(&self, query: EventQuery) -> Result<EventQueryPage, ServiceError> {
        let types = query
            .types
            .iter()
            .map(|raw| {
                raw.parse::<GameEventType>()
                    .map_err(|err| ServiceError::InvalidArgument(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let (Some(start), Some(end)) = (query.start_time, query.end_time) {
            if start > end {
                return Err(ServiceError::InvalidArgument(
                    "startTime must not be after endTime".into(),
                ));
            }
        }
        let offset = match query.cursor.as_deref() {
            Some(cursor) => decode_page_cursor(cursor)?,
            None => query.offset.unwrap_or(0),
        };
        let limit = self.query.page_size(query.limit);

        let filter = EventFilter {
            table_id: query.table_id,
            hand_id: query.hand_id,
            user_id: query.user_id,
            types,
            start_time: query.start_time,
            end_time: query.end_time,
            limit,
            offset,
        };
        let page = self.store.query(&filter).await?;
        let next_offset = offset + page.events.len() as u64;
        let has_more = next_offset < page.total;
        Ok(EventQueryPage {
            next_cursor: has_more.then(|| encode_page_cursor(next_offset)),
            events: page.events,
            total: page.total,
            has_more,
        })
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Option<GameEvent>, ServiceError> {
        Ok(self.store.get_by_id(event_id).await?)
    }

    pub async fn get_hand_record(
        &self,
        hand_id: &str,
        viewer: &Viewer,
    ) -> Result<Option<HandRecord>, ServiceError> {
        match self.hands.get(hand_id).await? {
            Some(record) => Ok(Some(self.redact_record(record, viewer).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_hand_history(
        &self,
        table_id: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        viewer: &Viewer,
    ) -> Result<HandPage, ServiceError> {
        let page = self
            .hands
            .list_by_table(table_id, self.query.page_size(limit), offset.unwrap_or(0))
            .await?;
        self.redact_page(page, viewer).await
    }

    /// Non-operators may only list their own hands.
    pub async fn get_hands_for_user(
        &self,
        user_id: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        viewer: &Viewer,
    ) -> Result<HandPage, ServiceError> {
        if !viewer.is_operator && !viewer.is(user_id) {
            return Err(ServiceError::PermissionDenied(format!(
                "not allowed to view hands of user `{user_id}`"
            )));
        }
        let page = self
            .hands
            .list_by_user(user_id, self.query.page_size(limit), offset.unwrap_or(0))
            .await?;
        self.redact_page(page, viewer).await
    }

    pub async fn get_hand_replay(
        &self,
        hand_id: &str,
        viewer: &Viewer,
    ) -> Result<HandReplay, ServiceError> {
        let hand_id = hand_id.to_string();
        let events = self
            .store
            .storage()
            .load_hand_events(&hand_id, self.hand_event_limit)
            .await?;
        if events.is_empty() {
            return Err(ServiceError::not_found("hand", hand_id));
        }
        let redactor = EventRedactor::new(viewer, &seated_users(&events));
        Ok(HandReplay {
            hand_id,
            events: events.into_iter().map(|e| redactor.apply(e)).collect(),
        })
    }

    /// Live events on `stream_id`, redacted for `viewer`. Dropping the
    /// stream cancels the subscription.
    pub fn subscribe(
        &self,
        stream_id: &str,
        start_sequence: Option<Sequence>,
        viewer: &Viewer,
    ) -> Result<BoxStream<'static, GameEvent>, ServiceError> {
        let channel: StreamChannel = stream_id
            .parse()
            .map_err(|err: InvalidStreamId| ServiceError::InvalidArgument(err.to_string()))?;
        let subscription = self.subscriptions.subscribe(SubscribeRequest {
            channel,
            start_sequence,
        });
        if viewer.is_operator {
            return Ok(subscription.boxed());
        }
        let scope = Arc::new(RedactionScope::new(
            viewer.clone(),
            Arc::clone(self.store.storage()),
            self.hand_event_limit,
        ));
        Ok(subscription
            .then(move |event| {
                let scope = Arc::clone(&scope);
                async move { scope.redact(event).await }
            })
            .boxed())
    }

    pub async fn get_cursor(
        &self,
        stream_id: &str,
        subscriber_id: &str,
    ) -> Result<Option<Cursor>, ServiceError> {
        Ok(self.cursors.get_cursor(stream_id, subscriber_id).await?)
    }

    pub async fn update_cursor(
        &self,
        stream_id: &str,
        subscriber_id: &str,
        position: i64,
    ) -> Result<Cursor, ServiceError> {
        if stream_id.is_empty() || subscriber_id.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "streamId and subscriberId are required".into(),
            ));
        }
        Ok(self
            .cursors
            .update_cursor(stream_id, subscriber_id, position)
            .await?)
    }

    async fn redact_record(
        &self,
        record: HandRecord,
        viewer: &Viewer,
    ) -> Result<HandRecord, ServiceError> {
        let reveals = if privacy::needs_reveals(&record, viewer) {
            self.store.get_showdown_reveals(&record.hand_id).await?
        } else {
            Default::default()
        };
        Ok(privacy::filter_hand_record(record, viewer, &reveals))
    }

    async fn redact_page(&self, page: HandPage, viewer: &Viewer) -> Result<HandPage, ServiceError> {
        let mut hands = Vec::with_capacity(page.hands.len());
        for record in page.hands {
            hands.push(self.redact_record(record, viewer).await?);
        }
        Ok(HandPage {
            hands,
            total: page.total,
        })
    }
}

/// Per-subscription redaction state: one redactor per open hand, built from
/// the hand's stored seating the first time the hand is seen and dropped once
/// its `HAND_COMPLETED` passes.
struct RedactionScope {
    viewer: Viewer,
    events: Arc<dyn EventStorage>,
    limit: u64,
    redactors: Mutex<HashMap<HandId, EventRedactor>>,
}

impl RedactionScope {
    fn new(viewer: Viewer, events: Arc<dyn EventStorage>, limit: u64) -> Self {
        Self {
            viewer,
            events,
            limit,
            redactors: Mutex::new(HashMap::new()),
        }
    }

    async fn redact(&self, event: GameEvent) -> GameEvent {
        let Some(hand_id) = event.hand_id.clone() else {
            return event;
        };
        let completed = event.event_type == GameEventType::HandCompleted;
        let redactor = if completed {
            self.redactors.lock().remove(&hand_id)
        } else {
            self.redactors.lock().get(&hand_id).cloned()
        };
        let redactor = match redactor {
            Some(redactor) => redactor,
            None => match self.events.load_hand_events(&hand_id, self.limit).await {
                Ok(events) => {
                    let redactor = EventRedactor::new(&self.viewer, &seated_users(&events));
                    if !completed {
                        self.remember(hand_id, redactor.clone());
                    }
                    redactor
                }
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        hand_id = %hand_id,
                        error = %err,
                        "participant lookup failed; redacting as non-participant"
                    );
                    EventRedactor::new(&self.viewer, &Default::default())
                }
            },
        };
        redactor.apply(event)
    }

    // Hands abandoned without a HAND_COMPLETED would otherwise stay forever.
    fn remember(&self, hand_id: HandId, redactor: EventRedactor) {
        let mut redactors = self.redactors.lock();
        if redactors.len() >= MAX_CACHED_REDACTORS && !redactors.contains_key(&hand_id) {
            if let Some(evicted) = redactors.keys().next().cloned() {
                redactors.remove(&evicted);
            }
        }
        redactors.insert(hand_id, redactor);
    }

    #[cfg(test)]
    fn cached_hands(&self) -> usize {
        self.redactors.lock().len()
    }
}
