use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::db::StorageError;
use crate::events::types::{EventFilter, EventId, EventPage, GameEvent, HandId};

use super::{EventStorage, EventStorageTxn};

#[derive(Default)]
struct Inner {
    // Insertion order doubles as a stable tie-breaker for queries.
    events: Vec<GameEvent>,
    by_id: HashMap<EventId, usize>,
    idempotency: HashMap<String, EventId>,
}

impl Inner {
    fn land(&mut self, event: GameEvent) {
        self.by_id.insert(event.event_id.clone(), self.events.len());
        self.events.push(event);
    }
}

/// When a rival writer's commit lands relative to the next transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RivalWrite {
    /// Before the transaction starts, after the caller's pre-checks.
    AtBegin,
    /// Just before the transaction commits.
    AtCommit,
}

struct Rival {
    at: RivalWrite,
    key: String,
    event: GameEvent,
}

/// Relational storage kept in process memory with the same transactional
/// semantics as the Postgres backend: staged writes land on commit only.
#[derive(Clone, Default)]
pub struct InMemoryEventStorage {
    inner: Arc<RwLock<Inner>>,
    fail_next_commit: Arc<AtomicBool>,
    rival: Arc<Mutex<Option<Rival>>>,
}

impl InMemoryEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn idempotency_len(&self) -> usize {
        self.inner.read().idempotency.len()
    }

    /// Make the next commit fail so callers can observe rollback behaviour.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Insert an idempotency mapping without an event row, reproducing a
    /// corrupted dedup table.
    pub fn insert_dangling_idempotency(&self, key: &str, event_id: &str) {
        self.inner
            .write()
            .idempotency
            .insert(key.to_string(), event_id.to_string());
    }

    /// Commit `event` under `key` on behalf of another writer while the next
    /// transaction is in flight, reproducing a lost idempotency race.
    pub fn commit_rival_on_next(&self, at: RivalWrite, key: &str, event: GameEvent) {
        *self.rival.lock() = Some(Rival {
            at,
            key: key.to_string(),
            event,
        });
    }

    fn sorted(events: impl Iterator<Item = (usize, GameEvent)>) -> Vec<GameEvent> {
        let mut rows: Vec<(usize, GameEvent)> = events.collect();
        rows.sort_by(|(ia, a), (ib, b)| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.sequence.cmp(&b.sequence))
                .then(ia.cmp(ib))
        });
        rows.into_iter().map(|(_, event)| event).collect()
    }
}

#[async_trait]
impl EventStorage for InMemoryEventStorage {
    async fn begin(&self) -> Result<Box<dyn EventStorageTxn>, StorageError> {
        let rival = match self.rival.lock().take() {
            Some(early) if early.at == RivalWrite::AtBegin => {
                let mut inner = self.inner.write();
                inner.idempotency.insert(early.key, early.event.event_id.clone());
                inner.land(early.event);
                None
            }
            late => late,
        };
        Ok(Box::new(InMemoryEventTxn {
            inner: Arc::clone(&self.inner),
            fail_commit: self.fail_next_commit.swap(false, Ordering::SeqCst),
            rival,
            events: Vec::new(),
            idempotency: Vec::new(),
        }))
    }

    async fn find_idempotency(&self, key: &str) -> Result<Option<EventId>, StorageError> {
        Ok(self.inner.read().idempotency.get(key).cloned())
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<GameEvent>, StorageError> {
        let inner = self.inner.read();
        Ok(inner
            .by_id
            .get(event_id)
            .map(|idx| inner.events[*idx].clone()))
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<EventPage, StorageError> {
        let inner = self.inner.read();
        let matching = Self::sorted(
            inner
                .events
                .iter()
                .cloned()
                .enumerate()
                .filter(|(_, event)| filter.matches(event)),
        );
        let total = matching.len() as u64;
        let events = matching
            .into_iter()
            .skip(usize::try_from(filter.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(filter.limit).unwrap_or(usize::MAX))
            .collect();
        Ok(EventPage { events, total })
    }

    async fn load_hand_events(
        &self,
        hand_id: &HandId,
        limit: u64,
    ) -> Result<Vec<GameEvent>, StorageError> {
        let inner = self.inner.read();
        let mut events: Vec<GameEvent> = inner
            .events
            .iter()
            .filter(|event| event.hand_id.as_ref() == Some(hand_id))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.sequence);
        events.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(events)
    }
}

struct InMemoryEventTxn {
    inner: Arc<RwLock<Inner>>,
    fail_commit: bool,
    rival: Option<Rival>,
    events: Vec<GameEvent>,
    idempotency: Vec<(String, EventId)>,
}

#[async_trait]
impl EventStorageTxn for InMemoryEventTxn {
    async fn find_idempotency(&mut self, key: &str) -> Result<Option<EventId>, StorageError> {
        if let Some((_, event_id)) = self.idempotency.iter().find(|(staged, _)| staged == key) {
            return Ok(Some(event_id.clone()));
        }
        Ok(self.inner.read().idempotency.get(key).cloned())
    }

    async fn insert_event(&mut self, event: &GameEvent) -> Result<(), StorageError> {
        self.events.push(event.clone());
        Ok(())
    }

    async fn insert_idempotency(
        &mut self,
        key: &str,
        event_id: &str,
        _created_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if self.idempotency.iter().any(|(staged, _)| staged == key) {
            return Err(StorageError::DuplicateIdempotencyKey(key.to_string()));
        }
        self.idempotency.push((key.to_string(), event_id.to_string()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if self.fail_commit {
            return Err(StorageError::Unavailable("injected commit failure".into()));
        }
        let mut inner = self.inner.write();
        if let Some(late) = self.rival {
            inner.idempotency.insert(late.key, late.event.event_id.clone());
            inner.land(late.event);
        }
        if let Some((key, _)) = self
            .idempotency
            .iter()
            .find(|(key, _)| inner.idempotency.contains_key(key))
        {
            return Err(StorageError::DuplicateIdempotencyKey(key.clone()));
        }
        if let Some(event) = self
            .events
            .iter()
            .find(|event| inner.by_id.contains_key(&event.event_id))
        {
            return Err(StorageError::corrupt(format!(
                "duplicate event id {}",
                event.event_id
            )));
        }
        for event in self.events {
            inner.land(event);
        }
        for (key, event_id) in self.idempotency {
            inner.idempotency.insert(key, event_id);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) {}
}
