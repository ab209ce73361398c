//! Fixtures shared by unit tests across modules.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Map;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::clock::SystemClock;
use crate::config::{CoreConfig, MaterializerConfig, QueryConfig, StreamConfig};
use crate::cursor::InMemoryCursorStorage;
use crate::events::storage::InMemoryEventStorage;
use crate::events::types::{GameEvent, GameEventType, Sequence};
use crate::events::EventStore;
use crate::hands::{HandMaterializer, InMemoryHandStorage};
use crate::service::{Backends, EventCore, EventService};
use crate::stream::log::{InMemoryLogStore, StreamMessage};

pub const TEST_PREFIX: &str = "t:";
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub fn event_fixture(
    event_type: GameEventType,
    hand_id: Option<&str>,
    sequence: Option<Sequence>,
) -> GameEvent {
    GameEvent {
        event_id: Uuid::new_v4().to_string(),
        event_type,
        table_id: "t1".into(),
        hand_id: hand_id.map(str::to_string),
        user_id: None,
        seat_id: None,
        payload: Map::new(),
        timestamp: Utc::now(),
        sequence,
    }
}

pub fn fast_stream_config() -> StreamConfig {
    StreamConfig {
        prefix: TEST_PREFIX.to_string(),
        block_ms: 50,
        batch_size: 10,
        retry_delay_ms: 10,
        sink_capacity: 1,
    }
}

pub fn fast_materializer_config() -> MaterializerConfig {
    MaterializerConfig {
        block_ms: 50,
        retry_delay_ms: 10,
        ..Default::default()
    }
}

/// Poll `condition` until it holds or the wait times out.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// A fully wired in-memory core with handles on every backend.
pub struct TestHarness {
    pub store: Arc<EventStore>,
    pub service: Arc<EventService>,
    pub materializer: Arc<HandMaterializer>,
    pub events: InMemoryEventStorage,
    pub hands: InMemoryHandStorage,
    pub cursors: InMemoryCursorStorage,
    pub log: InMemoryLogStore,
}

impl TestHarness {
    pub fn new() -> Self {
        let events = InMemoryEventStorage::new();
        let hands = InMemoryHandStorage::new();
        let cursors = InMemoryCursorStorage::new();
        let log = InMemoryLogStore::new();
        let backends = Backends {
            events: Arc::new(events.clone()),
            hands: Arc::new(hands.clone()),
            cursors: Arc::new(cursors.clone()),
            log: Arc::new(log.clone()),
            clock: Arc::new(SystemClock),
        };
        let config = CoreConfig {
            stream: fast_stream_config(),
            materializer: fast_materializer_config(),
            query: QueryConfig::default(),
        };
        let EventCore {
            service,
            materializer,
        } = EventCore::assemble(backends, &config);
        Self {
            store: Arc::clone(service.store()),
            service,
            materializer,
            events,
            hands,
            cursors,
            log,
        }
    }

    pub fn key(&self, channel: &str) -> String {
        format!("{TEST_PREFIX}{channel}")
    }

    /// Wait until `channel` holds at least `n` entries and return them.
    pub async fn wait_for_entries(&self, channel: &str, n: usize) -> Vec<StreamMessage> {
        let key = self.key(channel);
        wait_until(|| self.log.entries(&key).len() >= n).await;
        self.log.entries(&key)
    }
}
