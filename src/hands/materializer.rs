use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::MaterializerConfig;
use crate::db::StorageError;
use crate::events::storage::EventStorage;
use crate::events::types::{GameEventType, HandId, TableId};
use crate::stream::log::{
    GroupPosition, LogReader, LogStore, LogStoreError, MessageId, ReadOptions, StreamMessage,
};
use crate::stream::{decode_event, StreamChannel, StreamKeys};
use crate::tokio_tools::BackgroundTask;

use super::record::HandRecord;
use super::reducer::reduce_hand;
use super::storage::HandRecordStorage;

const LOG_TARGET: &str = "poker_event_core::hands::materializer";

/// Consumer-group worker on the `all` channel that rebuilds a hand's record
/// whenever the hand completes.
pub struct HandMaterializer {
    log: Arc<dyn LogStore>,
    events: Arc<dyn EventStorage>,
    hands: Arc<dyn HandRecordStorage>,
    channel: String,
    config: MaterializerConfig,
    clock: Arc<dyn Clock>,
}

impl HandMaterializer {
    pub fn new(
        log: Arc<dyn LogStore>,
        events: Arc<dyn EventStorage>,
        hands: Arc<dyn HandRecordStorage>,
        keys: &StreamKeys,
        config: MaterializerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            log,
            events,
            hands,
            channel: keys.channel(&StreamChannel::All),
            config,
            clock,
        }
    }

    /// Run the loop on its own task. `BackgroundTask::shutdown` stops it and
    /// waits for the batch in flight.
    pub fn start(self: Arc<Self>) -> BackgroundTask {
        BackgroundTask::spawn("hand-materializer", move |stop| async move {
            self.run(stop).await
        })
    }

    /// Create the consumer group if needed. Failures other than "already
    /// exists" are logged and tolerated.
    pub async fn ensure_group(&self) {
        match self.log.create_group(&self.channel, &self.config.group).await {
            Ok(()) => info!(
                target: LOG_TARGET,
                stream = %self.channel,
                group = %self.config.group,
                "consumer group created"
            ),
            Err(LogStoreError::GroupExists { .. }) => debug!(
                target: LOG_TARGET,
                group = %self.config.group,
                "consumer group already exists"
            ),
            Err(err) => warn!(
                target: LOG_TARGET,
                group = %self.config.group,
                error = %err,
                "failed to create consumer group"
            ),
        }
    }

    pub async fn run(&self, stop: CancellationToken) {
        self.ensure_group().await;
        let Some(mut reader) = self.open_reader(&stop).await else {
            return;
        };
        info!(
            target: LOG_TARGET,
            stream = %self.channel,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "hand materializer started"
        );

        // Entries delivered to this consumer before a restart come first.
        let mut position = GroupPosition::Pending;
        let mut last_pending_head: Option<MessageId> = None;
        let opts = ReadOptions {
            count: self.config.batch_size,
            block: self.config.block(),
        };

        loop {
            if stop.is_cancelled() {
                break;
            }
            let batch = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                batch = reader.read_group(
                    &self.channel,
                    &self.config.group,
                    &self.config.consumer,
                    position,
                    opts,
                ) => batch,
            };
            let batch = match batch {
                Ok(batch) => batch,
                Err(err @ LogStoreError::NoSuchGroup { .. }) => {
                    warn!(target: LOG_TARGET, error = %err, "consumer group missing; recreating");
                    self.ensure_group().await;
                    if !self.pause(&stop).await {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "group read failed; retrying");
                    if !self.pause(&stop).await {
                        break;
                    }
                    continue;
                }
            };

            if position == GroupPosition::Pending {
                let head = batch.first().map(|message| message.id.clone());
                // An empty or unchanged pending list means the backlog is done
                // or cannot be acknowledged right now.
                if head.is_none() || head == last_pending_head {
                    info!(target: LOG_TARGET, "pending entries drained");
                    position = GroupPosition::New;
                    if head.is_none() {
                        continue;
                    }
                }
                last_pending_head = head;
            }

            for message in &batch {
                self.handle(message).await;
            }
        }
        info!(target: LOG_TARGET, "hand materializer stopped");
    }

    /// Process one stream entry. Every entry is acknowledged before any
    /// materialization work; failures are logged, never retried here.
    pub async fn handle(&self, message: &StreamMessage) {
        let decoded = decode_event(message);
        self.ack(&message.id).await;

        let event = match decoded {
            Ok(event) => event,
            Err(err) => {
                warn!(target: LOG_TARGET, error = %err, "dropping undecodable entry");
                return;
            }
        };
        if event.event_type != GameEventType::HandCompleted {
            return;
        }
        let Some(hand_id) = event.hand_id.clone().filter(|id| !id.is_empty()) else {
            warn!(target: LOG_TARGET, event_id = %event.event_id, "HAND_COMPLETED without handId");
            return;
        };
        if event.table_id.is_empty() {
            warn!(target: LOG_TARGET, event_id = %event.event_id, "HAND_COMPLETED without tableId");
            return;
        }

        match self.materialize_hand(&hand_id, &event.table_id).await {
            Ok(record) => {
                let lag_ms = (self.clock.now() - event.timestamp).num_milliseconds();
                info!(
                    target: LOG_TARGET,
                    hand_id = %hand_id,
                    table_id = %record.table_id,
                    participants = record.participants.len(),
                    lag_ms,
                    "hand materialized"
                );
            }
            Err(err) => error!(
                target: LOG_TARGET,
                hand_id = %hand_id,
                error = %err,
                "hand materialization failed"
            ),
        }
    }

    /// Rebuild and upsert one hand from its stored events. Safe to call
    /// repeatedly for the same hand.
    pub async fn materialize_hand(
        &self,
        hand_id: &HandId,
        table_id: &TableId,
    ) -> Result<HandRecord, StorageError> {
        let limit = self.config.hand_event_limit;
        let events = self.events.load_hand_events(hand_id, limit).await?;
        if events.len() as u64 >= limit {
            warn!(target: LOG_TARGET, hand_id = %hand_id, limit, "hand history truncated");
        }
        let record = reduce_hand(hand_id, table_id, &events);
        self.hands.upsert(&record, self.clock.now()).await?;
        Ok(record)
    }

    async fn ack(&self, id: &MessageId) {
        if let Err(err) = self
            .log
            .ack(&self.channel, &self.config.group, std::slice::from_ref(id))
            .await
        {
            warn!(target: LOG_TARGET, message_id = %id, error = %err, "failed to acknowledge entry");
        }
    }

    async fn pause(&self, stop: &CancellationToken) -> bool {
        tokio::select! {
            _ = stop.cancelled() => false,
            _ = sleep(self.config.retry_delay()) => true,
        }
    }

    async fn open_reader(&self, stop: &CancellationToken) -> Option<Box<dyn LogReader>> {
        loop {
            match self.log.reader().await {
                Ok(reader) => return Some(reader),
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "failed to open group reader; retrying");
                    if !self.pause(stop).await {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::events::types::NewGameEvent;
    use crate::hands::record::HandResult;
    use crate::test_support::{wait_until, TestHarness};

    async fn play_hand(h: &TestHarness, hand: &str) -> anyhow::Result<()> {
        let events = vec![
            NewGameEvent::new(
                GameEventType::HandStarted,
                "t1",
                json!({"tableName": "Main", "seats": [
                    {"seatId": 1, "userId": "u1", "stack": 100},
                    {"seatId": 2, "userId": "u2", "stack": 100}
                ]}),
            )
            .with_hand(hand),
            NewGameEvent::new(
                GameEventType::ActionTaken,
                "t1",
                json!({"street": "PREFLOP", "action": "FOLD"}),
            )
            .with_hand(hand)
            .with_user("u2")
            .with_seat(2),
            NewGameEvent::new(
                GameEventType::PotAwarded,
                "t1",
                json!({"amount": 3, "winners": [{"seatId": 1}]}),
            )
            .with_hand(hand),
            NewGameEvent::new(
                GameEventType::HandCompleted,
                "t1",
                json!({"playerEndStacks": {"u1": 102, "u2": 99}}),
            )
            .with_hand(hand),
        ];
        for event in events {
            h.store.ingest(event).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn completed_hands_are_materialized() -> anyhow::Result<()> {
        let h = TestHarness::new();
        h.materializer.ensure_group().await;
        let task = Arc::clone(&h.materializer).start();

        play_hand(&h, "h1").await?;
        assert!(wait_until(|| h.hands.len() == 1).await);

        let record = h.hands.get("h1").await?.expect("record");
        assert_eq!(record.table_name, "Main");
        assert_eq!(record.participant("u1").map(|p| p.result), Some(HandResult::Won));
        assert_eq!(record.participant("u2").map(|p| p.result), Some(HandResult::Folded));
        assert_eq!(record.participant("u1").map(|p| p.ending_stack), Some(102));

        task.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn bad_entries_are_acknowledged_and_skipped() -> anyhow::Result<()> {
        let h = TestHarness::new();
        h.materializer.ensure_group().await;
        let all = h.key("all");
        h.log.append(&all, &[("event", "{oops".to_string())]).await?;
        h.log
            .append(
                &all,
                &crate::stream::encode_event(&crate::test_support::event_fixture(
                    GameEventType::HandCompleted,
                    None,
                    None,
                ))?,
            )
            .await?;
        let task = Arc::clone(&h.materializer).start();

        play_hand(&h, "h2").await?;
        assert!(wait_until(|| h.hands.len() == 1).await);
        assert!(wait_until(|| h.log.pending_count(&all, "hand-materializer") == 0).await);
        task.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn failed_upsert_does_not_stop_the_loop() -> anyhow::Result<()> {
        let h = TestHarness::new();
        h.materializer.ensure_group().await;
        let task = Arc::clone(&h.materializer).start();

        h.hands.fail_next_upsert();
        play_hand(&h, "lost").await?;
        play_hand(&h, "kept").await?;
        assert!(wait_until(|| h.hands.len() == 1).await);
        assert!(h.hands.get("kept").await?.is_some());
        assert!(h.hands.get("lost").await?.is_none());

        // Re-materializing on demand recovers the hand.
        h.materializer
            .materialize_hand(&"lost".to_string(), &"t1".to_string())
            .await?;
        assert_eq!(h.hands.len(), 2);
        task.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn restart_reclaims_pending_entries() -> anyhow::Result<()> {
        let h = TestHarness::new();
        h.materializer.ensure_group().await;
        play_hand(&h, "h3").await?;
        let all = h.key("all");
        assert!(wait_until(|| h.log.entries(&all).len() == 4).await);

        // A previous incarnation took delivery but died before acking.
        let mut reader = h.log.reader().await?;
        let taken = reader
            .read_group(
                &all,
                "hand-materializer",
                "hand-materializer-1",
                GroupPosition::New,
                ReadOptions {
                    count: 10,
                    block: std::time::Duration::ZERO,
                },
            )
            .await?;
        assert_eq!(taken.len(), 4);
        assert_eq!(h.log.pending_count(&all, "hand-materializer"), 4);

        let task = Arc::clone(&h.materializer).start();
        assert!(wait_until(|| h.hands.len() == 1).await);
        assert!(wait_until(|| h.log.pending_count(&all, "hand-materializer") == 0).await);
        task.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_loop_to_exit() -> anyhow::Result<()> {
        let h = TestHarness::new();
        let task = Arc::clone(&h.materializer).start();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        tokio::time::timeout(std::time::Duration::from_secs(2), task.shutdown()).await?;
        Ok(())
    }
}
