use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::events::types::{GameEvent, Sequence};
use crate::stream::log::{LogReader, LogStore, ReadOptions, LOG_START};
use crate::stream::{decode_event, StreamChannel, StreamKeys};
use crate::tokio_tools::spawn_named_task;

const LOG_TARGET: &str = "poker_event_core::stream::subscription";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub channel: StreamChannel,
    /// `None` follows the tail; `Some(n)` replays from the start, keeping
    /// events whose sequence is absent or greater than `n`.
    pub start_sequence: Option<Sequence>,
}

impl SubscribeRequest {
    pub fn tail(channel: StreamChannel) -> Self {
        Self {
            channel,
            start_sequence: None,
        }
    }

    pub fn replay_after(channel: StreamChannel, sequence: Sequence) -> Self {
        Self {
            channel,
            start_sequence: Some(sequence),
        }
    }

    fn admits(&self, event: &GameEvent) -> bool {
        match (self.start_sequence, event.sequence) {
            (Some(start), Some(sequence)) => sequence > start,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEnd {
    Cancelled,
    SinkClosed,
}

/// Cursor-driven reader of one channel for external consumers.
#[derive(Clone)]
pub struct SubscriptionEngine {
    log: Arc<dyn LogStore>,
    keys: StreamKeys,
    config: StreamConfig,
}

impl SubscriptionEngine {
    pub fn new(log: Arc<dyn LogStore>, keys: StreamKeys, config: StreamConfig) -> Self {
        Self { log, keys, config }
    }

    /// Start a subscription on its own task. Dropping the returned handle
    /// cancels it.
    pub fn subscribe(&self, request: SubscribeRequest) -> EventSubscription {
        let (tx, rx) = mpsc::channel(self.config.sink_capacity.max(1));
        let cancel = CancellationToken::new();
        let engine = self.clone();
        let token = cancel.clone();
        let task = spawn_named_task(format!("subscription:{}", request.channel), async move {
            engine.run(request, tx, token).await
        });
        EventSubscription {
            events: ReceiverStream::new(rx),
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
            task: Some(task),
        }
    }

    /// Pump events into `sink` until `cancel` fires or the sink is dropped.
    /// A full sink suspends further reads.
    pub async fn run(
        &self,
        request: SubscribeRequest,
        sink: mpsc::Sender<GameEvent>,
        cancel: CancellationToken,
    ) -> SubscriptionEnd {
        let key = self.keys.channel(&request.channel);
        let opts = ReadOptions {
            count: self.config.batch_size,
            block: self.config.block(),
        };

        let Some(mut reader) = self.open_reader(&key, &cancel).await else {
            return SubscriptionEnd::Cancelled;
        };
        let mut position = match request.start_sequence {
            Some(_) => LOG_START.to_string(),
            None => match self.tail_position(&key, &cancel).await {
                Some(position) => position,
                None => return SubscriptionEnd::Cancelled,
            },
        };
        info!(
            target: LOG_TARGET,
            stream = %key,
            start_sequence = ?request.start_sequence,
            %position,
            "subscription started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = reader.read(&key, &position, opts) => batch,
            };
            let batch = match batch {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(target: LOG_TARGET, stream = %key, error = %err, "stream read failed; retrying");
                    if !self.pause(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            for message in batch {
                position = message.id.clone();
                if cancel.is_cancelled() {
                    return self.finish(&key, SubscriptionEnd::Cancelled);
                }
                let event = match decode_event(&message) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(target: LOG_TARGET, stream = %key, error = %err, "skipping undecodable stream entry");
                        continue;
                    }
                };
                if !request.admits(&event) {
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return self.finish(&key, SubscriptionEnd::Cancelled);
                    }
                    sent = sink.send(event) => {
                        if sent.is_err() {
                            return self.finish(&key, SubscriptionEnd::SinkClosed);
                        }
                    }
                }
            }
        }
        self.finish(&key, SubscriptionEnd::Cancelled)
    }

    fn finish(&self, key: &str, end: SubscriptionEnd) -> SubscriptionEnd {
        debug!(target: LOG_TARGET, stream = %key, ?end, "subscription finished");
        end
    }

    /// Sleep for the retry delay; `false` when cancelled meanwhile.
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(self.config.retry_delay()) => true,
        }
    }

    async fn open_reader(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Option<Box<dyn LogReader>> {
        loop {
            match self.log.reader().await {
                Ok(reader) => return Some(reader),
                Err(err) => {
                    warn!(target: LOG_TARGET, stream = %key, error = %err, "failed to open stream reader; retrying");
                    if !self.pause(cancel).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Newest entry id at subscribe time, so that only later appends are
    /// delivered even if the first read times out.
    async fn tail_position(&self, key: &str, cancel: &CancellationToken) -> Option<String> {
        loop {
            match self.log.last_id(key).await {
                Ok(last) => return Some(last.unwrap_or_else(|| LOG_START.to_string())),
                Err(err) => {
                    warn!(target: LOG_TARGET, stream = %key, error = %err, "failed to resolve stream tail; retrying");
                    if !self.pause(cancel).await {
                        return None;
                    }
                }
            }
        }
    }
}

/// A live subscription. Yields events in channel order; dropping it cancels
/// the underlying reader exactly once.
pub struct EventSubscription {
    events: ReceiverStream<GameEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
    task: Option<JoinHandle<SubscriptionEnd>>,
}

impl EventSubscription {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the reader task to stop.
    pub async fn shutdown(mut self) -> SubscriptionEnd {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => task.await.unwrap_or(SubscriptionEnd::Cancelled),
            None => SubscriptionEnd::Cancelled,
        }
    }
}

impl Stream for EventSubscription {
    type Item = GameEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<GameEvent>> {
        Pin::new(&mut self.get_mut().events).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::time::timeout;

    use crate::events::types::GameEventType;
    use crate::stream::log::InMemoryLogStore;
    use crate::stream::{encode_event, EVENT_FIELD};
    use crate::test_support::{event_fixture, fast_stream_config};

    fn engine(log: &InMemoryLogStore) -> SubscriptionEngine {
        SubscriptionEngine::new(
            Arc::new(log.clone()),
            StreamKeys::new("t:"),
            fast_stream_config(),
        )
    }

    async fn append(log: &InMemoryLogStore, key: &str, event: &GameEvent) {
        log.append(key, &encode_event(event).unwrap()).await.unwrap();
    }

    async fn next(sub: &mut EventSubscription) -> Option<GameEvent> {
        timeout(Duration::from_secs(2), sub.next()).await.ok().flatten()
    }

    #[tokio::test]
    async fn replay_filters_by_exclusive_start_sequence() -> anyhow::Result<()> {
        let log = InMemoryLogStore::new();
        for seq in 1..=3 {
            let event = event_fixture(GameEventType::ActionTaken, Some("h1"), Some(seq));
            append(&log, "t:hand:h1", &event).await;
        }

        let mut sub = engine(&log).subscribe(SubscribeRequest::replay_after(
            StreamChannel::Hand("h1".into()),
            2,
        ));
        let first = next(&mut sub).await.expect("one event");
        assert_eq!(first.sequence, Some(3));
        assert!(
            timeout(Duration::from_millis(100), sub.next()).await.is_err(),
            "nothing else is delivered"
        );
        assert_eq!(sub.shutdown().await, SubscriptionEnd::Cancelled);
        Ok(())
    }

    #[tokio::test]
    async fn tail_follow_skips_backlog_and_crosses_hands() -> anyhow::Result<()> {
        let log = InMemoryLogStore::new();
        let backlog = event_fixture(GameEventType::HandCompleted, Some("h0"), Some(9));
        append(&log, "t:table:t1", &backlog).await;

        let mut sub = engine(&log).subscribe(SubscribeRequest::tail(StreamChannel::Table(
            "t1".into(),
        )));
        // Let the engine resolve the tail before appending.
        tokio::time::sleep(Duration::from_millis(30)).await;

        let mut expected = Vec::new();
        for (hand, seq) in [("h1", 1), ("h1", 2), ("h2", 1), ("h2", 2)] {
            let event = event_fixture(GameEventType::ActionTaken, Some(hand), Some(seq));
            append(&log, "t:table:t1", &event).await;
            expected.push(event.event_id);
        }

        let mut received = Vec::new();
        for _ in 0..expected.len() {
            received.push(next(&mut sub).await.expect("event").event_id);
        }
        assert_eq!(received, expected);
        assert!(timeout(Duration::from_millis(100), sub.next()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped_not_fatal() -> anyhow::Result<()> {
        let log = InMemoryLogStore::new();
        log.append("t:all", &[(EVENT_FIELD, "{broken".to_string())])
            .await?;
        log.append("t:all", &[("unrelated", "x".to_string())]).await?;
        let good = event_fixture(GameEventType::PlayerJoined, None, None);
        append(&log, "t:all", &good).await;

        let mut sub = engine(&log).subscribe(SubscribeRequest::replay_after(StreamChannel::All, 0));
        assert_eq!(next(&mut sub).await.map(|e| e.event_id), Some(good.event_id));
        Ok(())
    }

    #[tokio::test]
    async fn transport_errors_are_retried() -> anyhow::Result<()> {
        let log = InMemoryLogStore::new();
        let event = event_fixture(GameEventType::ActionTaken, Some("h1"), Some(1));
        append(&log, "t:hand:h1", &event).await;
        log.fail_next_reads(2);

        let mut sub = engine(&log).subscribe(SubscribeRequest::replay_after(
            StreamChannel::Hand("h1".into()),
            0,
        ));
        assert_eq!(next(&mut sub).await.map(|e| e.sequence), Some(Some(1)));
        Ok(())
    }

    #[tokio::test]
    async fn saturated_sink_suspends_reads_without_loss() -> anyhow::Result<()> {
        let log = InMemoryLogStore::new();
        for seq in 1..=5 {
            let event = event_fixture(GameEventType::ActionTaken, Some("h1"), Some(seq));
            append(&log, "t:hand:h1", &event).await;
        }
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let engine = engine(&log);
        let request = SubscribeRequest::replay_after(StreamChannel::Hand("h1".into()), 0);
        let token = cancel.clone();
        let task = tokio::spawn(async move { engine.run(request, tx, token).await });

        // The consumer is slow; the engine must wait rather than drop.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut sequences = Vec::new();
        for _ in 0..5 {
            sequences.push(rx.recv().await.and_then(|e| e.sequence));
        }
        assert_eq!(sequences, (1..=5).map(Some).collect::<Vec<_>>());

        cancel.cancel();
        assert_eq!(task.await?, SubscriptionEnd::Cancelled);
        Ok(())
    }

    #[tokio::test]
    async fn dropping_the_receiver_ends_the_engine() -> anyhow::Result<()> {
        let log = InMemoryLogStore::new();
        let event = event_fixture(GameEventType::ActionTaken, Some("h1"), Some(1));
        append(&log, "t:hand:h1", &event).await;

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let end = engine(&log)
            .run(
                SubscribeRequest::replay_after(StreamChannel::Hand("h1".into()), 0),
                tx,
                CancellationToken::new(),
            )
            .await;
        assert_eq!(end, SubscriptionEnd::SinkClosed);
        Ok(())
    }
}
