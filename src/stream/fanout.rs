use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::events::types::GameEvent;
use crate::stream::log::{LogStore, LogStoreError};
use crate::stream::{encode_event, StreamChannel, StreamKeys};
use crate::tokio_tools::spawn_named_task;

const LOG_TARGET: &str = "poker_event_core::stream::fanout";

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{failed} of {attempted} channel appends failed; first error: {first}")]
    Partial {
        attempted: usize,
        failed: usize,
        first: LogStoreError,
    },
}

/// Publishes persisted events onto every logical channel they belong to.
pub struct StreamFanout {
    log: Arc<dyn LogStore>,
    keys: StreamKeys,
}

impl StreamFanout {
    pub fn new(log: Arc<dyn LogStore>, keys: StreamKeys) -> Self {
        Self { log, keys }
    }

    pub fn keys(&self) -> &StreamKeys {
        &self.keys
    }

    /// Append `event` to each of its channels. Every channel is attempted even
    /// when an earlier append fails.
    pub async fn publish(&self, event: &GameEvent) -> Result<usize, FanoutError> {
        let fields = encode_event(event)?;
        let channels = StreamChannel::for_event(event);
        let attempted = channels.len();
        let mut failed = 0;
        let mut first = None;

        for channel in channels {
            let key = self.keys.channel(&channel);
            match self.log.append(&key, &fields).await {
                Ok(id) => {
                    debug!(target: LOG_TARGET, event_id = %event.event_id, stream = %key, %id, "event published");
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, event_id = %event.event_id, stream = %key, error = %err, "channel append failed");
                    failed += 1;
                    first.get_or_insert(err);
                }
            }
        }

        match first {
            None => Ok(attempted),
            Some(first) => Err(FanoutError::Partial {
                attempted,
                failed,
                first,
            }),
        }
    }
}

/// Ordered, best-effort publishing off the caller's path.
///
/// Batches are published one at a time by a single worker so that every
/// channel receives events in commit order. Failures are logged and
/// swallowed; the relational store stays the source of truth.
#[derive(Clone)]
pub struct FanoutQueue {
    tx: mpsc::UnboundedSender<Vec<GameEvent>>,
}

impl FanoutQueue {
    /// Spawn the worker. It exits once every queue handle is dropped.
    pub fn spawn(fanout: Arc<StreamFanout>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<GameEvent>>();
        spawn_named_task("stream-fanout", async move {
            while let Some(batch) = rx.recv().await {
                for event in batch {
                    if let Err(err) = fanout.publish(&event).await {
                        warn!(
                            target: LOG_TARGET,
                            event_id = %event.event_id,
                            error = %err,
                            "stream fan-out failed; event remains durable"
                        );
                    }
                }
            }
            debug!(target: LOG_TARGET, "fan-out queue closed");
        });
        Self { tx }
    }

    pub fn enqueue(&self, events: Vec<GameEvent>) {
        if events.is_empty() {
            return;
        }
        if self.tx.send(events).is_err() {
            warn!(target: LOG_TARGET, "fan-out worker is gone; dropping publish");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::GameEventType;
    use crate::stream::decode_event;
    use crate::stream::log::InMemoryLogStore;
    use crate::test_support::event_fixture;

    #[tokio::test]
    async fn publishes_to_every_applicable_channel() -> anyhow::Result<()> {
        let log = InMemoryLogStore::new();
        let fanout = StreamFanout::new(Arc::new(log.clone()), StreamKeys::new("t:"));
        let mut event = event_fixture(GameEventType::CardsDealt, Some("h1"), Some(2));
        event.user_id = Some("u1".into());

        assert_eq!(fanout.publish(&event).await?, 4);
        for key in ["t:all", "t:table:t1", "t:hand:h1", "t:user:u1"] {
            let entries = log.entries(key);
            assert_eq!(entries.len(), 1, "{key}");
            assert_eq!(decode_event(&entries[0])?, event);
        }
        Ok(())
    }

    #[tokio::test]
    async fn partial_failure_still_attempts_remaining_channels() -> anyhow::Result<()> {
        let log = InMemoryLogStore::new();
        let fanout = StreamFanout::new(Arc::new(log.clone()), StreamKeys::new("t:"));
        let event = event_fixture(GameEventType::PlayerJoined, None, None);
        log.fail_next_appends(1);

        let err = fanout.publish(&event).await.unwrap_err();
        assert!(matches!(
            err,
            FanoutError::Partial {
                attempted: 2,
                failed: 1,
                ..
            }
        ));
        assert!(log.entries("t:all").is_empty());
        assert_eq!(log.entries("t:table:t1").len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn queue_preserves_commit_order_per_channel() -> anyhow::Result<()> {
        let log = InMemoryLogStore::new();
        let fanout = Arc::new(StreamFanout::new(Arc::new(log.clone()), StreamKeys::new("t:")));
        let queue = FanoutQueue::spawn(fanout);
        let mut expected = Vec::new();
        for seq in 1..=20 {
            let event = event_fixture(GameEventType::ActionTaken, Some("h1"), Some(seq));
            expected.push(event.event_id.clone());
            queue.enqueue(vec![event]);
        }

        for _ in 0..100 {
            if log.entries("t:hand:h1").len() == expected.len() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let published: Vec<String> = log
            .entries("t:hand:h1")
            .iter()
            .map(|entry| decode_event(entry).map(|event| event.event_id))
            .collect::<Result<_, _>>()?;
        assert_eq!(published, expected);
        Ok(())
    }
}
