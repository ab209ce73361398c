use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};

use super::{
    GroupPosition, LogReader, LogStore, LogStoreError, MessageId, ReadOptions, StreamMessage,
};

#[derive(Default)]
struct Channel {
    entries: Vec<(u64, StreamMessage)>,
    groups: HashMap<String, Group>,
}

#[derive(Default)]
struct Group {
    last_delivered: u64,
    // entry number -> consumer that owns it
    pending: BTreeMap<u64, String>,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, Channel>,
    counters: HashMap<String, i64>,
    next_entry: u64,
}

/// Log store held in process memory. Supports blocking reads woken on append,
/// consumer groups with per-consumer pending lists, and injected failures.
#[derive(Clone, Default)]
pub struct InMemoryLogStore {
    inner: Arc<Mutex<Inner>>,
    appended: Arc<Notify>,
    read_failures: Arc<AtomicUsize>,
    append_failures: Arc<AtomicUsize>,
}

fn entry_number(id: &str) -> u64 {
    id.split('-')
        .next()
        .and_then(|head| head.parse().ok())
        .unwrap_or(0)
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` reads with a transport error.
    pub fn fail_next_reads(&self, n: usize) {
        self.read_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` appends with a transport error.
    pub fn fail_next_appends(&self, n: usize) {
        self.append_failures.store(n, Ordering::SeqCst);
    }

    pub fn entries(&self, channel: &str) -> Vec<StreamMessage> {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(|ch| ch.entries.iter().map(|(_, msg)| msg.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, channel: &str, group: &str) -> usize {
        self.inner
            .lock()
            .channels
            .get(channel)
            .and_then(|ch| ch.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    fn collect_after(&self, channel: &str, after: u64, count: usize) -> Vec<StreamMessage> {
        let inner = self.inner.lock();
        inner
            .channels
            .get(channel)
            .map(|ch| {
                ch.entries
                    .iter()
                    .filter(|(n, _)| *n > after)
                    .take(count)
                    .map(|(_, msg)| msg.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn deliver_group(
        &self,
        channel: &str,
        group: &str,
        consumer: &str,
        position: GroupPosition,
        count: usize,
    ) -> Result<Vec<StreamMessage>, LogStoreError> {
        let mut inner = self.inner.lock();
        let ch = inner
            .channels
            .get_mut(channel)
            .ok_or_else(|| LogStoreError::NoSuchGroup {
                channel: channel.to_string(),
                group: group.to_string(),
            })?;
        let Channel { entries, groups } = ch;
        let grp = groups.get_mut(group).ok_or_else(|| LogStoreError::NoSuchGroup {
            channel: channel.to_string(),
            group: group.to_string(),
        })?;

        let batch: Vec<(u64, StreamMessage)> = match position {
            GroupPosition::New => entries
                .iter()
                .filter(|(n, _)| *n > grp.last_delivered)
                .take(count)
                .cloned()
                .collect(),
            GroupPosition::Pending => entries
                .iter()
                .filter(|(n, _)| grp.pending.get(n).map(String::as_str) == Some(consumer))
                .take(count)
                .cloned()
                .collect(),
        };

        if position == GroupPosition::New {
            for (n, _) in &batch {
                grp.pending.insert(*n, consumer.to_string());
                grp.last_delivered = grp.last_delivered.max(*n);
            }
        }
        Ok(batch.into_iter().map(|(_, msg)| msg).collect())
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(
        &self,
        channel: &str,
        fields: &[(&str, String)],
    ) -> Result<MessageId, LogStoreError> {
        if take_failure(&self.append_failures) {
            return Err(LogStoreError::Unavailable("injected append failure".into()));
        }
        let id = {
            let mut inner = self.inner.lock();
            inner.next_entry += 1;
            let n = inner.next_entry;
            let id = format!("{n}-0");
            let message = StreamMessage {
                id: id.clone(),
                fields: fields
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.clone()))
                    .collect(),
            };
            inner
                .channels
                .entry(channel.to_string())
                .or_default()
                .entries
                .push((n, message));
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn increment(&self, key: &str) -> Result<i64, LogStoreError> {
        let mut inner = self.inner.lock();
        let counter = inner.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn last_id(&self, channel: &str) -> Result<Option<MessageId>, LogStoreError> {
        Ok(self
            .inner
            .lock()
            .channels
            .get(channel)
            .and_then(|ch| ch.entries.last())
            .map(|(_, msg)| msg.id.clone()))
    }

    async fn create_group(&self, channel: &str, group: &str) -> Result<(), LogStoreError> {
        let mut inner = self.inner.lock();
        let ch = inner.channels.entry(channel.to_string()).or_default();
        if ch.groups.contains_key(group) {
            return Err(LogStoreError::GroupExists {
                channel: channel.to_string(),
                group: group.to_string(),
            });
        }
        let tail = ch.entries.last().map(|(n, _)| *n).unwrap_or(0);
        ch.groups.insert(
            group.to_string(),
            Group {
                last_delivered: tail,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn ack(
        &self,
        channel: &str,
        group: &str,
        ids: &[MessageId],
    ) -> Result<(), LogStoreError> {
        let mut inner = self.inner.lock();
        if let Some(grp) = inner
            .channels
            .get_mut(channel)
            .and_then(|ch| ch.groups.get_mut(group))
        {
            for id in ids {
                grp.pending.remove(&entry_number(id));
            }
        }
        Ok(())
    }

    async fn reader(&self) -> Result<Box<dyn LogReader>, LogStoreError> {
        Ok(Box::new(InMemoryLogReader {
            store: self.clone(),
        }))
    }
}

struct InMemoryLogReader {
    store: InMemoryLogStore,
}

impl InMemoryLogReader {
    /// Run `poll` until it yields entries or `block` elapses. The waiter is
    /// registered before each poll so appends in between are not missed.
    async fn wait_for<F>(&self, block: std::time::Duration, mut poll: F) -> Result<Vec<StreamMessage>, LogStoreError>
    where
        F: FnMut() -> Result<Vec<StreamMessage>, LogStoreError> + Send,
    {
        if take_failure(&self.store.read_failures) {
            return Err(LogStoreError::Unavailable("injected read failure".into()));
        }
        let deadline = Instant::now() + block;
        loop {
            let appended = self.store.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let batch = poll()?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

#[async_trait]
impl LogReader for InMemoryLogReader {
    async fn read(
        &mut self,
        channel: &str,
        after: &str,
        opts: ReadOptions,
    ) -> Result<Vec<StreamMessage>, LogStoreError> {
        let after = entry_number(after);
        let count = opts.count.max(1);
        self.wait_for(opts.block, || Ok(self.store.collect_after(channel, after, count)))
            .await
    }

    async fn read_group(
        &mut self,
        channel: &str,
        group: &str,
        consumer: &str,
        position: GroupPosition,
        opts: ReadOptions,
    ) -> Result<Vec<StreamMessage>, LogStoreError> {
        let count = opts.count.max(1);
        let block = match position {
            GroupPosition::New => opts.block,
            GroupPosition::Pending => std::time::Duration::ZERO,
        };
        self.wait_for(block, || {
            self.store
                .deliver_group(channel, group, consumer, position, count)
        })
        .await
    }
}
