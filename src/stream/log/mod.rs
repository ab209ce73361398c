mod in_memory;
mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::in_memory::InMemoryLogStore;
pub use self::redis::RedisLogStore;

pub type MessageId = String;

/// Position before the first entry of any log.
pub const LOG_START: &str = "0-0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub id: MessageId,
    pub fields: HashMap<String, String>,
}

impl StreamMessage {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub count: usize,
    /// Upper bound on how long a read waits for new entries. Zero never waits.
    pub block: Duration,
}

/// Where a consumer-group read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPosition {
    /// Entries never delivered to any consumer of the group (`>`).
    New,
    /// Entries delivered to this consumer but not yet acknowledged (`0`).
    Pending,
}

#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("consumer group `{group}` already exists on `{channel}`")]
    GroupExists { channel: String, group: String },
    #[error("consumer group `{group}` does not exist on `{channel}`")]
    NoSuchGroup { channel: String, group: String },
    #[error("log store unavailable: {0}")]
    Unavailable(String),
}

/// Persistent, ordered, append-only logs keyed by channel name.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(
        &self,
        channel: &str,
        fields: &[(&str, String)],
    ) -> Result<MessageId, LogStoreError>;

    /// Single round-trip atomic increment; returns the new value.
    async fn increment(&self, key: &str) -> Result<i64, LogStoreError>;

    /// Id of the newest entry, if the channel has any.
    async fn last_id(&self, channel: &str) -> Result<Option<MessageId>, LogStoreError>;

    /// Create `group` positioned at the channel tail, creating the channel if
    /// needed. Fails with [`LogStoreError::GroupExists`] when already present.
    async fn create_group(&self, channel: &str, group: &str) -> Result<(), LogStoreError>;

    async fn ack(&self, channel: &str, group: &str, ids: &[MessageId])
        -> Result<(), LogStoreError>;

    /// A reader owning its own connection so blocking reads never stall
    /// other users of the store.
    async fn reader(&self) -> Result<Box<dyn LogReader>, LogStoreError>;
}

#[async_trait]
pub trait LogReader: Send {
    /// Entries with ids strictly greater than `after`. Returns an empty batch
    /// when `opts.block` elapses without new data.
    async fn read(
        &mut self,
        channel: &str,
        after: &str,
        opts: ReadOptions,
    ) -> Result<Vec<StreamMessage>, LogStoreError>;

    async fn read_group(
        &mut self,
        channel: &str,
        group: &str,
        consumer: &str,
        position: GroupPosition,
        opts: ReadOptions,
    ) -> Result<Vec<StreamMessage>, LogStoreError>;
}
