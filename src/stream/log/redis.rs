use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value as RedisValue};
use tracing::{debug, warn};

use super::{
    GroupPosition, LogReader, LogStore, LogStoreError, MessageId, ReadOptions, StreamMessage,
};

const LOG_TARGET: &str = "poker_event_core::stream::redis";

/// Redis streams backend. Non-blocking commands share one managed,
/// auto-reconnecting connection; each reader gets a dedicated connection.
#[derive(Clone)]
pub struct RedisLogStore {
    client: redis::Client,
    connection: ConnectionManager,
}

impl RedisLogStore {
    pub async fn connect(url: &str) -> Result<Self, LogStoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self { client, connection })
    }
}

#[async_trait]
impl LogStore for RedisLogStore {
    async fn append(
        &self,
        channel: &str,
        fields: &[(&str, String)],
    ) -> Result<MessageId, LogStoreError> {
        let mut conn = self.connection.clone();
        let id: String = conn.xadd(channel, "*", fields).await?;
        Ok(id)
    }

    async fn increment(&self, key: &str) -> Result<i64, LogStoreError> {
        let mut conn = self.connection.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn last_id(&self, channel: &str) -> Result<Option<MessageId>, LogStoreError> {
        let mut conn = self.connection.clone();
        let reply: StreamRangeReply = conn.xrevrange_count(channel, "+", "-", 1).await?;
        Ok(reply.ids.into_iter().next().map(|entry| entry.id))
    }

    async fn create_group(&self, channel: &str, group: &str) -> Result<(), LogStoreError> {
        let mut conn = self.connection.clone();
        let result: redis::RedisResult<()> = conn.xgroup_create_mkstream(channel, group, "$").await;
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.code() == Some("BUSYGROUP") => Err(LogStoreError::GroupExists {
                channel: channel.to_string(),
                group: group.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn ack(
        &self,
        channel: &str,
        group: &str,
        ids: &[MessageId],
    ) -> Result<(), LogStoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let _: i64 = conn.xack(channel, group, ids).await?;
        Ok(())
    }

    async fn reader(&self) -> Result<Box<dyn LogReader>, LogStoreError> {
        Ok(Box::new(RedisLogReader {
            client: self.client.clone(),
            connection: None,
        }))
    }
}

struct RedisLogReader {
    client: redis::Client,
    connection: Option<MultiplexedConnection>,
}

impl RedisLogReader {
    async fn connection(&mut self) -> Result<&mut MultiplexedConnection, LogStoreError> {
        if self.connection.is_none() {
            debug!(target: LOG_TARGET, "opening dedicated reader connection");
            self.connection = Some(self.client.get_multiplexed_async_connection().await?);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| LogStoreError::Unavailable("reader connection missing".into()))
    }

    async fn xread(
        &mut self,
        channel: &str,
        id: &str,
        opts: StreamReadOptions,
    ) -> Result<Vec<StreamMessage>, LogStoreError> {
        let conn = self.connection().await?;
        let reply: redis::RedisResult<Option<StreamReadReply>> =
            conn.xread_options(&[channel], &[id], &opts).await;
        match reply {
            Ok(reply) => Ok(reply.map(flatten_reply).unwrap_or_default()),
            Err(err) => {
                // Drop the connection so the next read reconnects.
                self.connection = None;
                Err(err.into())
            }
        }
    }
}

fn base_options(opts: ReadOptions) -> StreamReadOptions {
    let read = StreamReadOptions::default().count(opts.count.max(1));
    if opts.block.is_zero() {
        read
    } else {
        read.block(opts.block.as_millis() as usize)
    }
}

fn flatten_reply(reply: StreamReadReply) -> Vec<StreamMessage> {
    reply
        .keys
        .into_iter()
        .flat_map(|key| key.ids)
        .map(|entry| StreamMessage {
            id: entry.id,
            fields: string_fields(entry.map),
        })
        .collect()
}

fn string_fields(map: HashMap<String, RedisValue>) -> HashMap<String, String> {
    map.into_iter()
        .filter_map(|(key, value)| match redis::from_redis_value::<String>(&value) {
            Ok(text) => Some((key, text)),
            Err(err) => {
                warn!(target: LOG_TARGET, field = %key, error = %err, "dropping non-string stream field");
                None
            }
        })
        .collect()
}

#[async_trait]
impl LogReader for RedisLogReader {
    async fn read(
        &mut self,
        channel: &str,
        after: &str,
        opts: ReadOptions,
    ) -> Result<Vec<StreamMessage>, LogStoreError> {
        self.xread(channel, after, base_options(opts)).await
    }

    async fn read_group(
        &mut self,
        channel: &str,
        group: &str,
        consumer: &str,
        position: GroupPosition,
        opts: ReadOptions,
    ) -> Result<Vec<StreamMessage>, LogStoreError> {
        let id = match position {
            GroupPosition::New => ">",
            GroupPosition::Pending => "0",
        };
        let read = base_options(opts).group(group, consumer);
        match self.xread(channel, id, read).await {
            Err(LogStoreError::Redis(err)) if err.code() == Some("NOGROUP") => {
                Err(LogStoreError::NoSuchGroup {
                    channel: channel.to_string(),
                    group: group.to_string(),
                })
            }
            result => result,
        }
    }
}
