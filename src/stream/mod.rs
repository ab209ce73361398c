//! Log-structured fan-out of persisted events and resumable subscriptions.
//!
//! Every persisted [`GameEvent`] is appended, JSON encoded, to the `all`
//! channel and to its `table:`, `hand:` and `user:` channels. Readers either
//! follow a channel's tail or replay it from the start filtered by sequence.

pub mod fanout;
pub mod log;
pub mod subscription;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::events::types::{GameEvent, HandId, TableId, UserId};
use crate::stream::log::StreamMessage;

pub use fanout::{FanoutQueue, StreamFanout};
pub use subscription::{EventSubscription, SubscribeRequest, SubscriptionEngine};

/// Entry field carrying the canonical camelCase JSON event.
pub const EVENT_FIELD: &str = "event";
/// Field name written by older producers.
pub const LEGACY_EVENT_FIELD: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    All,
    Table(TableId),
    Hand(HandId),
    User(UserId),
}

impl StreamChannel {
    /// Every channel a persisted event belongs to, `all` first.
    pub fn for_event(event: &GameEvent) -> Vec<StreamChannel> {
        let mut channels = vec![
            StreamChannel::All,
            StreamChannel::Table(event.table_id.clone()),
        ];
        if let Some(hand_id) = &event.hand_id {
            channels.push(StreamChannel::Hand(hand_id.clone()));
        }
        if let Some(user_id) = &event.user_id {
            channels.push(StreamChannel::User(user_id.clone()));
        }
        channels
    }
}

impl fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamChannel::All => f.write_str("all"),
            StreamChannel::Table(id) => write!(f, "table:{id}"),
            StreamChannel::Hand(id) => write!(f, "hand:{id}"),
            StreamChannel::User(id) => write!(f, "user:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stream `{0}`; expected all, table:<id>, hand:<id> or user:<id>")]
pub struct InvalidStreamId(pub String);

impl FromStr for StreamChannel {
    type Err = InvalidStreamId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(StreamChannel::All);
        }
        let invalid = || InvalidStreamId(s.to_string());
        let (kind, id) = s.split_once(':').ok_or_else(invalid)?;
        if id.is_empty() {
            return Err(invalid());
        }
        match kind {
            "table" => Ok(StreamChannel::Table(id.to_string())),
            "hand" => Ok(StreamChannel::Hand(id.to_string())),
            "user" => Ok(StreamChannel::User(id.to_string())),
            _ => Err(invalid()),
        }
    }
}

/// Maps logical channels and counters onto log-store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamKeys {
    prefix: String,
}

impl StreamKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn channel(&self, channel: &StreamChannel) -> String {
        format!("{}{channel}", self.prefix)
    }

    pub fn hand_sequence(&self, hand_id: &str) -> String {
        format!("{}seq:hand:{hand_id}", self.prefix)
    }
}

impl Default for StreamKeys {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_STREAM_PREFIX)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("stream entry {0} has no event field")]
    MissingEvent(String),
    #[error("stream entry {id} is not a valid event: {source}")]
    Json {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn encode_event(event: &GameEvent) -> Result<Vec<(&'static str, String)>, serde_json::Error> {
    Ok(vec![(EVENT_FIELD, serde_json::to_string(event)?)])
}

pub fn decode_event(message: &StreamMessage) -> Result<GameEvent, DecodeError> {
    let raw = message
        .field(EVENT_FIELD)
        .or_else(|| message.field(LEGACY_EVENT_FIELD))
        .ok_or_else(|| DecodeError::MissingEvent(message.id.clone()))?;
    serde_json::from_str(raw).map_err(|source| DecodeError::Json {
        id: message.id.clone(),
        source,
    })
}
