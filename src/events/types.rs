use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EventId = String;
pub type TableId = String;
pub type HandId = String;
pub type UserId = String;
pub type SeatId = i32;
pub type Chips = i64;
pub type Sequence = i64;

/// Structured event payload. Always a JSON object once validated.
pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameEventType {
    // Hand-scoped
    HandStarted,
    CardsDealt,
    BlindPosted,
    TurnStarted,
    ActionTaken,
    StreetAdvanced,
    CardsRevealed,
    Showdown,
    PotAwarded,
    RakeDeducted,
    HandCompleted,
    // Table-scoped
    TableCreated,
    TableClosed,
    PlayerJoined,
    PlayerLeft,
    PlayerSatOut,
    PlayerSatIn,
}

impl GameEventType {
    pub const ALL: [GameEventType; 17] = [
        GameEventType::HandStarted,
        GameEventType::CardsDealt,
        GameEventType::BlindPosted,
        GameEventType::TurnStarted,
        GameEventType::ActionTaken,
        GameEventType::StreetAdvanced,
        GameEventType::CardsRevealed,
        GameEventType::Showdown,
        GameEventType::PotAwarded,
        GameEventType::RakeDeducted,
        GameEventType::HandCompleted,
        GameEventType::TableCreated,
        GameEventType::TableClosed,
        GameEventType::PlayerJoined,
        GameEventType::PlayerLeft,
        GameEventType::PlayerSatOut,
        GameEventType::PlayerSatIn,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            GameEventType::HandStarted => "HAND_STARTED",
            GameEventType::CardsDealt => "CARDS_DEALT",
            GameEventType::BlindPosted => "BLIND_POSTED",
            GameEventType::TurnStarted => "TURN_STARTED",
            GameEventType::ActionTaken => "ACTION_TAKEN",
            GameEventType::StreetAdvanced => "STREET_ADVANCED",
            GameEventType::CardsRevealed => "CARDS_REVEALED",
            GameEventType::Showdown => "SHOWDOWN",
            GameEventType::PotAwarded => "POT_AWARDED",
            GameEventType::RakeDeducted => "RAKE_DEDUCTED",
            GameEventType::HandCompleted => "HAND_COMPLETED",
            GameEventType::TableCreated => "TABLE_CREATED",
            GameEventType::TableClosed => "TABLE_CLOSED",
            GameEventType::PlayerJoined => "PLAYER_JOINED",
            GameEventType::PlayerLeft => "PLAYER_LEFT",
            GameEventType::PlayerSatOut => "PLAYER_SAT_OUT",
            GameEventType::PlayerSatIn => "PLAYER_SAT_IN",
        }
    }

    /// Hand-scoped events must carry a `handId` and receive a per-hand sequence.
    pub const fn is_hand_scoped(self) -> bool {
        match self {
            GameEventType::HandStarted
            | GameEventType::CardsDealt
            | GameEventType::BlindPosted
            | GameEventType::TurnStarted
            | GameEventType::ActionTaken
            | GameEventType::StreetAdvanced
            | GameEventType::CardsRevealed
            | GameEventType::Showdown
            | GameEventType::PotAwarded
            | GameEventType::RakeDeducted
            | GameEventType::HandCompleted => true,
            GameEventType::TableCreated
            | GameEventType::TableClosed
            | GameEventType::PlayerJoined
            | GameEventType::PlayerLeft
            | GameEventType::PlayerSatOut
            | GameEventType::PlayerSatIn => false,
        }
    }
}

impl fmt::Display for GameEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type `{0}`")]
pub struct UnknownEventType(pub String);

impl FromStr for GameEventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameEventType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// An immutable, persisted game fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    #[serde(alias = "event_id")]
    pub event_id: EventId,
    #[serde(rename = "type", alias = "event_type")]
    pub event_type: GameEventType,
    #[serde(alias = "table_id")]
    pub table_id: TableId,
    #[serde(default, alias = "hand_id")]
    pub hand_id: Option<HandId>,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<UserId>,
    #[serde(default, alias = "seat_id")]
    pub seat_id: Option<SeatId>,
    #[serde(default)]
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sequence: Option<Sequence>,
}

/// Producer-supplied event prior to validation and numbering.
///
/// `event_type` and `payload` are kept loose so that validation can report
/// precisely which field is wrong instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGameEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub table_id: String,
    #[serde(default)]
    pub hand_id: Option<HandId>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub seat_id: Option<i64>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl NewGameEvent {
    pub fn new(event_type: GameEventType, table_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.as_str().to_string(),
            table_id: table_id.into(),
            payload,
            ..Default::default()
        }
    }

    pub fn with_hand(mut self, hand_id: impl Into<String>) -> Self {
        self.hand_id = Some(hand_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_seat(mut self, seat_id: i64) -> Self {
        self.seat_id = Some(seat_id);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Filters accepted by the event query path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub table_id: Option<TableId>,
    pub hand_id: Option<HandId>,
    pub user_id: Option<UserId>,
    pub types: Vec<GameEventType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: u64,
    pub offset: u64,
}

impl EventFilter {
    pub fn matches(&self, event: &GameEvent) -> bool {
        if let Some(table_id) = &self.table_id {
            if &event.table_id != table_id {
                return false;
            }
        }
        if let Some(hand_id) = &self.hand_id {
            if event.hand_id.as_ref() != Some(hand_id) {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if event.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        if !self.types.is_empty() && !self.types.contains(&event.event_type) {
            return false;
        }
        if let Some(start) = self.start_time {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if event.timestamp > end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    pub events: Vec<GameEvent>,
    pub total: u64,
}
