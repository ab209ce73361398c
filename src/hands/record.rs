use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::types::{Chips, HandId, SeatId, TableId, UserId};

pub const UNKNOWN_TABLE_NAME: &str = "Unknown Table";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandConfig {
    pub small_blind: Chips,
    pub big_blind: Chips,
    pub ante: Chips,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandResult {
    Won,
    Lost,
    Folded,
    Split,
}

impl fmt::Display for HandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandResult::Won => "WON",
            HandResult::Lost => "LOST",
            HandResult::Folded => "FOLDED",
            HandResult::Split => "SPLIT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAction {
    pub street: String,
    pub action: String,
    pub amount: Chips,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandParticipant {
    pub seat_id: SeatId,
    pub user_id: UserId,
    pub nickname: Option<String>,
    pub starting_stack: Chips,
    pub ending_stack: Chips,
    /// `None` means unknown or redacted.
    pub hole_cards: Option<Vec<String>>,
    pub actions: Vec<ParticipantAction>,
    pub result: HandResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pot {
    pub amount: Chips,
    pub winners: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
    pub user_id: UserId,
    pub amount: Chips,
}

/// Denormalized summary of one completed hand, rebuilt from its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandRecord {
    pub hand_id: HandId,
    pub table_id: TableId,
    pub table_name: String,
    pub config: HandConfig,
    pub participants: Vec<HandParticipant>,
    pub community_cards: Vec<String>,
    pub pots: Vec<Pot>,
    pub winners: Vec<Winner>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Milliseconds between start and completion; 0 when either is unknown.
    pub duration: i64,
}

impl HandRecord {
    pub fn participant(&self, user_id: &str) -> Option<&HandParticipant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participant(user_id).is_some()
    }
}

/// One page of hand records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandPage {
    pub hands: Vec<HandRecord>,
    pub total: u64,
}
