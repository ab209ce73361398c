//! Lenient, typed views over hand event payloads.
//!
//! Producers are not uniform about number encoding or nesting, so every
//! accessor coerces what it can and falls back to a neutral value instead of
//! failing.

use serde_json::Value;

use crate::events::types::{Chips, GameEvent, GameEventType, Payload, SeatId, UserId};

use super::record::{HandConfig, UNKNOWN_TABLE_NAME};

pub fn chips(value: Option<&Value>) -> Chips {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.round() as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

pub fn seat(value: Option<&Value>) -> Option<SeatId> {
    match value {
        Some(Value::Number(n)) => n.as_i64().and_then(|n| SeatId::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

pub fn cards(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn objects<'a>(value: Option<&'a Value>) -> impl Iterator<Item = &'a Payload> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatAssignment {
    pub seat_id: SeatId,
    pub user_id: UserId,
    pub nickname: Option<String>,
    pub stack: Chips,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandStarted {
    pub table_name: String,
    pub config: HandConfig,
    pub seats: Vec<SeatAssignment>,
}

impl HandStarted {
    fn from_payload(payload: &Payload) -> Self {
        // Blinds may sit at the top level or under `config`.
        let config = payload.get("config").and_then(Value::as_object);
        let blind = |key: &str| {
            payload
                .get(key)
                .or_else(|| config.and_then(|c| c.get(key)))
        };
        let seats = objects(payload.get("seats").or_else(|| payload.get("players")))
            .filter_map(|seat_obj| {
                Some(SeatAssignment {
                    seat_id: seat(seat_obj.get("seatId"))?,
                    user_id: text(seat_obj.get("userId"))?,
                    nickname: text(seat_obj.get("nickname")),
                    stack: chips(seat_obj.get("stack")),
                })
            })
            .collect();
        Self {
            table_name: text(payload.get("tableName"))
                .unwrap_or_else(|| UNKNOWN_TABLE_NAME.to_string()),
            config: HandConfig {
                small_blind: chips(blind("smallBlind")),
                big_blind: chips(blind("bigBlind")),
                ante: chips(blind("ante")),
            },
            seats,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reveal {
    pub seat_id: Option<SeatId>,
    pub user_id: Option<UserId>,
    pub cards: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardWinner {
    pub seat_id: Option<SeatId>,
    pub user_id: Option<UserId>,
    pub share: Option<Chips>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotAward {
    pub amount: Chips,
    pub winners: Vec<AwardWinner>,
}

/// A hand event decoded into the shape the reducer consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandEvent {
    Started(HandStarted),
    CardsDealt {
        user_id: Option<UserId>,
        seat_id: Option<SeatId>,
        cards: Vec<String>,
    },
    ActionTaken {
        user_id: Option<UserId>,
        seat_id: Option<SeatId>,
        street: String,
        action: String,
        amount: Chips,
    },
    StreetAdvanced {
        cards: Vec<String>,
    },
    Showdown {
        reveals: Vec<Reveal>,
    },
    CardsRevealed(Reveal),
    PotAwarded(PotAward),
    Completed {
        end_stacks: Vec<(UserId, Chips)>,
    },
    /// Carries no information the record keeps.
    Ignored,
}

impl HandEvent {
    pub fn decode(event: &GameEvent) -> Self {
        let payload = &event.payload;
        let user_id = || {
            event
                .user_id
                .clone()
                .or_else(|| text(payload.get("userId")))
        };
        let seat_id = || event.seat_id.or_else(|| seat(payload.get("seatId")));

        match event.event_type {
            GameEventType::HandStarted => HandEvent::Started(HandStarted::from_payload(payload)),
            GameEventType::CardsDealt => HandEvent::CardsDealt {
                user_id: user_id(),
                seat_id: seat_id(),
                cards: cards(payload.get("cards")),
            },
            GameEventType::ActionTaken => HandEvent::ActionTaken {
                user_id: user_id(),
                seat_id: seat_id(),
                street: text(payload.get("street")).unwrap_or_default(),
                action: text(payload.get("action"))
                    .map(|action| action.to_ascii_uppercase())
                    .unwrap_or_default(),
                amount: chips(payload.get("amount")),
            },
            GameEventType::StreetAdvanced => HandEvent::StreetAdvanced {
                cards: cards(
                    payload
                        .get("communityCards")
                        .or_else(|| payload.get("cards")),
                ),
            },
            GameEventType::Showdown => HandEvent::Showdown {
                reveals: showdown_reveals(payload),
            },
            GameEventType::CardsRevealed => HandEvent::CardsRevealed(Reveal {
                seat_id: seat_id(),
                user_id: user_id(),
                cards: cards(payload.get("cards")),
            }),
            GameEventType::PotAwarded => HandEvent::PotAwarded(PotAward {
                amount: chips(payload.get("amount")),
                winners: objects(payload.get("winners"))
                    .map(|winner| AwardWinner {
                        seat_id: seat(winner.get("seatId")),
                        user_id: text(winner.get("userId")),
                        share: winner.get("share").map(|share| chips(Some(share))),
                    })
                    .collect(),
            }),
            GameEventType::HandCompleted => HandEvent::Completed {
                end_stacks: payload
                    .get("playerEndStacks")
                    .and_then(Value::as_object)
                    .map(|stacks| {
                        stacks
                            .iter()
                            .map(|(user, stack)| (user.clone(), chips(Some(stack))))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            GameEventType::BlindPosted
            | GameEventType::TurnStarted
            | GameEventType::RakeDeducted
            | GameEventType::TableCreated
            | GameEventType::TableClosed
            | GameEventType::PlayerJoined
            | GameEventType::PlayerLeft
            | GameEventType::PlayerSatOut
            | GameEventType::PlayerSatIn => HandEvent::Ignored,
        }
    }
}

pub fn showdown_reveals(payload: &Payload) -> Vec<Reveal> {
    objects(payload.get("reveals"))
        .map(|reveal| Reveal {
            seat_id: seat(reveal.get("seatId")),
            user_id: text(reveal.get("userId")),
            cards: cards(reveal.get("cards")),
        })
        .collect()
}
