use serde_json::Value;
use thiserror::Error;

use super::types::{GameEventType, HandId, NewGameEvent, Payload, SeatId, TableId, UserId};

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("event type is required")]
    MissingType,
    #[error("unknown event type `{0}`")]
    UnknownType(String),
    #[error("tableId is required")]
    MissingTableId,
    #[error("handId is required for {event_type} events")]
    MissingHandId { event_type: GameEventType },
    #[error("payload must be a JSON object")]
    InvalidPayload,
    #[error("userId must be a non-empty string")]
    InvalidUserId,
    #[error("seatId {0} is out of range")]
    InvalidSeatId(i64),
    #[error("idempotencyKey must be between 1 and {MAX_IDEMPOTENCY_KEY_LEN} characters")]
    InvalidIdempotencyKey,
}

impl ValidationError {
    /// Stable field name so callers can attach the message to an input.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingType | ValidationError::UnknownType(_) => "type",
            ValidationError::MissingTableId => "tableId",
            ValidationError::MissingHandId { .. } => "handId",
            ValidationError::InvalidPayload => "payload",
            ValidationError::InvalidUserId => "userId",
            ValidationError::InvalidSeatId(_) => "seatId",
            ValidationError::InvalidIdempotencyKey => "idempotencyKey",
        }
    }
}

/// A `NewGameEvent` that passed validation, with its fields in typed form.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub event_type: GameEventType,
    pub table_id: TableId,
    pub hand_id: Option<HandId>,
    pub user_id: Option<UserId>,
    pub seat_id: Option<SeatId>,
    pub payload: Payload,
    pub idempotency_key: Option<String>,
}

pub fn validate_new_event(event: &NewGameEvent) -> Result<ValidatedEvent, ValidationError> {
    let raw_type = event.event_type.trim();
    if raw_type.is_empty() {
        return Err(ValidationError::MissingType);
    }
    let event_type: GameEventType = raw_type
        .parse()
        .map_err(|_| ValidationError::UnknownType(raw_type.to_string()))?;

    let table_id = event.table_id.trim();
    if table_id.is_empty() {
        return Err(ValidationError::MissingTableId);
    }

    let payload = match &event.payload {
        Value::Object(map) => map.clone(),
        _ => return Err(ValidationError::InvalidPayload),
    };

    let hand_id = event
        .hand_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    if event_type.is_hand_scoped() && hand_id.is_none() {
        return Err(ValidationError::MissingHandId { event_type });
    }

    let user_id = match event.user_id.as_deref() {
        Some(id) if id.trim().is_empty() => return Err(ValidationError::InvalidUserId),
        Some(id) => Some(id.trim().to_string()),
        None => None,
    };

    let seat_id = match event.seat_id {
        Some(raw) => Some(
            SeatId::try_from(raw)
                .ok()
                .filter(|seat| *seat >= 0)
                .ok_or(ValidationError::InvalidSeatId(raw))?,
        ),
        None => None,
    };

    let idempotency_key = match event.idempotency_key.as_deref() {
        Some(key) if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN => {
            return Err(ValidationError::InvalidIdempotencyKey)
        }
        Some(key) => Some(key.to_string()),
        None => None,
    };

    Ok(ValidatedEvent {
        event_type,
        table_id: table_id.to_string(),
        hand_id,
        user_id,
        seat_id,
        payload,
        idempotency_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> NewGameEvent {
        NewGameEvent::new(GameEventType::ActionTaken, "t1", json!({"action": "CALL"})).with_hand("h1")
    }

    #[test]
    fn hand_scoped_event_without_hand_id_is_rejected() {
        let event = NewGameEvent::new(GameEventType::HandStarted, "t1", json!({}));
        assert_eq!(
            validate_new_event(&event),
            Err(ValidationError::MissingHandId {
                event_type: GameEventType::HandStarted
            })
        );
    }

    #[test]
    fn null_payload_is_rejected() {
        let mut event = base();
        event.payload = Value::Null;
        assert_eq!(validate_new_event(&event), Err(ValidationError::InvalidPayload));

        event.payload = json!(["not", "an", "object"]);
        assert_eq!(validate_new_event(&event), Err(ValidationError::InvalidPayload));
    }

    #[test]
    fn type_and_table_are_checked_first() {
        let mut event = base();
        event.event_type = "  ".into();
        assert_eq!(validate_new_event(&event), Err(ValidationError::MissingType));

        event.event_type = "HAND_EXPLODED".into();
        assert_eq!(
            validate_new_event(&event),
            Err(ValidationError::UnknownType("HAND_EXPLODED".into()))
        );

        let mut event = base();
        event.table_id = String::new();
        assert_eq!(validate_new_event(&event), Err(ValidationError::MissingTableId));
    }

    #[test]
    fn optional_fields_are_type_checked_when_present() {
        assert_eq!(
            validate_new_event(&base().with_user(" ")),
            Err(ValidationError::InvalidUserId)
        );
        assert_eq!(
            validate_new_event(&base().with_seat(-1)),
            Err(ValidationError::InvalidSeatId(-1))
        );
        assert_eq!(
            validate_new_event(&base().with_seat(i64::from(i32::MAX) + 1)),
            Err(ValidationError::InvalidSeatId(i64::from(i32::MAX) + 1))
        );
        assert_eq!(
            validate_new_event(&base().with_idempotency_key("")),
            Err(ValidationError::InvalidIdempotencyKey)
        );
        assert_eq!(ValidationError::InvalidSeatId(-1).field(), "seatId");
    }

    #[test]
    fn table_level_event_does_not_need_a_hand() {
        let event = NewGameEvent::new(GameEventType::PlayerJoined, "t1", json!({"buyIn": 100}))
            .with_user("u1")
            .with_seat(2);
        let validated = validate_new_event(&event).unwrap();
        assert_eq!(validated.hand_id, None);
        assert_eq!(validated.seat_id, Some(2));
        assert_eq!(validated.user_id.as_deref(), Some("u1"));
    }
}
