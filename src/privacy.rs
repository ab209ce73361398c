//! Per-viewer redaction of hole cards.
//!
//! Operators see everything. Everyone else sees their own cards, plus any
//! cards shown at showdown when they took part in the hand.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::types::{GameEvent, GameEventType, SeatId, UserId};
use crate::hands::payload::HandEvent;
use crate::hands::record::HandRecord;

/// An authenticated caller as seen by the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    pub user_id: Option<UserId>,
    pub is_operator: bool,
}

impl Viewer {
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            is_operator: false,
        }
    }

    pub fn operator(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            is_operator: true,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }
}

/// Whether filtering `record` for `viewer` depends on the hand's reveals.
pub fn needs_reveals(record: &HandRecord, viewer: &Viewer) -> bool {
    !viewer.is_operator
        && viewer
            .user_id
            .as_deref()
            .is_some_and(|user| record.is_participant(user))
}

pub fn filter_hand_record(
    mut record: HandRecord,
    viewer: &Viewer,
    reveals: &BTreeSet<SeatId>,
) -> HandRecord {
    if viewer.is_operator {
        return record;
    }
    let participating = needs_reveals(&record, viewer);
    for p in &mut record.participants {
        let visible = participating && (viewer.is(&p.user_id) || reveals.contains(&p.seat_id));
        if !visible {
            p.hole_cards = None;
        }
    }
    record
}

/// Seats with shown cards: showdown reveals and voluntary `CARDS_REVEALED`.
pub fn revealed_seats(events: &[GameEvent]) -> BTreeSet<SeatId> {
    let mut seats = BTreeSet::new();
    for event in events {
        match HandEvent::decode(event) {
            HandEvent::Showdown { reveals } => {
                seats.extend(reveals.into_iter().filter_map(|r| r.seat_id));
            }
            HandEvent::CardsRevealed(reveal) => seats.extend(reveal.seat_id),
            _ => {}
        }
    }
    seats
}

/// Seat to user map from the hand's `HAND_STARTED` events.
pub fn seated_users(events: &[GameEvent]) -> HashMap<SeatId, UserId> {
    events
        .iter()
        .filter_map(|event| match HandEvent::decode(event) {
            HandEvent::Started(started) => Some(started.seats),
            _ => None,
        })
        .flatten()
        .map(|seat| (seat.seat_id, seat.user_id))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    Unfiltered,
    Outsider,
    Participant {
        viewer: UserId,
        seats: HashMap<SeatId, UserId>,
    },
}

/// Event filter built once per request and applied to every event of a
/// replay or subscription.
#[derive(Debug, Clone)]
pub struct EventRedactor {
    scope: Scope,
}

impl EventRedactor {
    pub fn new(viewer: &Viewer, seats: &HashMap<SeatId, UserId>) -> Self {
        let scope = if viewer.is_operator {
            Scope::Unfiltered
        } else {
            match &viewer.user_id {
                Some(user) if seats.values().any(|seated| seated == user) => Scope::Participant {
                    viewer: user.clone(),
                    seats: seats.clone(),
                },
                _ => Scope::Outsider,
            }
        };
        Self { scope }
    }

    pub fn apply(&self, mut event: GameEvent) -> GameEvent {
        match (&self.scope, event.event_type) {
            (Scope::Unfiltered, _) => {}
            (Scope::Outsider, GameEventType::CardsDealt | GameEventType::CardsRevealed) => {
                clear_cards(&mut event.payload);
            }
            (Scope::Outsider, GameEventType::Showdown) => {
                if let Some(Value::Array(reveals)) = event.payload.get_mut("reveals") {
                    for reveal in reveals.iter_mut().filter_map(Value::as_object_mut) {
                        clear_cards(reveal);
                    }
                }
            }
            (Scope::Participant { viewer, seats }, GameEventType::CardsDealt) => {
                if deal_owner(&event, seats).as_ref() != Some(viewer) {
                    clear_cards(&mut event.payload);
                }
            }
            _ => {}
        }
        event
    }

    pub fn into_fn(self) -> impl Fn(GameEvent) -> GameEvent + Send + Sync + 'static {
        move |event| self.apply(event)
    }
}

// A seated user id wins, otherwise the seat's occupant, as in the reducer.
fn deal_owner(event: &GameEvent, seats: &HashMap<SeatId, UserId>) -> Option<UserId> {
    let HandEvent::CardsDealt { user_id, seat_id, .. } = HandEvent::decode(event) else {
        return None;
    };
    match user_id {
        Some(user) if seats.values().any(|seated| *seated == user) => Some(user),
        _ => seat_id.and_then(|seat| seats.get(&seat).cloned()),
    }
}

fn clear_cards(object: &mut serde_json::Map<String, Value>) {
    if object.contains_key("cards") {
        object.insert("cards".to_string(), Value::Array(Vec::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::hands::record::{HandConfig, HandParticipant, HandResult};
    use crate::test_support::event_fixture;

    fn participant(seat: SeatId, user: &str) -> HandParticipant {
        HandParticipant {
            seat_id: seat,
            user_id: user.into(),
            nickname: None,
            starting_stack: 100,
            ending_stack: 100,
            hole_cards: Some(vec![format!("{seat}h"), format!("{seat}d")]),
            actions: Vec::new(),
            result: HandResult::Lost,
        }
    }

    fn record() -> HandRecord {
        HandRecord {
            hand_id: "h1".into(),
            table_id: "t1".into(),
            table_name: "Main".into(),
            config: HandConfig::default(),
            participants: vec![participant(1, "a"), participant(2, "b"), participant(3, "c")],
            community_cards: Vec::new(),
            pots: Vec::new(),
            winners: Vec::new(),
            started_at: None,
            completed_at: None,
            duration: 0,
        }
    }

    fn visible(record: &HandRecord) -> Vec<bool> {
        record
            .participants
            .iter()
            .map(|p| p.hole_cards.is_some())
            .collect()
    }

    #[test]
    fn non_participant_sees_no_hole_cards_even_after_showdown() {
        let all_revealed = BTreeSet::from([1, 2, 3]);
        let filtered = filter_hand_record(record(), &Viewer::user("zed"), &all_revealed);
        assert_eq!(visible(&filtered), vec![false, false, false]);

        let anonymous = filter_hand_record(record(), &Viewer::anonymous(), &all_revealed);
        assert_eq!(visible(&anonymous), vec![false, false, false]);
    }

    #[test]
    fn participant_sees_own_and_revealed_seats_only() {
        let viewer = Viewer::user("a");
        assert!(needs_reveals(&record(), &viewer));
        let filtered = filter_hand_record(record(), &viewer, &BTreeSet::from([2]));
        assert_eq!(visible(&filtered), vec![true, true, false]);
    }

    #[test]
    fn operator_sees_everything() {
        let viewer = Viewer::operator("ops");
        assert!(!needs_reveals(&record(), &viewer));
        let filtered = filter_hand_record(record(), &viewer, &BTreeSet::new());
        assert_eq!(filtered, record());
    }

    fn dealt(user: &str) -> GameEvent {
        let mut event = event_fixture(GameEventType::CardsDealt, Some("h1"), Some(2));
        event.user_id = Some(user.into());
        event.payload = json!({"cards": ["Ah", "Kh"]}).as_object().cloned().unwrap();
        event
    }

    fn showdown() -> GameEvent {
        let mut event = event_fixture(GameEventType::Showdown, Some("h1"), Some(9));
        event.payload = json!({"reveals": [{"seatId": 1, "cards": ["Ah", "Kh"]}]})
            .as_object()
            .cloned()
            .unwrap();
        event
    }

    fn seating() -> HashMap<SeatId, UserId> {
        HashMap::from([(1, "a".to_string()), (2, "b".to_string())])
    }

    #[test]
    fn outsider_events_lose_every_card() {
        let redact = EventRedactor::new(&Viewer::user("zed"), &seating()).into_fn();

        assert_eq!(redact(dealt("a")).payload["cards"], json!([]));
        assert_eq!(redact(showdown()).payload["reveals"][0]["cards"], json!([]));
        assert_eq!(redact(showdown()).payload["reveals"][0]["seatId"], json!(1));
    }

    #[test]
    fn participant_keeps_own_deal_and_showdown() {
        let redactor = EventRedactor::new(&Viewer::user("a"), &seating());

        assert_eq!(redactor.apply(dealt("a")).payload["cards"], json!(["Ah", "Kh"]));
        assert_eq!(redactor.apply(dealt("b")).payload["cards"], json!([]));
        assert_eq!(
            redactor.apply(showdown()).payload["reveals"][0]["cards"],
            json!(["Ah", "Kh"])
        );
        let joined = event_fixture(GameEventType::PlayerJoined, None, None);
        assert_eq!(redactor.apply(joined.clone()), joined);
    }

    #[test]
    fn participant_keeps_own_deal_addressed_by_seat() {
        let redactor = EventRedactor::new(&Viewer::user("a"), &seating());

        let mut own = dealt("a");
        own.user_id = None;
        own.seat_id = Some(1);
        assert_eq!(redactor.apply(own).payload["cards"], json!(["Ah", "Kh"]));

        let mut by_payload_seat = dealt("a");
        by_payload_seat.user_id = None;
        by_payload_seat.payload.insert("seatId".into(), json!("1"));
        assert_eq!(
            redactor.apply(by_payload_seat).payload["cards"],
            json!(["Ah", "Kh"])
        );

        let mut other = dealt("a");
        other.user_id = None;
        other.seat_id = Some(2);
        assert_eq!(redactor.apply(other).payload["cards"], json!([]));

        let mut unaddressed = dealt("a");
        unaddressed.user_id = None;
        assert_eq!(redactor.apply(unaddressed).payload["cards"], json!([]));
    }

    #[test]
    fn seats_and_participants_are_derived_from_events() {
        let mut started = event_fixture(GameEventType::HandStarted, Some("h1"), Some(1));
        started.payload = json!({"seats": [
            {"seatId": 1, "userId": "a", "stack": 10},
            {"seatId": 2, "userId": "b", "stack": 10}
        ]})
        .as_object()
        .cloned()
        .unwrap();
        let mut shown = event_fixture(GameEventType::CardsRevealed, Some("h1"), Some(3));
        shown.seat_id = Some(2);
        shown.payload = json!({"cards": ["2c"]}).as_object().cloned().unwrap();

        let events = vec![started, shown, showdown()];
        assert_eq!(revealed_seats(&events), BTreeSet::from([1, 2]));
        assert_eq!(
            seated_users(&events),
            HashMap::from([(1, "a".to_string()), (2, "b".to_string())])
        );
    }
}
