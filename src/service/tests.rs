use std::collections::HashSet;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio::time::timeout;

use super::*;
use crate::events::types::GameEventType;
use crate::events::ValidationError;
use crate::test_support::{event_fixture, wait_until, TestHarness};

async fn ingest(h: &TestHarness, event: NewGameEvent) -> anyhow::Result<GameEvent> {
    Ok(h.store.ingest(event).await?)
}

/// u1 (seat 1) beats u2 (seat 2) at showdown; u3 (seat 3) folds and mucks.
async fn showdown_hand(h: &TestHarness, hand: &str) -> anyhow::Result<HandRecord> {
    let dealt = |user: &str, seat: i64, cards: [&str; 2]| {
        NewGameEvent::new(GameEventType::CardsDealt, "t1", json!({ "cards": cards }))
            .with_hand(hand)
            .with_user(user)
            .with_seat(seat)
    };
    let events = vec![
        NewGameEvent::new(
            GameEventType::HandStarted,
            "t1",
            json!({"tableName": "Main", "seats": [
                {"seatId": 1, "userId": "u1", "stack": 100},
                {"seatId": 2, "userId": "u2", "stack": 100},
                {"seatId": 3, "userId": "u3", "stack": 100}
            ]}),
        )
        .with_hand(hand),
        dealt("u1", 1, ["Ah", "Kh"]),
        dealt("u2", 2, ["Qc", "Qd"]),
        dealt("u3", 3, ["7s", "2d"]),
        NewGameEvent::new(
            GameEventType::ActionTaken,
            "t1",
            json!({"street": "PREFLOP", "action": "FOLD"}),
        )
        .with_hand(hand)
        .with_user("u3")
        .with_seat(3),
        NewGameEvent::new(
            GameEventType::Showdown,
            "t1",
            json!({"reveals": [
                {"seatId": 1, "userId": "u1", "cards": ["Ah", "Kh"]},
                {"seatId": 2, "userId": "u2", "cards": ["Qc", "Qd"]}
            ]}),
        )
        .with_hand(hand),
        NewGameEvent::new(
            GameEventType::PotAwarded,
            "t1",
            json!({"amount": 40, "winners": [{"seatId": 1}]}),
        )
        .with_hand(hand),
        NewGameEvent::new(
            GameEventType::HandCompleted,
            "t1",
            json!({"playerEndStacks": {"u1": 120, "u2": 80, "u3": 100}}),
        )
        .with_hand(hand),
    ];
    for event in events {
        ingest(h, event).await?;
    }
    Ok(h
        .materializer
        .materialize_hand(&hand.to_string(), &"t1".to_string())
        .await?)
}

fn shown(record: &HandRecord) -> Vec<(String, bool)> {
    record
        .participants
        .iter()
        .map(|p| (p.user_id.clone(), p.hole_cards.is_some()))
        .collect()
}

#[tokio::test]
async fn ingest_reports_event_ids_and_validation_fields() -> anyhow::Result<()> {
    let h = TestHarness::new();
    let receipt = h
        .service
        .ingest_event(NewGameEvent::new(GameEventType::PlayerJoined, "t1", json!({})).with_user("u1"))
        .await?;
    assert!(h.service.get_event(&receipt.event_id).await?.is_some());

    let err = h
        .service
        .ingest_events(vec![
            NewGameEvent::new(GameEventType::PlayerJoined, "t1", json!({})),
            NewGameEvent::new(GameEventType::HandStarted, "t1", json!({})),
        ])
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert_eq!(err.field(), Some("handId"));
    assert!(matches!(
        err,
        ServiceError::Validation {
            index: Some(1),
            error: ValidationError::MissingHandId { .. }
        }
    ));
    Ok(())
}

#[tokio::test]
async fn query_pages_with_opaque_cursor() -> anyhow::Result<()> {
    let h = TestHarness::new();
    for n in 0..5 {
        h.service
            .ingest_event(
                NewGameEvent::new(GameEventType::PlayerJoined, "t1", json!({}))
                    .with_user(format!("u{n}")),
            )
            .await?;
    }
    h.service
        .ingest_event(NewGameEvent::new(GameEventType::PlayerJoined, "t2", json!({})))
        .await?;

    let query = EventQuery {
        table_id: Some("t1".into()),
        limit: Some(2),
        ..Default::default()
    };
    let first = h.service.query_events(query.clone()).await?;
    assert_eq!(first.total, 5);
    assert!(first.has_more);
    assert_eq!(first.next_cursor.as_deref(), Some(encode_page_cursor(2).as_str()));

    let mut seen: HashSet<String> = first.events.iter().map(|e| e.event_id.clone()).collect();
    let mut cursor = first.next_cursor;
    while let Some(next) = cursor {
        let page = h
            .service
            .query_events(EventQuery {
                cursor: Some(next),
                ..query.clone()
            })
            .await?;
        seen.extend(page.events.iter().map(|e| e.event_id.clone()));
        cursor = page.next_cursor;
    }
    assert_eq!(seen.len(), 5);
    Ok(())
}

#[tokio::test]
async fn query_rejects_bad_arguments() -> anyhow::Result<()> {
    let h = TestHarness::new();
    let bad_type = h
        .service
        .query_events(EventQuery {
            types: vec!["NOT_A_TYPE".into()],
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(bad_type.category(), ErrorCategory::InvalidArgument);

    let bad_cursor = h
        .service
        .query_events(EventQuery {
            cursor: Some("%%%".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(bad_cursor.category(), ErrorCategory::InvalidArgument);
    assert_eq!(decode_page_cursor(&encode_page_cursor(17))?, 17);
    Ok(())
}

#[tokio::test]
async fn hand_record_is_filtered_per_viewer() -> anyhow::Result<()> {
    let h = TestHarness::new();
    showdown_hand(&h, "h1").await?;

    let operator = h
        .service
        .get_hand_record("h1", &Viewer::operator("ops"))
        .await?
        .expect("record");
    assert!(operator.participants.iter().all(|p| p.hole_cards.is_some()));

    let winner = h
        .service
        .get_hand_record("h1", &Viewer::user("u1"))
        .await?
        .expect("record");
    assert_eq!(
        shown(&winner),
        vec![("u1".to_string(), true), ("u2".to_string(), true), ("u3".to_string(), false)]
    );

    let folded = h
        .service
        .get_hand_record("h1", &Viewer::user("u3"))
        .await?
        .expect("record");
    assert_eq!(
        shown(&folded),
        vec![("u1".to_string(), true), ("u2".to_string(), true), ("u3".to_string(), true)]
    );

    let outsider = h
        .service
        .get_hand_record("h1", &Viewer::user("zed"))
        .await?
        .expect("record");
    assert!(outsider.participants.iter().all(|p| p.hole_cards.is_none()));

    assert!(h
        .service
        .get_hand_record("nope", &Viewer::anonymous())
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn hand_listings_enforce_ownership() -> anyhow::Result<()> {
    let h = TestHarness::new();
    showdown_hand(&h, "h1").await?;
    showdown_hand(&h, "h2").await?;

    let history = h
        .service
        .get_hand_history("t1", Some(10), None, &Viewer::user("zed"))
        .await?;
    assert_eq!(history.total, 2);
    assert!(history
        .hands
        .iter()
        .flat_map(|hand| &hand.participants)
        .all(|p| p.hole_cards.is_none()));

    let own = h
        .service
        .get_hands_for_user("u2", Some(1), None, &Viewer::user("u2"))
        .await?;
    assert_eq!(own.total, 2);
    assert_eq!(own.hands.len(), 1);

    let past_the_end = h
        .service
        .get_hands_for_user("u2", Some(10), Some(u64::MAX), &Viewer::user("u2"))
        .await?;
    assert_eq!(past_the_end.total, 2);
    assert!(past_the_end.hands.is_empty());

    let denied = h
        .service
        .get_hands_for_user("u2", None, None, &Viewer::user("u1"))
        .await
        .unwrap_err();
    assert_eq!(denied.category(), ErrorCategory::PermissionDenied);

    let as_operator = h
        .service
        .get_hands_for_user("u2", None, None, &Viewer::operator("ops"))
        .await?;
    assert_eq!(as_operator.total, 2);
    Ok(())
}

#[tokio::test]
async fn replay_redacts_hidden_cards() -> anyhow::Result<()> {
    let h = TestHarness::new();
    showdown_hand(&h, "h1").await?;

    let replay = h.service.get_hand_replay("h1", &Viewer::user("u2")).await?;
    assert_eq!(replay.events.len(), 8);
    let dealt: Vec<_> = replay
        .events
        .iter()
        .filter(|e| e.event_type == GameEventType::CardsDealt)
        .map(|e| (e.user_id.clone(), e.payload["cards"].clone()))
        .collect();
    assert_eq!(
        dealt,
        vec![
            (Some("u1".to_string()), json!([])),
            (Some("u2".to_string()), json!(["Qc", "Qd"])),
            (Some("u3".to_string()), json!([])),
        ]
    );

    let outsider = h.service.get_hand_replay("h1", &Viewer::anonymous()).await?;
    let showdown = outsider
        .events
        .iter()
        .find(|e| e.event_type == GameEventType::Showdown)
        .expect("showdown");
    assert_eq!(showdown.payload["reveals"][0]["cards"], json!([]));

    let missing = h
        .service
        .get_hand_replay("nope", &Viewer::operator("ops"))
        .await
        .unwrap_err();
    assert_eq!(missing.category(), ErrorCategory::NotFound);
    Ok(())
}

#[tokio::test]
async fn subscriptions_are_redacted_for_non_operators() -> anyhow::Result<()> {
    let h = TestHarness::new();
    ingest(
        &h,
        NewGameEvent::new(
            GameEventType::HandStarted,
            "t1",
            json!({"seats": [
                {"seatId": 1, "userId": "u1", "stack": 100},
                {"seatId": 2, "userId": "u2", "stack": 100}
            ]}),
        )
        .with_hand("h1"),
    )
    .await?;
    ingest(
        &h,
        // Addressed by seat only.
        NewGameEvent::new(GameEventType::CardsDealt, "t1", json!({"cards": ["Ah", "Kh"]}))
            .with_hand("h1")
            .with_seat(1),
    )
    .await?;
    assert_eq!(h.wait_for_entries("hand:h1", 2).await.len(), 2);

    let cards_seen = |viewer: Viewer| {
        let service = Arc::clone(&h.service);
        async move {
            let mut stream = service.subscribe("hand:h1", Some(0), &viewer)?;
            let mut cards = None;
            while let Ok(Some(event)) = timeout(Duration::from_secs(2), stream.next()).await {
                if event.event_type == GameEventType::CardsDealt {
                    cards = Some(event.payload["cards"].clone());
                    break;
                }
            }
            Ok::<_, anyhow::Error>(cards)
        }
    };
    assert_eq!(cards_seen(Viewer::user("u1")).await?, Some(json!(["Ah", "Kh"])));
    assert_eq!(cards_seen(Viewer::user("u2")).await?, Some(json!([])));
    assert_eq!(cards_seen(Viewer::anonymous()).await?, Some(json!([])));
    assert_eq!(
        cards_seen(Viewer::operator("ops")).await?,
        Some(json!(["Ah", "Kh"]))
    );

    let err = h
        .service
        .subscribe("lobby", None, &Viewer::anonymous())
        .err()
        .expect("invalid stream id");
    assert_eq!(err.category(), ErrorCategory::InvalidArgument);
    Ok(())
}

#[tokio::test]
async fn subscription_redactors_are_released_per_hand() -> anyhow::Result<()> {
    let h = TestHarness::new();
    let scope = RedactionScope::new(Viewer::user("u1"), Arc::clone(h.store.storage()), 100);

    for n in 0..200 {
        let hand = format!("h{n}");
        scope
            .redact(event_fixture(GameEventType::HandStarted, Some(&hand), Some(1)))
            .await;
        scope
            .redact(event_fixture(GameEventType::CardsDealt, Some(&hand), Some(2)))
            .await;
        assert_eq!(scope.cached_hands(), 1);
        scope
            .redact(event_fixture(GameEventType::HandCompleted, Some(&hand), Some(3)))
            .await;
        assert_eq!(scope.cached_hands(), 0);
    }

    for n in 0..200 {
        let hand = format!("abandoned{n}");
        scope
            .redact(event_fixture(GameEventType::HandStarted, Some(&hand), Some(1)))
            .await;
        assert!(scope.cached_hands() <= MAX_CACHED_REDACTORS);
    }
    assert_eq!(scope.cached_hands(), MAX_CACHED_REDACTORS);
    Ok(())
}

#[tokio::test]
async fn live_subscription_sees_later_events() -> anyhow::Result<()> {
    let h = TestHarness::new();
    let mut stream = h.service.subscribe("table:t1", None, &Viewer::operator("ops"))?;
    // The tail is resolved when the subscription starts reading.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let event = ingest(
        &h,
        NewGameEvent::new(GameEventType::PlayerJoined, "t1", json!({})).with_user("u1"),
    )
    .await?;
    let received = timeout(Duration::from_secs(2), stream.next()).await?;
    assert_eq!(received.map(|e| e.event_id), Some(event.event_id));
    Ok(())
}

#[tokio::test]
async fn cursors_round_trip_and_keep_creation_time() -> anyhow::Result<()> {
    let h = TestHarness::new();
    assert!(h.service.get_cursor("hand:h1", "bot").await?.is_none());

    let first = h.service.update_cursor("hand:h1", "bot", 3).await?;
    let second = h.service.update_cursor("hand:h1", "bot", 9).await?;
    assert_eq!(second.position, 9);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(
        h.service.get_cursor("hand:h1", "bot").await?.map(|c| c.position),
        Some(9)
    );

    let err = h.service.update_cursor("", "bot", 1).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidArgument);
    Ok(())
}

#[tokio::test]
async fn background_materializer_feeds_hand_queries() -> anyhow::Result<()> {
    let h = TestHarness::new();
    h.materializer.ensure_group().await;
    let task = Arc::clone(&h.materializer).start();

    let hand = "live";
    ingest(
        &h,
        NewGameEvent::new(
            GameEventType::HandStarted,
            "t1",
            json!({"seats": [{"seatId": 1, "userId": "u1", "stack": 50}]}),
        )
        .with_hand(hand),
    )
    .await?;
    ingest(
        &h,
        NewGameEvent::new(GameEventType::HandCompleted, "t1", json!({})).with_hand(hand),
    )
    .await?;
    assert!(wait_until(|| h.hands.len() == 1).await);

    let record = h
        .service
        .get_hand_record(hand, &Viewer::user("u1"))
        .await?
        .expect("materialized");
    assert_eq!(record.participants.len(), 1);
    task.shutdown().await;
    Ok(())
}
