pub mod cursors;
pub mod event_idempotency;
pub mod events;
pub mod hand_participants;
pub mod hand_records;
