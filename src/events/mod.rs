//! Idempotent, transactional persistence of game events.

mod error;
pub mod storage;
mod store;
pub mod types;
pub mod validation;

pub use error::IngestError;
pub use store::EventStore;
pub use types::{EventFilter, EventPage, GameEvent, GameEventType, NewGameEvent};
pub use validation::{validate_new_event, ValidationError};
