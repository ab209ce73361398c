//! Event-sourcing core for poker tables: an idempotent, sequence-assigning
//! event store, log-structured fan-out with resumable subscriptions, a hand
//! materializer and per-viewer redaction of hole cards.

pub mod clock;
pub mod config;
pub mod cursor;
pub mod db;
pub mod events;
pub mod hands;
pub mod privacy;
pub mod server;
pub mod service;
pub mod stream;
pub mod tokio_tools;

#[cfg(test)]
mod test_support;

pub use events::{EventStore, GameEvent, GameEventType, NewGameEvent};
pub use hands::{HandMaterializer, HandRecord};
pub use privacy::Viewer;
pub use service::{Backends, EventCore, EventService, ServiceError};
