//! Hand records: the reducer that folds a hand's events into a summary, the
//! materializer that keeps summaries current, and their storage.

pub mod materializer;
pub mod payload;
pub mod record;
pub mod reducer;
pub mod storage;

pub use materializer::HandMaterializer;
pub use record::{
    HandConfig, HandPage, HandParticipant, HandRecord, HandResult, ParticipantAction, Pot, Winner,
};
pub use reducer::reduce_hand;
pub use storage::{HandRecordStorage, InMemoryHandStorage, SeaOrmHandStorage};
