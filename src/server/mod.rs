//! HTTP surface over the event core.

mod bootstrap;
mod dto;
mod error;
mod logging;
mod routes;

pub use bootstrap::{run_server, ServerConfig};
pub use error::ApiError;
pub use routes::{EventCoreServer, ServerContext, VIEWER_ID_HEADER, VIEWER_OPERATOR_HEADER};
