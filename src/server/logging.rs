use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "server::http";

/// Middleware that logs every request once it has been answered.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    debug!(target: LOG_TARGET, %method, %path, "incoming request");

    let start = Instant::now();
    let response = next.run(request).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        warn!(target: LOG_TARGET, %method, %path, status, duration_ms, "request failed");
    } else {
        info!(target: LOG_TARGET, %method, %path, status, duration_ms, "request completed");
    }
    response
}
