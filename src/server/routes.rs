use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query};
use axum::http::HeaderMap;
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures::{Stream, StreamExt};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::cursor::Cursor;
use crate::events::types::GameEvent;
use crate::events::NewGameEvent;
use crate::hands::{HandPage, HandRecord};
use crate::privacy::Viewer;
use crate::service::{EventQueryPage, EventService, HandReplay, IngestReceipt};

use super::dto::{
    CursorUpdateRequest, EventQueryParams, IngestBatchRequest, PageParams, SubscribeParams,
};
use super::error::ApiError;
use super::logging::log_requests;

const LOG_TARGET: &str = "server::routes";

/// Identity forwarded by the authenticating proxy in front of this server.
pub const VIEWER_ID_HEADER: &str = "x-viewer-id";
pub const VIEWER_OPERATOR_HEADER: &str = "x-viewer-operator";

#[derive(Clone)]
pub struct ServerContext {
    pub service: Arc<EventService>,
}

/// Axum facade over [`EventService`], one route per operation.
pub struct EventCoreServer {
    router: Router,
}

impl EventCoreServer {
    pub fn new(service: Arc<EventService>) -> Self {
        let context = Arc::new(ServerContext { service });

        let router = Router::new()
            .route("/events", post(ingest_event).get(query_events))
            .route("/events/batch", post(ingest_events))
            .route("/events/:event_id", get(get_event))
            .route("/hands/:hand_id", get(get_hand_record))
            .route("/hands/:hand_id/replay", get(get_hand_replay))
            .route("/tables/:table_id/hands", get(get_hand_history))
            .route("/users/:user_id/hands", get(get_hands_for_user))
            .route("/streams/:stream_id/events", get(subscribe))
            .route(
                "/cursors/:stream_id/:subscriber_id",
                get(get_cursor).put(update_cursor),
            )
            .layer(middleware::from_fn(log_requests))
            .layer(CorsLayer::permissive())
            .layer(Extension(context));

        Self { router }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

fn viewer_from_headers(headers: &HeaderMap) -> Viewer {
    let user_id = headers
        .get(VIEWER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let is_operator = headers
        .get(VIEWER_OPERATOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|flag| matches!(flag.trim(), "1" | "true" | "yes"));
    Viewer {
        user_id,
        is_operator,
    }
}

async fn ingest_event(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Json(event): Json<NewGameEvent>,
) -> Result<Json<IngestReceipt>, ApiError> {
    Ok(Json(ctx.service.ingest_event(event).await?))
}

async fn ingest_events(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Json(request): Json<IngestBatchRequest>,
) -> Result<Json<Vec<IngestReceipt>>, ApiError> {
    Ok(Json(ctx.service.ingest_events(request.events).await?))
}

async fn query_events(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Query(params): Query<EventQueryParams>,
) -> Result<Json<EventQueryPage>, ApiError> {
    Ok(Json(ctx.service.query_events(params.into()).await?))
}

async fn get_event(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(event_id): Path<String>,
) -> Result<Json<GameEvent>, ApiError> {
    ctx.service
        .get_event(&event_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("event `{event_id}` not found")))
}

async fn get_hand_record(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(hand_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<HandRecord>, ApiError> {
    let viewer = viewer_from_headers(&headers);
    ctx.service
        .get_hand_record(&hand_id, &viewer)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("hand `{hand_id}` not found")))
}

async fn get_hand_replay(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(hand_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<HandReplay>, ApiError> {
    let viewer = viewer_from_headers(&headers);
    Ok(Json(ctx.service.get_hand_replay(&hand_id, &viewer).await?))
}

async fn get_hand_history(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(table_id): Path<String>,
    Query(page): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Json<HandPage>, ApiError> {
    let viewer = viewer_from_headers(&headers);
    Ok(Json(
        ctx.service
            .get_hand_history(&table_id, page.limit, page.offset, &viewer)
            .await?,
    ))
}

async fn get_hands_for_user(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(user_id): Path<String>,
    Query(page): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Json<HandPage>, ApiError> {
    let viewer = viewer_from_headers(&headers);
    Ok(Json(
        ctx.service
            .get_hands_for_user(&user_id, page.limit, page.offset, &viewer)
            .await?,
    ))
}

/// Server-sent events; the subscription is cancelled when the client goes away.
async fn subscribe(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(stream_id): Path<String>,
    Query(params): Query<SubscribeParams>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let viewer = viewer_from_headers(&headers);
    let events = ctx
        .service
        .subscribe(&stream_id, params.start_sequence, &viewer)?;
    info!(
        target: LOG_TARGET,
        stream = %stream_id,
        start_sequence = ?params.start_sequence,
        viewer = ?viewer.user_id,
        "subscription opened"
    );

    let sse_stream = events.map(|event| {
        let mut frame = Event::default().event(event.event_type.as_str());
        if let Some(sequence) = event.sequence {
            frame = frame.id(sequence.to_string());
        }
        frame.json_data(&event)
    });

    Ok(Sse::new(sse_stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text(":")))
}

async fn get_cursor(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path((stream_id, subscriber_id)): Path<(String, String)>,
) -> Result<Json<Cursor>, ApiError> {
    ctx.service
        .get_cursor(&stream_id, &subscriber_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "no cursor for `{subscriber_id}` on stream `{stream_id}`"
            ))
        })
}

async fn update_cursor(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path((stream_id, subscriber_id)): Path<(String, String)>,
    Json(request): Json<CursorUpdateRequest>,
) -> Result<Json<Cursor>, ApiError> {
    Ok(Json(
        ctx.service
            .update_cursor(&stream_id, &subscriber_id, request.position)
            .await?,
    ))
}
