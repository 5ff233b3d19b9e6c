use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{
        MessageAck, OperatorMessage, RolloutSnapshot, RolloutStarted, HEALTH_ROUTE,
        LAST_EVENT_ID_HEADER, MESSAGE_ROUTE, ROLLOUT_ROUTE, STATE_ROUTE, STREAM_ROUTE,
    },
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info};
use uuid::Uuid;

pub mod api;
pub mod config;
pub mod rollout;

mod app_state;

use api::{record_message, rollout_snapshot, start_rollout, ApiContext};
use app_state::AppState;

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

pub fn build_router(api: ApiContext) -> Router {
    Router::new()
        .route(HEALTH_ROUTE, get(healthz))
        .route(STREAM_ROUTE, get(http_stream))
        .route(ROLLOUT_ROUTE, post(http_start_rollout))
        .route(STATE_ROUTE, get(http_state))
        .route(MESSAGE_ROUTE, post(http_message))
        .fallback(http_not_found)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .with_state(Arc::new(AppState { api }))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscriber_id = Uuid::new_v4();
    let resume_after = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u32>().ok());
    info!(%subscriber_id, ?resume_after, "rollout stream subscribed");

    let events = state
        .api
        .rollout
        .progress_stream_after(resume_after)
        .map(move |event| {
            debug!(%subscriber_id, step = event.step, "sending rollout progress");
            Event::default().id(event.step.to_string()).json_data(event)
        });

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn http_start_rollout(State(state): State<Arc<AppState>>) -> Json<RolloutStarted> {
    Json(start_rollout(&state.api))
}

async fn http_state(State(state): State<Arc<AppState>>) -> Json<RolloutSnapshot> {
    Json(rollout_snapshot(&state.api).await)
}

async fn http_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OperatorMessage>,
) -> Result<Json<MessageAck>, (StatusCode, Json<ApiError>)> {
    record_message(&state.api, &req)
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(e)))
}

async fn http_not_found(uri: Uri) -> (StatusCode, Json<ApiError>) {
    debug!(path = %uri.path(), "no route");
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(
            ErrorCode::NotFound,
            format!("no route for {}", uri.path()),
        )),
    )
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
