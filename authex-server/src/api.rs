//! Read-side HTTP API.
//!
//! Three routes: a liveness probe, an operator status view, and the
//! sync-wait rendezvous that lets a client block until the follower has
//! durably applied a given event id.

use std::sync::Arc;
use std::time::Duration;

use authex_core::{
    CounterWait, FollowerStatus, PersistenceGateway, StatusSnapshot, SyncError, WaitOutcome,
};
use authex_model::EventId;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

const DEFAULT_WAIT_MS: u64 = 10_000;
const MAX_WAIT_MS: u64 = 60_000;

#[derive(Clone)]
pub struct AppState {
    pub status: Arc<FollowerStatus>,
    pub counter: Arc<CounterWait>,
    pub gateway: Arc<dyn PersistenceGateway>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/sync/{event_id}", get(sync_wait))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct StatusBody {
    #[serde(flatten)]
    follower: StatusSnapshot,
    max_notification_id: i64,
    last_image_id: i64,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusBody>, ApiError> {
    let max_notification_id = state.gateway.max_notification_id().await?;
    let last_image_id = state.gateway.last_image_id().await?;
    Ok(Json(StatusBody {
        follower: state.status.snapshot(),
        max_notification_id: max_notification_id.as_i64(),
        last_image_id: last_image_id.as_i64(),
    }))
}

#[derive(Deserialize)]
struct SyncQuery {
    timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct SyncBody {
    event_id: i64,
    value: i64,
}

/// Block until the follower has caught up to `event_id`, or the timeout
/// elapses. `408` tells the caller to retry or give up; the follower keeps
/// going regardless.
async fn sync_wait(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    Query(query): Query<SyncQuery>,
) -> Response {
    let timeout =
        Duration::from_millis(query.timeout_ms.unwrap_or(DEFAULT_WAIT_MS).min(MAX_WAIT_MS));
    match state.counter.wait(EventId(event_id), timeout).await {
        WaitOutcome::Ok => Json(SyncBody {
            event_id,
            value: state.counter.value().as_i64(),
        })
        .into_response(),
        WaitOutcome::TimedOut => StatusCode::REQUEST_TIMEOUT.into_response(),
    }
}
