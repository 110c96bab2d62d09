//! Event Grid webhook and event inspection endpoints
//!
//! POST /ingress, GET /ingress, GET /ingress/:event_id

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio_util::sync::CancellationToken;

use crate::eventgrid::DispatchResponse;
use crate::services::{EventDetail, EventSummary};
use crate::{error::ApiResult, AppState};

/// POST /ingress
///
/// Event Grid delivery endpoint. Answers the subscription handshake or
/// dispatches each envelope in the batch.
pub async fn receive_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    // Fires when this future is dropped, e.g. the sender hung up
    let cancel = CancellationToken::new();
    let _abandon_guard = cancel.clone().drop_guard();

    let response = state.dispatcher.receive(&headers, &body, &cancel).await?;

    Ok(match response {
        DispatchResponse::Validation(answer) => (StatusCode::OK, Json(answer)).into_response(),
        DispatchResponse::Batch(report) => (report.status_code(), Json(report)).into_response(),
    })
}

/// GET /ingress
pub async fn list_events(State(state): State<AppState>) -> Json<Vec<EventSummary>> {
    Json(state.events.list().await)
}

/// GET /ingress/:event_id
pub async fn show_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<EventDetail>> {
    Ok(Json(state.events.get(&event_id).await?))
}

/// Build ingress routes
pub fn ingress_routes() -> Router<AppState> {
    Router::new()
        .route("/ingress", get(list_events).post(receive_events))
        .route("/ingress/:event_id", get(show_event))
}
