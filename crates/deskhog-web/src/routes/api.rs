//! JSON action API.
//!
//! # Endpoints
//!
//! ### `POST /api/actions`
//! Submit an action. Answers at once; the action runs in the background.
//!
//! **Request:**
//! ```json
//! { "action": "SAVE_WIFI", "payload": { "ssid": "Home", "password": "secret123" } }
//! ```
//!
//! **Response:** `202` with `{"status": "queued", "message": ..., "action_id": ...}`,
//! `409` with `{"status": "busy", ...}` while another action is in flight,
//! `400` with `{"status": "error", ...}` when the request is unusable.
//!
//! ### `GET /api/status`
//! Snapshot of the dispatcher, WiFi, device config, cards and OTA engine.
//!
//! ### `GET /api/cards/definitions`
//! The card types a user can add.
//!
//! ### `GET /api/stats`
//! Request counters and uptime.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use deskhog_core::{SubmitStatus, CARD_DEFINITIONS};
use deskhog_protocol::{
    decode_submit, CardDefinitionEntry, StatusResponse, SubmitActionRequest, SubmitResponse,
};
use tracing::debug;

use crate::statistics::PortalStatistics;
use crate::AppState;

/// Create action API routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/actions", post(submit_action))
        .route("/status", get(get_status))
        .route("/cards/definitions", get(get_card_definitions))
        .route("/stats", get(get_stats))
}

/// POST /api/actions
async fn submit_action(
    State(state): State<AppState>,
    body: Result<Json<SubmitActionRequest>, JsonRejection>,
) -> (StatusCode, Json<SubmitResponse>) {
    let response = match body {
        Ok(Json(request)) => match decode_submit(&request) {
            Ok(payload) => state.submit(payload),
            Err(e) => {
                debug!("Rejected action request: {}", e);
                state.stats.record_rejected(SubmitStatus::Error);
                SubmitResponse::error(e.to_string())
            }
        },
        Err(rejection) => {
            state.stats.record_rejected(SubmitStatus::Error);
            SubmitResponse::error(rejection.body_text())
        }
    };
    (http_status(response.status), Json(response))
}

fn http_status(status: SubmitStatus) -> StatusCode {
    match status {
        SubmitStatus::Queued => StatusCode::ACCEPTED,
        SubmitStatus::Busy => StatusCode::CONFLICT,
        SubmitStatus::Error => StatusCode::BAD_REQUEST,
    }
}

/// GET /api/status
async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    state.stats.record_status_poll();
    Json(StatusResponse::from(&state.handle.status()))
}

/// GET /api/cards/definitions
async fn get_card_definitions() -> Json<Vec<CardDefinitionEntry>> {
    Json(CARD_DEFINITIONS.iter().map(CardDefinitionEntry::from).collect())
}

/// GET /api/stats
async fn get_stats(State(state): State<AppState>) -> Json<PortalStatistics> {
    Json(state.stats.snapshot())
}
