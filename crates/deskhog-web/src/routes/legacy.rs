//! Endpoints called by the shipped portal page.
//!
//! Mutating endpoints take the same admission path as `POST /api/actions`
//! and reply `{success, status, message}` with `200`; only a body that
//! cannot be read at all gets a `400`. Read endpoints return the camelCase
//! shapes the page expects.
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | POST | `/save-wifi` | form `ssid`, `password` |
//! | POST | `/save-device-config` | form `teamId`, `apiKey`, `region` |
//! | POST | `/save-insight` | form `insightId`, `insightTitle` |
//! | POST | `/delete-insight` | JSON `{id}` |
//! | POST | `/start-update` | - |
//! | GET | `/scan-networks` | - |
//! | GET | `/get-device-config` | - |
//! | GET | `/get-insights` | - |
//! | GET | `/check-update` | - |
//! | GET | `/update-status` | - |

use axum::{
    extract::{
        rejection::{FormRejection, JsonRejection},
        State,
    },
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Form, Router,
};
use deskhog_core::{ActionPayload, SubmitStatus};
use deskhog_protocol::{
    DeleteInsightRequest, DeviceConfigForm, InsightForm, InsightView, LegacyCheckUpdate,
    LegacyDeviceConfig, LegacyInsights, LegacyNetworks, LegacyResponse, LegacyUpdateStatus,
    NetworkView, SubmitResponse, WifiForm,
};

use crate::AppState;

type LegacyReply = (StatusCode, Json<LegacyResponse>);

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/save-wifi", post(save_wifi))
        .route("/save-device-config", post(save_device_config))
        .route("/save-insight", post(save_insight))
        .route("/delete-insight", post(delete_insight))
        .route("/start-update", post(start_update))
        .route("/scan-networks", get(scan_networks))
        .route("/get-device-config", get(get_device_config))
        .route("/get-insights", get(get_insights))
        .route("/check-update", get(check_update))
        .route("/update-status", get(update_status))
}

fn accepted(response: SubmitResponse) -> LegacyReply {
    (StatusCode::OK, Json(response.into()))
}

fn unreadable(state: &AppState, message: String) -> LegacyReply {
    state.stats.record_rejected(SubmitStatus::Error);
    (
        StatusCode::BAD_REQUEST,
        Json(SubmitResponse::error(message).into()),
    )
}

/// POST /save-wifi
async fn save_wifi(
    State(state): State<AppState>,
    form: Result<Form<WifiForm>, FormRejection>,
) -> LegacyReply {
    match form {
        Ok(Form(form)) => accepted(state.submit(form.into())),
        Err(rejection) => unreadable(&state, rejection.body_text()),
    }
}

/// POST /save-device-config
async fn save_device_config(
    State(state): State<AppState>,
    form: Result<Form<DeviceConfigForm>, FormRejection>,
) -> LegacyReply {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return unreadable(&state, rejection.body_text()),
    };
    match ActionPayload::try_from(form) {
        Ok(payload) => accepted(state.submit(payload)),
        Err(e) => {
            state.stats.record_rejected(SubmitStatus::Error);
            accepted(SubmitResponse::error(e.to_string()))
        }
    }
}

/// POST /save-insight
async fn save_insight(
    State(state): State<AppState>,
    form: Result<Form<InsightForm>, FormRejection>,
) -> LegacyReply {
    match form {
        Ok(Form(form)) => accepted(state.submit(form.into())),
        Err(rejection) => unreadable(&state, rejection.body_text()),
    }
}

/// POST /delete-insight
async fn delete_insight(
    State(state): State<AppState>,
    body: Result<Json<DeleteInsightRequest>, JsonRejection>,
) -> LegacyReply {
    match body {
        Ok(Json(request)) => accepted(state.submit(request.into())),
        Err(rejection) => unreadable(&state, rejection.body_text()),
    }
}

/// POST /start-update
async fn start_update(State(state): State<AppState>) -> LegacyReply {
    accepted(state.submit(ActionPayload::StartOtaUpdate))
}

/// GET /scan-networks
///
/// Starts a scan when the slot is free and returns the last completed
/// results either way. The page polls until the list settles.
async fn scan_networks(State(state): State<AppState>) -> Json<LegacyNetworks> {
    let response = state.submit(ActionPayload::StartWifiScan);
    let snapshot = state.handle.status();
    Json(LegacyNetworks {
        networks: snapshot.wifi.scan_results.iter().map(NetworkView::from).collect(),
        scanning: response.status == SubmitStatus::Queued,
    })
}

/// GET /get-device-config
async fn get_device_config(State(state): State<AppState>) -> Json<LegacyDeviceConfig> {
    Json(LegacyDeviceConfig::from(&state.handle.status().device_config))
}

/// GET /get-insights
async fn get_insights(State(state): State<AppState>) -> Json<LegacyInsights> {
    let snapshot = state.handle.status();
    Json(LegacyInsights {
        insights: snapshot.insights().map(InsightView::from).collect(),
    })
}

/// GET /check-update
///
/// The page expects the check result in the reply, so this waits (bounded)
/// for the CHECK_OTA_UPDATE it submitted.
async fn check_update(State(state): State<AppState>) -> Json<LegacyCheckUpdate> {
    let response = state.submit(ActionPayload::CheckOtaUpdate);
    if let Some(action_id) = response.action_id {
        let _ = state
            .handle
            .wait_for_outcome(action_id, state.check_wait)
            .await;
    }

    let mut body = LegacyCheckUpdate::from(&state.handle.status().ota);
    if response.status != SubmitStatus::Queued && body.error.is_empty() {
        body.error = response.message;
    }
    Json(body)
}

/// GET /update-status
async fn update_status(State(state): State<AppState>) -> Json<LegacyUpdateStatus> {
    state.stats.record_status_poll();
    Json(LegacyUpdateStatus::from(&state.handle.status().ota))
}
