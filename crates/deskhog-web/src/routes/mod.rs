//! HTTP route handlers for the portal.
//!
//! Routes are grouped by the client that uses them:
//! - `/api/` - JSON action API
//! - legacy paths (`/save-wifi`, `/check-update`, ...) - the shipped portal page
//! - captive-portal probes - OS connectivity checks

pub mod api;
pub mod captive;
pub mod legacy;

use crate::AppState;
use axum::{extract::State, response::Json, routing::get, Router};

/// Create the main Axum router with all routes.
///
/// Unknown paths redirect to the portal, which is what makes phones open
/// it after joining the access point.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(discovery_handler))
        .nest("/api", api::routes())
        .merge(legacy::routes())
        .merge(captive::routes())
        .fallback(captive::redirect_to_portal)
        .with_state(state)
}

/// Handler for `/`.
async fn discovery_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.handle.status();
    Json(serde_json::json!({
        "endpoints": {
            "actions": "/api/actions",
            "status": "/api/status",
            "cardDefinitions": "/api/cards/definitions",
            "stats": "/api/stats"
        },
        "device": {
            "firmwareVersion": status.ota.current_version,
            "apAddress": state.ap_address
        }
    }))
}
