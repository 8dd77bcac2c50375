//! Captive-portal detection.
//!
//! Phones and laptops probe well-known URLs after joining a network. A
//! redirect instead of the expected answer makes them open the portal.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::AppState;

/// Probe paths used by Android, Windows and Apple devices.
pub const PROBE_PATHS: [&str; 4] = [
    "/generate_204",
    "/fwlink",
    "/hotspot-detect.html",
    "/connecttest.txt",
];

pub fn routes() -> Router<AppState> {
    PROBE_PATHS
        .iter()
        .fold(Router::new(), |router, path| {
            router.route(path, get(redirect_to_portal))
        })
}

/// 302 to the portal root on the access-point address.
pub async fn redirect_to_portal(State(state): State<AppState>) -> Response {
    let location = format!("http://{}/", state.ap_address);
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}
