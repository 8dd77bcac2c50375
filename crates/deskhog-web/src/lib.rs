//! # deskhog-web
//!
//! HTTP surface of the DeskHog configuration portal.
//!
//! This crate provides:
//! - The action API (`/api/actions`, `/api/status`, `/api/cards/definitions`)
//! - The legacy form endpoints the shipped portal page calls
//! - Captive-portal detection redirects
//! - Request statistics (`/api/stats`)
//!
//! Handlers never run an action themselves. Mutating requests go through
//! [`PortalHandle::submit`], which answers immediately; everything else is a
//! read of the current [`StatusSnapshot`](deskhog_core::StatusSnapshot).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use deskhog_web::{create_router, WebState};
//!
//! let state = WebState::new(server.handle(), &config);
//! let app = create_router(Arc::new(state));
//!
//! let listener = TcpListener::bind(config.bind_addr).await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod routes;
pub mod statistics;

pub use routes::create_router;
pub use statistics::{PortalStatistics, StatisticsCollector};

use std::sync::Arc;
use std::time::Duration;

use deskhog_core::ActionPayload;
use deskhog_protocol::SubmitResponse;
use deskhog_server::{PortalHandle, ServerConfig};

/// Shared state for all route handlers.
pub struct WebState {
    pub handle: PortalHandle,
    pub stats: StatisticsCollector,
    /// Address captive-portal probes are redirected to.
    pub ap_address: String,
    /// How long `GET /check-update` waits for the check to finish.
    pub check_wait: Duration,
}

impl WebState {
    pub fn new(handle: PortalHandle, config: &ServerConfig) -> Self {
        Self {
            handle,
            stats: StatisticsCollector::new(),
            ap_address: config.ap_address.clone(),
            check_wait: Duration::from_secs(config.check_timeout_secs + 2),
        }
    }

    /// Submit an action and count the result.
    pub fn submit(&self, payload: ActionPayload) -> SubmitResponse {
        match self.handle.submit(payload) {
            Ok(receipt) => {
                self.stats.record_accepted();
                SubmitResponse::queued(receipt.action_id, receipt.kind)
            }
            Err(e) => {
                self.stats.record_rejected(e.status());
                SubmitResponse::rejected(&e)
            }
        }
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = Arc<WebState>;
