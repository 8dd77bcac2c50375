mod flash;
mod http;
mod storage;
mod system;

use std::sync::Arc;

use deskhog_core::sim::SimulatedWifi;
use deskhog_core::Services;
use deskhog_server::{PortalServer, ServerConfig};
use deskhog_web::{create_router, WebState};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::flash::FileFlash;
use crate::http::ReqwestHttp;
use crate::storage::FileConfigStorage;
use crate::system::ProcessRestart;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,deskhog_server=debug,deskhog_core=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(version = %config.firmware_version, "DeskHog portal starting...");

    let storage = FileConfigStorage::open(&config.config_store_path)?;
    tracing::info!("Config store: {}", storage.path().display());

    let services = Services {
        wifi: Arc::new(SimulatedWifi::new(config.simulated_networks.clone())),
        http: Arc::new(ReqwestHttp::new()),
        flash: Arc::new(FileFlash::new(&config.flash_path, config.flash_capacity)),
        storage: Arc::new(storage),
        system: Arc::new(ProcessRestart),
    };

    let server = PortalServer::new(config.clone(), services)?;
    let state = Arc::new(WebState::new(server.handle(), &config));
    let worker_handle = tokio::spawn(server.run());

    let app = create_router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tracing::info!("Portal ready on http://{}/", config.bind_addr);
    tracing::info!("   Status:  curl http://{}/api/status", config.bind_addr);
    tracing::info!("   Captive: http://{}/ (redirect target)", config.ap_address);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = worker_handle => {
            tracing::warn!("Action worker stopped");
        }
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
