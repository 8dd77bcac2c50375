//! # deskhog-server
//!
//! Runs admitted portal actions in the background.
//!
//! The request path only submits and polls. A single worker task receives
//! each admitted action, executes it on the blocking pool under a deadline,
//! records the outcome, and reboots the device after a committed firmware
//! update.
//!
//! Enable features based on target platform:
//! - `tokio-runtime` (default) - For Linux/desktop

pub mod config;
#[cfg(feature = "tokio-runtime")]
pub mod server;

pub use config::{ConfigLoadError, ServerConfig};
pub use deskhog_core::{Portal, Services, StatusSnapshot};
#[cfg(feature = "tokio-runtime")]
pub use server::{PortalHandle, PortalServer, SubmitReceipt};
