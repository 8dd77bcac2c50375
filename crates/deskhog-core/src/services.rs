//! Collaborator interfaces consumed by the core.
//!
//! The core never touches hardware or the network directly. Each platform
//! supplies implementations of these traits:
//! - `WifiManager` for the radio
//! - `HttpClient` for outbound requests (release feed, firmware download)
//! - `FirmwareFlash` for the inactive firmware slot
//! - `SystemControl` for rebooting into new firmware
//!
//! All calls are blocking and may be slow. Callers run them off the
//! request-handling path.

use std::io::Read;
use std::time::Duration;
use thiserror::Error;

use crate::model::Network;

// ============================================================================
// WiFi
// ============================================================================

/// Radio failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WifiError {
    #[error("Connection to '{0}' failed: {1}")]
    ConnectFailed(String, String),

    #[error("Timed out connecting to '{0}'")]
    Timeout(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),
}

/// Station link status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub connected: bool,
    pub ssid: Option<String>,
    pub ip: Option<String>,
}

pub trait WifiManager: Send + Sync {
    /// Join a network, blocking until connected or `timeout` elapses.
    fn connect(&self, ssid: &str, password: &str, timeout: Duration) -> Result<(), WifiError>;

    /// Scan for networks. Results are raw; the core shapes them.
    fn scan(&self) -> Result<Vec<Network>, WifiError>;

    /// Drop the current link, if any.
    fn disconnect(&self);

    fn status(&self) -> LinkStatus;
}

// ============================================================================
// HTTP
// ============================================================================

/// Outbound HTTP failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("Not connected to a network")]
    NotConnected,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,
}

/// An open download. The body is read incrementally.
pub struct DownloadStream {
    /// Advertised length of the body, if any.
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

pub trait HttpClient: Send + Sync {
    /// GET a text resource. Non-2xx responses are `HttpError::Status`.
    fn get_text(&self, url: &str, timeout: Duration) -> Result<String, HttpError>;

    /// GET a binary resource and return its body as a stream. The timeout
    /// covers the whole transfer.
    fn open_download(&self, url: &str, timeout: Duration) -> Result<DownloadStream, HttpError>;
}

// ============================================================================
// Flash
// ============================================================================

/// Firmware slot failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlashError {
    #[error("Image of {needed} bytes does not fit in {capacity} bytes")]
    NoSpace { needed: u64, capacity: u64 },

    #[error("Could not begin update: {0}")]
    Begin(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Could not finalize update: {0}")]
    End(String),
}

/// The inactive firmware slot.
pub trait FirmwareFlash: Send + Sync {
    /// Size of the slot in bytes.
    fn capacity(&self) -> u64;

    /// Start writing an image of exactly `size` bytes.
    fn begin(&self, size: u64) -> Result<Box<dyn FlashSession>, FlashError>;
}

/// An update in progress. Dropping a session without calling `finish`
/// discards what was written.
pub trait FlashSession: Send {
    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError>;

    /// Verify and commit the image so the next boot uses it.
    fn finish(self: Box<Self>) -> Result<(), FlashError>;
}

// ============================================================================
// System
// ============================================================================

pub trait SystemControl: Send + Sync {
    /// Reboot into the committed firmware. Does not return on the device.
    fn restart(&self);
}
