//! Simulated collaborators.
//!
//! In-memory stand-ins for the radio, HTTP client, flash slot and system
//! control. The host binary uses the simulated radio; tests use all of them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::model::Network;
use crate::services::{
    DownloadStream, FirmwareFlash, FlashError, FlashSession, HttpClient, HttpError, LinkStatus,
    SystemControl, WifiError, WifiManager,
};
use crate::sync;

// ============================================================================
// WiFi
// ============================================================================

/// A network the simulated radio can see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedNetwork {
    pub ssid: String,
    pub rssi: i32,
    /// `None` for an open network.
    #[serde(default)]
    pub password: Option<String>,
}

impl SimulatedNetwork {
    pub fn new(ssid: &str, rssi: i32, password: Option<&str>) -> Self {
        Self {
            ssid: ssid.to_string(),
            rssi,
            password: password.map(str::to_string),
        }
    }
}

/// Radio that joins networks from a fixed list.
#[derive(Debug, Default)]
pub struct SimulatedWifi {
    networks: RwLock<Vec<SimulatedNetwork>>,
    link: RwLock<LinkStatus>,
    connect_delay: RwLock<Duration>,
    scan_error: RwLock<Option<String>>,
}

impl SimulatedWifi {
    pub fn new(networks: Vec<SimulatedNetwork>) -> Self {
        Self {
            networks: RwLock::new(networks),
            ..Self::default()
        }
    }

    /// Make every connect attempt take `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        *sync::write(&self.connect_delay) = delay;
    }

    /// Make scans fail with `message`, or succeed again with `None`.
    pub fn set_scan_error(&self, message: Option<&str>) {
        *sync::write(&self.scan_error) = message.map(str::to_string);
    }
}

impl WifiManager for SimulatedWifi {
    fn connect(&self, ssid: &str, password: &str, timeout: Duration) -> Result<(), WifiError> {
        let delay = *sync::read(&self.connect_delay);
        if delay > timeout {
            std::thread::sleep(timeout);
            return Err(WifiError::Timeout(ssid.to_string()));
        }
        std::thread::sleep(delay);

        let network = sync::read(&self.networks)
            .iter()
            .find(|n| n.ssid == ssid)
            .cloned()
            .ok_or_else(|| WifiError::ConnectFailed(ssid.to_string(), "network not found".into()))?;

        if let Some(expected) = &network.password {
            if expected != password {
                *sync::write(&self.link) = LinkStatus::default();
                return Err(WifiError::ConnectFailed(
                    ssid.to_string(),
                    "authentication failed".into(),
                ));
            }
        }

        *sync::write(&self.link) = LinkStatus {
            connected: true,
            ssid: Some(ssid.to_string()),
            ip: Some("192.168.1.100".to_string()),
        };
        info!(ssid, "Simulated WiFi connected");
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Network>, WifiError> {
        if let Some(message) = sync::read(&self.scan_error).clone() {
            return Err(WifiError::ScanFailed(message));
        }
        Ok(sync::read(&self.networks)
            .iter()
            .map(|n| Network::new(n.ssid.clone(), n.rssi, n.password.is_some()))
            .collect())
    }

    fn disconnect(&self) {
        *sync::write(&self.link) = LinkStatus::default();
    }

    fn status(&self) -> LinkStatus {
        sync::read(&self.link).clone()
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Clone)]
enum Scripted {
    Text(String),
    Error(HttpError),
    Download {
        data: Vec<u8>,
        content_length: Option<u64>,
    },
}

/// HTTP client answering from a per-URL script.
#[derive(Debug, Default)]
pub struct ScriptedHttp {
    responses: Mutex<HashMap<String, Scripted>>,
    delay: RwLock<Duration>,
    downloads: AtomicUsize,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_text(&self, url: &str, body: impl Into<String>) {
        self.script(url, Scripted::Text(body.into()));
    }

    pub fn set_error(&self, url: &str, error: HttpError) {
        self.script(url, Scripted::Error(error));
    }

    /// Serve `data` with a matching `Content-Length`.
    pub fn set_download(&self, url: &str, data: Vec<u8>) {
        let content_length = Some(data.len() as u64);
        self.script(
            url,
            Scripted::Download {
                data,
                content_length,
            },
        );
    }

    /// Serve `data` while advertising `content_length`, so the body ends early.
    pub fn set_truncated_download(&self, url: &str, data: Vec<u8>, content_length: u64) {
        self.script(
            url,
            Scripted::Download {
                data,
                content_length: Some(content_length),
            },
        );
    }

    /// Delay every response. A delay longer than the request timeout turns
    /// into `HttpError::Timeout` after the timeout elapses.
    pub fn set_delay(&self, delay: Duration) {
        *sync::write(&self.delay) = delay;
    }

    /// Number of downloads opened so far.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn script(&self, url: &str, response: Scripted) {
        sync::lock(&self.responses).insert(url.to_string(), response);
    }

    fn respond(&self, url: &str, timeout: Duration) -> Result<Scripted, HttpError> {
        let delay = *sync::read(&self.delay);
        if delay > timeout {
            std::thread::sleep(timeout);
            return Err(HttpError::Timeout);
        }
        std::thread::sleep(delay);

        match sync::lock(&self.responses).get(url).cloned() {
            Some(Scripted::Error(e)) => Err(e),
            Some(response) => Ok(response),
            None => Err(HttpError::Status(404)),
        }
    }
}

impl HttpClient for ScriptedHttp {
    fn get_text(&self, url: &str, timeout: Duration) -> Result<String, HttpError> {
        debug!(url, "Scripted GET");
        match self.respond(url, timeout)? {
            Scripted::Text(body) => Ok(body),
            Scripted::Download { data, .. } => String::from_utf8(data)
                .map_err(|e| HttpError::Transport(e.to_string())),
            Scripted::Error(e) => Err(e),
        }
    }

    fn open_download(&self, url: &str, timeout: Duration) -> Result<DownloadStream, HttpError> {
        debug!(url, "Scripted download");
        self.downloads.fetch_add(1, Ordering::SeqCst);
        match self.respond(url, timeout)? {
            Scripted::Download {
                data,
                content_length,
            } => Ok(DownloadStream {
                content_length,
                body: Box::new(Cursor::new(data)),
            }),
            Scripted::Text(body) => Ok(DownloadStream {
                content_length: Some(body.len() as u64),
                body: Box::new(Cursor::new(body.into_bytes())),
            }),
            Scripted::Error(e) => Err(e),
        }
    }
}

// ============================================================================
// Flash
// ============================================================================

#[derive(Debug, Default)]
struct FlashInner {
    committed: Mutex<Option<Vec<u8>>>,
    fail_writes_after: Mutex<Option<usize>>,
    write_delay: RwLock<Duration>,
}

/// Firmware slot held in memory.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    capacity: u64,
    inner: Arc<FlashInner>,
}

impl MemoryFlash {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            inner: Arc::new(FlashInner::default()),
        }
    }

    /// The last committed image.
    pub fn committed(&self) -> Option<Vec<u8>> {
        sync::lock(&self.inner.committed).clone()
    }

    /// Let `count` chunk writes succeed, then fail the rest.
    pub fn fail_writes_after(&self, count: usize) {
        *sync::lock(&self.inner.fail_writes_after) = Some(count);
    }

    /// Slow down every chunk write.
    pub fn set_write_delay(&self, delay: Duration) {
        *sync::write(&self.inner.write_delay) = delay;
    }
}

impl FirmwareFlash for MemoryFlash {
    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn begin(&self, size: u64) -> Result<Box<dyn FlashSession>, FlashError> {
        if size > self.capacity {
            return Err(FlashError::NoSpace {
                needed: size,
                capacity: self.capacity,
            });
        }
        Ok(Box::new(MemoryFlashSession {
            expected: size,
            buffer: Vec::with_capacity(size as usize),
            writes: 0,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryFlashSession {
    expected: u64,
    buffer: Vec<u8>,
    writes: usize,
    inner: Arc<FlashInner>,
}

impl FlashSession for MemoryFlashSession {
    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError> {
        std::thread::sleep(*sync::read(&self.inner.write_delay));
        if let Some(limit) = *sync::lock(&self.inner.fail_writes_after) {
            if self.writes >= limit {
                return Err(FlashError::Write(format!("sector write {} failed", self.writes)));
            }
        }
        if (self.buffer.len() + chunk.len()) as u64 > self.expected {
            return Err(FlashError::Write("image larger than announced".into()));
        }
        self.buffer.extend_from_slice(chunk);
        self.writes += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), FlashError> {
        let MemoryFlashSession {
            expected,
            buffer,
            inner,
            ..
        } = *self;
        if buffer.len() as u64 != expected {
            return Err(FlashError::End(format!(
                "expected {} bytes, got {}",
                expected,
                buffer.len()
            )));
        }
        *sync::lock(&inner.committed) = Some(buffer);
        Ok(())
    }
}

// ============================================================================
// System
// ============================================================================

/// Counts restart requests instead of rebooting.
#[derive(Debug, Default)]
pub struct RecordingSystem {
    restarts: AtomicUsize,
}

impl RecordingSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl SystemControl for RecordingSystem {
    fn restart(&self) {
        info!("Restart requested");
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simulated_wifi_connect() {
        let wifi = SimulatedWifi::new(vec![
            SimulatedNetwork::new("Home", -40, Some("secret123")),
            SimulatedNetwork::new("Cafe", -70, None),
        ]);
        let timeout = Duration::from_secs(1);

        assert!(matches!(
            wifi.connect("Home", "wrong", timeout),
            Err(WifiError::ConnectFailed(_, _))
        ));
        assert!(!wifi.status().connected);

        wifi.connect("Home", "secret123", timeout).unwrap();
        let status = wifi.status();
        assert!(status.connected);
        assert_eq!(status.ssid.as_deref(), Some("Home"));

        wifi.connect("Cafe", "", timeout).unwrap();
        assert_eq!(wifi.status().ssid.as_deref(), Some("Cafe"));
    }

    #[test]
    fn test_simulated_wifi_timeout() {
        let wifi = SimulatedWifi::new(vec![SimulatedNetwork::new("Home", -40, None)]);
        wifi.set_connect_delay(Duration::from_millis(50));

        let err = wifi.connect("Home", "", Duration::from_millis(5)).unwrap_err();
        assert_eq!(err, WifiError::Timeout("Home".to_string()));
    }

    #[test]
    fn test_memory_flash_rejects_short_image() {
        let flash = MemoryFlash::new(16);
        assert!(matches!(flash.begin(32), Err(FlashError::NoSpace { .. })));

        let mut session = flash.begin(4).unwrap();
        session.write(&[1, 2]).unwrap();
        assert!(matches!(session.finish(), Err(FlashError::End(_))));
        assert_eq!(flash.committed(), None);
    }
}
