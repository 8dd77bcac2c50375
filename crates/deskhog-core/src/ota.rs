//! Over-the-air firmware update engine.
//!
//! A single state machine drives one update cycle at a time:
//!
//! ```text
//! IDLE -> CHECKING_VERSION -> IDLE (update_available = true|false)
//!      -> DOWNLOADING -> WRITING -> SUCCESS
//! any active state -> ERROR_* (retry with a fresh check)
//! ```
//!
//! Checking and installing are separate steps so a user confirms before any
//! flash write. The whole record lives behind one lock and is replaced as a
//! unit, so readers never see a status from one transition paired with the
//! progress of another.
//!
//! Each active phase carries a cycle number. When the dispatcher gives up on
//! a stalled phase it calls [`OtaEngine::abandon`], which bumps the cycle;
//! late writes from the stalled worker no longer match and are dropped.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::release::{parse_release_feed, ReleaseAsset, ReleaseInfo, Version, DEFAULT_ASSET_NAME};
use crate::services::{FirmwareFlash, FlashError, HttpClient, HttpError};
use crate::sync;

/// Chunk size used for reading the download and writing flash.
pub const CHUNK_SIZE: usize = 1460;

/// Engine status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtaStatus {
    Idle,
    CheckingVersion,
    Downloading,
    Writing,
    Success,
    ErrorWifi,
    ErrorHttpCheck,
    ErrorHttpDownload,
    ErrorJson,
    ErrorUpdateBegin,
    ErrorUpdateWrite,
    ErrorUpdateEnd,
    ErrorNoAsset,
    ErrorNoSpace,
}

impl OtaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtaStatus::Idle => "IDLE",
            OtaStatus::CheckingVersion => "CHECKING_VERSION",
            OtaStatus::Downloading => "DOWNLOADING",
            OtaStatus::Writing => "WRITING",
            OtaStatus::Success => "SUCCESS",
            OtaStatus::ErrorWifi => "ERROR_WIFI",
            OtaStatus::ErrorHttpCheck => "ERROR_HTTP_CHECK",
            OtaStatus::ErrorHttpDownload => "ERROR_HTTP_DOWNLOAD",
            OtaStatus::ErrorJson => "ERROR_JSON",
            OtaStatus::ErrorUpdateBegin => "ERROR_UPDATE_BEGIN",
            OtaStatus::ErrorUpdateWrite => "ERROR_UPDATE_WRITE",
            OtaStatus::ErrorUpdateEnd => "ERROR_UPDATE_END",
            OtaStatus::ErrorNoAsset => "ERROR_NO_ASSET",
            OtaStatus::ErrorNoSpace => "ERROR_NO_SPACE",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            OtaStatus::ErrorWifi
                | OtaStatus::ErrorHttpCheck
                | OtaStatus::ErrorHttpDownload
                | OtaStatus::ErrorJson
                | OtaStatus::ErrorUpdateBegin
                | OtaStatus::ErrorUpdateWrite
                | OtaStatus::ErrorUpdateEnd
                | OtaStatus::ErrorNoAsset
                | OtaStatus::ErrorNoSpace
        )
    }

    /// A phase is running and owns the engine.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OtaStatus::CheckingVersion | OtaStatus::Downloading | OtaStatus::Writing
        )
    }
}

impl std::fmt::Display for OtaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the engine, as published to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaState {
    pub status: OtaStatus,
    pub current_version: String,
    pub available_version: Option<String>,
    pub release_notes: Option<String>,
    /// 0-100, meaningful during DOWNLOADING and WRITING.
    pub progress: u8,
    pub error_message: Option<String>,
    /// Human readable description of the current status.
    pub status_message: String,
    pub update_available: bool,
}

/// A failed phase: the ERROR_* status it ended in and why.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status}: {message}")]
pub struct OtaFailure {
    pub status: OtaStatus,
    pub message: String,
}

impl OtaFailure {
    pub fn new(status: OtaStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaSettings {
    /// URL of the releases feed.
    pub release_url: String,
    /// Name of the firmware asset inside a release.
    pub asset_name: String,
    pub check_timeout: Duration,
    pub download_timeout: Duration,
}

impl Default for OtaSettings {
    fn default() -> Self {
        Self {
            release_url: "https://api.github.com/repos/PostHog/DeskHog/releases".to_string(),
            asset_name: DEFAULT_ASSET_NAME.to_string(),
            check_timeout: Duration::from_secs(20),
            download_timeout: Duration::from_secs(180),
        }
    }
}

/// Handle for an install that passed its pre-checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTicket {
    pub cycle: u64,
    pub asset: ReleaseAsset,
}

#[derive(Debug)]
struct Record {
    state: OtaState,
    release: Option<ReleaseInfo>,
    cycle: u64,
}

/// The update state machine.
#[derive(Debug)]
pub struct OtaEngine {
    current_version: Option<Version>,
    settings: OtaSettings,
    record: RwLock<Record>,
}

impl OtaEngine {
    pub fn new(current_version: &str, settings: OtaSettings) -> Self {
        let state = OtaState {
            status: OtaStatus::Idle,
            current_version: current_version.to_string(),
            available_version: None,
            release_notes: None,
            progress: 0,
            error_message: None,
            status_message: "Idle".to_string(),
            update_available: false,
        };
        Self {
            current_version: Version::parse(current_version),
            settings,
            record: RwLock::new(Record {
                state,
                release: None,
                cycle: 0,
            }),
        }
    }

    pub fn settings(&self) -> &OtaSettings {
        &self.settings
    }

    /// Consistent copy of the published state.
    pub fn state(&self) -> OtaState {
        sync::read(&self.record).state.clone()
    }

    pub fn status(&self) -> OtaStatus {
        sync::read(&self.record).state.status
    }

    /// Whether START would be accepted right now.
    pub fn can_install(&self) -> Result<(), String> {
        let record = sync::read(&self.record);
        if let Some(reason) = refusal(record.state.status) {
            return Err(reason);
        }
        match &record.release {
            Some(release) if record.state.update_available && release.asset.is_some() => Ok(()),
            _ => Err("No update available. Check for updates first.".to_string()),
        }
    }

    /// Whether CHECK would be accepted right now.
    pub fn can_check(&self) -> Result<(), String> {
        match refusal(self.status()) {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Version check
    // ========================================================================

    /// Enter CHECKING_VERSION. Allowed from IDLE and from any error state.
    pub fn begin_check(&self) -> Result<u64, String> {
        let mut record = sync::write(&self.record);
        if let Some(reason) = refusal(record.state.status) {
            return Err(reason);
        }
        record.cycle += 1;
        record.release = None;
        record.state = OtaState {
            status: OtaStatus::CheckingVersion,
            available_version: None,
            release_notes: None,
            progress: 0,
            error_message: None,
            status_message: "Checking for updates...".to_string(),
            update_available: false,
            ..record.state.clone()
        };
        info!(cycle = record.cycle, "OTA: checking for updates");
        Ok(record.cycle)
    }

    /// Fetch the release feed and decide whether an update is available.
    /// Ends in IDLE on success. Returns the status message.
    pub fn run_check(
        &self,
        cycle: u64,
        http: &dyn HttpClient,
        wifi_connected: bool,
    ) -> Result<String, OtaFailure> {
        let result = self.fetch_release(http, wifi_connected);
        match result {
            Ok(release) => self.finish_check(cycle, release),
            Err(failure) => Err(self.fail(cycle, failure)),
        }
    }

    fn fetch_release(
        &self,
        http: &dyn HttpClient,
        wifi_connected: bool,
    ) -> Result<ReleaseInfo, OtaFailure> {
        if !wifi_connected {
            return Err(OtaFailure::new(OtaStatus::ErrorWifi, "WiFi not connected"));
        }

        let body = http
            .get_text(&self.settings.release_url, self.settings.check_timeout)
            .map_err(|e| match e {
                HttpError::NotConnected => OtaFailure::new(OtaStatus::ErrorWifi, e.to_string()),
                other => OtaFailure::new(
                    OtaStatus::ErrorHttpCheck,
                    format!("Version check failed: {}", other),
                ),
            })?;

        parse_release_feed(&body, &self.settings.asset_name)
            .map_err(|e| OtaFailure::new(OtaStatus::ErrorJson, e.to_string()))
    }

    fn finish_check(&self, cycle: u64, release: ReleaseInfo) -> Result<String, OtaFailure> {
        let newer = match &self.current_version {
            Some(current) => release.version.is_newer_than(current),
            None => true,
        };

        if newer && release.asset.is_none() {
            let message = format!(
                "Release {} has no '{}' asset",
                release.version, self.settings.asset_name
            );
            return Err(self.fail(cycle, OtaFailure::new(OtaStatus::ErrorNoAsset, message)));
        }

        let message = if newer {
            format!("Update available: {}", release.version)
        } else {
            "Firmware is up to date.".to_string()
        };

        let accepted = self.update(cycle, |record| {
            record.state.status = OtaStatus::Idle;
            record.state.progress = 0;
            record.state.available_version = Some(release.version.to_string());
            record.state.release_notes = release.notes.clone();
            record.state.update_available = newer;
            record.state.status_message = message.clone();
            record.release = newer.then(|| release.clone());
        });
        if !accepted {
            return Err(stale(OtaStatus::ErrorHttpCheck));
        }

        info!(version = %release.version, update_available = newer, "OTA: check finished");
        Ok(message)
    }

    // ========================================================================
    // Install
    // ========================================================================

    /// Enter DOWNLOADING after checking the known release fits in `capacity`.
    /// A release that is too large ends in ERROR_NO_SPACE without any
    /// transfer.
    pub fn begin_install(&self, capacity: u64) -> Result<InstallTicket, OtaFailure> {
        let mut record = sync::write(&self.record);
        if let Some(reason) = refusal(record.state.status) {
            return Err(OtaFailure::new(record.state.status, reason));
        }
        let asset = match &record.release {
            Some(ReleaseInfo {
                asset: Some(asset), ..
            }) if record.state.update_available => asset.clone(),
            _ => {
                return Err(OtaFailure::new(
                    record.state.status,
                    "No update available. Check for updates first.",
                ))
            }
        };

        record.cycle += 1;
        if let Some(size) = asset.size.filter(|size| *size > capacity) {
            let failure = OtaFailure::new(
                OtaStatus::ErrorNoSpace,
                format!("Firmware of {} bytes does not fit in {} bytes", size, capacity),
            );
            apply_failure(&mut record, &failure);
            warn!(size, capacity, "OTA: not enough space for update");
            return Err(failure);
        }

        record.state.status = OtaStatus::Downloading;
        record.state.progress = 0;
        record.state.error_message = None;
        record.state.status_message = "Downloading firmware...".to_string();
        info!(cycle = record.cycle, url = %asset.download_url, "OTA: downloading");

        Ok(InstallTicket {
            cycle: record.cycle,
            asset,
        })
    }

    /// Download the image, verify it, then write it to flash. Ends in
    /// SUCCESS or an error state.
    pub fn run_install(
        &self,
        ticket: &InstallTicket,
        http: &dyn HttpClient,
        flash: &dyn FirmwareFlash,
    ) -> Result<String, OtaFailure> {
        let image = match self.download(ticket, http, flash.capacity()) {
            Ok(image) => image,
            Err(failure) => return Err(self.fail(ticket.cycle, failure)),
        };

        let entered = self.update(ticket.cycle, |record| {
            record.state.status = OtaStatus::Writing;
            record.state.progress = 0;
            record.state.status_message = "Writing firmware...".to_string();
        });
        if !entered {
            return Err(stale(OtaStatus::ErrorHttpDownload));
        }
        info!(bytes = image.len(), "OTA: writing firmware");

        if let Err(failure) = self.write_image(ticket.cycle, &image, flash) {
            return Err(self.fail(ticket.cycle, failure));
        }

        let message = "Update successful! Rebooting...".to_string();
        self.update(ticket.cycle, |record| {
            record.state.status = OtaStatus::Success;
            record.state.progress = 100;
            record.state.status_message = message.clone();
            record.state.update_available = false;
            record.release = None;
        });
        info!("OTA: update committed");
        Ok(message)
    }

    fn download(
        &self,
        ticket: &InstallTicket,
        http: &dyn HttpClient,
        capacity: u64,
    ) -> Result<Vec<u8>, OtaFailure> {
        let stream = http
            .open_download(&ticket.asset.download_url, self.settings.download_timeout)
            .map_err(|e| match e {
                HttpError::NotConnected => {
                    OtaFailure::new(OtaStatus::ErrorWifi, "WiFi not connected for download")
                }
                other => OtaFailure::new(
                    OtaStatus::ErrorHttpDownload,
                    format!("Download failed: {}", other),
                ),
            })?;

        let total = match stream.content_length {
            Some(len) if len > 0 => len,
            _ => {
                return Err(OtaFailure::new(
                    OtaStatus::ErrorHttpDownload,
                    "Invalid content length from server.",
                ))
            }
        };
        if total > capacity {
            return Err(OtaFailure::new(
                OtaStatus::ErrorNoSpace,
                format!("Not enough space for update ({} > {} bytes)", total, capacity),
            ));
        }

        let mut image = Vec::with_capacity(total as usize);
        let mut body = stream.body.take(total);
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = body.read(&mut buf).map_err(|e| {
                OtaFailure::new(OtaStatus::ErrorHttpDownload, format!("Download failed: {}", e))
            })?;
            if n == 0 {
                break;
            }
            image.extend_from_slice(&buf[..n]);
            if !self.report_progress(ticket.cycle, image.len() as u64, total) {
                return Err(stale(OtaStatus::ErrorHttpDownload));
            }
        }

        if (image.len() as u64) < total {
            return Err(OtaFailure::new(
                OtaStatus::ErrorHttpDownload,
                "Download incomplete.",
            ));
        }

        if let Some(expected) = &ticket.asset.sha256 {
            let actual = hex_digest(&image);
            if &actual != expected {
                return Err(OtaFailure::new(
                    OtaStatus::ErrorHttpDownload,
                    "Firmware checksum mismatch.",
                ));
            }
            debug!("OTA: checksum verified");
        }

        Ok(image)
    }

    fn write_image(
        &self,
        cycle: u64,
        image: &[u8],
        flash: &dyn FirmwareFlash,
    ) -> Result<(), OtaFailure> {
        let total = image.len() as u64;
        let mut session = flash.begin(total).map_err(|e| match e {
            FlashError::NoSpace { .. } => OtaFailure::new(OtaStatus::ErrorNoSpace, e.to_string()),
            other => OtaFailure::new(OtaStatus::ErrorUpdateBegin, other.to_string()),
        })?;

        let mut written = 0u64;
        for chunk in image.chunks(CHUNK_SIZE) {
            session.write(chunk).map_err(|e| {
                OtaFailure::new(
                    OtaStatus::ErrorUpdateWrite,
                    format!("Firmware write error: {}", e),
                )
            })?;
            written += chunk.len() as u64;
            self.report_progress(cycle, written, total);
        }

        session.finish().map_err(|e| {
            OtaFailure::new(
                OtaStatus::ErrorUpdateEnd,
                format!("Finalizing update error: {}", e),
            )
        })
    }

    // ========================================================================
    // Abandon
    // ========================================================================

    /// Give up on a stalled phase of `cycle`.
    ///
    /// CHECKING_VERSION becomes ERROR_HTTP_CHECK and DOWNLOADING becomes
    /// ERROR_HTTP_DOWNLOAD. WRITING is never interrupted: returns `false`
    /// and the caller has to wait for the write to finish.
    pub fn abandon(&self, cycle: u64) -> bool {
        let mut record = sync::write(&self.record);
        if record.cycle != cycle {
            return true;
        }
        let failure = match record.state.status {
            OtaStatus::CheckingVersion => {
                OtaFailure::new(OtaStatus::ErrorHttpCheck, "Version check timed out")
            }
            OtaStatus::Downloading => {
                OtaFailure::new(OtaStatus::ErrorHttpDownload, "Download timed out")
            }
            OtaStatus::Writing => {
                debug!(cycle, "OTA: write in progress, abandon deferred");
                return false;
            }
            _ => return true,
        };
        warn!(cycle, status = %failure.status, "OTA: phase abandoned");
        record.cycle += 1;
        apply_failure(&mut record, &failure);
        true
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Apply `f` if `cycle` is still current. Returns whether it was applied.
    fn update<F: FnOnce(&mut Record)>(&self, cycle: u64, f: F) -> bool {
        let mut record = sync::write(&self.record);
        if record.cycle != cycle {
            debug!(cycle, current = record.cycle, "OTA: dropping stale update");
            return false;
        }
        f(&mut record);
        true
    }

    fn report_progress(&self, cycle: u64, done: u64, total: u64) -> bool {
        let percent = ((done.min(total) * 100) / total.max(1)) as u8;
        self.update(cycle, |record| {
            if percent > record.state.progress {
                record.state.progress = percent;
                debug!(status = %record.state.status, progress = percent, "OTA: progress");
            }
        })
    }

    fn fail(&self, cycle: u64, failure: OtaFailure) -> OtaFailure {
        let applied = self.update(cycle, |record| apply_failure(record, &failure));
        if applied {
            warn!(status = %failure.status, message = %failure.message, "OTA: failed");
            failure
        } else {
            stale(failure.status)
        }
    }
}

/// Record a failure. Progress stays where it was.
fn apply_failure(record: &mut Record, failure: &OtaFailure) {
    record.release = None;
    record.state.status = failure.status;
    record.state.error_message = Some(failure.message.clone());
    record.state.status_message = failure.message.clone();
    record.state.update_available = false;
}

/// Why a new phase cannot start from `status`. SUCCESS only waits for the
/// restart.
fn refusal(status: OtaStatus) -> Option<String> {
    if status.is_active() {
        Some(format!("Update engine is busy ({})", status))
    } else if status == OtaStatus::Success {
        Some("Update installed, rebooting".to_string())
    } else {
        None
    }
}

/// Result for a phase whose cycle was abandoned under it, tagged with the
/// error status of that phase.
fn stale(status: OtaStatus) -> OtaFailure {
    OtaFailure::new(status, "Update cycle was abandoned")
}

fn hex_digest(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
