//! Portal data model.
//!
//! These types describe the mutating requests a client can make, the single
//! remembered outcome of the last action, and the configuration records the
//! device keeps:
//! - `ActionRequest` / `ActionPayload` for user-initiated actions
//! - `ActionOutcome` for the result of the last completed action
//! - `Network` and `WifiCredentials` for the radio
//! - `DeviceConfig` for the team/project identity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cards::CardInput;

/// Longest SSID accepted by the radio.
pub const MAX_SSID_LEN: usize = 32;

/// Longest WPA passphrase accepted by the radio.
pub const MAX_PASSWORD_LEN: usize = 64;

/// The kind of a mutating action.
///
/// Serialized with the SCREAMING_SNAKE_CASE names clients already use
/// (`"SAVE_WIFI"`, `"CHECK_OTA_UPDATE"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    SaveWifi,
    SaveDeviceConfig,
    SaveInsight,
    DeleteInsight,
    StartWifiScan,
    CheckOtaUpdate,
    StartOtaUpdate,
    SaveCards,
}

impl ActionKind {
    /// All action kinds, in declaration order.
    pub const ALL: [ActionKind; 8] = [
        ActionKind::SaveWifi,
        ActionKind::SaveDeviceConfig,
        ActionKind::SaveInsight,
        ActionKind::DeleteInsight,
        ActionKind::StartWifiScan,
        ActionKind::CheckOtaUpdate,
        ActionKind::StartOtaUpdate,
        ActionKind::SaveCards,
    ];

    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SaveWifi => "SAVE_WIFI",
            ActionKind::SaveDeviceConfig => "SAVE_DEVICE_CONFIG",
            ActionKind::SaveInsight => "SAVE_INSIGHT",
            ActionKind::DeleteInsight => "DELETE_INSIGHT",
            ActionKind::StartWifiScan => "START_WIFI_SCAN",
            ActionKind::CheckOtaUpdate => "CHECK_OTA_UPDATE",
            ActionKind::StartOtaUpdate => "START_OTA_UPDATE",
            ActionKind::SaveCards => "SAVE_CARDS",
        }
    }

    /// Parse a wire name. Returns `None` for unknown kinds.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Whether this kind delegates to the OTA engine.
    pub fn is_ota(&self) -> bool {
        matches!(self, ActionKind::CheckOtaUpdate | ActionKind::StartOtaUpdate)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload of an action. The action kind is derived from the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionPayload {
    SaveWifi(WifiCredentials),
    SaveDeviceConfig(DeviceConfigUpdate),
    SaveInsight { insight_id: String, title: String },
    DeleteInsight { insight_id: String },
    StartWifiScan,
    CheckOtaUpdate,
    StartOtaUpdate,
    SaveCards(Vec<CardInput>),
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::SaveWifi(_) => ActionKind::SaveWifi,
            ActionPayload::SaveDeviceConfig(_) => ActionKind::SaveDeviceConfig,
            ActionPayload::SaveInsight { .. } => ActionKind::SaveInsight,
            ActionPayload::DeleteInsight { .. } => ActionKind::DeleteInsight,
            ActionPayload::StartWifiScan => ActionKind::StartWifiScan,
            ActionPayload::CheckOtaUpdate => ActionKind::CheckOtaUpdate,
            ActionPayload::StartOtaUpdate => ActionKind::StartOtaUpdate,
            ActionPayload::SaveCards(_) => ActionKind::SaveCards,
        }
    }
}

/// A user-initiated mutating request.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    /// Unique identifier, echoed back in the outcome.
    pub id: Uuid,
    pub payload: ActionPayload,
    pub submitted_at: DateTime<Utc>,
}

impl ActionRequest {
    pub fn new(payload: ActionPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            submitted_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }
}

/// Final status of a completed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    Error,
}

/// Result of the last completed action. Single slot, superseded by the next
/// completion of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Id of the request this outcome belongs to.
    pub id: Uuid,
    pub kind: ActionKind,
    pub status: ActionStatus,
    pub message: String,
    pub completed_at: DateTime<Utc>,
}

// ============================================================================
// WiFi
// ============================================================================

/// Credentials for a station connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl WifiCredentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// Check SSID and password lengths against radio limits.
    pub fn validate(&self) -> Result<(), String> {
        if self.ssid.is_empty() {
            return Err("SSID cannot be empty".to_string());
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(format!("SSID longer than {} bytes", MAX_SSID_LEN));
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(format!("Password longer than {} bytes", MAX_PASSWORD_LEN));
        }
        Ok(())
    }
}

/// A network found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub ssid: String,
    /// Signal strength in dBm.
    pub rssi: i32,
    pub encrypted: bool,
}

impl Network {
    pub fn new(ssid: impl Into<String>, rssi: i32, encrypted: bool) -> Self {
        Self {
            ssid: ssid.into(),
            rssi,
            encrypted,
        }
    }

    pub fn quality(&self) -> SignalQuality {
        SignalQuality::from_rssi(self.rssi)
    }
}

/// Coarse signal label shown next to each network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl SignalQuality {
    pub fn from_rssi(rssi: i32) -> Self {
        match rssi {
            r if r >= -50 => SignalQuality::Excellent,
            r if r >= -60 => SignalQuality::Good,
            r if r >= -70 => SignalQuality::Fair,
            _ => SignalQuality::Poor,
        }
    }
}

/// Shape raw scan results: drop hidden networks, keep the strongest entry
/// per SSID, strongest first.
pub fn shape_scan_results(raw: Vec<Network>) -> Vec<Network> {
    let mut networks: Vec<Network> = Vec::with_capacity(raw.len());
    for network in raw.into_iter().filter(|n| !n.ssid.is_empty()) {
        match networks.iter_mut().find(|n| n.ssid == network.ssid) {
            Some(existing) if existing.rssi < network.rssi => *existing = network,
            Some(_) => {}
            None => networks.push(network),
        }
    }
    networks.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    networks
}

/// Current radio state as seen by readers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WifiState {
    pub is_connected: bool,
    pub connected_ssid: Option<String>,
    pub ip_address: Option<String>,
    /// Replaced wholesale when a scan completes.
    pub scan_results: Vec<Network>,
}

// ============================================================================
// Device configuration
// ============================================================================

/// Analytics region the device talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Us,
    Eu,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Us => "us",
            Region::Eu => "eu",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "us" => Some(Region::Us),
            "eu" => Some(Region::Eu),
            _ => None,
        }
    }
}

/// Device identity. The API key is write-only towards clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub team_id: Option<u32>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub region: Region,
}

impl DeviceConfig {
    /// Masked form of the API key that is safe to hand to clients.
    pub fn api_key_display(&self) -> String {
        mask_secret(&self.api_key)
    }

    /// Apply an update. An empty API key keeps the stored one.
    pub fn apply(&mut self, update: &DeviceConfigUpdate) {
        self.team_id = Some(update.team_id);
        if let Some(key) = update.api_key.as_deref().filter(|k| !k.is_empty()) {
            self.api_key = key.to_string();
        }
        self.region = update.region;
    }
}

/// Payload of SAVE_DEVICE_CONFIG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfigUpdate {
    pub team_id: u32,
    pub api_key: Option<String>,
    pub region: Region,
}

/// Mask a secret for display: `abcd…wxyz` for long values, stars otherwise.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        n if n <= 8 => "********".to_string(),
        n => {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[n - 4..].iter().collect();
            format!("{}…{}", head, tail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_round_trip_names() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(ActionKind::parse("REBOOT"), None);
    }

    #[test]
    fn test_payload_determines_kind() {
        let request = ActionRequest::new(ActionPayload::SaveWifi(WifiCredentials::new(
            "Home",
            "secret123",
        )));
        assert_eq!(request.kind(), ActionKind::SaveWifi);
        assert_eq!(
            ActionPayload::DeleteInsight {
                insight_id: "abc".to_string()
            }
            .kind(),
            ActionKind::DeleteInsight
        );
    }

    #[test]
    fn test_credentials_validation() {
        assert!(WifiCredentials::new("Home", "secret123").validate().is_ok());
        assert!(WifiCredentials::new("Open", "").validate().is_ok());
        assert!(WifiCredentials::new("", "pw").validate().is_err());
        assert!(WifiCredentials::new("x".repeat(33), "").validate().is_err());
        assert!(WifiCredentials::new("Home", "p".repeat(65)).validate().is_err());
    }

    #[test]
    fn test_signal_quality_thresholds() {
        assert_eq!(SignalQuality::from_rssi(-42), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_rssi(-50), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_rssi(-55), SignalQuality::Good);
        assert_eq!(SignalQuality::from_rssi(-70), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_rssi(-85), SignalQuality::Poor);
    }

    #[test]
    fn test_shape_scan_results() {
        let raw = vec![
            Network::new("Cafe", -80, false),
            Network::new("", -30, true),
            Network::new("Home", -65, true),
            Network::new("Cafe", -60, false),
        ];

        let shaped = shape_scan_results(raw);

        assert_eq!(
            shaped,
            vec![
                Network::new("Cafe", -60, false),
                Network::new("Home", -65, true),
            ]
        );
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "");
        assert_eq!(mask_secret("short"), "********");
        assert_eq!(mask_secret("phc_1234567890abcd"), "phc_…abcd");
    }

    #[test]
    fn test_device_config_apply_keeps_key_when_blank() {
        let mut config = DeviceConfig {
            team_id: Some(1),
            api_key: "phc_original_key".to_string(),
            region: Region::Us,
        };

        config.apply(&DeviceConfigUpdate {
            team_id: 42,
            api_key: Some(String::new()),
            region: Region::Eu,
        });

        assert_eq!(config.team_id, Some(42));
        assert_eq!(config.api_key, "phc_original_key");
        assert_eq!(config.region, Region::Eu);
    }
}
