//! HTTP API message types.
//!
//! Two families of messages:
//! - The action API (`/api/actions`, `/api/status`, `/api/cards/definitions`)
//!   with snake_case fields.
//! - The legacy endpoints the shipped portal page calls, which keep its
//!   camelCase field names and form encodings.

use chrono::{DateTime, Utc};
use deskhog_core::status::DeviceConfigView;
use deskhog_core::{
    ActionKind, ActionStatus, CardConfig, CardDefinition, CardType, Network, OtaState, OtaStatus,
    SignalQuality, StatusSnapshot, SubmitError, SubmitStatus,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Action API
// ============================================================================

/// Body of `POST /api/actions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitActionRequest {
    /// Action kind, e.g. `"SAVE_WIFI"`.
    #[serde(alias = "kind")]
    pub action: String,

    /// Kind-specific fields.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Reply to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: SubmitStatus,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<Uuid>,
}

impl SubmitResponse {
    pub fn queued(action_id: Uuid, kind: ActionKind) -> Self {
        Self {
            status: SubmitStatus::Queued,
            message: format!("{} queued", kind),
            action_id: Some(action_id),
        }
    }

    pub fn rejected(error: &SubmitError) -> Self {
        Self {
            status: error.status(),
            message: error.to_string(),
            action_id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SubmitStatus::Error,
            message: message.into(),
            action_id: None,
        }
    }
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub portal: PortalStatusView,
    pub wifi: WifiStatusView,
    pub device_config: DeviceConfigView,
    pub insights: Vec<InsightView>,
    pub cards: Vec<CardConfig>,
    pub ota: OtaStatusView,
}

impl From<&StatusSnapshot> for StatusResponse {
    fn from(snapshot: &StatusSnapshot) -> Self {
        let last = snapshot.last_outcome();
        Self {
            portal: PortalStatusView {
                action_in_progress: snapshot.action_in_progress(),
                last_action_completed: last.map(|o| o.kind),
                last_action_status: last.map(|o| o.status),
                last_action_message: last.map(|o| o.message.clone()),
                last_action_id: last.map(|o| o.id),
                last_action_completed_at: last.map(|o| o.completed_at),
            },
            wifi: WifiStatusView {
                is_connected: snapshot.wifi.is_connected,
                connected_ssid: snapshot.wifi.connected_ssid.clone(),
                ip_address: snapshot.wifi.ip_address.clone(),
                scan_results: snapshot.wifi.scan_results.iter().map(NetworkView::from).collect(),
            },
            device_config: snapshot.device_config.clone(),
            insights: snapshot.insights().map(InsightView::from).collect(),
            cards: snapshot.cards.clone(),
            ota: OtaStatusView::from(&snapshot.ota),
        }
    }
}

/// Dispatcher part of the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortalStatusView {
    /// `"NONE"` when idle.
    #[serde(with = "kind_or_none")]
    pub action_in_progress: Option<ActionKind>,
    pub last_action_completed: Option<ActionKind>,
    pub last_action_status: Option<ActionStatus>,
    pub last_action_message: Option<String>,
    pub last_action_id: Option<Uuid>,
    pub last_action_completed_at: Option<DateTime<Utc>>,
}

mod kind_or_none {
    use deskhog_core::ActionKind;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    const NONE: &str = "NONE";

    pub fn serialize<S: Serializer>(kind: &Option<ActionKind>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(kind.map(|k| k.as_str()).unwrap_or(NONE))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ActionKind>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw == NONE {
            return Ok(None);
        }
        ActionKind::parse(&raw)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("unknown action kind {}", raw)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiStatusView {
    pub is_connected: bool,
    pub connected_ssid: Option<String>,
    pub ip_address: Option<String>,
    pub scan_results: Vec<NetworkView>,
}

/// A scanned network with its signal label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkView {
    pub ssid: String,
    pub rssi: i32,
    pub encrypted: bool,
    pub quality: SignalQuality,
}

impl From<&Network> for NetworkView {
    fn from(network: &Network) -> Self {
        Self {
            ssid: network.ssid.clone(),
            rssi: network.rssi,
            encrypted: network.encrypted,
            quality: network.quality(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightView {
    pub id: String,
    pub title: String,
}

impl From<&CardConfig> for InsightView {
    fn from(card: &CardConfig) -> Self {
        Self {
            id: card.config.clone(),
            title: card.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaStatusView {
    pub status_code: OtaStatus,
    pub current_firmware_version: String,
    pub available_version: Option<String>,
    pub update_available: bool,
    pub release_notes: Option<String>,
    pub progress: u8,
    pub error_message: Option<String>,
    pub status_message: String,
}

impl From<&OtaState> for OtaStatusView {
    fn from(state: &OtaState) -> Self {
        Self {
            status_code: state.status,
            current_firmware_version: state.current_version.clone(),
            available_version: state.available_version.clone(),
            update_available: state.update_available,
            release_notes: state.release_notes.clone(),
            progress: state.progress,
            error_message: state.error_message.clone(),
            status_message: state.status_message.clone(),
        }
    }
}

/// Entry of `GET /api/cards/definitions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDefinitionEntry {
    pub id: CardType,
    pub name: String,
    pub description: String,
    pub needs_config_input: bool,
    pub config_input_label: String,
    pub allow_multiple: bool,
}

impl From<&CardDefinition> for CardDefinitionEntry {
    fn from(def: &CardDefinition) -> Self {
        Self {
            id: def.card_type,
            name: def.name.to_string(),
            description: def.description.to_string(),
            needs_config_input: def.needs_config_input,
            config_input_label: def.config_input_label.to_string(),
            allow_multiple: def.allow_multiple,
        }
    }
}

// ============================================================================
// Legacy endpoints
// ============================================================================

/// Reply of the legacy mutating endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyResponse {
    pub success: bool,
    pub status: SubmitStatus,
    pub message: String,
}

impl From<SubmitResponse> for LegacyResponse {
    fn from(response: SubmitResponse) -> Self {
        Self {
            success: response.status == SubmitStatus::Queued,
            status: response.status,
            message: response.message,
        }
    }
}

/// `POST /save-wifi` form.
#[derive(Debug, Clone, Deserialize)]
pub struct WifiForm {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

/// `POST /save-device-config` form. Numbers arrive as text.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfigForm {
    #[serde(rename = "teamId", alias = "team_id")]
    pub team_id: String,
    #[serde(rename = "apiKey", alias = "api_key", default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// `POST /save-insight` form.
#[derive(Debug, Clone, Deserialize)]
pub struct InsightForm {
    #[serde(rename = "insightId", alias = "id")]
    pub insight_id: String,
    #[serde(rename = "insightTitle", alias = "title", default)]
    pub title: String,
}

/// `POST /delete-insight` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteInsightRequest {
    pub id: String,
}

/// `GET /get-device-config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDeviceConfig {
    pub team_id: Option<u32>,
    /// Masked display form.
    pub api_key: String,
    pub region: String,
}

impl From<&DeviceConfigView> for LegacyDeviceConfig {
    fn from(view: &DeviceConfigView) -> Self {
        Self {
            team_id: view.team_id,
            api_key: view.api_key_display.clone(),
            region: view.region.as_str().to_string(),
        }
    }
}

/// `GET /get-insights`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyInsights {
    pub insights: Vec<InsightView>,
}

/// `GET /scan-networks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyNetworks {
    pub networks: Vec<NetworkView>,
    /// Whether a fresh scan was started by this request.
    pub scanning: bool,
}

/// `GET /check-update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCheckUpdate {
    pub current_version: String,
    pub available_version: String,
    pub update_available: bool,
    pub release_notes: String,
    pub error: String,
}

impl From<&OtaState> for LegacyCheckUpdate {
    fn from(state: &OtaState) -> Self {
        let error = if state.status.is_error() {
            state.error_message.clone().unwrap_or_default()
        } else {
            String::new()
        };
        Self {
            current_version: state.current_version.clone(),
            available_version: state.available_version.clone().unwrap_or_default(),
            update_available: state.update_available,
            release_notes: state.release_notes.clone().unwrap_or_default(),
            error,
        }
    }
}

/// `GET /update-status`. Status is the numeric code the page compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyUpdateStatus {
    pub status: u8,
    pub message: String,
    pub progress: u8,
}

impl From<&OtaState> for LegacyUpdateStatus {
    fn from(state: &OtaState) -> Self {
        Self {
            status: legacy_status_code(state.status),
            message: state.status_message.clone(),
            progress: state.progress,
        }
    }
}

/// Numeric status code used by the legacy page. Errors sort after SUCCESS.
pub fn legacy_status_code(status: OtaStatus) -> u8 {
    match status {
        OtaStatus::Idle => 0,
        OtaStatus::CheckingVersion => 1,
        OtaStatus::Downloading => 2,
        OtaStatus::Writing => 3,
        OtaStatus::Success => 4,
        OtaStatus::ErrorWifi => 5,
        OtaStatus::ErrorHttpCheck => 6,
        OtaStatus::ErrorHttpDownload => 7,
        OtaStatus::ErrorJson => 8,
        OtaStatus::ErrorUpdateBegin => 9,
        OtaStatus::ErrorUpdateWrite => 10,
        OtaStatus::ErrorUpdateEnd => 11,
        OtaStatus::ErrorNoAsset => 12,
        OtaStatus::ErrorNoSpace => 13,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portal_view_none() {
        let view = PortalStatusView {
            action_in_progress: None,
            last_action_completed: None,
            last_action_status: None,
            last_action_message: None,
            last_action_id: None,
            last_action_completed_at: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["action_in_progress"], "NONE");

        let back: PortalStatusView = serde_json::from_value(json).unwrap();
        assert_eq!(back, view);
    }

    #[test]
    fn test_portal_view_in_progress() {
        let view = PortalStatusView {
            action_in_progress: Some(ActionKind::SaveWifi),
            last_action_completed: Some(ActionKind::StartWifiScan),
            last_action_status: Some(ActionStatus::Success),
            last_action_message: Some("Found 3 networks".to_string()),
            last_action_id: None,
            last_action_completed_at: None,
        };
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["action_in_progress"], "SAVE_WIFI");
        assert_eq!(json["last_action_completed"], "START_WIFI_SCAN");
        assert_eq!(json["last_action_status"], "SUCCESS");
    }

    #[test]
    fn test_legacy_codes_order_errors_last() {
        assert_eq!(legacy_status_code(OtaStatus::Success), 4);
        assert_eq!(legacy_status_code(OtaStatus::ErrorWifi), 5);
        assert_eq!(legacy_status_code(OtaStatus::ErrorNoSpace), 13);
    }

    #[test]
    fn test_legacy_response_success_flag() {
        let queued = SubmitResponse::queued(Uuid::new_v4(), ActionKind::SaveWifi);
        let legacy = LegacyResponse::from(queued);
        assert!(legacy.success);
        assert_eq!(legacy.message, "SAVE_WIFI queued");

        let busy = SubmitResponse::rejected(&SubmitError::Busy("busy".to_string()));
        assert!(!LegacyResponse::from(busy).success);
    }

    #[test]
    fn test_card_definition_entry_json() {
        let entry = CardDefinitionEntry::from(CardType::Insight.definition());
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["id"], "INSIGHT");
        assert_eq!(json["config_input_label"], "Insight ID");
        assert_eq!(json["allow_multiple"], true);
    }

    #[test]
    fn test_insight_form_accepts_page_names() {
        let form: InsightForm =
            serde_json::from_str(r#"{"insightId": "abc", "insightTitle": "Signups"}"#).unwrap();
        assert_eq!(form.insight_id, "abc");
        assert_eq!(form.title, "Signups");
    }
}
