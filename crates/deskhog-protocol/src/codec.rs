//! Payload codec.
//!
//! Clients send an action name plus a loosely-typed JSON payload (or a form
//! on the legacy endpoints). This module turns them into typed
//! [`ActionPayload`]s, reporting which field was wrong when it can't.

use deskhog_core::{
    ActionKind, ActionPayload, CardInput, DeviceConfigUpdate, Region, WifiCredentials,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::messages::{DeleteInsightRequest, DeviceConfigForm, InsightForm, SubmitActionRequest, WifiForm};

/// Errors that can occur while decoding client input.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The action name is not one we know.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// The payload does not have the shape the action needs.
    #[error("Invalid payload for {action}: {source}")]
    InvalidPayload {
        action: ActionKind,
        #[source]
        source: serde_json::Error,
    },

    /// A field is present but its value is unusable.
    #[error("Invalid {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

/// Decode a `POST /api/actions` body.
pub fn decode_submit(request: &SubmitActionRequest) -> Result<ActionPayload, CodecError> {
    let kind = ActionKind::parse(request.action.trim())
        .ok_or_else(|| CodecError::UnknownAction(request.action.clone()))?;
    decode_payload(kind, request.payload.clone())
}

#[derive(Deserialize)]
struct DevicePayload {
    #[serde(alias = "teamId")]
    team_id: Value,
    #[serde(alias = "apiKey", default)]
    api_key: Option<String>,
    #[serde(default)]
    region: Option<String>,
}

#[derive(Deserialize)]
struct InsightPayload {
    #[serde(alias = "id", alias = "insightId")]
    insight_id: String,
    #[serde(alias = "name", default)]
    title: String,
}

#[derive(Deserialize)]
struct CardsPayload {
    cards: Vec<CardInput>,
}

/// Decode the payload of an action of `kind`.
pub fn decode_payload(kind: ActionKind, payload: Value) -> Result<ActionPayload, CodecError> {
    let payload = match kind {
        ActionKind::SaveWifi => ActionPayload::SaveWifi(parse::<WifiCredentials>(kind, payload)?),
        ActionKind::SaveDeviceConfig => {
            let p: DevicePayload = parse(kind, payload)?;
            ActionPayload::SaveDeviceConfig(device_update(&p.team_id, p.api_key, p.region)?)
        }
        ActionKind::SaveInsight => {
            let p: InsightPayload = parse(kind, payload)?;
            ActionPayload::SaveInsight {
                insight_id: p.insight_id.trim().to_string(),
                title: p.title.trim().to_string(),
            }
        }
        ActionKind::DeleteInsight => {
            let p: InsightPayload = parse(kind, payload)?;
            ActionPayload::DeleteInsight {
                insight_id: p.insight_id.trim().to_string(),
            }
        }
        ActionKind::SaveCards => {
            let cards = match payload {
                Value::Array(_) => parse::<Vec<CardInput>>(kind, payload)?,
                other => parse::<CardsPayload>(kind, other)?.cards,
            };
            ActionPayload::SaveCards(cards)
        }
        ActionKind::StartWifiScan => ActionPayload::StartWifiScan,
        ActionKind::CheckOtaUpdate => ActionPayload::CheckOtaUpdate,
        ActionKind::StartOtaUpdate => ActionPayload::StartOtaUpdate,
    };
    Ok(payload)
}

fn parse<T: DeserializeOwned>(action: ActionKind, payload: Value) -> Result<T, CodecError> {
    serde_json::from_value(payload).map_err(|source| CodecError::InvalidPayload { action, source })
}

fn device_update(
    team_id: &Value,
    api_key: Option<String>,
    region: Option<String>,
) -> Result<DeviceConfigUpdate, CodecError> {
    let team_id = match team_id {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
    .ok_or_else(|| CodecError::InvalidField {
        field: "team_id",
        message: "Team ID must be a positive number".to_string(),
    })?;

    let region = match region.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => Region::parse(raw).ok_or_else(|| CodecError::InvalidField {
            field: "region",
            message: format!("'{}' is not one of us, eu", raw),
        })?,
        None => Region::default(),
    };

    Ok(DeviceConfigUpdate {
        team_id,
        api_key: api_key.map(|k| k.trim().to_string()),
        region,
    })
}

// ============================================================================
// Legacy forms
// ============================================================================

impl From<WifiForm> for ActionPayload {
    fn from(form: WifiForm) -> Self {
        ActionPayload::SaveWifi(WifiCredentials::new(form.ssid.trim(), form.password))
    }
}

impl TryFrom<DeviceConfigForm> for ActionPayload {
    type Error = CodecError;

    fn try_from(form: DeviceConfigForm) -> Result<Self, Self::Error> {
        let update = device_update(&Value::String(form.team_id), form.api_key, form.region)?;
        Ok(ActionPayload::SaveDeviceConfig(update))
    }
}

impl From<InsightForm> for ActionPayload {
    fn from(form: InsightForm) -> Self {
        ActionPayload::SaveInsight {
            insight_id: form.insight_id.trim().to_string(),
            title: form.title.trim().to_string(),
        }
    }
}

impl From<DeleteInsightRequest> for ActionPayload {
    fn from(request: DeleteInsightRequest) -> Self {
        ActionPayload::DeleteInsight {
            insight_id: request.id.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submit(action: &str, payload: Value) -> Result<ActionPayload, CodecError> {
        decode_submit(&SubmitActionRequest {
            action: action.to_string(),
            payload,
        })
    }

    #[test]
    fn test_decode_save_wifi() {
        let payload = submit("SAVE_WIFI", json!({"ssid": "Home", "password": "secret123"})).unwrap();
        assert_eq!(
            payload,
            ActionPayload::SaveWifi(WifiCredentials::new("Home", "secret123"))
        );
    }

    #[test]
    fn test_decode_unknown_action() {
        let err = submit("FORMAT_DISK", Value::Null).unwrap_err();
        assert!(matches!(err, CodecError::UnknownAction(ref a) if a == "FORMAT_DISK"));
    }

    #[test]
    fn test_decode_missing_fields() {
        let err = submit("SAVE_WIFI", json!({"password": "x"})).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidPayload {
                action: ActionKind::SaveWifi,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_device_config_variants() {
        let payload = submit(
            "SAVE_DEVICE_CONFIG",
            json!({"teamId": "42", "apiKey": " phc_key ", "region": "EU"}),
        )
        .unwrap();
        assert_eq!(
            payload,
            ActionPayload::SaveDeviceConfig(DeviceConfigUpdate {
                team_id: 42,
                api_key: Some("phc_key".to_string()),
                region: Region::Eu,
            })
        );

        let payload = submit("SAVE_DEVICE_CONFIG", json!({"team_id": 7})).unwrap();
        assert!(matches!(
            payload,
            ActionPayload::SaveDeviceConfig(DeviceConfigUpdate {
                team_id: 7,
                api_key: None,
                region: Region::Us,
            })
        ));

        let err = submit("SAVE_DEVICE_CONFIG", json!({"team_id": "abc"})).unwrap_err();
        assert!(matches!(err, CodecError::InvalidField { field: "team_id", .. }));

        let err = submit("SAVE_DEVICE_CONFIG", json!({"team_id": 1, "region": "apac"})).unwrap_err();
        assert!(matches!(err, CodecError::InvalidField { field: "region", .. }));
    }

    #[test]
    fn test_decode_cards_array_or_object() {
        let cards = json!([{"type": "PONG", "order": 0}, {"type": "INSIGHT", "config": "x", "order": 1}]);

        let from_array = submit("SAVE_CARDS", cards.clone()).unwrap();
        let from_object = submit("SAVE_CARDS", json!({ "cards": cards })).unwrap();

        assert_eq!(from_array, from_object);
        match from_array {
            ActionPayload::SaveCards(inputs) => assert_eq!(inputs.len(), 2),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_decode_insight_aliases() {
        let payload = submit("DELETE_INSIGHT", json!({"id": " abc "})).unwrap();
        assert_eq!(
            payload,
            ActionPayload::DeleteInsight {
                insight_id: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_payload_ignored_for_parameterless_actions() {
        let payload = submit("CHECK_OTA_UPDATE", json!({"anything": true})).unwrap();
        assert_eq!(payload, ActionPayload::CheckOtaUpdate);
    }

    #[test]
    fn test_device_form_conversion() {
        let form = DeviceConfigForm {
            team_id: "12".to_string(),
            api_key: Some(String::new()),
            region: None,
        };
        let payload = ActionPayload::try_from(form).unwrap();
        assert_eq!(
            payload,
            ActionPayload::SaveDeviceConfig(DeviceConfigUpdate {
                team_id: 12,
                api_key: Some(String::new()),
                region: Region::Us,
            })
        );
    }
}
