//! Status aggregation.
//!
//! A snapshot is assembled from the dispatcher, the OTA engine, the radio
//! and the committed configuration. Each part is copied under its own single
//! lock acquisition, so every sub-object is internally consistent. Building a
//! snapshot never changes any state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cards::{CardConfig, CardType};
use crate::dispatcher::DispatcherSnapshot;
use crate::model::{ActionKind, ActionOutcome, Region, WifiState};
use crate::ota::OtaState;
use crate::portal::Portal;

/// Device identity as shown to clients. The API key is masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfigView {
    pub team_id: Option<u32>,
    pub api_key_display: String,
    pub region: Region,
}

/// Everything a polling client needs, read at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub dispatcher: DispatcherSnapshot,
    pub wifi: WifiState,
    pub device_config: DeviceConfigView,
    pub cards: Vec<CardConfig>,
    pub ota: OtaState,
    pub captured_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn collect(portal: &Portal) -> Self {
        let dispatcher = portal.dispatcher().snapshot();
        let ota = portal.ota().state();

        let link = portal.wifi().status();
        let wifi = WifiState {
            is_connected: link.connected,
            connected_ssid: link.ssid,
            ip_address: link.ip,
            scan_results: portal.scan_results(),
        };

        let (device, cards) = portal.committed();
        let device_config = DeviceConfigView {
            team_id: device.team_id,
            api_key_display: device.api_key_display(),
            region: device.region,
        };

        Self {
            dispatcher,
            wifi,
            device_config,
            cards: cards.cards().to_vec(),
            ota,
            captured_at: Utc::now(),
        }
    }

    pub fn action_in_progress(&self) -> Option<ActionKind> {
        self.dispatcher.action_in_progress
    }

    pub fn last_outcome(&self) -> Option<&ActionOutcome> {
        self.dispatcher.last_outcome.as_ref()
    }

    /// The insight cards, in display order.
    pub fn insights(&self) -> impl Iterator<Item = &CardConfig> {
        self.cards
            .iter()
            .filter(|c| c.card_type == CardType::Insight)
    }
}
