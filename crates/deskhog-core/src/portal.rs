//! The portal coordinator.
//!
//! `Portal` owns the dispatcher, the OTA engine and the committed
//! configuration, and holds the collaborators actions run against. The
//! request path calls [`Portal::submit`] and [`Portal::status`], which never
//! block on collaborators. A background worker calls [`Portal::execute`] for
//! each admission and reports back with [`Portal::complete`], or
//! [`Portal::expire`] when the action overruns its deadline.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cards::{CardError, CardList, CardType};
use crate::config::{ConfigError, ConfigStorage, ConfigStorageExt};
use crate::dispatcher::{Admission, Dispatcher, SubmitError};
use crate::model::{
    shape_scan_results, ActionKind, ActionPayload, ActionRequest, ActionStatus, DeviceConfig,
    Network,
};
use crate::ota::{OtaEngine, OtaFailure, OtaSettings};
use crate::services::{FirmwareFlash, HttpClient, SystemControl, WifiError, WifiManager};
use crate::status::StatusSnapshot;
use crate::sync;

/// Failure of an admitted action. Recorded as an ERROR outcome.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Could not save configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Wifi(#[from] WifiError),

    #[error(transparent)]
    Cards(#[from] CardError),

    #[error("{}", .0.message)]
    Ota(#[from] OtaFailure),

    #[error("{0}")]
    Rejected(String),

    /// The watchdog expired the action before it could commit.
    #[error("action expired")]
    Expired,

    /// The handler panicked.
    #[error("internal error")]
    Internal,
}

/// Result of a successful action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub message: String,
    /// The device should reboot into new firmware.
    pub restart_required: bool,
}

impl Completion {
    fn done(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            restart_required: false,
        }
    }
}

/// Behavioural settings for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSettings {
    pub firmware_version: String,
    pub outcome_hold: Duration,
    pub connect_timeout: Duration,
    pub ota: OtaSettings,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            firmware_version: concat!("v", env!("CARGO_PKG_VERSION")).to_string(),
            outcome_hold: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(15),
            ota: OtaSettings::default(),
        }
    }
}

/// The collaborators a portal runs against.
#[derive(Clone)]
pub struct Services {
    pub wifi: Arc<dyn WifiManager>,
    pub http: Arc<dyn HttpClient>,
    pub flash: Arc<dyn FirmwareFlash>,
    pub storage: Arc<dyn ConfigStorage>,
    pub system: Arc<dyn SystemControl>,
}

#[derive(Debug, Clone, Default)]
struct Committed {
    device: DeviceConfig,
    cards: CardList,
}

pub struct Portal {
    settings: PortalSettings,
    services: Services,
    dispatcher: Dispatcher,
    ota: OtaEngine,
    committed: RwLock<Committed>,
    scan_results: RwLock<Vec<Network>>,
    /// Ticket of the OTA action currently driving the engine, and its cycle.
    ota_phase: Mutex<Option<(u64, u64)>>,
}

impl Portal {
    /// Build a portal, loading committed configuration from storage.
    pub fn new(settings: PortalSettings, services: Services) -> Result<Self, ConfigError> {
        let device = services.storage.load_device()?;
        let cards = services.storage.load_cards()?;
        info!(
            version = %settings.firmware_version,
            cards = cards.len(),
            "Portal initialized"
        );

        Ok(Self {
            dispatcher: Dispatcher::new(settings.outcome_hold),
            ota: OtaEngine::new(&settings.firmware_version, settings.ota.clone()),
            committed: RwLock::new(Committed { device, cards }),
            scan_results: RwLock::new(Vec::new()),
            ota_phase: Mutex::new(None),
            settings,
            services,
        })
    }

    pub fn settings(&self) -> &PortalSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn ota(&self) -> &OtaEngine {
        &self.ota
    }

    pub fn wifi(&self) -> &dyn WifiManager {
        self.services.wifi.as_ref()
    }

    /// Last shaped scan results.
    pub fn scan_results(&self) -> Vec<Network> {
        sync::read(&self.scan_results).clone()
    }

    /// Committed device config and card list, read together.
    pub fn committed(&self) -> (DeviceConfig, CardList) {
        let committed = sync::read(&self.committed);
        (committed.device.clone(), committed.cards.clone())
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::collect(self)
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Validate `payload` and try to take the action slot.
    pub fn submit(&self, payload: ActionPayload) -> Result<Admission, SubmitError> {
        validate(&payload).map_err(SubmitError::Invalid)?;

        let request = ActionRequest::new(payload);
        let ota = &self.ota;
        match request.kind() {
            ActionKind::StartOtaUpdate => self.dispatcher.submit(request, || ota.can_install()),
            ActionKind::CheckOtaUpdate => self.dispatcher.submit(request, || ota.can_check()),
            _ => self.dispatcher.submit(request, || Ok(())),
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run an admitted action against the collaborators. Blocking.
    pub fn execute(&self, admission: &Admission) -> Result<Completion, ActionError> {
        let ticket = admission.ticket;
        let kind = admission.request.kind();
        debug!(ticket, %kind, "Executing action");

        match &admission.request.payload {
            ActionPayload::SaveWifi(credentials) => {
                self.commit(ticket, || {
                    self.services.storage.save_wifi(credentials)?;
                    Ok(())
                })?;
                self.services.wifi.connect(
                    &credentials.ssid,
                    &credentials.password,
                    self.settings.connect_timeout,
                )?;
                if !self.dispatcher.is_current(ticket) {
                    warn!(ticket, ssid = %credentials.ssid, "Connected after expiry, dropping link");
                    self.services.wifi.disconnect();
                    return Err(ActionError::Expired);
                }
                Ok(Completion::done(format!("Connected to {}", credentials.ssid)))
            }
            ActionPayload::SaveDeviceConfig(update) => {
                let mut device = sync::read(&self.committed).device.clone();
                device.apply(update);
                self.commit(ticket, || {
                    self.services.storage.save_device(&device)?;
                    sync::write(&self.committed).device = device;
                    Ok(())
                })?;
                Ok(Completion::done("Device configuration saved"))
            }
            ActionPayload::SaveInsight { insight_id, title } => {
                let mut cards = sync::read(&self.committed).cards.clone();
                let message = if cards.rename(CardType::Insight, insight_id, title) {
                    "Insight updated"
                } else {
                    cards.add(CardType::Insight, insight_id, title)?;
                    "Insight saved"
                };
                self.commit_cards(ticket, cards)?;
                Ok(Completion::done(message))
            }
            ActionPayload::DeleteInsight { insight_id } => {
                let mut cards = sync::read(&self.committed).cards.clone();
                cards.remove(CardType::Insight, insight_id)?;
                self.commit_cards(ticket, cards)?;
                Ok(Completion::done("Insight deleted"))
            }
            ActionPayload::StartWifiScan => {
                let networks = shape_scan_results(self.services.wifi.scan()?);
                let message = format!("Found {} networks", networks.len());
                self.commit(ticket, || {
                    *sync::write(&self.scan_results) = networks;
                    Ok(())
                })?;
                Ok(Completion::done(message))
            }
            ActionPayload::CheckOtaUpdate => {
                let cycle = self.ota.begin_check().map_err(ActionError::Rejected)?;
                self.track_ota(ticket, cycle)?;
                let connected = self.services.wifi.status().connected;
                let message = self
                    .ota
                    .run_check(cycle, self.services.http.as_ref(), connected)?;
                Ok(Completion::done(message))
            }
            ActionPayload::StartOtaUpdate => {
                let install = self.ota.begin_install(self.services.flash.capacity())?;
                self.track_ota(ticket, install.cycle)?;
                let message = self.ota.run_install(
                    &install,
                    self.services.http.as_ref(),
                    self.services.flash.as_ref(),
                )?;
                Ok(Completion {
                    message,
                    restart_required: true,
                })
            }
            ActionPayload::SaveCards(inputs) => {
                let cards = CardList::from_inputs(inputs)?;
                let message = format!("Saved {} cards", cards.len());
                self.commit_cards(ticket, cards)?;
                Ok(Completion::done(message))
            }
        }
    }

    /// Record the result of [`Portal::execute`]. Returns `false` when the
    /// action had already been expired.
    pub fn complete(&self, ticket: u64, result: &Result<Completion, ActionError>) -> bool {
        let phase = *sync::lock(&self.ota_phase);
        if let Some((_, cycle)) = phase.filter(|(t, _)| *t == ticket) {
            if result.is_err() && self.ota.status().is_active() {
                self.ota.abandon(cycle);
            }
        }
        self.clear_ota(ticket);
        match result {
            Ok(completion) => {
                self.dispatcher
                    .complete(ticket, ActionStatus::Success, &completion.message)
            }
            Err(error) => {
                self.dispatcher
                    .complete(ticket, ActionStatus::Error, error.to_string())
            }
        }
    }

    /// Give up on an action that overran its deadline.
    ///
    /// Returns `false` while the OTA engine is writing flash; the caller
    /// keeps waiting and tries again later.
    pub fn expire(&self, ticket: u64) -> bool {
        let phase = *sync::lock(&self.ota_phase);
        if let Some((_, cycle)) = phase.filter(|(t, _)| *t == ticket) {
            if !self.ota.abandon(cycle) {
                return false;
            }
        }
        self.clear_ota(ticket);
        self.dispatcher.expire(ticket);
        true
    }

    /// Reboot into the committed firmware.
    pub fn restart(&self) {
        info!("Restarting device");
        self.services.system.restart();
    }

    /// Join the stored network, if any. Used at boot, outside the action slot.
    pub fn connect_saved(&self) -> Result<bool, ActionError> {
        let Some(credentials) = self.services.storage.load_wifi()? else {
            return Ok(false);
        };
        info!(ssid = %credentials.ssid, "Connecting to saved network");
        self.services.wifi.connect(
            &credentials.ssid,
            &credentials.password,
            self.settings.connect_timeout,
        )?;
        Ok(true)
    }

    /// Handler of an expired `ticket` has returned. Reopens admission.
    pub fn release(&self, ticket: u64) -> bool {
        self.dispatcher.release(ticket)
    }

    /// Run `f` only if `ticket` is still in flight.
    fn commit<F>(&self, ticket: u64, f: F) -> Result<(), ActionError>
    where
        F: FnOnce() -> Result<(), ActionError>,
    {
        self.dispatcher
            .with_current(ticket, f)
            .unwrap_or(Err(ActionError::Expired))
    }

    fn commit_cards(&self, ticket: u64, cards: CardList) -> Result<(), ActionError> {
        self.commit(ticket, || {
            self.services.storage.save_cards(&cards)?;
            sync::write(&self.committed).cards = cards;
            Ok(())
        })
    }

    /// Tie an OTA `cycle` to `ticket`. If the ticket expired before the
    /// phase was tracked, the cycle is abandoned here instead.
    fn track_ota(&self, ticket: u64, cycle: u64) -> Result<(), ActionError> {
        *sync::lock(&self.ota_phase) = Some((ticket, cycle));
        if self.dispatcher.is_current(ticket) {
            return Ok(());
        }
        self.ota.abandon(cycle);
        self.clear_ota(ticket);
        Err(ActionError::Expired)
    }

    fn clear_ota(&self, ticket: u64) {
        let mut phase = sync::lock(&self.ota_phase);
        if matches!(*phase, Some((t, _)) if t == ticket) {
            *phase = None;
        }
    }
}

/// Checks that need no state.
fn validate(payload: &ActionPayload) -> Result<(), String> {
    match payload {
        ActionPayload::SaveWifi(credentials) => credentials.validate(),
        ActionPayload::SaveInsight { insight_id, .. }
        | ActionPayload::DeleteInsight { insight_id } => {
            if insight_id.trim().is_empty() {
                Err("Insight ID cannot be empty".to_string())
            } else {
                Ok(())
            }
        }
        ActionPayload::SaveCards(inputs) => CardList::from_inputs(inputs)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        _ => Ok(()),
    }
}
