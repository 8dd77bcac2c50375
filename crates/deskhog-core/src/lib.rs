//! # deskhog-core
//!
//! Device-side core of the DeskHog configuration portal.
//!
//! This crate provides:
//! - Data model types (actions, outcomes, WiFi, device identity)
//! - The dashboard card list with dense ordering
//! - Collaborator traits for the radio, HTTP client, flash slot and config store
//! - The single-slot action dispatcher
//! - The OTA update state machine
//! - The `Portal` coordinator and the status snapshot it produces
//! - Simulated collaborators for tests and host builds
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Blocking collaborator calls are made from whatever execution context the
//! embedding runtime chooses.

pub mod cards;
pub mod config;
pub mod dispatcher;
pub mod model;
pub mod ota;
pub mod portal;
pub mod release;
pub mod services;
pub mod sim;
pub mod status;

mod sync;

pub use cards::{CardConfig, CardDefinition, CardError, CardInput, CardList, CardType, CARD_DEFINITIONS};
pub use config::{ConfigError, ConfigStorage, ConfigStorageExt, MemoryConfigStorage};
pub use dispatcher::{Admission, Dispatcher, DispatcherSnapshot, SubmitError, SubmitStatus};
pub use model::*;
pub use ota::{OtaEngine, OtaFailure, OtaSettings, OtaState, OtaStatus};
pub use portal::{ActionError, Completion, Portal, PortalSettings, Services};
pub use release::{ReleaseAsset, ReleaseInfo, Version};
pub use services::{
    DownloadStream, FirmwareFlash, FlashError, FlashSession, HttpClient, HttpError, LinkStatus,
    SystemControl, WifiError, WifiManager,
};
pub use status::StatusSnapshot;
