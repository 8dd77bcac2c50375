//! Runtime configuration.
//!
//! Loaded from a JSON file whose path is given by `DESKHOG_CONFIG`. Every
//! field has a default, so a missing file or a partial file is fine; a file
//! that exists but does not parse, or whose timeouts do not nest inside the
//! action deadlines, is an error.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use deskhog_core::ota::OtaSettings;
use deskhog_core::release::DEFAULT_ASSET_NAME;
use deskhog_core::sim::SimulatedNetwork;
use deskhog_core::{ActionKind, PortalSettings};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "DESKHOG_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the portal server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Address of the device on its own access point. Captive-portal
    /// probes are redirected here.
    pub ap_address: String,
    pub firmware_version: String,
    pub release_url: String,
    pub asset_name: String,

    pub check_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Deadline for a whole action.
    pub action_timeout_secs: u64,
    /// Deadline for START_OTA_UPDATE.
    pub install_timeout_secs: u64,
    pub outcome_hold_ms: u64,
    /// Pause between a committed update and the restart.
    pub reboot_delay_ms: u64,

    /// Networks the simulated radio can see.
    pub simulated_networks: Vec<SimulatedNetwork>,
    /// File standing in for the inactive firmware slot.
    pub flash_path: PathBuf,
    pub flash_capacity: u64,
    /// File backing the persistent config store.
    pub config_store_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ap_address: "192.168.4.1".to_string(),
            firmware_version: concat!("v", env!("CARGO_PKG_VERSION")).to_string(),
            release_url: OtaSettings::default().release_url,
            asset_name: DEFAULT_ASSET_NAME.to_string(),
            check_timeout_secs: 20,
            download_timeout_secs: 180,
            connect_timeout_secs: 15,
            action_timeout_secs: 60,
            install_timeout_secs: 600,
            outcome_hold_ms: 1000,
            reboot_delay_ms: 1000,
            simulated_networks: vec![
                SimulatedNetwork::new("Home", -48, Some("secret123")),
                SimulatedNetwork::new("PostHog Guest", -63, None),
            ],
            flash_path: PathBuf::from("deskhog-ota-slot.bin"),
            flash_capacity: 0x1E_0000,
            config_store_path: PathBuf::from("deskhog-config.json"),
        }
    }
}

impl ServerConfig {
    /// Load from a file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigLoadError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigLoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Every collaborator timeout must expire before the watchdog of the
    /// action that uses it.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let action = ("action_timeout_secs", self.action_timeout_secs);
        let install = ("install_timeout_secs", self.install_timeout_secs);
        let nested = [
            (("connect_timeout_secs", self.connect_timeout_secs), action),
            (("check_timeout_secs", self.check_timeout_secs), action),
            (("download_timeout_secs", self.download_timeout_secs), install),
        ];
        for ((inner, inner_secs), (outer, outer_secs)) in nested {
            if inner_secs >= outer_secs {
                return Err(ConfigLoadError::Invalid(format!(
                    "{} ({}) must be less than {} ({})",
                    inner, inner_secs, outer, outer_secs
                )));
            }
        }
        Ok(())
    }

    /// Load from the file named by `DESKHOG_CONFIG`, or use defaults.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn portal_settings(&self) -> PortalSettings {
        PortalSettings {
            firmware_version: self.firmware_version.clone(),
            outcome_hold: Duration::from_millis(self.outcome_hold_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ota: OtaSettings {
                release_url: self.release_url.clone(),
                asset_name: self.asset_name.clone(),
                check_timeout: Duration::from_secs(self.check_timeout_secs),
                download_timeout: Duration::from_secs(self.download_timeout_secs),
            },
        }
    }

    /// Whole-action deadline for `kind`.
    pub fn watchdog_for(&self, kind: ActionKind) -> Duration {
        match kind {
            ActionKind::StartOtaUpdate => Duration::from_secs(self.install_timeout_secs),
            _ => Duration::from_secs(self.action_timeout_secs),
        }
    }

    pub fn reboot_delay(&self) -> Duration {
        Duration::from_millis(self.reboot_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"ap_address": "10.0.0.1", "install_timeout_secs": 5}"#).unwrap();

        assert_eq!(config.ap_address, "10.0.0.1");
        assert_eq!(config.watchdog_for(ActionKind::StartOtaUpdate), Duration::from_secs(5));
        assert_eq!(config.watchdog_for(ActionKind::SaveWifi), Duration::from_secs(60));
        assert_eq!(config.reboot_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = ServerConfig::load(Path::new("/nonexistent/deskhog.json")).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_connect_timeout_must_fit_action_deadline() {
        let config = ServerConfig {
            action_timeout_secs: 1,
            connect_timeout_secs: 30,
            ..ServerConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(_)));
        assert_eq!(
            err.to_string(),
            "Invalid configuration: connect_timeout_secs (30) must be less than action_timeout_secs (1)"
        );

        let equal = ServerConfig {
            connect_timeout_secs: 60,
            ..ServerConfig::default()
        };
        assert!(equal.validate().is_err());
    }

    #[test]
    fn test_load_rejects_invalid_timeouts() {
        let path = std::env::temp_dir().join(format!("deskhog-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"download_timeout_secs": 900}"#).unwrap();

        let result = ServerConfig::load(&path);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigLoadError::Invalid(_))));
    }

    #[test]
    fn test_portal_settings_mapping() {
        let config = ServerConfig {
            check_timeout_secs: 3,
            outcome_hold_ms: 250,
            ..ServerConfig::default()
        };
        let settings = config.portal_settings();

        assert_eq!(settings.ota.check_timeout, Duration::from_secs(3));
        assert_eq!(settings.outcome_hold, Duration::from_millis(250));
        assert_eq!(settings.ota.asset_name, "firmware.bin");
    }
}
