//! Persistent configuration storage abstraction.
//!
//! The device keeps three records durably:
//! - WiFi credentials (`wifi`)
//! - Device identity (`device`)
//! - The dashboard card list (`cards`)
//!
//! Storage itself is a plain string key-value store so it can be backed by a
//! file on Linux or NVS flash on the device. Typed access lives in
//! [`ConfigStorageExt`], which serializes records as JSON.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::cards::{CardConfig, CardList};
use crate::model::{DeviceConfig, WifiCredentials};
use crate::sync;

/// Key holding the station credentials.
pub const WIFI_KEY: &str = "wifi";
/// Key holding the device identity.
pub const DEVICE_KEY: &str = "device";
/// Key holding the card list.
pub const CARDS_KEY: &str = "cards";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration.
    #[error("Read error: {0}")]
    ReadError(String),

    /// Failed to write configuration.
    #[error("Write error: {0}")]
    WriteError(String),

    /// Stored data could not be decoded.
    #[error("Invalid data under '{key}': {message}")]
    InvalidData { key: String, message: String },

    /// Storage is not available.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Durable string key-value storage.
///
/// All methods are synchronous to support embedded platforms.
pub trait ConfigStorage: Send + Sync {
    /// Read a value. `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError>;

    /// Write a value durably.
    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;

    /// Delete a key. Deleting an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), ConfigError>;
}

/// Typed JSON access on top of any [`ConfigStorage`].
pub trait ConfigStorageExt: ConfigStorage {
    /// Load and decode a value by key.
    fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| ConfigError::InvalidData {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Encode and save a value by key.
    fn save_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let json =
            serde_json::to_string(value).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        self.set(key, &json)
    }

    fn load_wifi(&self) -> Result<Option<WifiCredentials>, ConfigError> {
        self.load_value(WIFI_KEY)
    }

    fn save_wifi(&self, credentials: &WifiCredentials) -> Result<(), ConfigError> {
        self.save_value(WIFI_KEY, credentials)
    }

    /// Load the device identity, defaulting when nothing is stored.
    fn load_device(&self) -> Result<DeviceConfig, ConfigError> {
        Ok(self.load_value(DEVICE_KEY)?.unwrap_or_default())
    }

    fn save_device(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        self.save_value(DEVICE_KEY, config)
    }

    /// Load the card list. Stored order values are repaired to `0..N`.
    fn load_cards(&self) -> Result<CardList, ConfigError> {
        let stored: Option<Vec<CardConfig>> = self.load_value(CARDS_KEY)?;
        Ok(CardList::from_stored(stored.unwrap_or_default()))
    }

    fn save_cards(&self, cards: &CardList) -> Result<(), ConfigError> {
        self.save_value(CARDS_KEY, cards)
    }
}

impl<S: ConfigStorage + ?Sized> ConfigStorageExt for S {}

/// In-memory storage. Not durable; used in tests and simulations.
#[derive(Debug, Default)]
pub struct MemoryConfigStorage {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryConfigStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        sync::read(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConfigStorage for MemoryConfigStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        Ok(sync::read(&self.data).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        sync::write(&self.data).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ConfigError> {
        sync::write(&self.data).remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::CardType;
    use crate::model::Region;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wifi_round_trip() {
        let storage = MemoryConfigStorage::new();
        assert_eq!(storage.load_wifi().unwrap(), None);

        let creds = WifiCredentials::new("Home", "secret123");
        storage.save_wifi(&creds).unwrap();

        assert_eq!(storage.load_wifi().unwrap(), Some(creds));
    }

    #[test]
    fn test_device_defaults_when_absent() {
        let storage = MemoryConfigStorage::new();
        let device = storage.load_device().unwrap();

        assert_eq!(device.team_id, None);
        assert_eq!(device.region, Region::Us);
        assert!(device.api_key.is_empty());
    }

    #[test]
    fn test_cards_round_trip() {
        let storage = MemoryConfigStorage::new();
        let mut cards = CardList::new();
        cards.add(CardType::Insight, "abc", "Signups").unwrap();
        cards.add(CardType::Pong, "", "").unwrap();

        storage.save_cards(&cards).unwrap();

        assert_eq!(storage.load_cards().unwrap(), cards);
    }

    #[test]
    fn test_invalid_data_reports_key() {
        let storage = MemoryConfigStorage::new();
        storage.set(DEVICE_KEY, "{not json").unwrap();

        let err = storage.load_device().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidData { ref key, .. } if key == DEVICE_KEY));
    }

    #[test]
    fn test_remove_absent_key() {
        let storage = MemoryConfigStorage::new();
        storage.remove("missing").unwrap();
        storage.set("k", "v").unwrap();
        storage.remove("k").unwrap();
        assert!(storage.is_empty());
    }
}
