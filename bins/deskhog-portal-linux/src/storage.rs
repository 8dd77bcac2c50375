//! File-backed configuration store.
//!
//! The whole store is one JSON object of string values. Every write
//! rewrites the file through a temporary sibling and a rename, so a crash
//! leaves either the old or the new file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use deskhog_core::{ConfigError, ConfigStorage};

pub struct FileConfigStorage {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl FileConfigStorage {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| ConfigError::InvalidData {
                key: path.display().to_string(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(ConfigError::ReadError(format!("{}: {}", path.display(), e))),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &HashMap<String, String>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| ConfigError::WriteError(format!("{}: {}", self.path.display(), e)))
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ConfigStorage for FileConfigStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut values = self.values();
        let previous = values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&values) {
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ConfigError> {
        let mut values = self.values();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}
