//! Persistent user preference storage.
//!
//! A thread-safe key/value store for the settings a user changes at runtime.
//! The store persists to JSON at `<data_dir>/prefs.json`. Reads never fail:
//! a missing key yields the caller's default.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::keys;

/// A single preference value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Text(String),
}

impl PrefValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PrefValue::Bool(b) => Some(*b),
            PrefValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PrefValue::Text(s) => Some(s),
            PrefValue::Bool(_) => None,
        }
    }
}

impl From<bool> for PrefValue {
    fn from(value: bool) -> Self {
        PrefValue::Bool(value)
    }
}

impl From<&str> for PrefValue {
    fn from(value: &str) -> Self {
        PrefValue::Text(value.to_string())
    }
}

impl From<String> for PrefValue {
    fn from(value: String) -> Self {
        PrefValue::Text(value)
    }
}

/// Wrapper for serializing the preference file.
#[derive(Debug, Serialize, Deserialize)]
struct PrefsData {
    /// Version of the file format.
    version: u32,
    /// The stored values.
    values: BTreeMap<String, PrefValue>,
}

/// Thread-safe preference store.
pub struct PreferenceStore {
    /// The path to the JSON file.
    path: PathBuf,
    /// Stored values, keyed by preference name.
    values: RwLock<BTreeMap<String, PrefValue>>,
}

impl PreferenceStore {
    /// Creates an empty store that will persist to `path`.
    ///
    /// This does not read the file; call [`load`](Self::load) for that.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            values: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a store at `path` and loads it, writing the defaults for any
    /// key not yet present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self::new(path);
        store.load()?;
        store.apply_defaults();
        Ok(store)
    }

    /// Returns the path to the preference file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, PrefValue>> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, PrefValue>> {
        self.values.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads preferences from the JSON file.
    ///
    /// A missing file leaves the store empty.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            tracing::debug!("Preference file not found at {:?}, starting empty", self.path);
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read preferences: {}", self.path.display()))?;

        let data: PrefsData = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse preferences: {}", self.path.display()))?;

        let mut values = self.write();
        *values = data.values;

        tracing::info!("Loaded {} preferences from {:?}", values.len(), self.path);
        Ok(())
    }

    /// Saves preferences to the JSON file.
    ///
    /// Uses atomic write (write to temp file, then rename).
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create preference directory: {}", parent.display())
            })?;
        }

        let data = PrefsData {
            version: 1,
            values: self.read().clone(),
        };

        let contents =
            serde_json::to_string_pretty(&data).context("Failed to serialize preferences")?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).with_context(|| {
            format!("Failed to write temp preferences: {}", temp_path.display())
        })?;

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename temp preferences {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        tracing::debug!("Saved {} preferences to {:?}", data.values.len(), self.path);
        Ok(())
    }

    /// Inserts the default for every known key that has one and is unset.
    ///
    /// Keys without a default (such as `client_sound`) stay unset.
    pub fn apply_defaults(&self) {
        let mut values = self.write();
        for (key, default) in keys::defaults() {
            values.entry(key.to_string()).or_insert(default);
        }
    }

    /// Returns the value for `key`, or `default` when unset.
    pub fn get(&self, key: &str, default: PrefValue) -> PrefValue {
        self.read().get(key).cloned().unwrap_or(default)
    }

    /// Returns the value for `key` if set.
    pub fn get_opt(&self, key: &str) -> Option<PrefValue> {
        self.read().get(key).cloned()
    }

    /// Returns a boolean preference. Text values fall back to `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.read()
            .get(key)
            .and_then(PrefValue::as_bool)
            .unwrap_or(default)
    }

    /// Returns a text preference. Boolean values fall back to `default`.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get_string_opt(key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Returns a text preference, `None` when unset.
    pub fn get_string_opt(&self, key: &str) -> Option<String> {
        self.read()
            .get(key)
            .and_then(PrefValue::as_str)
            .map(str::to_string)
    }

    /// Sets `key` to `value`. Does not save; call [`save`](Self::save).
    pub fn set(&self, key: &str, value: impl Into<PrefValue>) {
        let value = value.into();
        tracing::debug!(key, ?value, "Setting preference");
        self.write().insert(key.to_string(), value);
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(&self, key: &str) -> Option<PrefValue> {
        self.write().remove(key)
    }

    /// Snapshot of every stored value.
    pub fn entries(&self) -> Vec<(String, PrefValue)> {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
