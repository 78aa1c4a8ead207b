// Persisted user settings, one small JSON file per key

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    RaceboxError,
    telemetry::{GyroConfig, GyroOffsets},
    timing::DEFAULT_TRIGGER_RADIUS_M,
};

const APP_DIR_NAME: &str = "racebox";
pub const RECORDS_DIR_NAME: &str = "RaceRecords";
pub const DEFAULT_AUTH_KEY: &str = "1234";

pub const GYRO_CONFIG_KEY: &str = "gyro_config";
pub const GYRO_OFFSETS_KEY: &str = "gyro_offsets";
pub const AUTH_KEY_KEY: &str = "auth_key";
pub const TRIGGER_RADIUS_KEY: &str = "trigger_radius";
pub const STORAGE_LOCATION_KEY: &str = "storage_location";

#[derive(Debug, Clone)]
pub struct SettingsStore {
    base_dir: PathBuf,
}

impl SettingsStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Store under the platform config directory
    pub fn from_config_dir() -> Result<Self, RaceboxError> {
        let base_dir = dirs::config_dir()
            .ok_or(RaceboxError::NoConfigDir)?
            .join(APP_DIR_NAME);
        Ok(Self::new(base_dir))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key))
    }

    /// Read `key`. A missing key is `Ok(None)`, a corrupt one is an error.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, RaceboxError> {
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path).map_err(|e| RaceboxError::SettingsIOError { source: e })?;
        serde_json::from_reader(file)
            .map(Some)
            .map_err(|e| RaceboxError::SettingsSerializeError { source: e })
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), RaceboxError> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir)
                .map_err(|e| RaceboxError::SettingsIOError { source: e })?;
        }
        let file = File::create(self.key_path(key))
            .map_err(|e| RaceboxError::SettingsIOError { source: e })?;
        serde_json::to_writer_pretty(file, value)
            .map_err(|e| RaceboxError::SettingsSerializeError { source: e })?;
        debug!("Saved setting {}", key);
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    #[default]
    External,
    Internal,
}

/// The two candidate base directories for tracks and sessions
#[derive(Debug, Clone)]
pub struct StorageRoots {
    pub external: PathBuf,
    pub internal: PathBuf,
}

impl StorageRoots {
    /// Both roots at the same directory, for platforms with a single storage area
    pub fn single(dir: PathBuf) -> Self {
        Self {
            external: dir.clone(),
            internal: dir,
        }
    }

    pub fn base_dir(&self, location: StorageLocation) -> &Path {
        match location {
            StorageLocation::External => &self.external,
            StorageLocation::Internal => &self.internal,
        }
    }

    pub fn tracks_dir(&self, location: StorageLocation) -> PathBuf {
        self.base_dir(location).join(crate::track::TRACKS_DIR_NAME)
    }

    pub fn records_dir(&self, location: StorageLocation) -> PathBuf {
        self.base_dir(location).join(RECORDS_DIR_NAME)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub gyro_config: GyroConfig,
    pub gyro_offsets: GyroOffsets,
    pub auth_key: String,
    pub trigger_radius: f64,
    pub storage_location: StorageLocation,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            gyro_config: GyroConfig::default(),
            gyro_offsets: GyroOffsets::default(),
            auth_key: DEFAULT_AUTH_KEY.to_string(),
            trigger_radius: DEFAULT_TRIGGER_RADIUS_M,
            storage_location: StorageLocation::default(),
        }
    }
}

fn load_or_default<T: DeserializeOwned>(store: &SettingsStore, key: &str, default: T) -> T {
    match store.load(key) {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(e) => {
            warn!("Ignoring unreadable setting {}: {}", key, e);
            default
        }
    }
}

impl AppSettings {
    /// Load every key, falling back to the default for anything missing or corrupt
    pub fn load(store: &SettingsStore) -> Self {
        let defaults = Self::default();
        let trigger_radius =
            load_or_default(store, TRIGGER_RADIUS_KEY, defaults.trigger_radius);
        Self {
            gyro_config: load_or_default(store, GYRO_CONFIG_KEY, defaults.gyro_config),
            gyro_offsets: load_or_default(store, GYRO_OFFSETS_KEY, defaults.gyro_offsets),
            auth_key: load_or_default(store, AUTH_KEY_KEY, defaults.auth_key),
            trigger_radius: if trigger_radius.is_finite() && trigger_radius > 0.0 {
                trigger_radius
            } else {
                warn!("Ignoring invalid trigger radius {}", trigger_radius);
                defaults.trigger_radius
            },
            storage_location: load_or_default(
                store,
                STORAGE_LOCATION_KEY,
                defaults.storage_location,
            ),
        }
    }

    pub fn save(&self, store: &SettingsStore) -> Result<(), RaceboxError> {
        store.save(GYRO_CONFIG_KEY, &self.gyro_config)?;
        store.save(GYRO_OFFSETS_KEY, &self.gyro_offsets)?;
        store.save(AUTH_KEY_KEY, &self.auth_key)?;
        store.save(TRIGGER_RADIUS_KEY, &self.trigger_radius)?;
        store.save(STORAGE_LOCATION_KEY, &self.storage_location)
    }
}
