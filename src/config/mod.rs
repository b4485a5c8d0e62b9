//! Configuration for the supervisor
//!
//! Two kinds of configuration exist:
//!
//! - [`MachineConfig`] - persisted user and system settings, stored as JSON
//! - [`RuntimeSettings`] - process settings derived from defaults and the
//!   environment, never persisted
//!
//! # Data Location
//!
//! The persisted configuration lives in the platform data directory:
//! - **Linux**: `~/.local/share/com.espresso.supervisor/config.json`
//!
//! The engine only talks to the persisted configuration through the
//! [`ConfigStore`] trait so embedders can supply their own storage.

pub mod settings;

pub use settings::*;

use crate::error::{MachineError, Result};
use crate::protocol::MachineIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Application identifier for data directories
pub const APP_ID: &str = "com.espresso.supervisor";

/// Persisted configuration filename
pub const CONFIG_FILE: &str = "config.json";

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Default location of the persisted configuration
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

/// Settings owned by the machine's user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Never flash the realtime core, even when it is outdated or unresponsive
    pub disallow_firmware_flashing: bool,
    /// Preheat as soon as the core reports in after boot
    pub heat_on_boot: bool,
}

/// Factory identity of the machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub color: String,
    pub serial_number: String,
    pub batch_number: String,
    pub build_date: String,
}

impl SystemConfig {
    pub fn identity(&self) -> MachineIdentity {
        MachineIdentity {
            color: self.color.clone(),
            serial_number: self.serial_number.clone(),
            batch_number: self.batch_number.clone(),
            build_date: self.build_date.clone(),
        }
    }

    pub fn set_identity(&mut self, identity: &MachineIdentity) {
        self.color = identity.color.clone();
        self.serial_number = identity.serial_number.clone();
        self.batch_number = identity.batch_number.clone();
        self.build_date = identity.build_date.clone();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log every frame received from the core
    pub sensor_messages: bool,
}

/// Persisted configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub user: UserConfig,
    pub system: SystemConfig,
    pub logging: LoggingConfig,
}

impl MachineConfig {
    /// Load from a JSON file; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            MachineError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            MachineError::Config(format!("Failed to parse config {:?}: {}", path, e))
        })
    }

    /// Load, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save as pretty JSON, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MachineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MachineError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            MachineError::Config(format!("Failed to write config {:?}: {}", path, e))
        })
    }
}

/// Access to the persisted configuration
///
/// Reads hand out a copy; writes go through [`ConfigStore::update`] and only
/// reach storage on [`ConfigStore::save`].
pub trait ConfigStore: Send + Sync {
    fn snapshot(&self) -> MachineConfig;

    fn update(&self, apply: &mut dyn FnMut(&mut MachineConfig));

    fn save(&self) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// JSON file backed store
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    config: Mutex<MachineConfig>,
}

impl FileConfigStore {
    /// Open the store at `path`, falling back to defaults if it cannot be read
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = MachineConfig::load_or_default(&path);
        tracing::debug!("Configuration loaded from {}", path.display());
        Self {
            path,
            config: Mutex::new(config),
        }
    }

    /// Open the store in the platform data directory
    pub fn open_default() -> Result<Self> {
        let path = default_config_path().ok_or_else(|| {
            MachineError::Config("Could not determine config path".to_string())
        })?;
        Ok(Self::open(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn snapshot(&self) -> MachineConfig {
        lock(&self.config).clone()
    }

    fn update(&self, apply: &mut dyn FnMut(&mut MachineConfig)) {
        apply(&mut lock(&self.config));
    }

    fn save(&self) -> Result<()> {
        let config = self.snapshot();
        config.save(&self.path)
    }
}

/// In-memory store that counts saves
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: Mutex<MachineConfig>,
    saves: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config: Mutex::new(config),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl ConfigStore for MemoryConfigStore {
    fn snapshot(&self) -> MachineConfig {
        lock(&self.config).clone()
    }

    fn update(&self, apply: &mut dyn FnMut(&mut MachineConfig)) {
        apply(&mut lock(&self.config));
    }

    fn save(&self) -> Result<()> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
