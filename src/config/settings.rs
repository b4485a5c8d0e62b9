//! Process settings derived from defaults and the environment
//!
//! These settings choose how the supervisor reaches the realtime core and
//! where it finds firmware images. They are read once at startup and never
//! persisted.
//!
//! # Environment
//!
//! | Variable | Effect |
//! |---|---|
//! | `BACKEND` | `FIKA` (default), `USB`, `EMULATOR` or `EMULATION` |
//! | `SUPERVISOR_SERIAL_DEVICE` | overrides the backend's device path |
//! | `SUPERVISOR_LOG_DIR` | directory for the rolling log file |
//! | `SUPERVISOR_CONFIG` | explicit path of the persisted configuration |
//! | `SUPERVISOR_FIRMWARE_DIR` | directory holding the firmware image and version file |

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_BACKEND: &str = "BACKEND";
pub const ENV_SERIAL_DEVICE: &str = "SUPERVISOR_SERIAL_DEVICE";
pub const ENV_LOG_DIR: &str = "SUPERVISOR_LOG_DIR";
pub const ENV_CONFIG: &str = "SUPERVISOR_CONFIG";
pub const ENV_FIRMWARE_DIR: &str = "SUPERVISOR_FIRMWARE_DIR";

/// On-board UART wired to the realtime core
pub const FIKA_DEVICE: &str = "/dev/ttymxc0";

/// Core attached through a USB serial adapter
pub const USB_DEVICE: &str = "/dev/ttyUSB0";

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Which transport reaches the realtime core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendKind {
    #[default]
    Fika,
    Usb,
    Emulator,
}

impl BackendKind {
    /// Case-insensitive; anything unknown selects the on-board UART
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "USB" => BackendKind::Usb,
            "EMULATOR" | "EMULATION" => BackendKind::Emulator,
            _ => BackendKind::Fika,
        }
    }

    /// Serial device used by this backend, if it has one
    pub fn default_device(&self) -> Option<&'static str> {
        match self {
            BackendKind::Fika => Some(FIKA_DEVICE),
            BackendKind::Usb => Some(USB_DEVICE),
            BackendKind::Emulator => None,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Fika => write!(f, "FIKA"),
            BackendKind::Usb => write!(f, "USB"),
            BackendKind::Emulator => write!(f, "EMULATOR"),
        }
    }
}

/// Where the firmware image lives and how it is written to the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareSettings {
    pub image_path: PathBuf,
    /// Text file holding the version string of `image_path`
    pub version_file: PathBuf,
    /// External flasher executable
    pub flasher_program: String,
    pub chip: String,
    pub flash_baud: u32,
    pub flash_offset: String,
}

impl FirmwareSettings {
    /// Image and version file inside `dir`
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            image_path: dir.join("firmware.bin"),
            version_file: dir.join("version"),
            ..Self::default()
        }
    }
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self {
            image_path: PathBuf::from("/opt/realtime-core/firmware.bin"),
            version_file: PathBuf::from("/opt/realtime-core/version"),
            flasher_program: "esptool.py".to_string(),
            chip: "esp32s3".to_string(),
            flash_baud: 921_600,
            flash_offset: "0x0".to_string(),
        }
    }
}

/// Settings for one supervisor process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    pub backend: BackendKind,
    /// Serial device; unused by the emulator
    pub device_path: PathBuf,
    pub baud_rate: u32,
    /// How long a single read may block before returning no data
    pub read_timeout: Duration,
    /// Sleep between checks while the link is suspended
    pub suspended_poll: Duration,
    /// Sleep between reads when the core has sent nothing
    pub idle_poll: Duration,
    /// Delay before the liveness watchdog checks for device info
    pub watchdog_delay: Duration,
    pub log_dir: PathBuf,
    /// Overrides the platform config location
    pub config_path: Option<PathBuf>,
    pub firmware: FirmwareSettings,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Fika,
            device_path: PathBuf::from(FIKA_DEVICE),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(100),
            suspended_poll: Duration::from_millis(100),
            idle_poll: Duration::from_millis(10),
            watchdog_delay: Duration::from_secs(60),
            log_dir: PathBuf::from("/var/log/espresso-supervisor"),
            config_path: None,
            firmware: FirmwareSettings::default(),
        }
    }
}

impl RuntimeSettings {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(value) = lookup(ENV_BACKEND) {
            settings.backend = BackendKind::parse(&value);
        }
        if let Some(device) = settings.backend.default_device() {
            settings.device_path = PathBuf::from(device);
        }
        if let Some(device) = lookup(ENV_SERIAL_DEVICE) {
            settings.device_path = PathBuf::from(device);
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            settings.log_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(ENV_CONFIG) {
            settings.config_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup(ENV_FIRMWARE_DIR) {
            settings.firmware = FirmwareSettings::in_dir(dir);
        }

        settings
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_watchdog_delay(mut self, delay: Duration) -> Self {
        self.watchdog_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(BackendKind::parse("usb"), BackendKind::Usb);
        assert_eq!(BackendKind::parse("EMULATION"), BackendKind::Emulator);
        assert_eq!(BackendKind::parse("emulator"), BackendKind::Emulator);
        assert_eq!(BackendKind::parse("FIKA"), BackendKind::Fika);
        assert_eq!(BackendKind::parse("something-else"), BackendKind::Fika);
    }

    #[test]
    fn test_defaults() {
        let settings = RuntimeSettings::from_lookup(|_| None);
        assert_eq!(settings.backend, BackendKind::Fika);
        assert_eq!(settings.device_path, PathBuf::from(FIKA_DEVICE));
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.watchdog_delay, Duration::from_secs(60));
        assert!(settings.config_path.is_none());
    }

    #[test]
    fn test_usb_backend_selects_usb_device() {
        let settings = RuntimeSettings::from_lookup(lookup_from(&[("BACKEND", "USB")]));
        assert_eq!(settings.device_path, PathBuf::from(USB_DEVICE));
    }

    #[test]
    fn test_overrides() {
        let settings = RuntimeSettings::from_lookup(lookup_from(&[
            ("BACKEND", "usb"),
            ("SUPERVISOR_SERIAL_DEVICE", "/dev/ttyACM1"),
            ("SUPERVISOR_CONFIG", "/tmp/config.json"),
            ("SUPERVISOR_FIRMWARE_DIR", "/srv/fw"),
        ]));
        assert_eq!(settings.device_path, PathBuf::from("/dev/ttyACM1"));
        assert_eq!(settings.config_path, Some(PathBuf::from("/tmp/config.json")));
        assert_eq!(settings.firmware.image_path, PathBuf::from("/srv/fw/firmware.bin"));
        assert_eq!(settings.firmware.version_file, PathBuf::from("/srv/fw/version"));
        assert_eq!(settings.firmware.flasher_program, "esptool.py");
    }

    #[test]
    #[serial]
    fn test_from_env_reads_backend() {
        std::env::set_var(ENV_BACKEND, "EMULATION");
        let settings = RuntimeSettings::from_env();
        std::env::remove_var(ENV_BACKEND);
        assert_eq!(settings.backend, BackendKind::Emulator);
    }
}
