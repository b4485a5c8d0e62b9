//! Serial protocol spoken with the realtime core
//!
//! Inbound traffic is newline-terminated, comma-separated text. Outbound
//! commands are terminated by [`ETX`] instead of a newline.
//!
//! # Inbound
//!
//! | Frame | Payload |
//! |---|---|
//! | `CW`, `CCW`, `push`, `pu_d`, `elng`, `ta_d`, `ta_l`, `strt` | [`ButtonEvent`] |
//! | `Event,<gesture>[,...]` | [`ButtonEvent`] |
//! | `Data,<pressure>,<flow>,<weight>,<temperature>,<status>,<state>,<profile>[,<time>]` | [`ShotSample`] |
//! | `Sensors,<v0>,<v1>,...` or `Sensors,<name>:<v>;<name>:<v>` | [`SensorSample`] |
//! | `ESPInfo,<firmware>,<pinout>,<color>,<serial>,<batch>,<build_date>` | [`DeviceInfo`] |
//! | `Notify,<type>,<text;lines>` | [`NotifyMessage`] |
//! | `HeaterTimeoutInfo,<preheat_remaining>` | [`HeaterTimeoutInfo`] |
//!
//! # Outbound
//!
//! - `action,<name>\x03`
//! - `hash,<md5-hex>\x03` followed by `json\n<body>\x03`
//! - `nvs_request,write,<key>,<value>\x03`

pub mod decoder;
pub mod framer;
pub mod messages;

pub use decoder::{decode, is_reboot_signature, DecodedMessage};
pub use framer::{Frame, LineFramer};
pub use messages::{
    ButtonEvent, DecodeError, DeviceInfo, HeaterTimeoutInfo, MachineIdentity, NotifyMessage,
    SensorChannel, SensorSample, ShotSample, PLACEHOLDER_IDENTITY,
};

use crate::types::Action;

/// End-of-text byte terminating every outbound command
pub const ETX: u8 = 0x03;

/// Written once when the read loop starts listening
pub const WAKE_SEQUENCE: &[u8] = b"32\n";

/// Keys of the identity fields in the core's persistent key-value store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvsKey {
    Color,
    SerialNumber,
    BatchNumber,
    BuildDate,
}

impl NvsKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            NvsKey::Color => "color_key",
            NvsKey::SerialNumber => "serial_number_key",
            NvsKey::BatchNumber => "batch_number_key",
            NvsKey::BuildDate => "build_date_key",
        }
    }
}

fn terminated(text: String) -> Vec<u8> {
    let mut bytes = text.into_bytes();
    bytes.push(ETX);
    bytes
}

/// `action,<name>\x03`
pub fn action_command(action: Action) -> Vec<u8> {
    terminated(format!("action,{}", action.as_str()))
}

/// `nvs_request,write,<key>,<value>\x03`
pub fn nvs_write_command(key: NvsKey, value: &str) -> Vec<u8> {
    terminated(format!("nvs_request,write,{},{}", key.as_str(), value))
}

/// `hash,<hex>\x03`
pub fn hash_command(hex_digest: &str) -> Vec<u8> {
    terminated(format!("hash,{hex_digest}"))
}

/// `json\n<payload>\x03`
pub fn json_envelope(payload: &str) -> Vec<u8> {
    terminated(format!("json\n{payload}"))
}
