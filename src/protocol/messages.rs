//! Typed payloads carried by inbound frames
//!
//! Each payload knows how to build itself from the comma-separated tokens
//! that follow its leading keyword. Construction failures are reported as
//! [`DecodeError`] and never leave the decoder.

use crate::types::{BrewState, ButtonKind, MachineStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder the factory writes into unprogrammed identity fields
pub const PLACEHOLDER_IDENTITY: &str = "NOT_ASSIGNED";

/// Why a known frame shape could not be converted into its payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("unknown gesture {0:?}")]
    UnknownGesture(String),
}

fn field<'a>(args: &[&'a str], index: usize, name: &'static str) -> Result<&'a str, DecodeError> {
    args.get(index)
        .copied()
        .map(str::trim)
        .ok_or(DecodeError::MissingField(name))
}

fn number(args: &[&str], index: usize, name: &'static str) -> Result<f64, DecodeError> {
    let raw = field(args, index, name)?;
    raw.parse::<f64>().map_err(|_| DecodeError::InvalidValue {
        field: name,
        value: raw.to_string(),
    })
}

/// Button or encoder gesture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonEvent {
    pub kind: ButtonKind,
    /// Extra tokens after the gesture (e.g. time since the previous event)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<String>,
}

impl ButtonEvent {
    pub fn new(kind: ButtonKind) -> Self {
        Self {
            kind,
            metadata: Vec::new(),
        }
    }

    pub fn from_args(args: &[&str]) -> Result<Self, DecodeError> {
        let keyword = field(args, 0, "event")?;
        let kind = ButtonKind::from_keyword(keyword)
            .ok_or_else(|| DecodeError::UnknownGesture(keyword.to_string()))?;
        Ok(Self {
            kind,
            metadata: args[1..].iter().map(|s| s.trim().to_string()).collect(),
        })
    }
}

/// One `Data` sample streamed while the machine is powered
///
/// `time_ms`, `in_brew` and `state` are stamped by the state machine from its
/// brew timer; whatever the firmware sends in those positions is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotSample {
    pub pressure: f64,
    pub flow: f64,
    pub weight: f64,
    pub temperature: f64,
    pub status: MachineStatus,
    pub state: BrewState,
    pub profile: String,
    pub time_ms: u64,
    pub in_brew: bool,
}

impl Default for ShotSample {
    fn default() -> Self {
        Self {
            pressure: 0.0,
            flow: 0.0,
            weight: 0.0,
            temperature: 0.0,
            status: MachineStatus::Idle,
            state: BrewState::Idle,
            profile: String::new(),
            time_ms: 0,
            in_brew: false,
        }
    }
}

impl ShotSample {
    /// `pressure,flow,weight,temperature,status,state,profile[,time]`
    pub fn from_args(args: &[&str]) -> Result<Self, DecodeError> {
        Ok(Self {
            pressure: number(args, 0, "pressure")?,
            flow: number(args, 1, "flow")?,
            weight: number(args, 2, "weight")?,
            temperature: number(args, 3, "temperature")?,
            status: MachineStatus::parse(field(args, 4, "status")?),
            state: BrewState::parse(field(args, 5, "state")?),
            profile: args.get(6).map(|s| s.trim().to_string()).unwrap_or_default(),
            time_ms: 0,
            in_brew: false,
        })
    }

    /// Copy of this sample carrying the engine's brew clock
    ///
    /// The brew state follows the timer: `brewing` while it runs, `idle`
    /// otherwise.
    pub fn stamped(&self, time_ms: u64, in_brew: bool) -> Self {
        Self {
            time_ms,
            in_brew,
            state: if in_brew {
                BrewState::Brewing
            } else {
                BrewState::Idle
            },
            ..self.clone()
        }
    }
}

/// A named raw sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorChannel {
    pub name: String,
    pub value: f64,
}

/// Raw channel values from a `Sensors` frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub channels: Vec<SensorChannel>,
}

impl SensorSample {
    /// Positional form: every token is a value, named `ch<index>`
    pub fn from_args(args: &[&str]) -> Result<Self, DecodeError> {
        let channels = args
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                let raw = raw.trim();
                raw.parse::<f64>()
                    .map(|value| SensorChannel {
                        name: format!("ch{i}"),
                        value,
                    })
                    .map_err(|_| DecodeError::InvalidValue {
                        field: "sensor",
                        value: raw.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { channels })
    }

    /// Packed form: a single token of `name:value` pairs separated by `;`
    pub fn from_packed(token: &str) -> Result<Self, DecodeError> {
        let token = token.trim();
        if !token.contains(':') {
            // A lone value is still the positional form
            return Self::from_args(&[token]);
        }
        let channels = token
            .split(';')
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| {
                let (name, raw) = entry
                    .split_once(':')
                    .ok_or(DecodeError::MissingField("sensor value"))?;
                let raw = raw.trim();
                let value = raw.parse::<f64>().map_err(|_| DecodeError::InvalidValue {
                    field: "sensor",
                    value: raw.to_string(),
                })?;
                Ok(SensorChannel {
                    name: name.trim().to_string(),
                    value,
                })
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;
        Ok(Self { channels })
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.channels.iter().find(|c| c.name == name).map(|c| c.value)
    }
}

/// Machine identity written once at the factory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineIdentity {
    pub color: String,
    pub serial_number: String,
    pub batch_number: String,
    pub build_date: String,
}

fn is_assigned(value: &str) -> bool {
    !value.is_empty() && value != PLACEHOLDER_IDENTITY
}

impl MachineIdentity {
    /// True when all four fields hold real values
    pub fn is_complete(&self) -> bool {
        is_assigned(&self.color)
            && is_assigned(&self.serial_number)
            && is_assigned(&self.batch_number)
            && is_assigned(&self.build_date)
    }
}

/// Response to the `info` action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub firmware: String,
    pub pinout: String,
    pub identity: MachineIdentity,
}

impl DeviceInfo {
    /// `firmware,pinout,color,serial,batch,build_date`; missing fields stay empty
    pub fn from_args(args: &[&str]) -> Self {
        let at = |i: usize| args.get(i).map(|s| s.trim().to_string()).unwrap_or_default();
        Self {
            firmware: at(0),
            pinout: at(1),
            identity: MachineIdentity {
                color: at(2),
                serial_number: at(3),
                batch_number: at(4),
                build_date: at(5),
            },
        }
    }
}

/// A user-facing message pushed by the firmware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyMessage {
    pub kind: String,
    pub message: String,
}

impl NotifyMessage {
    /// Scale messages are informational and offer no response
    pub const SCALE_MESSAGE_KIND: &'static str = "acaia_msg";

    /// The text may itself contain commas; `;` separates lines
    pub fn from_args(args: &[&str]) -> Result<Self, DecodeError> {
        let kind = args.first().ok_or(DecodeError::MissingField("type"))?;
        Ok(Self {
            kind: kind.trim().to_string(),
            message: args[1..].join(",").replace(';', "\n"),
        })
    }
}

/// Remaining preheat time reported while the heater is on a timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaterTimeoutInfo {
    pub preheat_remaining: u32,
}

impl HeaterTimeoutInfo {
    pub fn from_args(args: &[&str]) -> Result<Self, DecodeError> {
        let raw = field(args, 0, "preheat_remaining")?;
        let preheat_remaining = raw.parse::<u32>().map_err(|_| DecodeError::InvalidValue {
            field: "preheat_remaining",
            value: raw.to_string(),
        })?;
        Ok(Self { preheat_remaining })
    }
}
