//! Core domain types for the supervisor
//!
//! This module contains the closed enumerations shared by the protocol
//! decoder, the state machine and the outer layers.
//!
//! # Main Types
//!
//! - [`MachineStatus`] - Brewing sub-status reported by the firmware on every `Data` frame
//! - [`BrewState`] - Logical state reported alongside the status
//! - [`Sound`] - Audible feedback events decided by the state machine
//! - [`Action`] - Outbound `action,<name>` commands
//! - [`ButtonKind`] - Encoder and button gestures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status reported by the realtime core
///
/// The known values drive the state machine; anything else is kept verbatim
/// so the outer layers can still display it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "String", from = "String")]
pub enum MachineStatus {
    #[default]
    Idle,
    Heating,
    ClosingValve,
    Retracting,
    Purge,
    ClickToStart,
    PourWaterAndClickToContinue,
    /// Any other brewing stage, as reported
    Other(String),
}

impl MachineStatus {
    /// Parse a status token (case-insensitive for the known values)
    pub fn parse(token: &str) -> Self {
        let trimmed = token.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "idle" => MachineStatus::Idle,
            "heating" => MachineStatus::Heating,
            "closing valve" => MachineStatus::ClosingValve,
            "retracting" => MachineStatus::Retracting,
            "purge" => MachineStatus::Purge,
            "click to start" => MachineStatus::ClickToStart,
            "pour water and click to continue" => MachineStatus::PourWaterAndClickToContinue,
            _ => MachineStatus::Other(trimmed.to_string()),
        }
    }

    /// Wire representation of this status
    pub fn as_str(&self) -> &str {
        match self {
            MachineStatus::Idle => "idle",
            MachineStatus::Heating => "heating",
            MachineStatus::ClosingValve => "closing valve",
            MachineStatus::Retracting => "retracting",
            MachineStatus::Purge => "purge",
            MachineStatus::ClickToStart => "click to start",
            MachineStatus::PourWaterAndClickToContinue => "pour water and click to continue",
            MachineStatus::Other(s) => s,
        }
    }

    /// Statuses where the machine waits on the user; aborting here stops instead of going home
    pub fn waits_for_user(&self) -> bool {
        matches!(
            self,
            MachineStatus::Heating
                | MachineStatus::ClickToStart
                | MachineStatus::PourWaterAndClickToContinue
        )
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for MachineStatus {
    fn from(s: String) -> Self {
        MachineStatus::parse(&s)
    }
}

impl From<MachineStatus> for String {
    fn from(status: MachineStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Logical state reported alongside the status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(into = "String", from = "String")]
pub enum BrewState {
    #[default]
    Idle,
    Brewing,
    Other(String),
}

impl BrewState {
    pub fn parse(token: &str) -> Self {
        let trimmed = token.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "idle" => BrewState::Idle,
            "brewing" => BrewState::Brewing,
            _ => BrewState::Other(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BrewState::Idle => "idle",
            BrewState::Brewing => "brewing",
            BrewState::Other(s) => s,
        }
    }
}

impl fmt::Display for BrewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for BrewState {
    fn from(s: String) -> Self {
        BrewState::parse(&s)
    }
}

impl From<BrewState> for String {
    fn from(state: BrewState) -> Self {
        state.as_str().to_string()
    }
}

/// Sound events fired on state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sound {
    BrewingStart,
    BrewingEnd,
    Idle,
    HeatingStart,
    HeatingEnd,
    Abort,
}

impl fmt::Display for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sound::BrewingStart => "brewing_start",
            Sound::BrewingEnd => "brewing_end",
            Sound::Idle => "idle",
            Sound::HeatingStart => "heating_start",
            Sound::HeatingEnd => "heating_end",
            Sound::Abort => "abort",
        };
        f.write_str(name)
    }
}

/// Commands sent as `action,<name>\x03`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Stop,
    Tare,
    ScaleMasterCalibration,
    Preheat,
    Continue,
    Home,
    Purge,
    /// Device-info request, only issued by the engine itself
    Info,
    /// Handled by the transport, never sent to the device
    Reset,
}

impl Action {
    /// Actions forwarded verbatim to the device
    pub const DEVICE_ACTIONS: [Action; 8] = [
        Action::Start,
        Action::Stop,
        Action::Tare,
        Action::ScaleMasterCalibration,
        Action::Preheat,
        Action::Continue,
        Action::Home,
        Action::Purge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Tare => "tare",
            Action::ScaleMasterCalibration => "scale_master_calibration",
            Action::Preheat => "preheat",
            Action::Continue => "continue",
            Action::Home => "home",
            Action::Purge => "purge",
            Action::Info => "info",
            Action::Reset => "reset",
        }
    }

    /// True if the action is executed by the backend rather than the device
    pub fn is_backend_action(&self) -> bool {
        matches!(self, Action::Reset)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the externally allowed action names; `info` is deliberately rejected.
impl FromStr for Action {
    type Err = crate::error::MachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Action::Reset.as_str() {
            return Ok(Action::Reset);
        }
        Action::DEVICE_ACTIONS
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| crate::error::MachineError::UnknownAction(s.to_string()))
    }
}

/// Encoder and button gestures reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonKind {
    EncoderClockwise,
    EncoderCounterclockwise,
    EncoderPush,
    EncoderDouble,
    EncoderLong,
    TareDouble,
    TareLong,
    Start,
}

impl ButtonKind {
    /// Every gesture keyword, in wire form
    pub const KEYWORDS: [&'static str; 8] = ["CW", "CCW", "push", "pu_d", "elng", "ta_d", "ta_l", "strt"];

    pub fn from_keyword(token: &str) -> Option<Self> {
        let kind = match token {
            "CW" => ButtonKind::EncoderClockwise,
            "CCW" => ButtonKind::EncoderCounterclockwise,
            "push" => ButtonKind::EncoderPush,
            "pu_d" => ButtonKind::EncoderDouble,
            "elng" => ButtonKind::EncoderLong,
            "ta_d" => ButtonKind::TareDouble,
            "ta_l" => ButtonKind::TareLong,
            "strt" => ButtonKind::Start,
            _ => return None,
        };
        Some(kind)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            ButtonKind::EncoderClockwise => "CW",
            ButtonKind::EncoderCounterclockwise => "CCW",
            ButtonKind::EncoderPush => "push",
            ButtonKind::EncoderDouble => "pu_d",
            ButtonKind::EncoderLong => "elng",
            ButtonKind::TareDouble => "ta_d",
            ButtonKind::TareLong => "ta_l",
            ButtonKind::Start => "strt",
        }
    }

    /// Encoder rotation happens constantly and is not worth logging
    pub fn is_rotation(&self) -> bool {
        matches!(
            self,
            ButtonKind::EncoderClockwise | ButtonKind::EncoderCounterclockwise
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_known_and_verbatim() {
        assert_eq!(MachineStatus::parse("idle"), MachineStatus::Idle);
        assert_eq!(MachineStatus::parse("Closing Valve"), MachineStatus::ClosingValve);
        assert_eq!(
            MachineStatus::parse("Pour water and click to continue"),
            MachineStatus::PourWaterAndClickToContinue
        );
        assert_eq!(
            MachineStatus::parse("Preinfusion"),
            MachineStatus::Other("Preinfusion".to_string())
        );
        assert_eq!(MachineStatus::parse("Preinfusion").to_string(), "Preinfusion");
    }

    #[test]
    fn test_status_serde_uses_wire_form() {
        let json = serde_json::to_string(&MachineStatus::ClosingValve).unwrap();
        assert_eq!(json, "\"closing valve\"");
        let parsed: MachineStatus = serde_json::from_str("\"heating\"").unwrap();
        assert_eq!(parsed, MachineStatus::Heating);
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("home".parse::<Action>().unwrap(), Action::Home);
        assert_eq!("reset".parse::<Action>().unwrap(), Action::Reset);
        assert_eq!(
            "scale_master_calibration".parse::<Action>().unwrap(),
            Action::ScaleMasterCalibration
        );
        assert!("info".parse::<Action>().is_err());
        assert!("brew".parse::<Action>().is_err());
    }

    #[test]
    fn test_button_keywords_round_trip() {
        for kw in ButtonKind::KEYWORDS {
            let kind = ButtonKind::from_keyword(kw).unwrap();
            assert_eq!(kind.keyword(), kw);
        }
        assert!(ButtonKind::from_keyword("cw").is_none());
    }
}
