//! Frame classification
//!
//! [`decode`] is total: every line maps to exactly one [`DecodedMessage`].
//! Frames with a known keyword but a malformed body are logged and fall
//! through to [`DecodedMessage::Raw`], which the state machine only logs.

use super::messages::{
    ButtonEvent, DecodeError, DeviceInfo, HeaterTimeoutInfo, NotifyMessage, SensorSample,
    ShotSample,
};
use crate::types::ButtonKind;

/// Start of the ROM boot banner printed by the microcontroller after a reset
pub const REBOOT_BANNER_PREFIX: &str = "rst:0x";

/// Boot mode marker that identifies a normal flash boot in the banner
pub const REBOOT_BANNER_BOOT_MODE: &str = "boot:0x16 (SPI_FAST_FLASH_BOOT)";

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Button(ButtonEvent),
    Shot(ShotSample),
    Sensors(SensorSample),
    Info(DeviceInfo),
    Notify(NotifyMessage),
    HeaterTimeout(HeaterTimeoutInfo),
    /// Firmware log output or anything unrecognised
    Raw(String),
}

impl DecodedMessage {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            DecodedMessage::Button(_) => "button",
            DecodedMessage::Shot(_) => "shot",
            DecodedMessage::Sensors(_) => "sensors",
            DecodedMessage::Info(_) => "info",
            DecodedMessage::Notify(_) => "notify",
            DecodedMessage::HeaterTimeout(_) => "heater_timeout",
            DecodedMessage::Raw(_) => "raw",
        }
    }
}

/// True if the line is the boot banner printed after the core restarted
pub fn is_reboot_signature(text: &str) -> bool {
    text.starts_with(REBOOT_BANNER_PREFIX) && text.contains(REBOOT_BANNER_BOOT_MODE)
}

/// Classify a frame's text (already stripped of CR/LF)
pub fn decode(text: &str) -> DecodedMessage {
    let tokens: Vec<&str> = text.split(',').collect();

    let result = match tokens.as_slice() {
        [single] if ButtonKind::from_keyword(single).is_some() => {
            ButtonEvent::from_args(&tokens).map(DecodedMessage::Button)
        }
        ["Event", rest @ ..] => ButtonEvent::from_args(rest).map(DecodedMessage::Button),
        ["Data", rest @ ..] => ShotSample::from_args(rest).map(DecodedMessage::Shot),
        ["Sensors", packed] => SensorSample::from_packed(packed).map(DecodedMessage::Sensors),
        ["Sensors", rest @ ..] => SensorSample::from_args(rest).map(DecodedMessage::Sensors),
        ["ESPInfo", rest @ ..] => Ok(DecodedMessage::Info(DeviceInfo::from_args(rest))),
        ["Notify", rest @ ..] => NotifyMessage::from_args(rest).map(DecodedMessage::Notify),
        ["HeaterTimeoutInfo", rest @ ..] => {
            HeaterTimeoutInfo::from_args(rest).map(DecodedMessage::HeaterTimeout)
        }
        _ => return DecodedMessage::Raw(text.to_string()),
    };

    result.unwrap_or_else(|err: DecodeError| {
        tracing::warn!("Dropping malformed {} frame: {} ({:?})", tokens[0], err, text);
        DecodedMessage::Raw(text.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BrewState, MachineStatus};
    use proptest::prelude::*;

    #[test]
    fn test_bare_gesture() {
        match decode("pu_d") {
            DecodedMessage::Button(ev) => {
                assert_eq!(ev.kind, ButtonKind::EncoderDouble);
                assert!(ev.metadata.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_event_prefix_with_metadata() {
        match decode("Event,ta_l,350") {
            DecodedMessage::Button(ev) => {
                assert_eq!(ev.kind, ButtonKind::TareLong);
                assert_eq!(ev.metadata, vec!["350".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_data_frame() {
        match decode("Data,8.9,2.1,36.0,92.8,retracting,brewing,Classic,0") {
            DecodedMessage::Shot(sample) => {
                assert_eq!(sample.status, MachineStatus::Retracting);
                assert_eq!(sample.state, BrewState::Brewing);
                assert_eq!(sample.weight, 36.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sensors_packed_vs_positional() {
        match decode("Sensors,t:90.5;p:1.5") {
            DecodedMessage::Sensors(s) => assert_eq!(s.get("t"), Some(90.5)),
            other => panic!("unexpected {other:?}"),
        }
        match decode("Sensors,1,2,3") {
            DecodedMessage::Sensors(s) => assert_eq!(s.channels.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_info_and_notify() {
        match decode("ESPInfo,1.2.0-5-abc,3,black,1234,9,2024-01-01") {
            DecodedMessage::Info(info) => {
                assert_eq!(info.firmware, "1.2.0-5-abc");
                assert!(info.identity.is_complete());
            }
            other => panic!("unexpected {other:?}"),
        }
        match decode("Notify,acaia_msg,Scale connected;Ready") {
            DecodedMessage::Notify(n) => {
                assert_eq!(n.kind, "acaia_msg");
                assert_eq!(n.message, "Scale connected\nReady");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_malformed_known_frames_fall_back_to_raw() {
        assert_eq!(
            decode("HeaterTimeoutInfo,soon"),
            DecodedMessage::Raw("HeaterTimeoutInfo,soon".to_string())
        );
        assert!(matches!(decode("Data,1,2"), DecodedMessage::Raw(_)));
        assert!(matches!(decode("Event,wiggle"), DecodedMessage::Raw(_)));
    }

    #[test]
    fn test_log_lines_are_raw() {
        assert!(matches!(decode("I (1234) wifi: started"), DecodedMessage::Raw(_)));
        assert!(matches!(decode(""), DecodedMessage::Raw(_)));
    }

    #[test]
    fn test_reboot_signature() {
        assert!(is_reboot_signature(
            "rst:0x1 (POWERON_RESET),boot:0x16 (SPI_FAST_FLASH_BOOT)"
        ));
        assert!(!is_reboot_signature("rst:0x1 (POWERON_RESET),boot:0x0 (DOWNLOAD)"));
        assert!(!is_reboot_signature("boot:0x16 (SPI_FAST_FLASH_BOOT)"));
    }

    proptest! {
        #[test]
        fn test_decode_is_total(text in "\\PC{0,64}") {
            let _ = decode(&text).kind();
        }

        #[test]
        fn test_decode_keyword_prefixes_never_panic(
            keyword in prop_oneof![
                Just("Event"), Just("Data"), Just("Sensors"), Just("ESPInfo"),
                Just("Notify"), Just("HeaterTimeoutInfo")
            ],
            rest in prop::collection::vec("[a-z0-9.;:-]{0,6}", 0..9)
        ) {
            let mut text = keyword.to_string();
            for token in rest {
                text.push(',');
                text.push_str(&token);
            }
            let _ = decode(&text);
        }
    }
}
