//! Runtime state and the frame transition engine
//!
//! [`MachineRuntimeState::process_frame`] is the whole per-frame state
//! machine. It mutates the state and returns the side effects it decided on,
//! in the order they must happen. It performs no I/O itself: the caller runs
//! it under the state lock and executes the effects after releasing it, so
//! collaborators never observe a half-applied update and may call back into
//! the machine.

use super::notifications::{Notification, NotificationBridge};
use crate::config::MachineConfig;
use crate::events::MachineEvent;
use crate::firmware::FirmwareVersion;
use crate::protocol::{
    decode, is_reboot_signature, ButtonEvent, DecodedMessage, DeviceInfo, HeaterTimeoutInfo,
    MachineIdentity, NotifyMessage, SensorSample, ShotSample,
};
use crate::types::{Action, BrewState, ButtonKind, MachineStatus, Sound};
use serde::Serialize;
use std::time::Instant;

/// Consecutive reboots after which the firmware is reflashed
pub const REBOOT_LOOP_THRESHOLD: u32 = 3;

/// Which shot subsystem a call is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotTarget {
    /// Records brews for the user's history
    Recorder,
    /// Records everything from leaving idle to returning to it
    Debug,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShotCall {
    Start,
    Stop,
    Sample(ShotSample),
    Sensor(SensorSample),
}

/// A side effect decided while processing a frame
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Sound(Sound),
    Shot(ShotTarget, ShotCall),
    Emit(MachineEvent),
    Notify(Notification),
    SendAction(Action),
    PersistIdentity(MachineIdentity),
    /// Running firmware is outdated and flashing is allowed
    Flash,
    /// The core is stuck in a reboot loop
    ForceUpdate,
    EndProfile,
}

/// Configuration the engine consults per frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnginePolicy {
    pub allow_flashing: bool,
    pub heat_on_boot: bool,
}

impl From<&MachineConfig> for EnginePolicy {
    fn from(config: &MachineConfig) -> Self {
        Self {
            allow_flashing: !config.user.disallow_firmware_flashing,
            heat_on_boot: config.user.heat_on_boot,
        }
    }
}

/// Everything the supervisor knows about the machine
#[derive(Debug, Clone)]
pub struct MachineRuntimeState {
    /// Status of the sample before the last one processed
    previous_status: MachineStatus,
    is_idle: bool,
    elapsed_ms: u64,
    brew_started_at: Option<Instant>,
    /// Reset on reboot and on `reset()`
    clock_reference: Instant,
    reset_count: u32,
    info_ready: bool,
    info_requested: bool,
    profile_ready: bool,
    /// Bumped on every reboot and transport reset
    link_generation: u64,
    last_sample: ShotSample,
    last_sensor: Option<SensorSample>,
    device_info: Option<DeviceInfo>,
    /// Set by the first DeviceInfo of the process, never cleared
    device_info_received: bool,
    heater: Option<HeaterTimeoutInfo>,
    previous_preheat_remaining: u32,
    firmware_running: Option<FirmwareVersion>,
    firmware_available: Option<FirmwareVersion>,
    notifications: NotificationBridge,
}

impl MachineRuntimeState {
    pub fn new(firmware_available: Option<FirmwareVersion>, now: Instant) -> Self {
        Self {
            previous_status: MachineStatus::Idle,
            is_idle: true,
            elapsed_ms: 0,
            brew_started_at: None,
            clock_reference: now,
            reset_count: 0,
            info_ready: false,
            info_requested: false,
            profile_ready: false,
            link_generation: 0,
            last_sample: ShotSample::default(),
            last_sensor: None,
            device_info: None,
            device_info_received: false,
            heater: None,
            previous_preheat_remaining: 0,
            firmware_running: None,
            firmware_available,
            notifications: NotificationBridge::new(),
        }
    }

    pub fn status(&self) -> &MachineStatus {
        &self.last_sample.status
    }

    pub fn brew_state(&self) -> &BrewState {
        &self.last_sample.state
    }

    pub fn is_idle(&self) -> bool {
        self.is_idle
    }

    pub fn is_brewing(&self) -> bool {
        self.brew_started_at.is_some()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn reset_count(&self) -> u32 {
        self.reset_count
    }

    pub fn info_ready(&self) -> bool {
        self.info_ready
    }

    pub fn profile_ready(&self) -> bool {
        self.profile_ready
    }

    pub fn set_profile_ready(&mut self, ready: bool) {
        self.profile_ready = ready;
    }

    pub fn link_generation(&self) -> u64 {
        self.link_generation
    }

    /// Mark a profile streamed during `generation` as loaded
    ///
    /// Returns false, leaving the flag untouched, if the core rebooted or the
    /// transport was reset since.
    pub fn mark_profile_ready(&mut self, generation: u64) -> bool {
        if generation != self.link_generation {
            return false;
        }
        self.profile_ready = true;
        true
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    pub fn device_info_received(&self) -> bool {
        self.device_info_received
    }

    pub fn last_sample(&self) -> &ShotSample {
        &self.last_sample
    }

    pub fn last_sensor(&self) -> Option<&SensorSample> {
        self.last_sensor.as_ref()
    }

    pub fn firmware_running(&self) -> Option<&FirmwareVersion> {
        self.firmware_running.as_ref()
    }

    pub fn firmware_available(&self) -> Option<&FirmwareVersion> {
        self.firmware_available.as_ref()
    }

    pub fn notifications(&self) -> &NotificationBridge {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationBridge {
        &mut self.notifications
    }

    /// Forget readiness after the transport was reset
    pub fn on_transport_reset(&mut self, now: Instant) {
        self.info_ready = false;
        self.profile_ready = false;
        self.link_generation += 1;
        self.clock_reference = now;
    }

    /// Run one frame through the state machine
    pub fn process_frame(&mut self, text: &str, policy: &EnginePolicy, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();

        if is_reboot_signature(text) {
            self.on_reboot(now);
        }

        if self.reset_count >= REBOOT_LOOP_THRESHOLD {
            tracing::warn!("The core keeps rebooting, forcing a firmware update");
            effects.push(Effect::ForceUpdate);
            self.reset_count = 0;
        }

        if self.info_ready && !self.info_requested && self.device_info.is_none() {
            tracing::info!("Core has not reported its firmware version yet, requesting it");
            effects.push(Effect::SendAction(Action::Info));
            self.info_requested = true;
        }

        let was_ready = self.info_ready;

        match decode(text) {
            DecodedMessage::Button(event) => self.on_button(event, &mut effects),
            DecodedMessage::Shot(sample) => self.on_shot(sample, now, &mut effects),
            DecodedMessage::Sensors(sample) => self.on_sensors(sample, &mut effects),
            DecodedMessage::Info(info) => self.on_info(info, policy, &mut effects),
            DecodedMessage::Notify(notify) => self.on_notify(&notify, &mut effects),
            DecodedMessage::HeaterTimeout(info) => self.on_heater_timeout(info, &mut effects),
            DecodedMessage::Raw(line) => tracing::info!("{}", line),
        }

        if !was_ready && self.info_ready && policy.heat_on_boot && self.is_idle {
            tracing::info!("Core is ready, preheating on boot");
            effects.push(Effect::SendAction(Action::Preheat));
        }

        effects
    }

    fn on_reboot(&mut self, now: Instant) {
        self.reset_count += 1;
        self.clock_reference = now;
        self.device_info = None;
        self.info_requested = false;
        self.info_ready = false;
        self.profile_ready = false;
        self.link_generation += 1;
        tracing::warn!("Core rebooted ({} in a row)", self.reset_count);
    }

    fn on_shot(&mut self, sample: ShotSample, now: Instant, effects: &mut Vec<Effect>) {
        use MachineStatus::*;

        let old = self.previous_status.clone();
        let new = &sample.status;
        self.is_idle = *new == Idle;
        let heating = *new == Heating;
        let preparing = *new == ClosingValve;
        let retracting = *new == Retracting;
        let purging = *new == Purge;

        if preparing && *new != old {
            self.brew_started_at = Some(now);
            tracing::info!("Shot started");
            effects.push(Effect::Shot(ShotTarget::Recorder, ShotCall::Start));
            effects.push(Effect::Sound(Sound::BrewingStart));
        }

        if old == Idle && !self.is_idle {
            effects.push(Effect::Shot(ShotTarget::Debug, ShotCall::Start));
            if heating || preparing || retracting {
                self.elapsed_ms = 0;
            }
        }

        if self.is_idle && old != Idle {
            effects.push(Effect::Sound(Sound::Idle));
        }

        if self.is_idle || purging || retracting {
            if self.brew_started_at.take().is_some() {
                effects.push(Effect::Sound(Sound::BrewingEnd));
            }
            effects.push(Effect::Shot(ShotTarget::Recorder, ShotCall::Stop));
        }

        if self.is_idle {
            effects.push(Effect::Shot(ShotTarget::Debug, ShotCall::Stop));
        }

        if heating && old != Heating {
            self.elapsed_ms = 0;
            effects.push(Effect::Sound(Sound::HeatingStart));
        }

        if old == Heating && !heating {
            effects.push(Effect::Sound(Sound::HeatingEnd));
        }

        let stamped = match self.brew_started_at {
            Some(started) => {
                self.elapsed_ms = now.saturating_duration_since(started).as_millis() as u64;
                let stamped = sample.stamped(self.elapsed_ms, true);
                effects.push(Effect::Shot(
                    ShotTarget::Recorder,
                    ShotCall::Sample(stamped.clone()),
                ));
                stamped
            }
            None => sample.stamped(self.elapsed_ms, false),
        };

        effects.push(Effect::Shot(ShotTarget::Debug, ShotCall::Sample(stamped.clone())));
        self.previous_status = stamped.status.clone();
        self.last_sample = stamped;
        self.info_ready = true;
    }

    fn on_sensors(&mut self, sample: SensorSample, effects: &mut Vec<Effect>) {
        self.reset_count = 0;
        effects.push(Effect::Shot(ShotTarget::Debug, ShotCall::Sensor(sample.clone())));
        if self.is_brewing() {
            effects.push(Effect::Shot(ShotTarget::Recorder, ShotCall::Sensor(sample.clone())));
        }
        self.last_sensor = Some(sample);
    }

    fn on_info(&mut self, info: DeviceInfo, policy: &EnginePolicy, effects: &mut Vec<Effect>) {
        self.reset_count = 0;
        self.info_ready = true;
        self.info_requested = false;
        self.device_info_received = true;
        self.firmware_running = FirmwareVersion::parse(&info.firmware);

        if info.identity.is_complete() {
            effects.push(Effect::PersistIdentity(info.identity.clone()));
        }

        tracing::info!(
            "Core running firmware {} on pinout {} (color: {}, serial: {}, batch: {}, built: {})",
            info.firmware,
            info.pinout,
            info.identity.color,
            info.identity.serial_number,
            info.identity.batch_number,
            info.identity.build_date
        );
        match &self.firmware_available {
            Some(available) => tracing::info!("Available firmware version: {}", available),
            None => tracing::info!("No bundled firmware version available"),
        }

        if FirmwareVersion::is_outdated(
            self.firmware_running.as_ref(),
            self.firmware_available.as_ref(),
        ) {
            let running = self
                .firmware_running
                .as_ref()
                .map(|v| format!("{}-{}", v.release, v.extra_commits))
                .unwrap_or_default();
            if policy.allow_flashing {
                tracing::info!("Firmware {} is outdated, upgrading", running);
                effects.push(Effect::Flash);
            } else {
                tracing::warn!("Firmware {} is outdated, but flashing is disabled", running);
            }
        }

        self.device_info = Some(info);
    }

    fn on_button(&mut self, event: ButtonEvent, effects: &mut Vec<Effect>) {
        if !event.kind.is_rotation() {
            tracing::debug!("Button event received: {:?}", event);
        }
        let double_press = event.kind == ButtonKind::EncoderDouble;
        effects.push(Effect::Emit(MachineEvent::Button(event)));
        if double_press {
            tracing::info!("Encoder double press, ending the current profile");
            effects.push(Effect::EndProfile);
        }
    }

    fn on_notify(&mut self, notify: &NotifyMessage, effects: &mut Vec<Effect>) {
        effects.push(Effect::Notify(self.notifications.on_notify(notify)));
    }

    fn on_heater_timeout(&mut self, info: HeaterTimeoutInfo, effects: &mut Vec<Effect>) {
        let remaining = info.preheat_remaining;
        self.heater = Some(info);
        effects.push(Effect::Emit(MachineEvent::HeaterStatus(remaining)));
        if remaining == 0 && self.previous_preheat_remaining != 0 {
            tracing::info!("Heater status: off");
        }
        self.previous_preheat_remaining = remaining;
    }

    /// Consistent copy of the externally visible state
    pub fn snapshot(&self, now: Instant) -> MachineSnapshot {
        MachineSnapshot {
            status: self.last_sample.status.clone(),
            state: self.last_sample.state.clone(),
            is_idle: self.is_idle,
            brewing: self.is_brewing(),
            elapsed_ms: self.elapsed_ms,
            reset_count: self.reset_count,
            info_ready: self.info_ready,
            profile_ready: self.profile_ready,
            uptime_ms: now.saturating_duration_since(self.clock_reference).as_millis() as u64,
            last_sample: self.last_sample.clone(),
            last_sensor: self.last_sensor.clone(),
            device_info: self.device_info.clone(),
            preheat_remaining: self.heater.map(|h| h.preheat_remaining),
            firmware_running: self.firmware_running.clone(),
            firmware_available: self.firmware_available.clone(),
            notification: self.notifications.current().clone(),
        }
    }
}

/// Serializable view of [`MachineRuntimeState`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSnapshot {
    pub status: MachineStatus,
    pub state: BrewState,
    pub is_idle: bool,
    pub brewing: bool,
    pub elapsed_ms: u64,
    pub reset_count: u32,
    pub info_ready: bool,
    pub profile_ready: bool,
    /// Time since the last (re)connection of the core
    pub uptime_ms: u64,
    pub last_sample: ShotSample,
    pub last_sensor: Option<SensorSample>,
    pub device_info: Option<DeviceInfo>,
    pub preheat_remaining: Option<u32>,
    pub firmware_running: Option<FirmwareVersion>,
    pub firmware_available: Option<FirmwareVersion>,
    pub notification: Notification,
}
