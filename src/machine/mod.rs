//! The machine context object
//!
//! [`Machine`] is a cheap-to-clone handle to everything the supervisor
//! knows and owns: the runtime state, the device link, configuration,
//! collaborators and the event channel. The read loop, the watchdog and any
//! outer API layer all work through clones of the same handle.
//!
//! # Locking
//!
//! All runtime state sits behind one mutex. Frame processing holds it only
//! while the transition engine runs; the resulting effects (sounds, shot
//! calls, writes, flashing) execute after it is released.

pub mod notifications;
pub mod profile;
pub mod state;
pub mod worker;

pub use notifications::{Notification, NotificationBridge, NotificationResponse};
pub use profile::PreparedProfile;
pub use state::{Effect, EnginePolicy, MachineRuntimeState, MachineSnapshot, ShotCall, ShotTarget};
pub use worker::WorkerHandles;

use crate::collaborators::{Collaborators, ShotSink};
use crate::config::{ConfigStore, MachineConfig, RuntimeSettings};
use crate::error::{MachineError, Result};
use crate::events::{EventEmitter, EventReceiver, EVENT_CHANNEL_CAPACITY};
use crate::firmware::{FirmwareVersion, UpdateOrchestrator};
use crate::protocol::{
    action_command, nvs_write_command, Frame, MachineIdentity, NvsKey, ETX, PLACEHOLDER_IDENTITY,
};
use crate::transport::{DeviceLink, Transport, TransportStats};
use crate::types::{Action, BrewState, MachineStatus, Sound};
use rand::Rng;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

struct Inner {
    state: Mutex<MachineRuntimeState>,
    link: DeviceLink,
    config: Arc<dyn ConfigStore>,
    collaborators: Collaborators,
    events: EventEmitter,
    running: AtomicBool,
}

/// Handle to the supervised machine
#[derive(Clone)]
pub struct Machine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("link", &self.inner.link)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// `999` followed by five random digits, for machines without a serial
pub fn generate_random_serial() -> String {
    let digits: u32 = rand::rng().random_range(0..100_000);
    format!("999{digits:05}")
}

fn is_unassigned(value: &str) -> bool {
    value.is_empty() || value == PLACEHOLDER_IDENTITY
}

impl Machine {
    /// Create the machine and the receiver for its real-time events
    ///
    /// `firmware_available` is the version of the bundled image; without it
    /// the running firmware is never considered outdated.
    pub fn new(
        config: Arc<dyn ConfigStore>,
        collaborators: Collaborators,
        firmware_available: Option<FirmwareVersion>,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = EventEmitter::channel(EVENT_CHANNEL_CAPACITY);
        let machine = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MachineRuntimeState::new(firmware_available, Instant::now())),
                link: DeviceLink::new(),
                config,
                collaborators,
                events,
                running: AtomicBool::new(false),
            }),
        };
        (machine, receiver)
    }

    fn state(&self) -> MutexGuard<'_, MachineRuntimeState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn link(&self) -> &DeviceLink {
        &self.inner.link
    }

    pub fn config(&self) -> MachineConfig {
        self.inner.config.snapshot()
    }

    /// Attach the transport and start the read loop and watchdog
    ///
    /// Only the first call succeeds; later calls are logged and rejected
    /// without touching the running link.
    pub fn start(
        &self,
        transport: Box<dyn Transport>,
        settings: &RuntimeSettings,
    ) -> Result<WorkerHandles> {
        if let Err(e) = self.inner.link.attach(transport) {
            tracing::warn!("Machine::start was called twice, keeping the first transport");
            return Err(e);
        }

        self.write(&[ETX]);
        self.send_action(Action::Info);

        self.inner.running.store(true, Ordering::SeqCst);
        let read_loop = worker::spawn_read_loop(self.clone(), settings.suspended_poll, settings.idle_poll)?;
        let watchdog = worker::spawn_watchdog(self.clone(), settings.watchdog_delay)?;
        Ok(WorkerHandles {
            read_loop,
            watchdog,
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Ask the worker threads to exit
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    fn write(&self, bytes: &[u8]) -> bool {
        self.inner.link.write(bytes)
    }

    fn send_action(&self, action: Action) -> bool {
        tracing::info!("Sending action,{}", action);
        self.write(&action_command(action))
    }

    /// Send an action to the core
    ///
    /// `start` without a loaded profile first streams the catalog's last
    /// profile. `reset` resets the transport instead of reaching the core.
    /// Writes are dropped while the link is suspended.
    pub fn action(&self, action: Action) -> Result<()> {
        let profile_ready = self.state().profile_ready();
        match action {
            Action::Reset => return self.reset(),
            Action::Start if !profile_ready => {
                tracing::warn!("No profile loaded, sending the last profile to the core");
                let Some(profile) = self.inner.collaborators.profiles.last_profile() else {
                    tracing::error!("No last profile is known, cannot start");
                    return Err(MachineError::NoProfileLoaded);
                };
                self.send_profile(&profile)?;
            }
            _ => {}
        }
        self.send_action(action);
        Ok(())
    }

    /// [`Machine::action`] by wire name; `info` is not accepted
    pub fn action_by_name(&self, name: &str) -> Result<()> {
        self.action(name.parse()?)
    }

    /// Reset the core through the transport and forget readiness
    pub fn reset(&self) -> Result<()> {
        let result = self.inner.link.with_transport(|t| t.reset()).and_then(|r| r);
        self.state().on_transport_reset(Instant::now());
        result
    }

    /// Stream a profile to the core with its hash preamble
    ///
    /// The profile only counts as loaded if both commands reached the
    /// transport and the core did not reboot in between.
    pub fn send_profile(&self, profile: &Value) -> Result<()> {
        let prepared = PreparedProfile::new(profile)?;
        tracing::debug!("Profile to stream: {}", prepared.payload);
        tracing::info!("Profile hash: {}", prepared.digest);

        let generation = self.state().link_generation();
        let started = Instant::now();
        let delivered = prepared.frames().iter().all(|frame| self.write(frame));
        tracing::info!(
            "Streaming profile to the core took {}",
            profile::format_elapsed(started.elapsed())
        );

        if !delivered {
            return Err(if self.inner.link.is_suspended() {
                MachineError::LinkSuspended
            } else {
                MachineError::TransferIncomplete("profile was not fully written".to_string())
            });
        }

        if !self.state().mark_profile_ready(generation) {
            tracing::warn!("The core rebooted while the profile was streamed");
            return Err(MachineError::TransferIncomplete(
                "core rebooted during the profile transfer".to_string(),
            ));
        }
        Ok(())
    }

    /// Program the identity into the core's key-value store and persist it
    ///
    /// A missing serial number is replaced by a random one.
    pub fn set_serial(&self, mut identity: MachineIdentity) -> Result<()> {
        if is_unassigned(&identity.serial_number) {
            identity.serial_number = generate_random_serial();
            tracing::warn!("No serial number given, assigned {}", identity.serial_number);
        }

        let fields = [
            (NvsKey::Color, &identity.color),
            (NvsKey::SerialNumber, &identity.serial_number),
            (NvsKey::BatchNumber, &identity.batch_number),
            (NvsKey::BuildDate, &identity.build_date),
        ];
        for (key, value) in fields {
            if !self.write(&nvs_write_command(key, value)) {
                tracing::warn!("Failed to write {} to the core", key.as_str());
            }
        }

        let summary = format!(
            "Serial number: {}\nBatch number: {}\nColor: {}\nBuild Date: {}",
            identity.serial_number, identity.batch_number, identity.color, identity.build_date
        );
        self.inner
            .collaborators
            .notifications
            .enqueue(Notification::new(summary, vec![NotificationResponse::Ok]));

        self.inner
            .config
            .update(&mut |c| c.system.set_identity(&identity));
        self.inner.config.save()
    }

    /// Abort the running profile
    ///
    /// While brewing the core is sent home; while it waits for the user, or
    /// outside a brew, it is stopped. Nothing happens when idle.
    pub fn end_profile(&self) {
        let action = {
            let state = self.state();
            if *state.status() == MachineStatus::Idle {
                return;
            }
            if *state.brew_state() == BrewState::Brewing && !state.status().waits_for_user() {
                Action::Home
            } else {
                Action::Stop
            }
        };
        self.send_action(action);
        self.inner.collaborators.sounds.play(Sound::Abort);
    }

    fn orchestrator(&self) -> UpdateOrchestrator<'_> {
        UpdateOrchestrator::new(
            &self.inner.link,
            self.inner.collaborators.notifications.as_ref(),
        )
    }

    /// Flash the bundled firmware
    pub fn flash(&self) -> Result<()> {
        self.orchestrator().flash()
    }

    pub fn force_update(&self) -> Result<()> {
        self.orchestrator().force_update()
    }

    /// Watchdog check: flash if the core never reported its info
    pub fn check_alive(&self) {
        if self.state().device_info_received() {
            tracing::info!("The core is alive");
            return;
        }
        if self.config().user.disallow_firmware_flashing {
            tracing::warn!("The core never sent its info, but firmware flashing is disabled");
            return;
        }
        tracing::warn!("The core never sent its info, flashing the bundled firmware");
        // Failures are already reported through the notification
        let _ = self.flash();
    }

    /// Mark the cached core notification acknowledged
    pub fn acknowledge_notification(&self, id: u64, response: Option<NotificationResponse>) -> bool {
        self.state().notifications_mut().acknowledge(id, response)
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        self.state().snapshot(Instant::now())
    }

    pub fn transport_stats(&self) -> Option<TransportStats> {
        self.inner.link.stats()
    }

    pub fn dropped_events(&self) -> u64 {
        self.inner.events.dropped_events()
    }

    /// Decode and act on frames in arrival order
    pub fn process_frames(&self, frames: Vec<Frame>) {
        if frames.is_empty() {
            return;
        }
        let config = self.config();
        let policy = EnginePolicy::from(&config);
        for frame in frames {
            let text = match frame.text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Dropping frame that is not valid UTF-8: {}", e);
                    continue;
                }
            };
            if config.logging.sensor_messages {
                tracing::info!("{}", text);
            }
            self.process_frame_with(text, &policy);
        }
    }

    /// Act on one frame's text
    pub fn process_frame(&self, text: &str) {
        let policy = EnginePolicy::from(&self.config());
        self.process_frame_with(text, &policy);
    }

    fn process_frame_with(&self, text: &str, policy: &EnginePolicy) {
        let effects = self.state().process_frame(text, policy, Instant::now());
        self.execute(effects);
    }

    fn shot_sink(&self, target: ShotTarget) -> &dyn ShotSink {
        match target {
            ShotTarget::Recorder => self.inner.collaborators.recorder.as_ref(),
            ShotTarget::Debug => self.inner.collaborators.debug.as_ref(),
        }
    }

    fn execute(&self, effects: Vec<Effect>) {
        let collaborators = &self.inner.collaborators;
        for effect in effects {
            match effect {
                Effect::Sound(sound) => collaborators.sounds.play(sound),
                Effect::Shot(target, call) => {
                    let sink = self.shot_sink(target);
                    match call {
                        ShotCall::Start => sink.start(),
                        ShotCall::Stop => sink.stop(),
                        ShotCall::Sample(sample) => sink.handle_sample(&sample),
                        ShotCall::Sensor(sample) => sink.handle_sensor_sample(&sample),
                    }
                }
                Effect::Emit(event) => self.inner.events.emit(event),
                Effect::Notify(notification) => collaborators.notifications.enqueue(notification),
                Effect::SendAction(action) => {
                    self.send_action(action);
                }
                Effect::PersistIdentity(identity) => self.persist_identity(&identity),
                Effect::Flash => {
                    let _ = self.flash();
                }
                Effect::ForceUpdate => {
                    let _ = self.force_update();
                }
                Effect::EndProfile => self.end_profile(),
            }
        }
    }

    fn persist_identity(&self, identity: &MachineIdentity) {
        if self.config().system.identity() == *identity {
            return;
        }
        tracing::info!("Persisting machine identity {}", identity.serial_number);
        self.inner
            .config
            .update(&mut |c| c.system.set_identity(identity));
        if let Err(e) = self.inner.config.save() {
            tracing::error!("Failed to save machine identity: {}", e);
        }
    }
}
