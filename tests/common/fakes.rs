//! Recording collaborators and a machine harness over the emulator

use espresso_supervisor::collaborators::{
    Collaborators, NotificationQueue, ProfileCatalog, ShotSink, SoundPlayer,
};
use espresso_supervisor::config::{BackendKind, MemoryConfigStore, RuntimeSettings};
use espresso_supervisor::machine::{Notification, WorkerHandles};
use espresso_supervisor::protocol::{SensorSample, ShotSample, WAKE_SEQUENCE};
use espresso_supervisor::transport::{EmulatorHandle, EmulatorTransport};
use espresso_supervisor::{EventReceiver, FirmwareVersion, Machine, Sound};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A call seen by a [`RecordingShotSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum ShotEvent {
    Start,
    Stop,
    Sample(ShotSample),
    Sensor(SensorSample),
}

#[derive(Debug, Default)]
pub struct RecordingShotSink {
    calls: Mutex<Vec<ShotEvent>>,
}

impl RecordingShotSink {
    pub fn calls(&self) -> Vec<ShotEvent> {
        self.calls.lock().unwrap().clone()
    }

    pub fn samples(&self) -> Vec<ShotSample> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ShotEvent::Sample(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &ShotEvent) -> usize {
        self.calls().iter().filter(|c| *c == wanted).count()
    }
}

impl ShotSink for RecordingShotSink {
    fn start(&self) {
        self.calls.lock().unwrap().push(ShotEvent::Start);
    }

    fn stop(&self) {
        self.calls.lock().unwrap().push(ShotEvent::Stop);
    }

    fn handle_sample(&self, sample: &ShotSample) {
        self.calls.lock().unwrap().push(ShotEvent::Sample(sample.clone()));
    }

    fn handle_sensor_sample(&self, sample: &SensorSample) {
        self.calls.lock().unwrap().push(ShotEvent::Sensor(sample.clone()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingSounds {
    played: Mutex<Vec<Sound>>,
}

impl RecordingSounds {
    pub fn played(&self) -> Vec<Sound> {
        self.played.lock().unwrap().clone()
    }
}

impl SoundPlayer for RecordingSounds {
    fn play(&self, sound: Sound) {
        self.played.lock().unwrap().push(sound);
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifications {
    queued: Mutex<Vec<Notification>>,
}

impl RecordingNotifications {
    pub fn queued(&self) -> Vec<Notification> {
        self.queued.lock().unwrap().clone()
    }
}

impl NotificationQueue for RecordingNotifications {
    fn enqueue(&self, notification: Notification) {
        self.queued.lock().unwrap().push(notification);
    }
}

#[derive(Debug, Default)]
pub struct FixedProfileCatalog {
    pub profile: Option<Value>,
}

impl ProfileCatalog for FixedProfileCatalog {
    fn last_profile(&self) -> Option<Value> {
        self.profile.clone()
    }
}

/// A machine wired to recording collaborators and an emulated core
pub struct TestMachine {
    pub machine: Machine,
    pub events: EventReceiver,
    pub emulator: EmulatorHandle,
    pub config: Arc<MemoryConfigStore>,
    pub recorder: Arc<RecordingShotSink>,
    pub debug: Arc<RecordingShotSink>,
    pub sounds: Arc<RecordingSounds>,
    pub notifications: Arc<RecordingNotifications>,
    transport: Option<EmulatorTransport>,
}

impl TestMachine {
    /// Bundled firmware `1.2.0-7`; the emulator does not answer `info`
    pub fn new() -> Self {
        Self::with(None, EmulatorTransport::new().without_info_reply())
    }

    pub fn with(profile: Option<Value>, transport: EmulatorTransport) -> Self {
        let config = Arc::new(MemoryConfigStore::default());
        let recorder = Arc::new(RecordingShotSink::default());
        let debug = Arc::new(RecordingShotSink::default());
        let sounds = Arc::new(RecordingSounds::default());
        let notifications = Arc::new(RecordingNotifications::default());

        let collaborators = Collaborators::default()
            .with_recorder(recorder.clone())
            .with_debug(debug.clone())
            .with_sounds(sounds.clone())
            .with_notifications(notifications.clone())
            .with_profiles(Arc::new(FixedProfileCatalog { profile }));

        let (machine, events) = Machine::new(
            config.clone(),
            collaborators,
            FirmwareVersion::parse("1.2.0-7"),
        );
        let emulator = transport.handle();

        Self {
            machine,
            events,
            emulator,
            config,
            recorder,
            debug,
            sounds,
            notifications,
            transport: Some(transport),
        }
    }

    /// Settings with short polling intervals and the given watchdog delay
    pub fn settings(watchdog_delay: Duration) -> RuntimeSettings {
        let mut settings = RuntimeSettings::default()
            .with_backend(BackendKind::Emulator)
            .with_watchdog_delay(watchdog_delay);
        settings.suspended_poll = Duration::from_millis(5);
        settings.idle_poll = Duration::from_millis(1);
        settings
    }

    /// Start the workers over the emulator
    ///
    /// Returns once the read loop has cleared stale input and sent the wake
    /// sequence, so lines pushed afterwards are seen.
    pub fn start(&mut self, watchdog_delay: Duration) -> WorkerHandles {
        let transport = self.transport.take().expect("machine already started");
        let workers = self
            .machine
            .start(Box::new(transport), &Self::settings(watchdog_delay))
            .expect("first start succeeds");
        let emulator = self.emulator.clone();
        assert!(
            super::wait_until(super::test_timeout(), || emulator
                .written()
                .iter()
                .any(|w| w.as_slice() == WAKE_SEQUENCE)),
            "read loop did not start"
        );
        workers
    }

    pub fn stop(&self, workers: WorkerHandles) {
        self.machine.shutdown();
        workers.join();
    }
}
