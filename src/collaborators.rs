//! Interfaces to the subsystems the engine drives but does not own
//!
//! The engine decides *when* a shot starts, which sound fires or which
//! notification is shown; rendering audio, persisting shots and presenting
//! notifications belong to the implementations plugged in here.
//!
//! [`Collaborators::default`] wires logging no-ops so the engine can run on
//! its own.

use crate::machine::notifications::Notification;
use crate::protocol::{SensorSample, ShotSample};
use crate::types::Sound;
use serde_json::Value;
use std::sync::Arc;

/// Receiver of shot lifecycle calls (shot recorder and shot debug log)
#[cfg_attr(test, mockall::automock)]
pub trait ShotSink: Send + Sync {
    fn start(&self);

    fn stop(&self);

    /// A `Data` sample stamped with the engine's brew clock
    fn handle_sample(&self, sample: &ShotSample);

    fn handle_sensor_sample(&self, sample: &SensorSample);
}

/// Audible feedback
#[cfg_attr(test, mockall::automock)]
pub trait SoundPlayer: Send + Sync {
    fn play(&self, sound: Sound);
}

/// User-facing notification queue
///
/// Enqueuing a notification with an id already queued replaces it.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationQueue: Send + Sync {
    fn enqueue(&self, notification: Notification);
}

/// Source of the most recently used brewing profile
#[cfg_attr(test, mockall::automock)]
pub trait ProfileCatalog: Send + Sync {
    fn last_profile(&self) -> Option<Value>;
}

/// Shot sink that only logs lifecycle calls
#[derive(Debug, Clone, Copy)]
pub struct LoggingShotSink {
    name: &'static str,
}

impl LoggingShotSink {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl ShotSink for LoggingShotSink {
    fn start(&self) {
        tracing::debug!("{}: start", self.name);
    }

    fn stop(&self) {
        tracing::debug!("{}: stop", self.name);
    }

    fn handle_sample(&self, sample: &ShotSample) {
        tracing::trace!("{}: sample at {} ms", self.name, sample.time_ms);
    }

    fn handle_sensor_sample(&self, sample: &SensorSample) {
        tracing::trace!("{}: {} sensor channels", self.name, sample.channels.len());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSoundPlayer;

impl SoundPlayer for LoggingSoundPlayer {
    fn play(&self, sound: Sound) {
        tracing::debug!("Sound event: {}", sound);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotificationQueue;

impl NotificationQueue for LoggingNotificationQueue {
    fn enqueue(&self, notification: Notification) {
        tracing::info!(
            "Notification #{}: {}",
            notification.id,
            notification.message.trim()
        );
    }
}

/// Catalog without profiles
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyProfileCatalog;

impl ProfileCatalog for EmptyProfileCatalog {
    fn last_profile(&self) -> Option<Value> {
        None
    }
}

/// Everything the engine calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub recorder: Arc<dyn ShotSink>,
    pub debug: Arc<dyn ShotSink>,
    pub sounds: Arc<dyn SoundPlayer>,
    pub notifications: Arc<dyn NotificationQueue>,
    pub profiles: Arc<dyn ProfileCatalog>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            recorder: Arc::new(LoggingShotSink::new("shot recorder")),
            debug: Arc::new(LoggingShotSink::new("shot debug")),
            sounds: Arc::new(LoggingSoundPlayer),
            notifications: Arc::new(LoggingNotificationQueue),
            profiles: Arc::new(EmptyProfileCatalog),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    pub fn with_recorder(mut self, recorder: Arc<dyn ShotSink>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_debug(mut self, debug: Arc<dyn ShotSink>) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_sounds(mut self, sounds: Arc<dyn SoundPlayer>) -> Self {
        self.sounds = sounds;
        self
    }

    pub fn with_notifications(mut self, notifications: Arc<dyn NotificationQueue>) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileCatalog>) -> Self {
        self.profiles = profiles;
        self
    }
}
