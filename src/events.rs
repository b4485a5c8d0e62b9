//! Real-time events for external subscribers
//!
//! Button gestures and heater countdowns are pushed over a bounded
//! crossbeam channel. The emitter never blocks the read loop: when the
//! subscriber falls behind, events are dropped and counted.

use crate::protocol::ButtonEvent;
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default channel capacity; several seconds of encoder spinning
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// An externally visible event
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    Button(ButtonEvent),
    /// Seconds of preheat remaining
    HeaterStatus(u32),
}

impl MachineEvent {
    /// Event name as published to clients
    pub fn name(&self) -> &'static str {
        match self {
            MachineEvent::Button(_) => "button",
            MachineEvent::HeaterStatus(_) => "heater_status",
        }
    }

    /// JSON payload as published to clients
    pub fn payload(&self) -> Value {
        match self {
            MachineEvent::Button(event) => json!({
                "type": event.kind.keyword(),
                "kind": event.kind,
                "metadata": event.metadata,
            }),
            MachineEvent::HeaterStatus(remaining) => json!(remaining),
        }
    }
}

/// Sending side, owned by the machine
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: Sender<MachineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Create an emitter and the receiver it feeds
    pub fn channel(capacity: usize) -> (Self, EventReceiver) {
        let (sender, receiver) = bounded(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                sender,
                dropped: Arc::clone(&dropped),
            },
            EventReceiver { receiver, dropped },
        )
    }

    /// Publish without blocking; drops the event if the subscriber is behind
    pub fn emit(&self, event: MachineEvent) {
        if self.sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Subscriber side
#[derive(Debug)]
pub struct EventReceiver {
    receiver: Receiver<MachineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventReceiver {
    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<MachineEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive all pending events
    pub fn drain(&self) -> Vec<MachineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait up to `timeout` for the next event
    ///
    /// Returns `Ok(None)` on timeout and `Err` once the machine is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<MachineEvent>, RecvError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RecvError),
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ButtonKind;

    #[test]
    fn test_event_names_and_payloads() {
        let button = MachineEvent::Button(ButtonEvent::new(ButtonKind::EncoderDouble));
        assert_eq!(button.name(), "button");
        assert_eq!(button.payload()["type"], "pu_d");
        assert_eq!(button.payload()["kind"], "encoder_double");

        let heater = MachineEvent::HeaterStatus(42);
        assert_eq!(heater.name(), "heater_status");
        assert_eq!(heater.payload(), json!(42));
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        let (emitter, receiver) = EventEmitter::channel(2);
        for remaining in [3, 2, 1] {
            emitter.emit(MachineEvent::HeaterStatus(remaining));
        }
        assert_eq!(emitter.dropped_events(), 1);
        assert_eq!(receiver.dropped_events(), 1);
        assert_eq!(
            receiver.drain(),
            vec![MachineEvent::HeaterStatus(3), MachineEvent::HeaterStatus(2)]
        );
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_recv_timeout_reports_disconnect() {
        let (emitter, receiver) = EventEmitter::channel(1);
        assert_eq!(receiver.recv_timeout(Duration::from_millis(1)), Ok(None));
        drop(emitter);
        assert!(receiver.recv_timeout(Duration::from_millis(1)).is_err());
    }
}
