//! In-process emulation of the realtime core
//!
//! The emulator lets the supervisor run without hardware and gives tests a
//! scripted device. Inbound traffic is queued through an [`EmulatorHandle`]
//! that stays valid after the transport has been handed to the machine.
//!
//! # Behaviour
//!
//! - Answers `action,info` with an `ESPInfo` line (configurable, can be disabled)
//! - Optionally streams an idle `Data` heartbeat
//! - Records every write for inspection
//! - Flashing succeeds unless a failure was scripted

use super::Transport;
use crate::error::{MachineError, Result};
use crate::protocol::action_command;
use crate::types::Action;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Firmware version reported by the emulator; high enough never to look outdated
pub const EMULATED_FIRMWARE: &str = "99.0.0-0-emulated";

/// Idle sample streamed as a heartbeat
pub const HEARTBEAT_LINE: &str = "Data,0.0,0.0,0.0,25.0,idle,idle,none,0";

/// Heartbeat interval used when the emulator stands in for a real core
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(1);

/// How long an empty read blocks
const EMPTY_READ_DELAY: Duration = Duration::from_millis(5);

fn default_info_line() -> String {
    format!("ESPInfo,{EMULATED_FIRMWARE},emulated,NOT_ASSIGNED,NOT_ASSIGNED,NOT_ASSIGNED,NOT_ASSIGNED")
}

#[derive(Debug)]
struct EmulatorState {
    incoming: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    info_reply: Option<String>,
    heartbeat: Option<Duration>,
    last_heartbeat: Instant,
    flash_result: std::result::Result<(), String>,
    flash_count: usize,
    reset_count: usize,
}

impl EmulatorState {
    fn push_line(&mut self, line: &str) {
        self.incoming.extend(line.as_bytes());
        self.incoming.push_back(b'\n');
    }
}

type SharedState = Arc<Mutex<EmulatorState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, EmulatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Emulated core
#[derive(Debug)]
pub struct EmulatorTransport {
    state: SharedState,
}

impl Default for EmulatorTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatorTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EmulatorState {
                incoming: VecDeque::new(),
                written: Vec::new(),
                info_reply: Some(default_info_line()),
                heartbeat: None,
                last_heartbeat: Instant::now(),
                flash_result: Ok(()),
                flash_count: 0,
                reset_count: 0,
            })),
        }
    }

    /// Reply to info requests with `line` instead of the default
    pub fn with_info_reply(self, line: impl Into<String>) -> Self {
        lock(&self.state).info_reply = Some(line.into());
        self
    }

    /// Never answer info requests
    pub fn without_info_reply(self) -> Self {
        lock(&self.state).info_reply = None;
        self
    }

    /// Stream an idle sample every `interval`
    pub fn with_heartbeat(self, interval: Duration) -> Self {
        lock(&self.state).heartbeat = Some(interval);
        self
    }

    /// Handle for scripting the device after the transport is moved away
    pub fn handle(&self) -> EmulatorHandle {
        EmulatorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Transport for EmulatorTransport {
    fn name(&self) -> &str {
        "emulator"
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let mut state = lock(&self.state);
        if let Some(interval) = state.heartbeat {
            if state.last_heartbeat.elapsed() >= interval {
                state.last_heartbeat = Instant::now();
                state.push_line(HEARTBEAT_LINE);
            }
        }
        Ok(state.incoming.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = {
            let mut state = lock(&self.state);
            let n = buf.len().min(state.incoming.len());
            for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
                *slot = byte;
            }
            n
        };
        if n == 0 {
            std::thread::sleep(EMPTY_READ_DELAY);
        }
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        state.written.push(bytes.to_vec());
        if bytes == action_command(Action::Info).as_slice() {
            if let Some(reply) = state.info_reply.clone() {
                state.push_line(&reply);
            }
        }
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        lock(&self.state).incoming.clear();
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.reset_count += 1;
        state.incoming.clear();
        Ok(())
    }

    fn send_firmware(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.flash_count += 1;
        tracing::info!("Emulated firmware flash #{}", state.flash_count);
        state.flash_result.clone().map_err(MachineError::Flash)
    }
}

/// Scripting and inspection handle for an [`EmulatorTransport`]
#[derive(Debug, Clone)]
pub struct EmulatorHandle {
    state: SharedState,
}

impl EmulatorHandle {
    /// Queue raw bytes as if the core had sent them
    pub fn push_incoming(&self, bytes: &[u8]) {
        lock(&self.state).incoming.extend(bytes);
    }

    /// Queue a line; the newline is appended
    pub fn push_line(&self, line: &str) {
        lock(&self.state).push_line(line);
    }

    /// Bytes not yet consumed by the reader
    pub fn pending_incoming(&self) -> usize {
        lock(&self.state).incoming.len()
    }

    /// Every write, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state).written.clone()
    }

    /// Every write as lossy text, in order
    pub fn written_text(&self) -> Vec<String> {
        lock(&self.state)
            .written
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn clear_written(&self) {
        lock(&self.state).written.clear();
    }

    /// Make subsequent flashes fail with `message`
    pub fn fail_flash(&self, message: impl Into<String>) {
        lock(&self.state).flash_result = Err(message.into());
    }

    pub fn flash_count(&self) -> usize {
        lock(&self.state).flash_count
    }

    pub fn reset_count(&self) -> usize {
        lock(&self.state).reset_count
    }
}
