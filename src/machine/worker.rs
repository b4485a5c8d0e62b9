//! Background threads driving the machine
//!
//! The read loop pulls bytes from the device link, splits them into frames
//! and hands them to [`Machine::process_frames`] in arrival order. The
//! watchdog fires once, some time after start, and flashes the core if it
//! never answered the info request.

use super::Machine;
use crate::error::Result;
use crate::protocol::{LineFramer, WAKE_SEQUENCE};
use crate::transport::MAX_READ_CHUNK;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest single sleep of the watchdog between shutdown checks
const WATCHDOG_TICK: Duration = Duration::from_millis(100);

/// Join handles of the worker threads started by [`Machine::start`]
#[derive(Debug)]
pub struct WorkerHandles {
    pub read_loop: JoinHandle<()>,
    pub watchdog: JoinHandle<()>,
}

impl WorkerHandles {
    /// Wait for both threads; they only return after [`Machine::shutdown`]
    pub fn join(self) {
        if self.read_loop.join().is_err() {
            tracing::error!("Read loop thread panicked");
        }
        if self.watchdog.join().is_err() {
            tracing::error!("Watchdog thread panicked");
        }
    }
}

/// Reads frames from the link until the machine shuts down
pub struct ReadWorker {
    machine: Machine,
    framer: LineFramer,
    buffer: Vec<u8>,
    suspended_poll: Duration,
    idle_poll: Duration,
    was_suspended: bool,
}

impl ReadWorker {
    pub fn new(machine: Machine, suspended_poll: Duration, idle_poll: Duration) -> Self {
        Self {
            machine,
            framer: LineFramer::new(),
            buffer: vec![0; MAX_READ_CHUNK],
            suspended_poll,
            idle_poll,
            was_suspended: false,
        }
    }

    /// Run the main read loop
    pub fn run(&mut self) {
        tracing::info!("Read loop started");
        let link = self.machine.link();

        if let Err(e) = link.with_transport(|t| t.clear_input()).and_then(|r| r) {
            tracing::warn!("Failed to clear the input buffer: {}", e);
        }
        link.write(WAKE_SEQUENCE);

        while self.machine.is_running() {
            self.step();
        }

        tracing::info!("Read loop stopped");
    }

    /// One iteration: wait out a suspension or read one chunk
    fn step(&mut self) {
        let link = self.machine.link();

        if link.is_suspended() {
            self.was_suspended = true;
            thread::sleep(self.suspended_poll);
            return;
        }

        // Bytes buffered before a flash belong to the old firmware
        if std::mem::take(&mut self.was_suspended) {
            self.framer.reset();
        }

        match link.read_chunk(&mut self.buffer) {
            Ok(0) => thread::sleep(self.idle_poll),
            Ok(n) => {
                let frames = self.framer.push(&self.buffer[..n]);
                link.record_frames(frames.len());
                self.machine.process_frames(frames);
            }
            Err(e) => {
                tracing::warn!("Reading from the core failed: {}", e);
                thread::sleep(self.suspended_poll);
            }
        }
    }
}

pub(crate) fn spawn_read_loop(
    machine: Machine,
    suspended_poll: Duration,
    idle_poll: Duration,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("machine-serial".to_string())
        .spawn(move || ReadWorker::new(machine, suspended_poll, idle_poll).run())?;
    Ok(handle)
}

pub(crate) fn spawn_watchdog(machine: Machine, delay: Duration) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("firmware-watchdog".to_string())
        .spawn(move || {
            let deadline = Instant::now() + delay;
            loop {
                if !machine.is_running() {
                    return;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                thread::sleep(remaining.min(WATCHDOG_TICK));
            }
            machine.check_alive();
        })?;
    Ok(handle)
}
