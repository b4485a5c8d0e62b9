//! Byte transports to the realtime core
//!
//! This module provides a common trait for every way of reaching the core:
//! the on-board UART and USB adapters (via `serialport`) and an in-process
//! emulator for development and tests.
//!
//! [`DeviceLink`] wraps the single active transport. It enforces that only
//! one transport is ever attached, drops writes while communication is
//! suspended, and gives firmware flashing exclusive access to the device.

pub mod emulator;
pub mod serial;

pub use emulator::{EmulatorHandle, EmulatorTransport};
pub use serial::SerialTransport;

use crate::config::{BackendKind, RuntimeSettings};
use crate::error::{MachineError, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

/// Largest chunk pulled from the transport in one read
pub const MAX_READ_CHUNK: usize = 2048;

/// Duplex byte connection to the realtime core
pub trait Transport: Send {
    /// Human readable name for logs
    fn name(&self) -> &str;

    /// Bytes that can be read without blocking
    fn bytes_available(&mut self) -> Result<usize>;

    /// Read up to `buf.len()` bytes, returning 0 if nothing arrived before the timeout
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Discard anything received but not yet read
    fn clear_input(&mut self) -> Result<()>;

    /// Hardware reset of the core
    fn reset(&mut self) -> Result<()>;

    /// Write the bundled firmware image to the core
    fn send_firmware(&mut self) -> Result<()>;
}

/// Counters for traffic over the link
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransportStats {
    pub reads: u64,
    pub read_errors: u64,
    pub bytes_received: u64,
    pub frames_received: u64,
    pub total_read_time_us: u64,
    pub max_read_time_us: u64,
    pub writes: u64,
    pub write_errors: u64,
    pub bytes_written: u64,
    /// Writes discarded because the link was suspended
    pub writes_dropped: u64,
}

impl TransportStats {
    pub fn record_read(&mut self, bytes: usize, time_us: u64) {
        self.reads += 1;
        self.bytes_received += bytes as u64;
        self.total_read_time_us += time_us;
        self.max_read_time_us = self.max_read_time_us.max(time_us);
    }

    pub fn record_read_error(&mut self) {
        self.read_errors += 1;
    }

    pub fn record_write(&mut self, bytes: usize) {
        self.writes += 1;
        self.bytes_written += bytes as u64;
    }

    pub fn record_write_error(&mut self) {
        self.write_errors += 1;
    }

    pub fn avg_read_time_us(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            self.total_read_time_us as f64 / self.reads as f64
        }
    }

    /// Percentage of write attempts that reached the transport
    pub fn write_success_rate(&self) -> f64 {
        let total = self.writes + self.write_errors + self.writes_dropped;
        if total == 0 {
            100.0
        } else {
            (self.writes as f64 / total as f64) * 100.0
        }
    }
}

struct Attached {
    transport: Box<dyn Transport>,
    stats: TransportStats,
}

/// The process-wide connection to the core
#[derive(Default)]
pub struct DeviceLink {
    attached: OnceLock<Mutex<Attached>>,
    suspended: AtomicBool,
    writes_dropped: AtomicU64,
    frames_received: AtomicU64,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("attached", &self.is_attached())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

/// Clears the suspended flag when flashing finishes, even by unwinding
struct SuspendGuard<'a>(&'a AtomicBool);

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl DeviceLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the transport; only the first call succeeds
    pub fn attach(&self, transport: Box<dyn Transport>) -> Result<()> {
        let name = transport.name().to_string();
        self.attached
            .set(Mutex::new(Attached {
                transport,
                stats: TransportStats::default(),
            }))
            .map_err(|_| MachineError::AlreadyInitialized)?;
        tracing::info!("Attached transport {}", name);
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.attached.get().is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Attached>> {
        let attached = self.attached.get().ok_or(MachineError::NotInitialized)?;
        Ok(attached.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Write bytes, returning whether they reached the transport
    ///
    /// Writes while suspended are dropped silently. Transport failures are
    /// logged and dropped; nothing is retried.
    pub fn write(&self, bytes: &[u8]) -> bool {
        if self.is_suspended() {
            self.writes_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Link suspended, dropping {} byte write", bytes.len());
            return false;
        }

        let mut attached = match self.lock() {
            Ok(attached) => attached,
            Err(e) => {
                tracing::warn!("Dropping write: {}", e);
                return false;
            }
        };

        match attached.transport.write(bytes) {
            Ok(()) => {
                attached.stats.record_write(bytes.len());
                true
            }
            Err(e) => {
                attached.stats.record_write_error();
                tracing::warn!("Write to {} failed: {}", attached.transport.name(), e);
                false
            }
        }
    }

    /// Read whatever the transport has buffered into `buf`
    ///
    /// Returns `Ok(0)` without reading when nothing is buffered, so the link
    /// is never held across a blocking read; callers poll instead.
    pub fn read_chunk(&self, buf: &mut [u8]) -> Result<usize> {
        let mut attached = self.lock()?;
        let Attached { transport, stats } = &mut *attached;

        let available = transport.bytes_available()?;
        if available == 0 {
            return Ok(0);
        }
        let len = available.min(buf.len());
        let start = Instant::now();
        match transport.read(&mut buf[..len]) {
            Ok(n) => {
                stats.record_read(n, start.elapsed().as_micros() as u64);
                Ok(n)
            }
            Err(e) => {
                stats.record_read_error();
                Err(e)
            }
        }
    }

    /// Run `f` with exclusive access to the transport
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut dyn Transport) -> R) -> Result<R> {
        let mut attached = self.lock()?;
        Ok(f(attached.transport.as_mut()))
    }

    /// Suspend normal traffic and run `f` with exclusive access
    ///
    /// The read loop idles and writes are dropped until `f` returns.
    pub fn with_suspended<R>(&self, f: impl FnOnce(&mut dyn Transport) -> R) -> Result<R> {
        if !self.is_attached() {
            return Err(MachineError::NotInitialized);
        }
        self.suspended.store(true, Ordering::SeqCst);
        let _guard = SuspendGuard(&self.suspended);
        // Waits for an in-flight read to finish before taking over the device
        let mut attached = self.lock()?;
        Ok(f(attached.transport.as_mut()))
    }

    pub fn record_frames(&self, count: usize) {
        self.frames_received.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Current counters, or `None` before a transport is attached
    pub fn stats(&self) -> Option<TransportStats> {
        let mut stats = self.lock().ok()?.stats.clone();
        stats.writes_dropped = self.writes_dropped.load(Ordering::Relaxed);
        stats.frames_received = self.frames_received.load(Ordering::Relaxed);
        Some(stats)
    }
}

/// Build the transport selected by the runtime settings
pub fn open_transport(settings: &RuntimeSettings) -> Result<Box<dyn Transport>> {
    tracing::info!("Opening {} backend", settings.backend);
    match settings.backend {
        BackendKind::Fika | BackendKind::Usb => Ok(Box::new(SerialTransport::open(
            &settings.device_path,
            settings.baud_rate,
            settings.read_timeout,
            settings.firmware.clone(),
        )?)),
        BackendKind::Emulator => Ok(Box::new(
            EmulatorTransport::new().with_heartbeat(emulator::DEFAULT_HEARTBEAT),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ETX;

    #[test]
    fn test_attach_only_once() {
        let link = DeviceLink::new();
        assert!(!link.is_attached());
        link.attach(Box::new(EmulatorTransport::new())).unwrap();
        let second = link.attach(Box::new(EmulatorTransport::new()));
        assert!(matches!(second, Err(MachineError::AlreadyInitialized)));
    }

    #[test]
    fn test_write_without_transport_is_dropped() {
        let link = DeviceLink::new();
        assert!(!link.write(&[ETX]));
        assert!(link.stats().is_none());
        assert!(matches!(
            link.with_suspended(|_| ()),
            Err(MachineError::NotInitialized)
        ));
    }

    #[test]
    fn test_writes_dropped_while_suspended() {
        let emulator = EmulatorTransport::new();
        let handle = emulator.handle();
        let link = DeviceLink::new();
        link.attach(Box::new(emulator)).unwrap();

        assert!(link.write(b"before\x03"));
        link.with_suspended(|_| {
            assert!(link.is_suspended());
            assert!(!link.write(b"during\x03"));
        })
        .unwrap();
        assert!(!link.is_suspended());
        assert!(link.write(b"after\x03"));

        assert_eq!(
            handle.written(),
            vec![b"before\x03".to_vec(), b"after\x03".to_vec()]
        );
        let stats = link.stats().unwrap();
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.writes_dropped, 1);
    }

    #[test]
    fn test_read_chunk_records_stats() {
        let emulator = EmulatorTransport::new();
        let handle = emulator.handle();
        let link = DeviceLink::new();
        link.attach(Box::new(emulator)).unwrap();

        handle.push_line("Data,1,2,3,4,idle,idle,none");
        let mut buf = [0u8; MAX_READ_CHUNK];
        let n = link.read_chunk(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Data,1,2,3,4,idle,idle,none\n");

        let stats = link.stats().unwrap();
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.bytes_received, n as u64);
    }

    #[test]
    fn test_read_chunk_skips_read_when_empty() {
        let emulator = EmulatorTransport::new();
        let handle = emulator.handle();
        let link = DeviceLink::new();
        link.attach(Box::new(emulator)).unwrap();

        let mut buf = [0u8; MAX_READ_CHUNK];
        assert_eq!(link.read_chunk(&mut buf).unwrap(), 0);
        assert_eq!(link.stats().unwrap().reads, 0);

        // Larger bursts are split across chunks
        handle.push_incoming(&[b'x'; MAX_READ_CHUNK + 3]);
        assert_eq!(link.read_chunk(&mut buf).unwrap(), MAX_READ_CHUNK);
        assert_eq!(link.read_chunk(&mut buf).unwrap(), 3);
        assert_eq!(link.stats().unwrap().reads, 2);
    }

    #[test]
    fn test_write_success_rate() {
        let mut stats = TransportStats::default();
        assert_eq!(stats.write_success_rate(), 100.0);
        stats.record_write(4);
        stats.record_write_error();
        assert_eq!(stats.write_success_rate(), 50.0);
    }
}
