//! Serial port transport
//!
//! Used both for the on-board UART and for cores attached over a USB serial
//! adapter. Firmware is written by handing the port over to the external
//! flasher, so the port is closed for the duration of the flash and
//! reopened afterwards regardless of the outcome.

use super::Transport;
use crate::config::FirmwareSettings;
use crate::error::{MachineError, Result};
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// How long the enable line is held low during a reset
const RESET_PULSE: Duration = Duration::from_millis(100);

pub struct SerialTransport {
    path: PathBuf,
    name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
    firmware: FirmwareSettings,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

fn open_port(path: &Path, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialPort>> {
    let port = serialport::new(path.to_string_lossy(), baud_rate)
        .timeout(timeout)
        .open()
        .map_err(|e| {
            MachineError::from(e).with_context(format!("Failed to open serial port {}", path.display()))
        })?;
    Ok(port)
}

impl SerialTransport {
    pub fn open(
        path: impl Into<PathBuf>,
        baud_rate: u32,
        timeout: Duration,
        firmware: FirmwareSettings,
    ) -> Result<Self> {
        let path = path.into();
        let port = open_port(&path, baud_rate, timeout)?;
        tracing::info!("Opened {} at {} baud", path.display(), baud_rate);
        Ok(Self {
            name: format!("serial:{}", path.display()),
            path,
            baud_rate,
            timeout,
            port: Some(port),
            firmware,
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| MachineError::Transport(format!("{} is closed", self.path.display())))
    }

    fn reopen(&mut self) -> Result<()> {
        self.port = Some(open_port(&self.path, self.baud_rate, self.timeout)?);
        Ok(())
    }

    fn flasher_command(&self) -> Command {
        let mut command = Command::new(&self.firmware.flasher_program);
        command
            .arg("--chip")
            .arg(&self.firmware.chip)
            .arg("--port")
            .arg(&self.path)
            .arg("--baud")
            .arg(self.firmware.flash_baud.to_string())
            .arg("write_flash")
            .arg(&self.firmware.flash_offset)
            .arg(&self.firmware.image_path);
        command
    }

    fn run_flasher(&self) -> Result<()> {
        if !self.firmware.image_path.exists() {
            return Err(MachineError::Flash(format!(
                "firmware image {} not found",
                self.firmware.image_path.display()
            )));
        }

        tracing::info!(
            "Flashing {} to {} with {}",
            self.firmware.image_path.display(),
            self.path.display(),
            self.firmware.flasher_program
        );
        let output = self
            .flasher_command()
            .output()
            .map_err(|e| MachineError::Flash(format!("could not run flasher: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
        Err(MachineError::Flash(format!(
            "flasher exited with {}: {}",
            output.status,
            last_line.trim()
        )))
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        tracing::info!("Resetting core on {}", self.path.display());
        let port = self.port()?;
        // RTS drives the enable line, DTR the boot strap
        port.write_data_terminal_ready(false)?;
        port.write_request_to_send(true)?;
        std::thread::sleep(RESET_PULSE);
        port.write_request_to_send(false)?;
        port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn send_firmware(&mut self) -> Result<()> {
        // The flasher needs the port to itself
        self.port = None;
        let result = self.run_flasher();

        if let Err(e) = self.reopen() {
            tracing::error!("Failed to reopen {} after flashing: {}", self.path.display(), e);
            return result.and(Err(e));
        }
        result
    }
}
