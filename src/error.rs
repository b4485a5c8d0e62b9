//! Error handling for the supervisor
//!
//! This module defines the crate error type and a Result alias used
//! throughout the engine. Per-frame decode problems never surface here;
//! they are logged and the frame is dropped.

use thiserror::Error;

/// Main error type for supervisor operations
#[derive(Error, Debug)]
pub enum MachineError {
    /// Errors reported by a transport implementation
    #[error("Transport error: {0}")]
    Transport(String),

    /// Errors opening or configuring the serial port
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// The firmware flasher reported a failure
    #[error("Firmware flash failed: {0}")]
    Flash(String),

    /// A transport was already attached to this machine
    #[error("Machine is already initialized with a transport")]
    AlreadyInitialized,

    /// No transport has been attached yet
    #[error("Machine has no transport attached")]
    NotInitialized,

    /// Action name outside the allowed set
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// `start` requested but no profile could be loaded onto the device
    #[error("No profile loaded and no last profile available")]
    NoProfileLoaded,

    /// Communication is suspended while the firmware is being flashed
    #[error("Device link is suspended")]
    LinkSuspended,

    /// Part of a multi-write transfer did not reach the transport
    #[error("Transfer incomplete: {0}")]
    TransferIncomplete(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<MachineError>,
    },
}

impl MachineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        MachineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, MachineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| MachineError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| MachineError::Io(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MachineError::UnknownAction("brew".to_string());
        assert_eq!(err.to_string(), "Unknown action: brew");
    }

    #[test]
    fn test_error_with_context() {
        let err = MachineError::Flash("port busy".to_string());
        let with_ctx = err.with_context("Forced update");
        assert!(with_ctx.to_string().contains("Forced update"));
        assert!(with_ctx.to_string().contains("port busy"));
    }

    #[test]
    fn test_io_result_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = res.context("Reading firmware version").unwrap_err();
        assert!(err.to_string().starts_with("Reading firmware version"));
    }
}
