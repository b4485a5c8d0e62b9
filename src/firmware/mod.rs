//! Realtime core firmware lifecycle
//!
//! - [`FirmwareVersion`] - parsing and the outdated check
//! - [`UpdateOrchestrator`] - flashing with progress notifications

pub mod update;
pub mod version;

pub use update::UpdateOrchestrator;
pub use version::{FirmwareVersion, Release};
