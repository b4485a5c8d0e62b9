//! # Espresso Supervisor: realtime core supervision
//!
//! Supervisory engine for an espresso machine. It owns the serial
//! conversation with the machine's realtime microcontroller (the "core"),
//! rebuilds protocol frames from the byte stream, tracks the brew state
//! machine, keeps the core's firmware current and streams brewing profiles
//! to it.
//!
//! ## Architecture
//!
//! - **Transport**: a [`transport::Transport`] trait over the serial port or
//!   an emulator, shared through a single [`transport::DeviceLink`]
//! - **Protocol**: line framing, typed decoding and command encoding
//! - **Machine**: the [`Machine`] handle, its transition engine and the
//!   read loop / watchdog threads
//! - **Collaborators**: shot recorders, sounds, notifications and the
//!   profile catalog are traits supplied by the embedding application
//! - **Events**: button and heater events on a bounded crossbeam channel
//!
//! ## Configuration
//!
//! Persistent settings are stored as JSON in the platform data directory
//! under `com.espresso.supervisor`:
//!
//! - **Linux**: `~/.local/share/com.espresso.supervisor/config.json`
//! - **macOS**: `~/Library/Application Support/com.espresso.supervisor/config.json`
//!
//! Runtime settings (backend, device path, log directory) come from the
//! environment, see [`config::RuntimeSettings::from_env`].
//!
//! ## Example
//!
//! ```no_run
//! use espresso_supervisor::{
//!     collaborators::Collaborators,
//!     config::{FileConfigStore, RuntimeSettings},
//!     transport::open_transport,
//!     Machine,
//! };
//! use std::sync::Arc;
//!
//! fn main() -> espresso_supervisor::Result<()> {
//!     let settings = RuntimeSettings::from_env();
//!     let config = Arc::new(FileConfigStore::open_default()?);
//!     let (machine, events) = Machine::new(config, Collaborators::default(), None);
//!
//!     let _workers = machine.start(open_transport(&settings)?, &settings)?;
//!     while let Ok(event) = events.recv_timeout(std::time::Duration::from_secs(1)) {
//!         if let Some(event) = event {
//!             println!("{}: {}", event.name(), event.payload());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod firmware;
pub mod machine;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigStore, MachineConfig, RuntimeSettings};
pub use error::{MachineError, Result};
pub use events::{EventReceiver, MachineEvent};
pub use firmware::FirmwareVersion;
pub use machine::{generate_random_serial, Machine, MachineSnapshot};
pub use types::{Action, BrewState, MachineStatus, Sound};
