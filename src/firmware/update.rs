//! Firmware flashing with user-facing progress
//!
//! Flashing takes the device link away from the read loop, so the user is
//! told up front that the machine's buttons stop working, and told again
//! whether it worked. Both messages reuse one notification so the queue
//! shows the outcome in place of the progress message.

use crate::collaborators::NotificationQueue;
use crate::error::{MachineError, Result};
use crate::machine::notifications::{Notification, NotificationResponse};
use crate::transport::DeviceLink;

pub const FLASH_STARTED_MESSAGE: &str = "Upgrading system realtime core. This will take around 20 seconds. The machine's buttons will be disabled during the upgrade";

pub const FLASH_SUCCEEDED_MESSAGE: &str =
    "The realtime core was upgraded successfully! Buttons will be enabled again in around 5 seconds";

/// User-facing text for a failed flash
pub fn flash_failed_message(error: &MachineError) -> String {
    format!(
        "Realtime core upgrade failed: {}. The machine will ensure a good state on next start. \
         If you encounter any errors please reach out to product support!",
        error
    )
}

/// Runs a firmware flash over the device link
pub struct UpdateOrchestrator<'a> {
    link: &'a DeviceLink,
    notifications: &'a dyn NotificationQueue,
}

impl<'a> UpdateOrchestrator<'a> {
    pub fn new(link: &'a DeviceLink, notifications: &'a dyn NotificationQueue) -> Self {
        Self {
            link,
            notifications,
        }
    }

    /// Suspend traffic, flash the core, resume, and report the outcome
    ///
    /// The error is returned to the caller as well as shown to the user.
    /// Nothing is retried.
    pub fn flash(&self) -> Result<()> {
        let mut notification = Notification::new(FLASH_STARTED_MESSAGE, Vec::new());
        self.notifications.enqueue(notification.clone());

        let result = self
            .link
            .with_suspended(|transport| transport.send_firmware())
            .and_then(|flashed| flashed)
            .map_err(|e| match e {
                MachineError::Flash(_) => e,
                other => MachineError::Flash(other.to_string()),
            });

        match &result {
            Ok(()) => {
                tracing::info!("Realtime core firmware flashed");
                notification.update(FLASH_SUCCEEDED_MESSAGE, vec![NotificationResponse::Ok]);
            }
            Err(e) => {
                tracing::error!("Realtime core firmware flash failed: {}", e);
                notification.update(flash_failed_message(e), vec![NotificationResponse::Ok]);
            }
        }
        self.notifications.enqueue(notification);

        result
    }

    /// Flash regardless of version, used when the core keeps rebooting
    pub fn force_update(&self) -> Result<()> {
        tracing::warn!("Forcing a realtime core firmware update");
        self.flash()
    }
}
