//! User-facing notifications raised by the core
//!
//! The core can only show one message at a time. While the current
//! notification is unacknowledged, new `Notify` frames overwrite it in
//! place (same id); once the user has acknowledged it, the next frame
//! starts a new notification.

use crate::protocol::NotifyMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NOTIFICATION_ID: AtomicU64 = AtomicU64::new(1);

/// Answers a user can give to a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationResponse {
    Ok,
    Yes,
    No,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub responses: Vec<NotificationResponse>,
    pub acknowledged: bool,
    pub response: Option<NotificationResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(message: impl Into<String>, responses: Vec<NotificationResponse>) -> Self {
        let now = Utc::now();
        Self {
            id: NEXT_NOTIFICATION_ID.fetch_add(1, Ordering::Relaxed),
            message: message.into(),
            responses,
            acknowledged: false,
            response: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the text and offered responses, keeping the identity
    pub fn update(&mut self, message: impl Into<String>, responses: Vec<NotificationResponse>) {
        self.message = message.into();
        self.responses = responses;
        self.updated_at = Utc::now();
    }

    pub fn acknowledge(&mut self, response: Option<NotificationResponse>) {
        self.acknowledged = true;
        self.response = response;
        self.updated_at = Utc::now();
    }
}

/// Maps core `Notify` frames onto the single cached notification
#[derive(Debug, Clone)]
pub struct NotificationBridge {
    current: Notification,
}

impl Default for NotificationBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBridge {
    pub fn new() -> Self {
        Self {
            current: Notification::new("", vec![NotificationResponse::Ok]),
        }
    }

    /// Responses offered for a message from the core; scale messages need none
    pub fn responses_for(notify: &NotifyMessage) -> Vec<NotificationResponse> {
        if notify.kind == NotifyMessage::SCALE_MESSAGE_KIND {
            Vec::new()
        } else {
            vec![NotificationResponse::Ok]
        }
    }

    /// Fold a message into the cached notification and return what to enqueue
    pub fn on_notify(&mut self, notify: &NotifyMessage) -> Notification {
        let responses = Self::responses_for(notify);
        if self.current.acknowledged {
            self.current = Notification::new(notify.message.clone(), responses);
        } else {
            self.current.update(notify.message.clone(), responses);
        }
        tracing::info!("New notification from core: {}", self.current.message);
        self.current.clone()
    }

    /// Mark the cached notification acknowledged if `id` refers to it
    pub fn acknowledge(&mut self, id: u64, response: Option<NotificationResponse>) -> bool {
        if self.current.id != id {
            return false;
        }
        self.current.acknowledge(response);
        true
    }

    pub fn current(&self) -> &Notification {
        &self.current
    }
}
