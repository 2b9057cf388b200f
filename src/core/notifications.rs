// src/core/notifications.rs

//! An in-memory ring of monotonic-ID'd notifications for long-polling
//! clients. The hub has its own lock and never calls back into the server.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// How many notifications the hub retains before purging oldest-first.
const RETAINED: usize = 100;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Poll reply: everything newer than the caller's `since_id`, plus the
/// current high-water mark so the caller never misses events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationBatch {
    pub notifications: Vec<Notification>,
    pub last_id: u64,
}

#[derive(Debug)]
pub struct NotificationHub {
    ring: Mutex<VecDeque<Notification>>,
    next_id: AtomicU64,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(RETAINED)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Publishes a notification and returns its id.
    pub fn publish(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let notification = Notification {
            id,
            kind,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
        };
        debug!(
            id,
            kind = %notification.kind,
            title = %notification.title,
            "publishing notification"
        );
        let mut ring = self.ring.lock();
        if ring.len() == RETAINED {
            ring.pop_front();
        }
        ring.push_back(notification);
        id
    }

    /// Returns every retained notification with an id greater than
    /// `since_id`, oldest first.
    pub fn since(&self, since_id: u64) -> NotificationBatch {
        let ring = self.ring.lock();
        let notifications: Vec<Notification> = ring
            .iter()
            .filter(|n| n.id > since_id)
            .cloned()
            .collect();
        let last_id = ring.back().map(|n| n.id).unwrap_or(since_id);
        NotificationBatch {
            notifications,
            last_id: last_id.max(since_id),
        }
    }

    /// Current high-water mark; 0 when nothing was ever published.
    pub fn last_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }
}
