//! # Notification Sink
//!
//! User-facing alerts emitted by the job tracker and the list reconciler.
//! The sink is the only delivery channel for recoverable failures; nothing
//! in the sync core surfaces them as panics or unhandled errors.

use std::sync::Mutex;

use metrics::counter;
use serde::Serialize;
use tracing::{error, info, warn};

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

impl NotificationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::Warning => "warning",
            NotificationKind::Info => "info",
        }
    }
}

/// A single user-facing alert.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Identifier of the job or record the alert refers to, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
}

impl Notification {
    pub fn new<T: Into<String>, M: Into<String>>(
        kind: NotificationKind,
        title: T,
        message: M,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            related_id: None,
        }
    }

    pub fn success<T: Into<String>, M: Into<String>>(title: T, message: M) -> Self {
        Self::new(NotificationKind::Success, title, message)
    }

    pub fn error<T: Into<String>, M: Into<String>>(title: T, message: M) -> Self {
        Self::new(NotificationKind::Error, title, message)
    }

    pub fn warning<T: Into<String>, M: Into<String>>(title: T, message: M) -> Self {
        Self::new(NotificationKind::Warning, title, message)
    }

    pub fn info<T: Into<String>, M: Into<String>>(title: T, message: M) -> Self {
        Self::new(NotificationKind::Info, title, message)
    }

    pub fn with_related_id<S: Into<String>>(mut self, id: S) -> Self {
        self.related_id = Some(id.into());
        self
    }
}

/// Delivery channel for notifications.
///
/// Implementations must be cheap and non-blocking; both background loops call
/// into the sink from their polling paths.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Production sink that emits structured tracing events.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        counter!("notifications_emitted_total", "kind" => notification.kind.as_str()).increment(1);

        match notification.kind {
            NotificationKind::Error => error!(
                title = %notification.title,
                related_id = notification.related_id.as_deref().unwrap_or(""),
                "{}",
                notification.message
            ),
            NotificationKind::Warning => warn!(
                title = %notification.title,
                related_id = notification.related_id.as_deref().unwrap_or(""),
                "{}",
                notification.message
            ),
            NotificationKind::Success | NotificationKind::Info => info!(
                title = %notification.title,
                related_id = notification.related_id.as_deref().unwrap_or(""),
                "{}",
                notification.message
            ),
        }
    }
}

/// Sink that buffers notifications in memory for inspection.
///
/// Used by embedders that render alerts themselves, and by the integration
/// tests.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far, oldest first.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.entries.lock().unwrap().clone()
    }

    /// Drains the buffer, returning the delivered notifications.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.entries.lock().unwrap())
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: Notification) {
        self.entries.lock().unwrap().push(notification);
    }
}
