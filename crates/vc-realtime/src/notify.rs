//! Structured notifications handed to the global notification store.
//!
//! The store itself (toasts, banners) lives outside this subsystem; we only
//! push [`Notification`] values into a channel the UI layer drains.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    /// Persistent notices stay until dismissed; everything else expires.
    pub persistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            priority: Priority::Medium,
            persistent: false,
            timeout_ms: Some(5_000),
            created_at: Utc::now(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self.timeout_ms = None;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

/// Clone-able producer half of the notification channel.
#[derive(Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("notification receiver dropped; discarding notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_clears_the_timeout() {
        let n = Notification::new(NotificationKind::Error, "t", "m")
            .priority(Priority::Critical)
            .persistent();
        assert!(n.persistent);
        assert_eq!(n.timeout_ms, None);
    }

    #[tokio::test]
    async fn push_after_receiver_drop_is_harmless() {
        let (sink, rx) = NotificationSink::channel();
        drop(rx);
        sink.push(Notification::new(NotificationKind::Info, "t", "m"));
    }
}
