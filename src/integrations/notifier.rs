//! Notification dispatch.
//!
//! Notifications are fire-and-forget: a failed send is logged and never
//! turns a committed financial operation into an error.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Failure reported by a notification channel.
#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// A message addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Recipient user id
    pub recipient: String,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Structured context (booking id, amounts, ...)
    pub metadata: BTreeMap<String, String>,
}

impl Notification {
    /// Creates a notification without metadata.
    #[must_use]
    pub fn new(recipient: &str, title: &str, message: String) -> Self {
        Self {
            recipient: recipient.to_string(),
            title: title.to_string(),
            message,
            metadata: BTreeMap::new(),
        }
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Outbound notification channel (email, push, in-app).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    async fn send_notification(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Sends a notification and swallows the failure after logging it.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.send_notification(&notification).await {
        warn!(
            recipient = %notification.recipient,
            title = %notification.title,
            error = %e,
            "Notification dropped"
        );
    }
}

/// Notifier that only writes to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send_notification(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            recipient = %notification.recipient,
            title = %notification.title,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Notifier that keeps every message in memory; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Notifications delivered so far.
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NotifyError("mail relay unreachable".to_string()));
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_best_effort_swallows_failures() {
        let notifier = RecordingNotifier::new();
        notifier.set_failing(true);

        notify_best_effort(&notifier, Notification::new("u1", "Hello", "body".to_string())).await;

        assert!(notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_notify_best_effort_delivers() {
        let notifier = RecordingNotifier::new();

        notify_best_effort(
            &notifier,
            Notification::new("u1", "Refund", "done".to_string()).with("booking_id", 7),
        )
        .await;

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].metadata.get("booking_id").map(String::as_str), Some("7"));
    }
}
