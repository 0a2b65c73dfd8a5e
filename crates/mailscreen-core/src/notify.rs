//! Notification channel boundaries.
//!
//! The reconciliation and scheduling logic never talks to a delivery
//! provider directly; it hands subject/body content across these traits.
//! Rendering beyond simple interpolation is delegated to the implementor.

use async_trait::async_trait;

use crate::error::Result;

/// Severity of an operator notice. Errors land with higher visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Something broke and needs eyes.
    Error,
    /// Informational.
    Info,
}

/// An operator-facing notification.
#[derive(Debug, Clone)]
pub struct OperatorNotice {
    /// Subject line.
    pub subject: String,
    /// Body text, typically serialized context.
    pub body: String,
    /// Routing severity.
    pub severity: Severity,
}

impl OperatorNotice {
    /// Creates an error-severity notice.
    #[must_use]
    pub fn error(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            severity: Severity::Error,
        }
    }

    /// Creates an info-severity notice.
    #[must_use]
    pub fn info(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            severity: Severity::Info,
        }
    }
}

/// Outbound channel for operator notifications.
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    /// Dispatches one notice.
    ///
    /// # Errors
    ///
    /// Returns an error if the notice could not be handed off.
    async fn notify(&self, notice: &OperatorNotice) -> Result<()>;
}

/// Outbound channel for end-user transactional email.
#[async_trait]
pub trait UserMailer: Send + Sync {
    /// Sends one HTML email to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the email could not be handed off.
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

/// In-memory notifier that records notices. For tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: std::sync::Mutex<Vec<OperatorNotice>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded notices.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn notices(&self) -> Vec<OperatorNotice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperatorNotifier for RecordingNotifier {
    async fn notify(&self, notice: &OperatorNotice) -> Result<()> {
        #[allow(clippy::unwrap_used)]
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// In-memory mailer that records sends. For tests.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: std::sync::Mutex<Vec<(String, String, String)>>,
}

impl RecordingMailer {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of (to, subject, html) triples.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserMailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        #[allow(clippy::unwrap_used)]
        self.sent
            .lock()
            .unwrap()
            .push((to.to_owned(), subject.to_owned(), html.to_owned()));
        Ok(())
    }
}
