//! Gmail-backed operator notification channel.
//!
//! Notices are injected straight into the operator's own mailbox via
//! `messages.insert`, bypassing classification so they always surface.

use async_trait::async_trait;
use mailscreen_gmail::{OutgoingMessage, labels};
use mailscreen_oauth::TokenClient;

use super::authorize::authorize_gmail;
use crate::config::MAX_BODY_BYTES;
use crate::error::{Error, Result};
use crate::notify::{OperatorNotice, OperatorNotifier, Severity};
use crate::user::UserRepository;

/// Sends operator notices into the operator's own Gmail mailbox.
pub struct GmailOperatorNotifier {
    users: UserRepository,
    token_client: TokenClient,
    operator_email: String,
    gmail_base_url: Option<String>,
}

impl GmailOperatorNotifier {
    /// Creates a notifier for the given operator mailbox. The operator must
    /// exist as a user with a granted refresh token.
    #[must_use]
    pub fn new(
        users: UserRepository,
        token_client: TokenClient,
        operator_email: impl Into<String>,
    ) -> Self {
        Self {
            users,
            token_client,
            operator_email: operator_email.into(),
            gmail_base_url: None,
        }
    }

    /// Overrides the Gmail API base URL. Used by tests against a local server.
    #[must_use]
    pub fn with_gmail_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.gmail_base_url = Some(base_url.into());
        self
    }
}

#[async_trait]
impl OperatorNotifier for GmailOperatorNotifier {
    async fn notify(&self, notice: &OperatorNotice) -> Result<()> {
        let operator = self
            .users
            .get_by_email(&self.operator_email)
            .await?
            .ok_or_else(|| Error::UserNotFound(self.operator_email.clone()))?;
        let client = authorize_gmail(
            &self.users,
            &self.token_client,
            &operator,
            self.gmail_base_url.as_deref(),
        )
        .await?;

        let (kind, message_labels): (&str, &[&str]) = match notice.severity {
            Severity::Error => (
                "Error",
                &[labels::INBOX, labels::UNREAD, labels::IMPORTANT],
            ),
            Severity::Info => ("Alert", &[labels::INBOX, labels::UNREAD]),
        };
        let body: String = notice
            .body
            .chars()
            .take(MAX_BODY_BYTES as usize)
            .collect();
        let message = OutgoingMessage::text(
            format!("Runtime {kind} <{}>", self.operator_email),
            self.operator_email.clone(),
            notice.subject.clone(),
            body,
        );
        client.insert_message(&message, message_labels).await?;
        Ok(())
    }
}
