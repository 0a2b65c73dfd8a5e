//! Authenticated Gmail REST client.

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::labels;
use crate::types::{
    FullMessage, HistoryPage, ImportResponse, ListMessagesPage, ThreadPage, WatchResponse,
};

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail caps `batchModify` at this many ids per call.
const BATCH_MODIFY_MAX_IDS: usize = 1000;

/// Shape of a Gmail API error body.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// An authenticated, per-user Gmail API client.
///
/// Holds a valid access token for one mailbox; token refresh happens before
/// construction (see `mailscreen-core`'s authorize step). All calls classify
/// API failures through [`Error::classify`] with the owning mailbox attached.
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    user_email: String,
}

impl GmailClient {
    /// Creates a client for one mailbox with a valid access token.
    #[must_use]
    pub fn new(access_token: impl Into<String>, user_email: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            access_token: access_token.into(),
            user_email: user_email.into(),
        }
    }

    /// Overrides the API base URL. Used by tests against a local server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The mailbox this client operates on.
    #[must_use]
    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn check(
        &self,
        action: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map_or(body, |parsed| parsed.error.message);
        Err(Error::classify(action, &self.user_email, &message))
    }

    /// Lists all message ids matching a query, following continuation tokens
    /// until the result set is exhausted.
    ///
    /// # Errors
    ///
    /// Returns a classified API error; a failing page fails the whole listing.
    pub async fn list_message_ids(
        &self,
        query: &str,
        page_size: u32,
        include_spam_trash: bool,
    ) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        let max_results = page_size.to_string();
        let include_spam_trash = include_spam_trash.to_string();
        loop {
            let mut request = self
                .http
                .get(self.url("messages"))
                .bearer_auth(&self.access_token)
                .query(&[
                    ("q", query),
                    ("maxResults", max_results.as_str()),
                    ("includeSpamTrash", include_spam_trash.as_str()),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let response = self.check("messages.list", request.send().await?).await?;
            let page: ListMessagesPage = response.json().await?;
            for message in page.messages.unwrap_or_default() {
                if seen.insert(message.id.clone()) {
                    ids.push(message.id);
                }
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(ids)
    }

    /// Fetches a message in full format by id, with no fallback. Used where
    /// the caller has no thread id and a stale message is fine to skip.
    ///
    /// # Errors
    ///
    /// Returns a classified API error.
    pub async fn get_message(&self, message_id: &str) -> Result<FullMessage> {
        let request = self
            .http
            .get(self.url(&format!("messages/{message_id}")))
            .bearer_auth(&self.access_token)
            .query(&[("format", "full")]);
        let response = self.check("messages.get", request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Fetches a message in full format, falling back to its thread.
    ///
    /// Message ids can go stale independently of thread ids (a known
    /// provider quirk), so on not-found the owning thread is fetched and its
    /// first message returned. The fallback is part of the contract, not an
    /// optimization.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestedEntityNotFound`] when the thread is gone
    /// too, or another classified API error.
    pub async fn get_full_message(
        &self,
        message_id: &str,
        thread_id: &str,
    ) -> Result<FullMessage> {
        let request = self
            .http
            .get(self.url(&format!("messages/{message_id}")))
            .bearer_auth(&self.access_token)
            .query(&[("format", "full")]);
        match self.check("messages.get", request.send().await?).await {
            Ok(response) => Ok(response.json().await?),
            Err(err) if err.is_not_found() => {
                debug!(message_id, thread_id, "message id stale, fetching thread");
                self.first_message_of_thread(thread_id).await
            }
            Err(err) => Err(err),
        }
    }

    async fn first_message_of_thread(&self, thread_id: &str) -> Result<FullMessage> {
        let request = self
            .http
            .get(self.url(&format!("threads/{thread_id}")))
            .bearer_auth(&self.access_token)
            .query(&[("format", "full")]);
        let response = self.check("threads.get", request.send().await?).await?;
        let thread: ThreadPage = response.json().await?;
        thread
            .messages
            .and_then(|mut messages| {
                if messages.is_empty() {
                    None
                } else {
                    Some(messages.remove(0))
                }
            })
            .ok_or(Error::RequestedEntityNotFound {
                action: "threads.get",
                email: self.user_email.clone(),
            })
    }

    /// Applies a label mutation to a batch of messages in one call,
    /// splitting into provider-sized chunks for large id sets.
    ///
    /// # Errors
    ///
    /// Returns a classified API error; a failing chunk fails the batch.
    pub async fn batch_modify(
        &self,
        message_ids: &[String],
        add_labels: &[&str],
        remove_labels: &[&str],
    ) -> Result<()> {
        for chunk in message_ids.chunks(BATCH_MODIFY_MAX_IDS) {
            let request = self
                .http
                .post(self.url("messages/batchModify"))
                .bearer_auth(&self.access_token)
                .json(&json!({
                    "ids": chunk,
                    "addLabelIds": add_labels,
                    "removeLabelIds": remove_labels,
                }));
            self.check("messages.batchModify", request.send().await?)
                .await?;
        }
        Ok(())
    }

    /// Removes one label from one message.
    ///
    /// Returns `false` when the message is already gone (success-no-op).
    ///
    /// # Errors
    ///
    /// Returns a classified API error for anything other than not-found.
    pub async fn modify_remove_label(&self, message_id: &str, label: &str) -> Result<bool> {
        let request = self
            .http
            .post(self.url(&format!("messages/{message_id}/modify")))
            .bearer_auth(&self.access_token)
            .json(&json!({ "removeLabelIds": [label] }));
        match self.check("messages.modify", request.send().await?).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => {
                debug!(message_id, "modify target not found, skipping");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Moves one message to the trash.
    ///
    /// Returns `false` when the message is already gone (success-no-op).
    ///
    /// # Errors
    ///
    /// Returns a classified API error for anything other than not-found.
    pub async fn trash_message(&self, message_id: &str) -> Result<bool> {
        let request = self
            .http
            .post(self.url(&format!("messages/{message_id}/trash")))
            .bearer_auth(&self.access_token);
        match self.check("messages.trash", request.send().await?).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => {
                debug!(message_id, "trash target not found, skipping");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Fetches one page of the change feed, filtered to added messages.
    ///
    /// # Errors
    ///
    /// Returns a classified API error.
    pub async fn history_list(
        &self,
        start_history_id: u64,
        page_token: Option<&str>,
    ) -> Result<HistoryPage> {
        let mut request = self
            .http
            .get(self.url("history"))
            .bearer_auth(&self.access_token)
            .query(&[
                ("startHistoryId", start_history_id.to_string().as_str()),
                ("historyTypes", "messageAdded"),
            ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        let response = self.check("history.list", request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Subscribes the mailbox to push notifications on the given topic,
    /// limited to the labels the screening pipeline cares about.
    ///
    /// # Errors
    ///
    /// Returns a classified API error.
    pub async fn watch(&self, topic_name: &str) -> Result<WatchResponse> {
        let request = self
            .http
            .post(self.url("watch"))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "labelIds": [labels::UNREAD, labels::SENT],
                "labelFilterBehavior": "include",
                "topicName": topic_name,
            }));
        let response = self.check("watch", request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Cancels the mailbox's push subscription.
    ///
    /// # Errors
    ///
    /// Returns a classified API error.
    pub async fn stop_watch(&self) -> Result<()> {
        let request = self.http.post(self.url("stop")).bearer_auth(&self.access_token);
        self.check("stop", request.send().await?).await?;
        Ok(())
    }

    /// Injects a product email into the mailbox via `messages.import`, so
    /// the user's own filters and classification still run on it.
    ///
    /// # Errors
    ///
    /// Returns a classified API error.
    pub async fn import_message(
        &self,
        message: &OutgoingMessage,
        label_ids: &[&str],
    ) -> Result<ImportResponse> {
        let request = self
            .http
            .post(self.url("messages/import"))
            .bearer_auth(&self.access_token)
            .query(&[("neverMarkSpam", "true")])
            .json(&json!({
                "labelIds": label_ids,
                "raw": message.raw(),
            }));
        let response = self.check("messages.import", request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Injects a message via `messages.insert`, bypassing classification.
    /// Used for operator notifications that must always surface.
    ///
    /// # Errors
    ///
    /// Returns a classified API error.
    pub async fn insert_message(
        &self,
        message: &OutgoingMessage,
        label_ids: &[&str],
    ) -> Result<ImportResponse> {
        let request = self
            .http
            .post(self.url("messages"))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "labelIds": label_ids,
                "raw": message.raw(),
            }));
        let response = self.check("messages.insert", request.send().await?).await?;
        Ok(response.json().await?)
    }
}

/// An email to inject into a mailbox.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Sender header value, e.g. `Mailscreen <screener@mailscreen.app>`.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Body content.
    pub body: String,
    /// Whether `body` is HTML rather than plain text.
    pub html: bool,
}

impl OutgoingMessage {
    /// Creates a plain-text message.
    #[must_use]
    pub fn text(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            html: false,
        }
    }

    /// Creates an HTML message.
    #[must_use]
    pub fn html(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            html: true,
        }
    }

    /// Builds the RFC 5322 formatted message.
    fn to_rfc5322(&self) -> String {
        use std::fmt::Write;

        let mut message = String::new();
        let _ = write!(message, "From: {}\r\n", self.from);
        let _ = write!(message, "To: {}\r\n", self.to);
        let _ = write!(message, "Subject: {}\r\n", self.subject);
        message.push_str("MIME-Version: 1.0\r\n");
        if self.html {
            message.push_str("Content-Type: text/html; charset=utf-8\r\n");
        } else {
            message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        }
        message.push_str("Content-Transfer-Encoding: 8bit\r\n");
        message.push_str("\r\n");
        message.push_str(&self.body);
        message
    }

    /// The base64url-encoded raw form the import/insert endpoints expect.
    #[must_use]
    pub fn raw(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_rfc5322())
    }
}
