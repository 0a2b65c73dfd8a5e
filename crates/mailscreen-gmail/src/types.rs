//! Serde models for the Gmail REST v1 resources the pipeline touches.
//!
//! Gmail serializes `historyId`, `internalDate`, and `expiration` as decimal
//! strings; accessors parse them on demand so one malformed message rejects
//! only itself.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A message reference as returned by list and history calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    /// Message id. Can churn when the message moves between folders.
    pub id: String,
    /// Owning thread id. Stable across message id churn.
    pub thread_id: String,
    /// Labels, when the call includes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_ids: Option<Vec<String>>,
}

/// One page of `users.messages.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesPage {
    /// Message refs on this page. Absent when the result set is empty.
    #[serde(default)]
    pub messages: Option<Vec<MessageRef>>,
    /// Continuation token; absent on the last page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// A message header (name/value pair).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Header {
    /// Header name; compared case-insensitively.
    pub name: String,
    /// Raw header value.
    pub value: String,
}

/// Body of a message part. When `size` is 0 the `data` field is absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessageBody {
    /// Decoded size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Base64url-encoded content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A node in the (possibly nested) MIME payload tree.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    /// MIME type, e.g. `text/html` or `multipart/alternative`.
    pub mime_type: String,
    /// Part body.
    #[serde(default)]
    pub body: MessageBody,
    /// Part headers. Only the top-level payload is guaranteed to carry them.
    #[serde(default)]
    pub headers: Option<Vec<Header>>,
    /// Child parts for `multipart/*` nodes.
    #[serde(default)]
    pub parts: Option<Vec<MessagePart>>,
}

/// A message fetched with `format=full`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullMessage {
    /// Message id.
    pub id: String,
    /// Owning thread id.
    pub thread_id: String,
    /// History id at which this message state was recorded, as a string.
    pub history_id: String,
    /// Delivery time in epoch milliseconds, as a string.
    pub internal_date: String,
    /// Short plain-text preview.
    #[serde(default)]
    pub snippet: String,
    /// Labels on the message. Occasionally absent.
    #[serde(default)]
    pub label_ids: Option<Vec<String>>,
    /// MIME payload tree.
    pub payload: MessagePart,
}

impl FullMessage {
    /// Parses the message's own history id.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the field is not a decimal number.
    pub fn history_id(&self) -> Result<u64> {
        self.history_id
            .parse()
            .map_err(|_| Error::Validation(format!("bad historyId: {}", self.history_id)))
    }

    /// Parses the delivery timestamp.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the field is not epoch milliseconds.
    pub fn internal_date(&self) -> Result<DateTime<Utc>> {
        let millis: i64 = self
            .internal_date
            .parse()
            .map_err(|_| Error::Validation(format!("bad internalDate: {}", self.internal_date)))?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| Error::Validation(format!("bad internalDate: {}", self.internal_date)))
    }

    /// Whether the message carries the given label.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids
            .as_ref()
            .is_some_and(|ids| ids.iter().any(|l| l == label))
    }
}

/// A thread fetched with `format=full`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPage {
    /// Messages in the thread, oldest first.
    #[serde(default)]
    pub messages: Option<Vec<FullMessage>>,
}

/// One record of `users.history.list`, filtered to `messageAdded`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// History record id.
    pub id: String,
    /// Messages added in this record.
    #[serde(default)]
    pub messages_added: Option<Vec<HistoryMessageAdded>>,
}

/// A `messageAdded` entry in a history record.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessageAdded {
    /// The added message's reference.
    pub message: MessageRef,
}

/// One page of `users.history.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// History records. Absent when nothing happened past the start id.
    #[serde(default)]
    pub history: Option<Vec<HistoryEntry>>,
    /// Continuation token; absent on the last page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Response of `users.watch`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    /// History id the subscription starts from, as a string.
    pub history_id: String,
    /// Subscription expiry in epoch milliseconds, as a string.
    pub expiration: String,
}

impl WatchResponse {
    /// Parses the starting history id.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the field is not a decimal number.
    pub fn history_id(&self) -> Result<u64> {
        self.history_id
            .parse()
            .map_err(|_| Error::Validation(format!("bad historyId: {}", self.history_id)))
    }

    /// Parses the subscription expiry.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the field is not epoch milliseconds.
    pub fn expiration(&self) -> Result<DateTime<Utc>> {
        let millis: i64 = self
            .expiration
            .parse()
            .map_err(|_| Error::Validation(format!("bad expiration: {}", self.expiration)))?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| Error::Validation(format!("bad expiration: {}", self.expiration)))
    }
}

/// Response of `users.messages.import`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    /// Provider id of the injected message.
    pub id: String,
    /// Owning thread id.
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Labels applied to the injected message.
    #[serde(default)]
    pub label_ids: Option<Vec<String>>,
}
