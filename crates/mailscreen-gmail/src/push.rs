//! Push notification envelope decoding and verification.
//!
//! Gmail change notifications arrive through Cloud Pub/Sub as a JSON
//! envelope whose `message.data` field base64-wraps the actual payload.
//! The subscription name is checked against the expected value before the
//! payload is trusted, so envelopes posted by anyone else are rejected.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushEnvelopeMessage,
    subscription: String,
}

#[derive(Debug, Deserialize)]
struct PushEnvelopeMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushData {
    email_address: String,
    history_id: HistoryId,
}

/// Pub/Sub serializes `historyId` as a number; tolerate strings too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryId {
    Number(u64),
    Text(String),
}

impl HistoryId {
    fn into_u64(self) -> Result<u64> {
        match self {
            Self::Number(n) => Ok(n),
            Self::Text(s) => s
                .parse()
                .map_err(|_| Error::Validation(format!("bad historyId in push data: {s}"))),
        }
    }
}

/// A verified, decoded push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    /// Mailbox the change feed advanced for, lowercased.
    pub email_address: String,
    /// The change feed position reported by the event.
    pub history_id: u64,
}

/// Decodes a push envelope body and verifies its subscription name.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the envelope is malformed, the inner
/// data is not base64-wrapped JSON, or the subscription does not match
/// `expected_subscription`.
pub fn decode_push_envelope(
    body: &str,
    expected_subscription: &str,
) -> Result<PushNotification> {
    let envelope: PushEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::Validation(format!("bad push envelope: {e}")))?;
    if envelope.subscription != expected_subscription {
        return Err(Error::Validation(format!(
            "unexpected subscription: {}",
            envelope.subscription
        )));
    }
    let decoded = STANDARD
        .decode(&envelope.message.data)
        .map_err(|e| Error::Validation(format!("bad push data encoding: {e}")))?;
    let data: PushData = serde_json::from_slice(&decoded)
        .map_err(|e| Error::Validation(format!("bad push data: {e}")))?;
    Ok(PushNotification {
        email_address: data.email_address.to_lowercase(),
        history_id: data.history_id.into_u64()?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SUBSCRIPTION: &str = "projects/mailscreen/subscriptions/gmail-push";

    fn envelope(data: &str, subscription: &str) -> String {
        format!(
            r#"{{"message":{{"data":"{}","messageId":"1","publishTime":"2024-01-01T00:00:00Z"}},"subscription":"{subscription}"}}"#,
            STANDARD.encode(data)
        )
    }

    #[test]
    fn test_decode_push_envelope() {
        let body = envelope(
            r#"{"emailAddress":"User@Example.com","historyId":12345}"#,
            SUBSCRIPTION,
        );
        let push = decode_push_envelope(&body, SUBSCRIPTION).unwrap();
        assert_eq!(push.email_address, "user@example.com");
        assert_eq!(push.history_id, 12345);
    }

    #[test]
    fn test_decode_push_envelope_string_history_id() {
        let body = envelope(
            r#"{"emailAddress":"user@example.com","historyId":"67"}"#,
            SUBSCRIPTION,
        );
        let push = decode_push_envelope(&body, SUBSCRIPTION).unwrap();
        assert_eq!(push.history_id, 67);
    }

    #[test]
    fn test_decode_push_envelope_rejects_foreign_subscription() {
        let body = envelope(
            r#"{"emailAddress":"user@example.com","historyId":1}"#,
            "projects/other/subscriptions/spoofed",
        );
        assert!(matches!(
            decode_push_envelope(&body, SUBSCRIPTION),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_decode_push_envelope_rejects_garbage() {
        assert!(decode_push_envelope("not json", SUBSCRIPTION).is_err());

        let body = format!(
            r#"{{"message":{{"data":"%%%","messageId":"1","publishTime":""}},"subscription":"{SUBSCRIPTION}"}}"#
        );
        assert!(decode_push_envelope(&body, SUBSCRIPTION).is_err());
    }
}
