//! Header and body extraction from full-format message payloads.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::types::{FullMessage, Header, MessagePart};

/// Maximum nesting depth explored inside `multipart/*` payloads.
pub const MAX_MULTIPART_DEPTH: usize = 5;

/// Display names are truncated to the storage column width.
const MAX_NAME_CHARS: usize = 255;

/// A parsed address: lowercased email plus optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Email address, normalized to lowercase.
    pub email: String,
    /// Display name, if the header carried one.
    pub name: Option<String>,
}

impl Mailbox {
    /// Parses a single `Name <addr>` or bare `addr` header value.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let (Some(open), Some(close)) = (raw.find('<'), raw.rfind('>'))
            && open < close
        {
            let email = raw[open + 1..close].to_lowercase();
            let name: String = raw[..open]
                .trim()
                .chars()
                .take(MAX_NAME_CHARS)
                .collect::<String>()
                .trim_matches('"')
                .to_owned();
            let name = if name.is_empty() { None } else { Some(name) };
            return Self { email, name };
        }
        Self {
            email: raw.to_lowercase(),
            name: None,
        }
    }

    /// Parses a comma-separated address list header value.
    #[must_use]
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }
}

/// Everything the screening pipeline needs from a full-format message.
#[derive(Debug, Clone)]
pub struct ExtractedMessage {
    /// Sender address and display name.
    pub from: Mailbox,
    /// Subject line.
    pub subject: String,
    /// Short plain-text preview.
    pub snippet: String,
    /// Extracted body, if one fit the size cap.
    pub body: Option<String>,
    /// Delivery timestamp.
    pub date: DateTime<Utc>,
    /// The message's own history id.
    pub history_id: u64,
    /// Labels on the message.
    pub label_ids: Vec<String>,
}

/// Extracts sender, subject, body, and bookkeeping fields from a message.
///
/// # Errors
///
/// Returns an error if the From or Subject header is missing, or if the
/// message's history id or timestamp fields are malformed.
pub fn extract_full(message: &FullMessage, max_body_bytes: u64) -> Result<ExtractedMessage> {
    let headers = message.payload.headers.as_deref().unwrap_or_default();
    let from = Mailbox::parse(header_value(headers, "from").ok_or(Error::MissingHeader("From"))?);
    let subject = header_value(headers, "subject")
        .ok_or(Error::MissingHeader("Subject"))?
        .to_owned();

    Ok(ExtractedMessage {
        from,
        subject,
        snippet: message.snippet.clone(),
        body: extract_body(&message.payload, max_body_bytes),
        date: message.internal_date()?,
        history_id: message.history_id()?,
        label_ids: message.label_ids.clone().unwrap_or_default(),
    })
}

/// Extracts just the sender of a message.
///
/// # Errors
///
/// Returns an error if the From header is missing.
pub fn extract_sender(message: &FullMessage) -> Result<Mailbox> {
    let headers = message.payload.headers.as_deref().unwrap_or_default();
    Ok(Mailbox::parse(
        header_value(headers, "from").ok_or(Error::MissingHeader("From"))?,
    ))
}

/// Extracts all To/Cc/Bcc recipients of a message.
#[must_use]
pub fn extract_recipients(message: &FullMessage) -> Vec<Mailbox> {
    let headers = message.payload.headers.as_deref().unwrap_or_default();
    let mut recipients = Vec::new();
    for header in ["to", "cc", "bcc"] {
        if let Some(value) = header_value(headers, header) {
            recipients.extend(Mailbox::parse_list(value));
        }
    }
    recipients
}

fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Extracts a displayable body from a payload tree.
///
/// Single-part `text/*` payloads decode directly. `multipart/*` payloads are
/// walked level by level down to [`MAX_MULTIPART_DEPTH`], preferring
/// `text/html` over `text/plain` at each level and descending into the first
/// nested multipart when neither is present. Parts at or above
/// `max_body_bytes` are skipped; a message whose only body is oversized
/// yields `None`.
#[must_use]
pub fn extract_body(payload: &MessagePart, max_body_bytes: u64) -> Option<String> {
    if payload.mime_type.starts_with("multipart/") {
        let mut parts: &[MessagePart] = payload.parts.as_deref().unwrap_or_default();
        for _ in 0..MAX_MULTIPART_DEPTH {
            let html = find_text_part(parts, "text/html", max_body_bytes);
            let plain = find_text_part(parts, "text/plain", max_body_bytes);
            if let Some(body) = html.or(plain) {
                return Some(body);
            }
            parts = parts
                .iter()
                .find(|p| p.mime_type.starts_with("multipart/"))
                .and_then(|p| p.parts.as_deref())
                .unwrap_or_default();
            if parts.is_empty() {
                return None;
            }
        }
        return None;
    }
    if payload.mime_type.starts_with("text/") {
        if payload.body.size >= max_body_bytes {
            return None;
        }
        return payload.body.data.as_deref().and_then(decode_body_data);
    }
    // image, audio, application, and friends carry nothing to screen on
    tracing::debug!(mime_type = %payload.mime_type, "no displayable body in payload");
    None
}

fn find_text_part(parts: &[MessagePart], mime_type: &str, max_body_bytes: u64) -> Option<String> {
    parts
        .iter()
        .find(|p| p.mime_type == mime_type && p.body.size < max_body_bytes)
        .and_then(|p| p.body.data.as_deref())
        .and_then(decode_body_data)
}

fn decode_body_data(data: &str) -> Option<String> {
    let decoded = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::MessageBody;

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    fn text_part(mime_type: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: mime_type.to_owned(),
            body: MessageBody {
                size: text.len() as u64,
                data: Some(encode(text)),
            },
            headers: None,
            parts: None,
        }
    }

    fn multipart(mime_type: &str, parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            mime_type: mime_type.to_owned(),
            body: MessageBody::default(),
            headers: None,
            parts: Some(parts),
        }
    }

    #[test]
    fn test_mailbox_parse_with_name() {
        let mailbox = Mailbox::parse("\"Jane Doe\" <Jane@Example.COM>");
        assert_eq!(mailbox.email, "jane@example.com");
        assert_eq!(mailbox.name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_mailbox_parse_bare_address() {
        let mailbox = Mailbox::parse("Bob@Example.com");
        assert_eq!(mailbox.email, "bob@example.com");
        assert!(mailbox.name.is_none());
    }

    #[test]
    fn test_mailbox_parse_list() {
        let list = Mailbox::parse_list("a@x.com, Two <b@y.com>");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].email, "a@x.com");
        assert_eq!(list[1].email, "b@y.com");
        assert_eq!(list[1].name.as_deref(), Some("Two"));
    }

    #[test]
    fn test_extract_body_single_part() {
        let payload = text_part("text/plain", "hello");
        assert_eq!(extract_body(&payload, 1000).as_deref(), Some("hello"));
    }

    #[test]
    fn test_extract_body_prefers_html() {
        let payload = multipart(
            "multipart/alternative",
            vec![
                text_part("text/plain", "plain"),
                text_part("text/html", "<b>html</b>"),
            ],
        );
        assert_eq!(extract_body(&payload, 1000).as_deref(), Some("<b>html</b>"));
    }

    #[test]
    fn test_extract_body_descends_into_nested_multipart() {
        let inner = multipart(
            "multipart/alternative",
            vec![text_part("text/plain", "nested")],
        );
        let payload = multipart(
            "multipart/mixed",
            vec![text_part("application/pdf", "binary"), inner],
        );
        assert_eq!(extract_body(&payload, 1000).as_deref(), Some("nested"));
    }

    #[test]
    fn test_extract_body_respects_size_cap() {
        let payload = text_part("text/plain", "oversized body");
        assert!(extract_body(&payload, 4).is_none());
    }

    #[test]
    fn test_extract_body_bounded_depth() {
        let mut node = multipart("multipart/mixed", vec![text_part("text/plain", "deep")]);
        for _ in 0..MAX_MULTIPART_DEPTH + 1 {
            node = multipart("multipart/mixed", vec![node]);
        }
        assert!(extract_body(&node, 1000).is_none());
    }

    #[test]
    fn test_extract_full_requires_from_header() {
        let message = FullMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            history_id: "7".into(),
            internal_date: "1700000000000".into(),
            snippet: "s".into(),
            label_ids: None,
            payload: MessagePart {
                mime_type: "text/plain".into(),
                body: MessageBody::default(),
                headers: Some(vec![Header {
                    name: "Subject".into(),
                    value: "no sender".into(),
                }]),
                parts: None,
            },
        };
        assert!(matches!(
            extract_full(&message, 1000),
            Err(Error::MissingHeader("From"))
        ));
    }

    #[test]
    fn test_extract_recipients_spans_to_cc_bcc() {
        let message = FullMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            history_id: "7".into(),
            internal_date: "1700000000000".into(),
            snippet: String::new(),
            label_ids: None,
            payload: MessagePart {
                mime_type: "text/plain".into(),
                body: MessageBody::default(),
                headers: Some(vec![
                    Header {
                        name: "To".into(),
                        value: "a@x.com".into(),
                    },
                    Header {
                        name: "Cc".into(),
                        value: "B <b@y.com>, c@z.com".into(),
                    },
                ]),
                parts: None,
            },
        };
        let recipients = extract_recipients(&message);
        let emails: Vec<&str> = recipients.iter().map(|r| r.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x.com", "b@y.com", "c@z.com"]);
    }
}
