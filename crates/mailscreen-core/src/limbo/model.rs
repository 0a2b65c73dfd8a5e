//! Limbo data models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::user::UserId;

/// Decision state of a limbo message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimboDecision {
    /// Waiting for the user.
    #[default]
    Undecided,
    /// User allowed the sender.
    In,
    /// User denied the sender.
    Out,
}

impl LimboDecision {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "in" => Self::In,
            "out" => Self::Out,
            _ => Self::Undecided,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Undecided => "undecided",
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// A message held out of the inbox pending a screening decision.
#[derive(Debug, Clone)]
pub struct LimboMessage {
    /// Row id.
    pub id: String,
    /// Owning user.
    pub user_id: UserId,
    /// Sender address, lowercase.
    pub sender_email: String,
    /// Sender display name, if known.
    pub from_name: Option<String>,
    /// Provider message id.
    pub message_id: String,
    /// Owning thread id; fallback locator when the message id churns.
    pub thread_id: String,
    /// Subject line.
    pub subject: String,
    /// Extracted body; absent when extraction failed or it was oversized.
    pub body: Option<String>,
    /// Short plain-text preview.
    pub snippet: String,
    /// Delivery timestamp.
    pub email_date: DateTime<Utc>,
    /// Decision state.
    pub decision: LimboDecision,
}

impl LimboMessage {
    /// Creates an undecided limbo message with a fresh row id.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: UserId,
        sender_email: &str,
        from_name: Option<String>,
        message_id: impl Into<String>,
        thread_id: impl Into<String>,
        subject: impl Into<String>,
        body: Option<String>,
        snippet: impl Into<String>,
        email_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            sender_email: sender_email.to_lowercase(),
            from_name,
            message_id: message_id.into(),
            thread_id: thread_id.into(),
            subject: subject.into(),
            body,
            snippet: snippet.into(),
            email_date,
            decision: LimboDecision::Undecided,
        }
    }
}

/// One sender's pending messages, collapsed for display.
#[derive(Debug, Clone)]
pub struct SenderGroup {
    /// The chronologically oldest message from this sender.
    pub representative: LimboMessage,
    /// How many messages the sender has in limbo.
    pub num_emails: usize,
}

/// Groups limbo messages by sender.
///
/// `messages` must be ordered newest-first (how the repository returns
/// them). Each sender's entry is overwritten on every hit, so the last
/// write, the oldest message, becomes the representative while the count
/// accumulates. Output is ordered oldest representative first.
#[must_use]
pub fn group_by_sender(messages: &[LimboMessage]) -> Vec<SenderGroup> {
    let mut groups: HashMap<&str, SenderGroup> = HashMap::new();
    for message in messages {
        groups
            .entry(message.sender_email.as_str())
            .and_modify(|group| {
                group.representative = message.clone();
                group.num_emails += 1;
            })
            .or_insert_with(|| SenderGroup {
                representative: message.clone(),
                num_emails: 1,
            });
    }
    let mut list: Vec<SenderGroup> = groups.into_values().collect();
    list.sort_by(|a, b| a.representative.email_date.cmp(&b.representative.email_date));
    list
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(sender: &str, day: u32, subject: &str) -> LimboMessage {
        LimboMessage::new(
            UserId::new("u1"),
            sender,
            None,
            format!("m-{sender}-{day}"),
            "t1",
            subject,
            None,
            "snippet",
            Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).single().expect("valid date"),
        )
    }

    #[test]
    fn test_decision_roundtrip() {
        for decision in [
            LimboDecision::Undecided,
            LimboDecision::In,
            LimboDecision::Out,
        ] {
            assert_eq!(LimboDecision::parse(decision.as_str()), decision);
        }
    }

    #[test]
    fn test_grouping_oldest_representative_wins() {
        // newest-first, as fetched: day 3 before day 1
        let messages = vec![
            message("a@x.com", 3, "newer"),
            message("a@x.com", 1, "older"),
        ];
        let groups = group_by_sender(&messages);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].num_emails, 2);
        assert_eq!(groups[0].representative.subject, "older");
    }

    #[test]
    fn test_grouping_orders_by_representative_age() {
        let messages = vec![
            message("late@x.com", 9, "late"),
            message("early@x.com", 2, "early"),
        ];
        let groups = group_by_sender(&messages);
        assert_eq!(groups[0].representative.sender_email, "early@x.com");
        assert_eq!(groups[1].representative.sender_email, "late@x.com");
    }
}
