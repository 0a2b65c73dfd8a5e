//! Screening rule data models.

use crate::user::UserId;

/// A user's standing decision about a sender or domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenStatus {
    /// Allowed: mail stays in the inbox.
    In,
    /// Denied: mail goes to the trash.
    Out,
}

impl ScreenStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "out" => Self::Out,
            _ => Self::In,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// Outcome of classifying one incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Leave in the inbox.
    In,
    /// Trash it.
    Out,
    /// Hold in limbo for a human decision.
    ToScreen,
}

impl From<ScreenStatus> for Classification {
    fn from(status: ScreenStatus) -> Self {
        match status {
            ScreenStatus::In => Self::In,
            ScreenStatus::Out => Self::Out,
        }
    }
}

/// A per-sender rule. Takes precedence over any domain rule.
#[derive(Debug, Clone)]
pub struct SenderRule {
    /// Owning user.
    pub user_id: UserId,
    /// Sender address, lowercase.
    pub email: String,
    /// Display name, if known.
    pub from_name: Option<String>,
    /// The standing decision.
    pub status: ScreenStatus,
}

/// A per-domain rule. Domain strings start with `@` and are lowercase.
#[derive(Debug, Clone)]
pub struct DomainRule {
    /// Owning user.
    pub user_id: UserId,
    /// Domain, e.g. `@example.com`.
    pub domain: String,
    /// The standing decision.
    pub status: ScreenStatus,
}

/// Derives the rule-matching domain from a sender address.
#[must_use]
pub(crate) fn sender_domain(sender_email: &str) -> String {
    let after_at = sender_email.rsplit('@').next().unwrap_or(sender_email);
    format!("@{}", after_at.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_status_roundtrip() {
        for status in [ScreenStatus::In, ScreenStatus::Out] {
            assert_eq!(ScreenStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_sender_domain() {
        assert_eq!(sender_domain("a@Example.COM"), "@example.com");
        assert_eq!(sender_domain("weird@left@right.org"), "@right.org");
    }
}
