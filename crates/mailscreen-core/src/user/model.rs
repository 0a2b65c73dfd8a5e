//! User data model.

use std::fmt;

use chrono::{DateTime, Utc};

/// Stable identifier of a mailbox owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl UserId {
    /// Creates a user id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One mailbox owner.
#[derive(Debug, Clone)]
pub struct User {
    /// Stable identifier.
    pub id: UserId,
    /// Mailbox address, lowercase.
    pub email: String,
    /// Provider identity.
    pub gmail_id: Option<String>,
    /// Refresh token; absent until the user grants mailbox permission.
    pub refresh_token: Option<String>,
    /// Refresh token expiry. Stamped to "now" on detected revocation.
    pub refresh_token_expire_at: Option<DateTime<Utc>>,
    /// Current access token.
    pub access_token: Option<String>,
    /// Access token expiry (about an hour after issue).
    pub access_token_expire_at: Option<DateTime<Utc>>,
    /// Push subscription expiry.
    pub watch_expire_at: Option<DateTime<Utc>>,
    /// Watermark: last fully-processed position in the change feed.
    /// Absent until the first watch call seeds it.
    pub history_id: Option<u64>,
    /// IANA timezone name for screener scheduling.
    pub timezone: Option<String>,
    /// Daily screener time-of-day, `HH:MM`.
    pub daily_screener_time: Option<String>,
    /// Whether screening is active for this user.
    pub is_daily_screener_on: bool,
    /// Whether onboarding has completed.
    pub has_completed_onboarding: bool,
}

impl User {
    /// Creates a user with only identity fields set; screening off.
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into().to_lowercase(),
            gmail_id: None,
            refresh_token: None,
            refresh_token_expire_at: None,
            access_token: None,
            access_token_expire_at: None,
            watch_expire_at: None,
            history_id: None,
            timezone: None,
            daily_screener_time: None,
            is_daily_screener_on: false,
            has_completed_onboarding: false,
        }
    }

    /// Whether the stored refresh token is past its expiry at `now`.
    ///
    /// An absent expiry means the grant is indefinitely valid (production
    /// default); an absent token means there is nothing to expire yet.
    #[must_use]
    pub fn refresh_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token_expire_at.is_some_and(|at| now > at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_email_normalized_on_construction() {
        let user = User::new(UserId::new("u1"), "MiXeD@Example.COM");
        assert_eq!(user.email, "mixed@example.com");
    }

    #[test]
    fn test_refresh_token_expiry() {
        let now = Utc::now();
        let mut user = User::new(UserId::new("u1"), "a@b.com");
        assert!(!user.refresh_token_expired(now));

        user.refresh_token_expire_at = Some(now - Duration::minutes(1));
        assert!(user.refresh_token_expired(now));

        user.refresh_token_expire_at = Some(now + Duration::days(7));
        assert!(!user.refresh_token_expired(now));
    }
}
