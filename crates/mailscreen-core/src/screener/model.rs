//! Screener data model.

use chrono::{DateTime, Utc};

use super::schedule::ScreenerTimings;
use crate::user::UserId;

/// Delivery state of a screener.
///
/// `enqueued` exists specifically so a send failure is detectable and
/// distinguishable from "never attempted".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenerStatus {
    /// Waiting for its scheduled time.
    #[default]
    Scheduled,
    /// Picked up by the delivery sweep, send in flight.
    Enqueued,
    /// Handed to the provider.
    Sent,
    /// Confirmed delivered.
    Delivered,
}

impl ScreenerStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "enqueued" => Self::Enqueued,
            "sent" => Self::Sent,
            "delivered" => Self::Delivered,
            _ => Self::Scheduled,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Enqueued => "enqueued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
        }
    }
}

/// One day's invitation for a user to resolve their limbo senders.
///
/// The id appears in the emailed link, so it is an unguessable random
/// string rather than a sequence number.
#[derive(Debug, Clone)]
pub struct Screener {
    /// Row id, used in the screener URL.
    pub id: String,
    /// Owning user.
    pub user_id: UserId,
    /// Delivery state.
    pub status: ScreenerStatus,
    /// Delivery provider, once sent.
    pub provider: Option<String>,
    /// Provider message id, once sent.
    pub provider_id: Option<String>,
    /// When this screener fires.
    pub scheduled_at: DateTime<Utc>,
    /// When it was handed to the provider.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the screener link stops working.
    pub expire_at: DateTime<Utc>,
}

impl Screener {
    /// Creates a freshly scheduled screener with a random id.
    #[must_use]
    pub fn scheduled(user_id: UserId, timings: ScreenerTimings) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            status: ScreenerStatus::Scheduled,
            provider: None,
            provider_id: None,
            scheduled_at: timings.scheduled_at,
            sent_at: None,
            expire_at: timings.expire_at,
        }
    }

    /// Whether the screener link is still accessible at `now`.
    ///
    /// Validity depends only on expiry: both `scheduled` and `sent` rows
    /// stay valid for replay within the window.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expire_at
    }
}
