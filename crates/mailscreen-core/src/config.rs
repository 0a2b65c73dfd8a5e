//! Named policy constants and deployment configuration.
//!
//! Policy values live here as named constants so a policy change never
//! requires touching control flow.

use serde::Deserialize;

/// Largest message body persisted into limbo, in bytes. Bodies at or above
/// this size are dropped; the snippet still carries enough to screen on.
pub const MAX_BODY_BYTES: u64 = 65_535;

/// Hard cap on a serialized queue payload.
pub const MAX_QUEUE_PAYLOAD_BYTES: usize = 262_144;

/// In-flight limit for per-message detail fetches against the provider.
/// A backpressure policy, not a performance knob: going wider gets the
/// whole pipeline throttled per user.
pub const MESSAGE_FETCH_CONCURRENCY: usize = 2;

/// In-flight limit for per-message processing inside one history run.
pub const MESSAGE_PROCESS_CONCURRENCY: usize = 3;

/// In-flight limit for per-user work inside periodic sweeps.
pub const SWEEP_CONCURRENCY: usize = 10;

/// Page size for provider message listings.
pub const LIST_PAGE_SIZE: u32 = 500;

/// How far back the onboarding whitelist backfill looks.
pub const RECENT_SENDER_WINDOW_DAYS: i64 = 7;

/// Push subscriptions are renewed when they expire within this many days.
pub const WATCH_RENEWAL_WINDOW_DAYS: i64 = 2;

/// Re-authorization warnings go out at these day marks before expiry.
pub const REAUTH_WARNING_DAYS: [i64; 2] = [2, 1];

/// A screener is accessible for this long after its scheduled time.
pub const SCREENER_VALIDITY_HOURS: i64 = 24;

/// Cadence of the delivery sweep; screeners are picked up from the
/// just-elapsed window of this length.
pub const DELIVERY_WINDOW_MINUTES: i64 = 30;

/// The product's own notification domain. Mail from here is always let
/// through (self-trust), ahead of any domain rule.
pub const SELF_NOTIFICATION_DOMAIN: &str = "@mailscreen.app";

/// From header for screener emails.
pub const SCREENER_FROM: &str = "Daily Screener <screener@mailscreen.app>";

/// From header for product update emails.
pub const UPDATES_FROM: &str = "Mailscreen <updates@mailscreen.app>";

/// Google API deployment configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Pub/Sub topic the watch calls publish to.
    pub pubsub_topic: String,
    /// Pub/Sub subscription name expected on inbound push envelopes.
    pub pubsub_subscription: String,
}

/// Product deployment configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base URL for links embedded in product emails.
    pub base_url: String,
    /// Mailbox that receives operator notifications.
    pub operator_email: String,
}
