//! The screener delivery sweep.

use chrono::{DateTime, Duration, Timelike, Utc};
use futures::StreamExt;
use futures::stream;
use mailscreen_gmail::{OutgoingMessage, labels};
use tracing::{debug, info};

use super::Pipeline;
use crate::config::{DELIVERY_WINDOW_MINUTES, SCREENER_FROM, SWEEP_CONCURRENCY};
use crate::error::{Error, Result};
use crate::notify::OperatorNotifier;
use crate::screener::{Screener, next_screener_timings};
use crate::user::User;

/// How one screener fared in a delivery sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Sent and the next occurrence scheduled.
    Sent,
    /// No undecided senders; skipped the send, rescheduled immediately.
    SkippedEmpty,
    /// Another sweep claimed this screener first.
    AlreadyClaimed,
}

/// Aggregate result of one delivery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    /// Screeners picked up from the window.
    pub attempted: usize,
    /// Successfully sent.
    pub sent: usize,
    /// Skipped (empty or already claimed).
    pub skipped: usize,
    /// Failed; expected credential failures are counted here too but only
    /// unexpected ones are alerted.
    pub failed: usize,
}

/// The just-elapsed delivery window at `now`: the half-hour interval ending
/// at `now` rounded down to the nearest half-hour mark.
#[must_use]
pub fn delivery_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let floored_minute = if now.minute() >= 30 { 30 } else { 0 };
    let end = now
        .with_minute(floored_minute)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(now);
    (end - Duration::minutes(DELIVERY_WINDOW_MINUTES), end)
}

impl<N: OperatorNotifier> Pipeline<N> {
    /// Schedules the user's next screener, replacing any currently
    /// scheduled one.
    ///
    /// # Errors
    ///
    /// Returns an error if the user has no schedule configured or the
    /// database write fails.
    pub async fn schedule_next_screener(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<Screener> {
        let (daily_time, timezone) = screener_schedule(user)?;
        let timings = next_screener_timings(daily_time, timezone, now)?;
        let screener = Screener::scheduled(user.id.clone(), timings);
        self.screeners.replace_scheduled(&screener).await?;
        debug!(user_id = %user.id, scheduled_at = %screener.scheduled_at, "scheduled screener");
        Ok(screener)
    }

    /// Runs one delivery sweep: every scheduled screener in the just-elapsed
    /// window, for enabled users with live authorization, at bounded
    /// concurrency. Unexpected failures are alerted; credential-expiry
    /// failures are expected (the auth-expiry sweep informs those users).
    ///
    /// # Errors
    ///
    /// Returns an error if the due-screener query itself fails.
    pub async fn run_delivery_sweep(&self, now: DateTime<Utc>) -> Result<DeliverySummary> {
        let (window_start, window_end) = delivery_window(now);
        let due = self
            .screeners
            .due_between(window_start, window_end, now)
            .await?;

        let mut summary = DeliverySummary {
            attempted: due.len(),
            ..DeliverySummary::default()
        };

        let results: Vec<Result<DeliveryOutcome>> =
            stream::iter(due.into_iter().map(|screener| self.send_screener(screener, now)))
                .buffer_unordered(SWEEP_CONCURRENCY)
                .collect()
                .await;

        let mut unexpected: Vec<String> = Vec::new();
        for result in results {
            match result {
                Ok(DeliveryOutcome::Sent) => summary.sent += 1,
                Ok(DeliveryOutcome::SkippedEmpty | DeliveryOutcome::AlreadyClaimed) => {
                    summary.skipped += 1;
                }
                Err(err) => {
                    summary.failed += 1;
                    if !err.is_credential_expiry() {
                        unexpected.push(err.to_string());
                    }
                }
            }
        }

        if !unexpected.is_empty() {
            self.alert(
                "Delivery sweep: unexpected failures",
                unexpected.join("\n"),
            )
            .await;
        }
        info!(
            attempted = summary.attempted,
            sent = summary.sent,
            skipped = summary.skipped,
            failed = summary.failed,
            "delivery sweep finished"
        );
        Ok(summary)
    }

    /// Delivers one screener: count, claim, import, complete.
    async fn send_screener(
        &self,
        screener: Screener,
        now: DateTime<Utc>,
    ) -> Result<DeliveryOutcome> {
        let user = self.require_user(&screener.user_id).await?;

        let num_senders = self
            .limbo
            .count_distinct_undecided_senders(&user.id)
            .await?;
        if num_senders == 0 {
            // no empty screener emails; roll straight to the next occurrence
            self.schedule_next_screener(&user, now).await?;
            return Ok(DeliveryOutcome::SkippedEmpty);
        }

        let client = self.authorize(&user).await?;

        if !self.screeners.mark_enqueued(&user.id, &screener.id).await? {
            return Ok(DeliveryOutcome::AlreadyClaimed);
        }

        let subject = screener_subject(num_senders);
        let html = render_screener_html(&self.app.base_url, &user.id.0, &screener.id, num_senders);
        let message = OutgoingMessage::html(SCREENER_FROM, user.email.clone(), subject, html);
        let imported = match client
            .import_message(&message, &[labels::INBOX, labels::UNREAD])
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_invalid_credentials() => {
                self.users.mark_refresh_token_expired(&user.id).await?;
                return Err(Error::Gmail(err));
            }
            Err(err) => return Err(Error::Gmail(err)),
        };

        let (daily_time, timezone) = screener_schedule(&user)?;
        let next = Screener::scheduled(
            user.id.clone(),
            next_screener_timings(daily_time, timezone, now)?,
        );
        self.screeners
            .mark_sent_and_replace_next(&user.id, &screener.id, "gmail", &imported.id, now, &next)
            .await?;
        Ok(DeliveryOutcome::Sent)
    }
}

fn screener_schedule(user: &User) -> Result<(&str, &str)> {
    match (&user.daily_screener_time, &user.timezone) {
        (Some(time), Some(tz)) => Ok((time, tz)),
        _ => Err(Error::Validation(format!(
            "user {} has no screener schedule configured",
            user.id
        ))),
    }
}

pub(crate) fn screener_subject(num_senders: u64) -> String {
    if num_senders == 1 {
        "1 first-time sender to screen".to_owned()
    } else {
        format!("{num_senders} first-time senders to screen")
    }
}

fn render_screener_html(
    base_url: &str,
    user_id: &str,
    screener_id: &str,
    num_senders: u64,
) -> String {
    let noun = if num_senders == 1 { "sender" } else { "senders" };
    format!(
        "<html><body>\
         <p>You have {num_senders} first-time {noun} waiting for a decision.</p>\
         <p><a href=\"{base_url}/screen/{user_id}/{screener_id}\">Open today's screener</a></p>\
         <p>This link works for 24 hours after your scheduled time.</p>\
         </body></html>"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_delivery_window_on_the_hour_side() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 5, 42).unwrap();
        let (start, end) = delivery_window(now);
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 15, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_delivery_window_on_the_half_hour_side() {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 10, 45, 0).unwrap();
        let (start, end) = delivery_window(now);
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_screener_subject_pluralization() {
        assert_eq!(screener_subject(1), "1 first-time sender to screen");
        assert_eq!(screener_subject(4), "4 first-time senders to screen");
    }

    #[test]
    fn test_screener_html_carries_unique_path() {
        let html = render_screener_html("https://app.example", "u1", "s1", 2);
        assert!(html.contains("https://app.example/screen/u1/s1"));
        assert!(html.contains("2 first-time senders"));
    }
}
