//! Queue consumer: dispatches job payloads to their drivers.

use chrono::Utc;
use chrono_tz::Tz;
use mailscreen_gmail::{OutgoingMessage, labels};
use tracing::info;

use super::Pipeline;
use crate::config::UPDATES_FROM;
use crate::error::{Error, Result};
use crate::job::{Job, SenderKind};
use crate::notify::{OperatorNotice, OperatorNotifier};
use crate::screener::next_screener_timings;
use crate::user::UserId;

impl<N: OperatorNotifier> Pipeline<N> {
    /// Runs one dequeued job. The match is exhaustive: a new job kind does
    /// not compile until it is handled here.
    ///
    /// # Errors
    ///
    /// Returns the underlying driver's error; the queue's retry policy
    /// decides what happens next.
    pub async fn run_job(&self, job: &Job) -> Result<()> {
        info!(?job, "running job");
        match job {
            Job::WhitelistRecentlyReadSenders {
                user_id,
                recency_in_days,
            } => {
                self.whitelist_recent_senders(
                    &UserId::new(user_id.clone()),
                    SenderKind::Read,
                    *recency_in_days,
                )
                .await
            }
            Job::WhitelistRecentlySentSenders {
                user_id,
                recency_in_days,
            } => {
                self.whitelist_recent_senders(
                    &UserId::new(user_id.clone()),
                    SenderKind::Sent,
                    *recency_in_days,
                )
                .await
            }
            Job::MoveLimboToInbox { user_id } => {
                self.move_limbo_to_inbox(&UserId::new(user_id.clone())).await
            }
            Job::UpdateScreeningResults { user_id } => {
                self.update_screening_results(&UserId::new(user_id.clone()))
                    .await
            }
            Job::MoveTrashedToInbox { user_id, senders } => {
                self.move_trashed_to_inbox(&UserId::new(user_id.clone()), senders)
                    .await
            }
            Job::SendActivationEmail {
                user_id,
                timezone,
                daily_screener_time,
                base_url,
            } => {
                self.send_activation_email(
                    &UserId::new(user_id.clone()),
                    timezone,
                    daily_screener_time,
                    base_url,
                )
                .await
            }
            Job::SetWatch { user_id } => self.set_watch(&UserId::new(user_id.clone())).await,
            Job::StopWatch { user_id } => self.stop_watch(&UserId::new(user_id.clone())).await,
            Job::RuntimeErrorEmail { subject, message } => {
                self.notifier
                    .notify(&OperatorNotice::error(subject.clone(), message.clone()))
                    .await
            }
            Job::NotifyEmail { subject, message } => {
                self.notifier
                    .notify(&OperatorNotice::info(subject.clone(), message.clone()))
                    .await
            }
        }
    }

    /// Imports the activation confirmation into the user's own inbox, with
    /// the first screener's local time spelled out.
    ///
    /// # Errors
    ///
    /// Returns an error if lookup, authorization, or the import fails.
    pub async fn send_activation_email(
        &self,
        user_id: &UserId,
        timezone: &str,
        daily_screener_time: &str,
        base_url: &str,
    ) -> Result<()> {
        let user = self.require_user(user_id).await?;
        let client = self.authorize(&user).await?;

        let tz: Tz = timezone
            .parse()
            .map_err(|_| Error::Validation(format!("unknown timezone: {timezone}")))?;
        let timings = next_screener_timings(daily_screener_time, timezone, Utc::now())?;
        let first_screener_local = timings
            .scheduled_at
            .with_timezone(&tz)
            .format("%a, %-d %b %Y, %-I:%M %P")
            .to_string();

        let html = format!(
            "<html><body>\
             <p>Mailscreen is now screening your inbox.</p>\
             <p>Your first daily screener arrives {first_screener_local} \
             ({timezone}), and every day at {daily_screener_time} after that.</p>\
             <p><a href=\"{base_url}/dashboard\">Open your dashboard</a></p>\
             </body></html>"
        );
        let message = OutgoingMessage::html(
            UPDATES_FROM,
            user.email.clone(),
            "Mailscreen activated",
            html,
        );
        client
            .import_message(&message, &[labels::INBOX, labels::UNREAD])
            .await?;
        Ok(())
    }
}
