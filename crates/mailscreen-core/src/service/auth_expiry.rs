//! Re-authorization warning sweeps.
//!
//! A user whose credentials lapse simply stops receiving screened mail;
//! the reconciliation engine never emails them. These sweeps are the
//! user-visible side of credential expiry: a warning at each configured
//! day mark before expiry, and one notice after the fact.

use chrono::{DateTime, Utc};

use super::Pipeline;
use crate::Result;
use crate::config::REAUTH_WARNING_DAYS;
use crate::notify::{OperatorNotifier, UserMailer};

impl<N: OperatorNotifier> Pipeline<N> {
    /// Sends re-authorization warnings for tokens expiring at each warning
    /// day mark, plus an expired notice for tokens that lapsed in the last
    /// hour. Runs hourly; the hour-aligned windows make each warning fire
    /// exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error if a user query fails; individual send failures are
    /// alerted and do not stop the sweep.
    pub async fn sweep_auth_expiry(
        &self,
        mailer: &impl UserMailer,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut sent = 0;
        let mut failures: Vec<String> = Vec::new();

        for days_left in REAUTH_WARNING_DAYS {
            let expiring = self
                .users
                .users_with_expiring_refresh_tokens(now, days_left)
                .await?;
            for user in expiring {
                let subject = reauth_warning_subject(days_left);
                let html = render_reauth_warning_html(&self.app.base_url, days_left);
                match mailer.send(&user.email, &subject, &html).await {
                    Ok(()) => sent += 1,
                    Err(err) => failures.push(format!("{}: {err}", user.email)),
                }
            }
        }

        let expired = self
            .users
            .users_with_recently_expired_refresh_tokens(now)
            .await?;
        for user in expired {
            let html = render_reauth_expired_html(&self.app.base_url);
            match mailer
                .send(&user.email, "Mailscreen needs to be reconnected", &html)
                .await
            {
                Ok(()) => sent += 1,
                Err(err) => failures.push(format!("{}: {err}", user.email)),
            }
        }

        if !failures.is_empty() {
            self.alert("Auth expiry sweep: send failures", failures.join("\n"))
                .await;
        }
        Ok(sent)
    }
}

fn reauth_warning_subject(days_left: i64) -> String {
    if days_left == 1 {
        "Your Mailscreen access expires tomorrow".to_owned()
    } else {
        format!("Your Mailscreen access expires in {days_left} days")
    }
}

fn render_reauth_warning_html(base_url: &str, days_left: i64) -> String {
    let when = if days_left == 1 {
        "tomorrow".to_owned()
    } else {
        format!("in {days_left} days")
    };
    format!(
        "<html><body>\
         <p>Your Gmail authorization expires {when}. After that, new mail \
         stops being screened.</p>\
         <p><a href=\"{base_url}/dashboard\">Reconnect your account</a> to keep \
         screening running.</p>\
         </body></html>"
    )
}

fn render_reauth_expired_html(base_url: &str) -> String {
    format!(
        "<html><body>\
         <p>Your Gmail authorization has expired, so screening is paused. \
         Nothing is lost: new mail simply stays in your inbox.</p>\
         <p><a href=\"{base_url}/dashboard\">Reconnect your account</a> to \
         resume screening.</p>\
         </body></html>"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, GoogleConfig};
    use crate::notify::{RecordingMailer, RecordingNotifier};
    use crate::service::Pipeline;
    use crate::user::{User, UserId};
    use chrono::{Duration, Timelike};
    use mailscreen_oauth::TokenClient;

    #[test]
    fn test_reauth_warning_subject() {
        assert_eq!(
            reauth_warning_subject(1),
            "Your Mailscreen access expires tomorrow"
        );
        assert_eq!(
            reauth_warning_subject(2),
            "Your Mailscreen access expires in 2 days"
        );
    }

    #[tokio::test]
    async fn test_sweep_warns_expiring_users_once() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let pipeline = Pipeline::new(
            pool,
            TokenClient::google("id", "secret").unwrap(),
            GoogleConfig {
                client_id: "id".into(),
                client_secret: "secret".into(),
                pubsub_topic: "projects/t/topics/x".into(),
                pubsub_subscription: "projects/t/subscriptions/x".into(),
            },
            AppConfig {
                base_url: "https://app.example".into(),
                operator_email: "ops@example.com".into(),
            },
            RecordingNotifier::new(),
        )
        .await
        .unwrap();

        let now = Utc::now()
            .with_minute(10)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap();

        let mut expiring = User::new(UserId::new("u-soon"), "soon@x.com");
        expiring.refresh_token = Some("rt".into());
        expiring.refresh_token_expire_at =
            Some(now - Duration::minutes(10) + Duration::days(2) - Duration::minutes(20));
        pipeline.users.insert(&expiring).await.unwrap();

        let mut safe = User::new(UserId::new("u-safe"), "safe@x.com");
        safe.refresh_token = Some("rt".into());
        safe.refresh_token_expire_at = Some(now + Duration::days(30));
        pipeline.users.insert(&safe).await.unwrap();

        let mailer = RecordingMailer::new();
        let sent = pipeline.sweep_auth_expiry(&mailer, now).await.unwrap();
        assert_eq!(sent, 1);

        let outbox = mailer.sent();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, "soon@x.com");
        assert!(outbox[0].1.contains("expires in 2 days"));
    }
}
