//! Push subscription lifecycle: register, cancel, renew.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use tracing::{debug, info};

use super::Pipeline;
use crate::config::SWEEP_CONCURRENCY;
use crate::error::{Error, Result};
use crate::notify::OperatorNotifier;
use crate::user::UserId;

/// Aggregate result of a renewal sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Users the sweep touched.
    pub attempted: usize,
    /// Successful operations.
    pub succeeded: usize,
    /// Failures; credential-expiry ones are expected and not alerted.
    pub failed: usize,
}

impl<N: OperatorNotifier> Pipeline<N> {
    /// Registers (or re-registers) the user's push subscription and seeds
    /// the watermark from the watch response.
    ///
    /// On a credential failure, both the watch and the refresh token are
    /// recorded as expired before the error propagates.
    ///
    /// # Errors
    ///
    /// Returns an error if lookup, authorization, or the watch call fails.
    pub async fn set_watch(&self, user_id: &UserId) -> Result<()> {
        let user = self.require_user(user_id).await?;

        let client = match self.authorize(&user).await {
            Ok(client) => client,
            Err(err) if err.is_credential_expiry() => {
                self.users.mark_watch_expired(user_id).await?;
                self.users.mark_refresh_token_expired(user_id).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let response = match client.watch(&self.google.pubsub_topic).await {
            Ok(response) => response,
            Err(err) if err.is_invalid_credentials() => {
                self.users.mark_watch_expired(user_id).await?;
                self.users.mark_refresh_token_expired(user_id).await?;
                return Err(Error::Gmail(err));
            }
            Err(err) => return Err(Error::Gmail(err)),
        };

        let expire_at = response.expiration().map_err(Error::Gmail)?;
        let history_id = response.history_id().map_err(Error::Gmail)?;
        self.users.record_watch(user_id, expire_at, history_id).await?;
        info!(user_id = %user_id, %expire_at, history_id, "registered watch");
        Ok(())
    }

    /// Cancels the user's push subscription and records it as expired.
    ///
    /// # Errors
    ///
    /// Returns an error if lookup, authorization, or the stop call fails.
    pub async fn stop_watch(&self, user_id: &UserId) -> Result<()> {
        let user = self.require_user(user_id).await?;
        let client = self.authorize(&user).await?;
        match client.stop_watch().await {
            Ok(()) => {}
            Err(err) if err.is_invalid_credentials() => {
                self.users.mark_refresh_token_expired(user_id).await?;
            }
            Err(err) => return Err(Error::Gmail(err)),
        }
        self.users.mark_watch_expired(user_id).await?;
        debug!(user_id = %user_id, "stopped watch");
        Ok(())
    }

    /// Re-registers every enabled user whose subscription expires within
    /// the renewal window. Unexpected failures are alerted.
    ///
    /// # Errors
    ///
    /// Returns an error if the expiring-watch query fails.
    pub async fn renew_expiring_watches(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let expiring = self.users.users_with_expiring_watch(now).await?;
        let mut summary = SweepSummary {
            attempted: expiring.len(),
            ..SweepSummary::default()
        };

        let results: Vec<Result<()>> =
            stream::iter(expiring.iter().map(|user| self.set_watch(&user.id)))
                .buffer_unordered(SWEEP_CONCURRENCY)
                .collect()
                .await;

        let mut unexpected: Vec<String> = Vec::new();
        for result in results {
            match result {
                Ok(()) => summary.succeeded += 1,
                Err(err) => {
                    summary.failed += 1;
                    if !err.is_credential_expiry() {
                        unexpected.push(err.to_string());
                    }
                }
            }
        }
        if !unexpected.is_empty() {
            self.alert("Watch renewal: unexpected failures", unexpected.join("\n"))
                .await;
        }
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "watch renewal sweep finished"
        );
        Ok(summary)
    }
}
