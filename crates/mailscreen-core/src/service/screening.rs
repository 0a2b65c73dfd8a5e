//! Applying screening decisions back to the mailbox and the rule tables.

use std::collections::HashMap;

use futures::StreamExt;
use futures::stream;
use mailscreen_gmail::{GmailClient, extract_sender, labels};
use tracing::{debug, info};

use super::Pipeline;
use crate::config::{LIST_PAGE_SIZE, MESSAGE_FETCH_CONCURRENCY};
use crate::error::{Error, Result};
use crate::job::SenderKind;
use crate::limbo::{LimboDecision, LimboMessage};
use crate::notify::OperatorNotifier;
use crate::rules::ScreenStatus;
use crate::user::{User, UserId};

impl<N: OperatorNotifier> Pipeline<N> {
    /// Applies the user's screening decisions: allowed senders' messages go
    /// back to the inbox, denied senders' messages go to the trash, and each
    /// resolved batch commits its limbo deletes and rule upserts atomically.
    ///
    /// The remote mutation runs strictly before the local commit. If the
    /// remote call fails, the rows stay, the rules are untouched, and an
    /// operator alert surfaces the inconsistency for manual recovery:
    /// at-most-once mailbox mutation per batch, no silent retry-to-done.
    ///
    /// # Errors
    ///
    /// Returns an error for user lookup or authorization failures; per-batch
    /// failures are alerted and do not abort the other batch.
    pub async fn update_screening_results(&self, user_id: &UserId) -> Result<()> {
        let user = self.require_user(user_id).await?;
        let client = self.authorize(&user).await?;

        let decided = self.limbo.decided_for_user(user_id).await?;
        let (in_batch, out_batch): (Vec<LimboMessage>, Vec<LimboMessage>) = decided
            .into_iter()
            .partition(|m| m.decision == LimboDecision::In);

        if !in_batch.is_empty() {
            let ids: Vec<String> = in_batch.iter().map(|m| m.message_id.clone()).collect();
            let restored = client
                .batch_modify(&ids, &[labels::INBOX], &[])
                .await
                .map_err(Error::Gmail);
            match restored {
                Ok(()) => {
                    self.limbo.resolve(user_id, &in_batch, ScreenStatus::In).await?;
                    info!(user_id = %user_id, count = in_batch.len(), "restored screened-in messages");
                }
                Err(err) => {
                    self.alert(
                        "Error while moving messages to inbox",
                        format!("user: {user_id}\nerror: {err}"),
                    )
                    .await;
                }
            }
        }

        if !out_batch.is_empty() {
            let ids: Vec<String> = out_batch.iter().map(|m| m.message_id.clone()).collect();
            match self.trash_all(&client, &user.email, &ids).await {
                Ok(()) => {
                    self.limbo.resolve(user_id, &out_batch, ScreenStatus::Out).await?;
                    info!(user_id = %user_id, count = out_batch.len(), "trashed screened-out messages");
                }
                Err(err) => {
                    self.alert(
                        "Error while trashing messages",
                        format!("user: {user_id}\nerror: {err}"),
                    )
                    .await;
                }
            }
        }

        Ok(())
    }

    /// Trashes a set of messages at the provider's tolerated concurrency.
    /// Any hard failure fails the whole set so the caller keeps its rows.
    async fn trash_all(
        &self,
        client: &GmailClient,
        user_email: &str,
        message_ids: &[String],
    ) -> Result<()> {
        let results: Vec<mailscreen_gmail::Result<bool>> = stream::iter(
            message_ids.iter().map(|id| client.trash_message(id)),
        )
        .buffer_unordered(MESSAGE_FETCH_CONCURRENCY)
        .collect()
        .await;

        let failures: Vec<String> = results
            .iter()
            .filter_map(|r| r.as_ref().err().map(ToString::to_string))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Gmail(mailscreen_gmail::Error::Unknown {
                action: "messages.trash",
                email: user_email.to_owned(),
                detail: failures.join("\n"),
            }))
        }
    }

    /// Restores every undecided limbo message to the inbox and drops the
    /// rows. Runs when a user turns the screener off.
    ///
    /// # Errors
    ///
    /// Returns an error if lookup, authorization, or the restore fails; on
    /// restore failure the rows are kept.
    pub async fn move_limbo_to_inbox(&self, user_id: &UserId) -> Result<()> {
        let pending = self.limbo.undecided_for_user(user_id).await?;
        if pending.is_empty() {
            return Ok(());
        }
        let user = self.require_user(user_id).await?;
        let client = self.authorize(&user).await?;

        let ids: Vec<String> = pending.iter().map(|m| m.message_id.clone()).collect();
        client.batch_modify(&ids, &[labels::INBOX], &[]).await?;
        self.limbo.delete_by_message_ids(user_id, &ids).await?;
        info!(user_id = %user_id, count = ids.len(), "flushed limbo to inbox");
        Ok(())
    }

    /// Brings a re-allowed sender's trashed and spammed messages back to
    /// the inbox.
    ///
    /// # Errors
    ///
    /// Returns an error if lookup, authorization, listing, or the batch
    /// restore fails.
    pub async fn move_trashed_to_inbox(
        &self,
        user_id: &UserId,
        senders: &[String],
    ) -> Result<()> {
        let user = self.require_user(user_id).await?;
        let client = self.authorize(&user).await?;

        let mut message_ids: Vec<String> = Vec::new();
        for sender in senders {
            let query = format!("from:{sender} (in:trash OR in:spam)");
            let ids = client.list_message_ids(&query, LIST_PAGE_SIZE, true).await?;
            for id in ids {
                if !message_ids.contains(&id) {
                    message_ids.push(id);
                }
            }
        }
        if message_ids.is_empty() {
            return Ok(());
        }
        client
            .batch_modify(&message_ids, &[labels::INBOX], &[labels::TRASH, labels::SPAM])
            .await?;
        info!(user_id = %user_id, count = message_ids.len(), "restored trashed messages");
        Ok(())
    }

    /// Onboarding backfill: mark everyone the user recently read mail from
    /// (or wrote to) as allowed, without overriding decisions the user has
    /// already made. Also advances the watermark past the scanned messages
    /// so the first push run does not replay them.
    ///
    /// # Errors
    ///
    /// Returns an error if lookup, authorization, or listing fails;
    /// per-message fetch failures are alerted, not fatal.
    pub async fn whitelist_recent_senders(
        &self,
        user_id: &UserId,
        kind: SenderKind,
        recency_in_days: i64,
    ) -> Result<()> {
        let user = self.require_user(user_id).await?;
        let client = self.authorize(&user).await?;

        let query = format!("{} newer_than:{recency_in_days}d", kind.query_operator());
        let ids = client.list_message_ids(&query, LIST_PAGE_SIZE, false).await?;

        let results: Vec<mailscreen_gmail::Result<(String, Option<String>, u64)>> =
            stream::iter(ids.iter().map(|id| {
                let client = &client;
                async move {
                    let message = client.get_message(id).await?;
                    let sender = extract_sender(&message)?;
                    Ok((sender.email, sender.name, message.history_id()?))
                }
            }))
            .buffer_unordered(MESSAGE_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut sender_names: HashMap<String, Option<String>> = HashMap::new();
        let mut largest_history_id = 0;
        let mut failures: Vec<String> = Vec::new();
        for result in results {
            match result {
                Ok((email, name, history_id)) => {
                    largest_history_id = largest_history_id.max(history_id);
                    sender_names.insert(email, name);
                }
                Err(err) => failures.push(err.to_string()),
            }
        }

        if largest_history_id > 0 {
            self.users.advance_watermark(user_id, largest_history_id).await?;
        }

        if !failures.is_empty() {
            self.alert(
                "Failure while processing recent senders",
                format!(
                    "user: {user_id} ({})\nfailures:\n{}",
                    user.email,
                    failures.join("\n")
                ),
            )
            .await;
        }
        debug!(
            user_id = %user_id,
            fetched = sender_names.len(),
            failed = failures.len(),
            "scanned recent senders"
        );

        let entries: Vec<(String, Option<String>)> = sender_names.into_iter().collect();
        self.senders.upsert_preserving(user_id, &entries).await?;
        Ok(())
    }

    pub(crate) async fn require_user(&self, user_id: &UserId) -> Result<User> {
        self.users
            .get(user_id)
            .await?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }
}
