//! The history reconciliation engine.
//!
//! One push event = one run. Push delivery is at-least-once and not
//! strictly ordered, so correctness rests on two idempotence guards (the
//! event-level staleness check and the per-message history id check) plus
//! monotonic mutations everywhere else: label removal and trashing are
//! no-ops when already applied, rule upserts are last-write-wins, and the
//! watermark only ever increases.
//!
//! The watermark is advanced at several checkpoints rather than once at the
//! end: when an event is stale-skipped, when a message is skipped as
//! neither UNREAD nor SENT, after each processed message, and after a full
//! pass. A crash between a mailbox mutation and the advance costs one
//! duplicate (idempotent) mutation on replay; never advancing would cost an
//! infinite retry loop on a poison message. Liveness wins.

use futures::StreamExt;
use futures::stream;
use mailscreen_gmail::{GmailClient, MessageRef, PushNotification, extract_full,
    extract_recipients, labels};
use tracing::{debug, info, warn};

use crate::config::{MAX_BODY_BYTES, MESSAGE_PROCESS_CONCURRENCY};
use crate::error::{Error, Result};
use crate::limbo::LimboMessage;
use crate::notify::OperatorNotifier;
use crate::rules::{Classification, ScreenStatus, classify};
use crate::service::Pipeline;
use crate::user::{User, UserId};

/// Explicit per-run state, threaded through the call chain so the
/// top-level catch can advance the watermark and attribute the failure
/// without any long-lived globals.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// The user this run reconciles.
    pub user_id: UserId,
    /// The user's mailbox address, for error context.
    pub user_email: String,
    /// The change-feed position reported by the push event.
    pub event_history_id: u64,
    /// The user's stored watermark when the run started.
    pub watermark: u64,
}

/// How a push-triggered run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The full pass completed.
    Completed,
    /// The event was at or behind the watermark; nothing to do.
    Stale,
    /// The user has screening turned off; watermark advanced, nothing else.
    ScreenerOff,
    /// The stored refresh token expiry has passed; watermark advanced.
    AuthExpired,
    /// A credential failure surfaced mid-run and was recorded as a
    /// revocation. Not alerted: the user is told by the expiry sweep.
    AuthRevoked,
    /// An unexpected failure escaped the run. The watermark was still
    /// advanced to bound reprocessing, and the operator was alerted.
    Failed,
}

impl<N: OperatorNotifier> Pipeline<N> {
    /// Decodes and verifies a raw push envelope body, then handles it.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed or foreign envelope (the
    /// item is rejected, nothing is processed), or whatever
    /// [`Pipeline::handle_push`] returns.
    pub async fn handle_push_envelope(&self, body: &str) -> Result<RunOutcome> {
        let push = mailscreen_gmail::decode_push_envelope(body, &self.google.pubsub_subscription)?;
        self.handle_push(&push).await
    }

    /// Handles one verified push notification end to end.
    ///
    /// All failures past user lookup are caught here: the watermark is
    /// advanced to the event's position regardless (bounding reprocessing
    /// and breaking poison-message loops), credential-expiry failures are
    /// recorded as revocations, and anything else is alerted.
    ///
    /// # Errors
    ///
    /// Returns an error only when the user is unknown, has no watermark
    /// yet, or the bookkeeping writes themselves fail.
    pub async fn handle_push(&self, push: &PushNotification) -> Result<RunOutcome> {
        let user = self
            .users
            .get_by_email(&push.email_address)
            .await?
            .ok_or_else(|| Error::UserNotFound(push.email_address.clone()))?;
        let watermark = user.history_id.ok_or_else(|| {
            Error::Validation(format!("user {} has no watermark yet", user.id))
        })?;
        let ctx = RunContext {
            user_id: user.id.clone(),
            user_email: user.email.clone(),
            event_history_id: push.history_id,
            watermark,
        };

        if !user.is_daily_screener_on {
            debug!(user_email = %ctx.user_email, "screener off, skipping event");
            self.commit_watermark(&ctx).await?;
            return Ok(RunOutcome::ScreenerOff);
        }
        if user.refresh_token_expired(chrono::Utc::now()) {
            debug!(user_email = %ctx.user_email, "refresh token expired, skipping event");
            self.commit_watermark(&ctx).await?;
            return Ok(RunOutcome::AuthExpired);
        }
        if ctx.watermark >= ctx.event_history_id {
            debug!(
                user_email = %ctx.user_email,
                watermark = ctx.watermark,
                event = ctx.event_history_id,
                "stale event, no side effects"
            );
            return Ok(RunOutcome::Stale);
        }

        match self.reconcile(&ctx, &user).await {
            Ok(()) => {
                info!(user_email = %ctx.user_email, "processed push event");
                Ok(RunOutcome::Completed)
            }
            Err(err) => {
                // even on failure, advance: the alternative is replaying
                // the same prefix forever
                self.commit_watermark(&ctx).await?;
                if err.is_credential_expiry() {
                    self.users.mark_refresh_token_expired(&ctx.user_id).await?;
                    info!(user_email = %ctx.user_email, "credentials revoked mid-run");
                    Ok(RunOutcome::AuthRevoked)
                } else {
                    warn!(user_email = %ctx.user_email, %err, "push run failed");
                    self.alert(
                        "Push reconciliation failed",
                        format!(
                            "user: {} ({})\nevent historyId: {}\nwatermark: {}\nerror: {err}",
                            ctx.user_id, ctx.user_email, ctx.event_history_id, ctx.watermark
                        ),
                    )
                    .await;
                    Ok(RunOutcome::Failed)
                }
            }
        }
    }

    /// The watermark commit point. Monotonic, so every checkpoint may call
    /// it unconditionally.
    async fn commit_watermark(&self, ctx: &RunContext) -> Result<()> {
        self.users
            .advance_watermark(&ctx.user_id, ctx.event_history_id)
            .await?;
        Ok(())
    }

    /// Walks the change feed from the watermark and processes every added
    /// message.
    async fn reconcile(&self, ctx: &RunContext, user: &User) -> Result<()> {
        let client = self.authorize(user).await?;

        let mut page_token: Option<String> = None;
        loop {
            let page = client
                .history_list(ctx.watermark, page_token.as_deref())
                .await?;
            let Some(entries) = page.history else {
                // the watch call cannot filter server-side, so the feed can
                // move without any message being added; commit and stop
                debug!(user_email = %ctx.user_email, "no added messages in feed");
                self.commit_watermark(ctx).await?;
                return Ok(());
            };

            for entry in entries {
                let added = entry.messages_added.unwrap_or_default();
                let results: Vec<Result<()>> = stream::iter(
                    added
                        .iter()
                        .map(|m| self.process_added_message(ctx, &client, &m.message)),
                )
                .buffer_unordered(MESSAGE_PROCESS_CONCURRENCY)
                .collect()
                .await;

                let failures: Vec<String> = results
                    .iter()
                    .filter_map(|r| r.as_ref().err().map(ToString::to_string))
                    .collect();
                if !failures.is_empty() {
                    // isolation: siblings already ran; commit what we know
                    // and surface the failures without aborting the batch
                    warn!(
                        user_email = %ctx.user_email,
                        count = failures.len(),
                        "message processing failures in history run"
                    );
                    self.commit_watermark(ctx).await?;
                    self.alert(
                        "History run: message processing failures",
                        format!(
                            "user: {} ({})\nevent historyId: {}\nfailures:\n{}",
                            ctx.user_id,
                            ctx.user_email,
                            ctx.event_history_id,
                            failures.join("\n")
                        ),
                    )
                    .await;
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        self.commit_watermark(ctx).await?;
        Ok(())
    }

    /// Processes one added message: fetch, guard, classify, commit.
    async fn process_added_message(
        &self,
        ctx: &RunContext,
        client: &GmailClient,
        message: &MessageRef,
    ) -> Result<()> {
        let full = client.get_full_message(&message.id, &message.thread_id).await?;
        let extracted = extract_full(&full, MAX_BODY_BYTES).map_err(Error::Gmail)?;

        // second idempotence guard, independent of the event-level one: an
        // interleaved earlier run may have processed this message already
        if extracted.history_id <= ctx.watermark {
            debug!(
                message_id = %message.id,
                message_history_id = extracted.history_id,
                watermark = ctx.watermark,
                "message already processed, skipping"
            );
            return Ok(());
        }

        let is_unread = extracted.label_ids.iter().any(|l| l == labels::UNREAD);
        let is_sent = extracted.label_ids.iter().any(|l| l == labels::SENT);

        if !is_unread && !is_sent {
            debug!(message_id = %message.id, "message is not UNREAD or SENT, skipping");
            self.commit_watermark(ctx).await?;
            return Ok(());
        }

        if is_sent {
            // anyone the user writes to is implicitly trusted
            let entries: Vec<(String, Option<String>)> = extract_recipients(&full)
                .into_iter()
                .map(|r| (r.email, r.name))
                .collect();
            self.senders
                .upsert_overriding(&ctx.user_id, &entries, ScreenStatus::In)
                .await?;
            self.commit_watermark(ctx).await?;
            return Ok(());
        }

        let classification = classify(
            &self.senders,
            &self.domains,
            &ctx.user_id,
            &extracted.from.email,
            &extracted.subject,
            &extracted.snippet,
            extracted.body.as_deref(),
        )
        .await?;

        match classification {
            Classification::In => {
                // already in the inbox; nothing to mutate
            }
            Classification::Out => {
                if !client.trash_message(&message.id).await? {
                    debug!(message_id = %message.id, "trash target already gone");
                }
            }
            Classification::ToScreen => {
                // only stage after the unlabel succeeded; a vanished message
                // needs no limbo row
                if client.modify_remove_label(&message.id, labels::INBOX).await? {
                    let body = extracted
                        .body
                        .filter(|b| (b.len() as u64) < MAX_BODY_BYTES);
                    self.limbo
                        .stage(&LimboMessage::new(
                            ctx.user_id.clone(),
                            &extracted.from.email,
                            extracted.from.name,
                            message.id.as_str(),
                            message.thread_id.as_str(),
                            extracted.subject,
                            body,
                            extracted.snippet,
                            extracted.date,
                        ))
                        .await?;
                } else {
                    debug!(message_id = %message.id, "screen target already gone");
                }
            }
        }

        self.commit_watermark(ctx).await?;
        Ok(())
    }
}
