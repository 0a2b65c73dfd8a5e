//! Background job payloads and the queue boundary.
//!
//! Work that is independent of the triggering request's latency budget is
//! enqueued instead of performed inline. Each payload is a small tagged
//! record; the tag is matched exhaustively, so adding a job kind is a
//! compile error until every consumer handles it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::MAX_QUEUE_PAYLOAD_BYTES;
use crate::error::{Error, Result};

/// Which recent-sender population a whitelist backfill scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    /// Senders whose mail the user has read.
    Read,
    /// Recipients the user has written to.
    Sent,
}

impl SenderKind {
    /// Gmail search operator for this population.
    #[must_use]
    pub const fn query_operator(self) -> &'static str {
        match self {
            Self::Read => "is:read",
            Self::Sent => "is:sent",
        }
    }
}

/// A queued unit of background work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "jobType", rename_all = "camelCase")]
pub enum Job {
    /// Whitelist senders of recently read mail (onboarding backfill).
    #[serde(rename_all = "camelCase")]
    WhitelistRecentlyReadSenders {
        /// Affected user.
        user_id: String,
        /// Lookback window in days.
        recency_in_days: i64,
    },
    /// Whitelist recipients of recently sent mail (onboarding backfill).
    #[serde(rename_all = "camelCase")]
    WhitelistRecentlySentSenders {
        /// Affected user.
        user_id: String,
        /// Lookback window in days.
        recency_in_days: i64,
    },
    /// Restore all undecided limbo messages to the inbox (screener off).
    #[serde(rename_all = "camelCase")]
    MoveLimboToInbox {
        /// Affected user.
        user_id: String,
    },
    /// Apply the user's screening decisions to mailbox and rules.
    #[serde(rename_all = "camelCase")]
    UpdateScreeningResults {
        /// Affected user.
        user_id: String,
    },
    /// Restore a re-allowed sender's trashed/spammed mail to the inbox.
    #[serde(rename_all = "camelCase")]
    MoveTrashedToInbox {
        /// Affected user.
        user_id: String,
        /// Sender addresses to restore.
        senders: Vec<String>,
    },
    /// Send the activation confirmation into the user's inbox.
    #[serde(rename_all = "camelCase")]
    SendActivationEmail {
        /// Affected user.
        user_id: String,
        /// IANA timezone name.
        timezone: String,
        /// Daily screener time, `HH:MM`.
        daily_screener_time: String,
        /// Base URL for links in the email.
        base_url: String,
    },
    /// Register the user's push subscription.
    #[serde(rename_all = "camelCase")]
    SetWatch {
        /// Affected user.
        user_id: String,
    },
    /// Cancel the user's push subscription.
    #[serde(rename_all = "camelCase")]
    StopWatch {
        /// Affected user.
        user_id: String,
    },
    /// Surface a runtime error to the operator mailbox.
    #[serde(rename_all = "camelCase")]
    RuntimeErrorEmail {
        /// Subject line.
        subject: String,
        /// Serialized error context.
        message: String,
    },
    /// Surface an informational notice to the operator mailbox.
    #[serde(rename_all = "camelCase")]
    NotifyEmail {
        /// Subject line.
        subject: String,
        /// Notice body.
        message: String,
    },
}

impl Job {
    /// The standard read-senders backfill over the default lookback window.
    #[must_use]
    pub fn whitelist_recently_read(user_id: impl Into<String>) -> Self {
        Self::WhitelistRecentlyReadSenders {
            user_id: user_id.into(),
            recency_in_days: crate::config::RECENT_SENDER_WINDOW_DAYS,
        }
    }

    /// The standard sent-recipients backfill over the default lookback window.
    #[must_use]
    pub fn whitelist_recently_sent(user_id: impl Into<String>) -> Self {
        Self::WhitelistRecentlySentSenders {
            user_id: user_id.into(),
            recency_in_days: crate::config::RECENT_SENDER_WINDOW_DAYS,
        }
    }

    /// Serializes the job for the queue, enforcing the payload size cap.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the serialized payload exceeds
    /// [`MAX_QUEUE_PAYLOAD_BYTES`].
    pub fn to_payload(&self) -> Result<String> {
        let payload = serde_json::to_string(self)?;
        if payload.len() > MAX_QUEUE_PAYLOAD_BYTES {
            return Err(Error::Validation(format!(
                "job payload of {} bytes exceeds cap of {MAX_QUEUE_PAYLOAD_BYTES}",
                payload.len()
            )));
        }
        Ok(payload)
    }

    /// Parses a queue payload back into a job.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown tags or malformed payloads;
    /// only the one payload is rejected.
    pub fn from_payload(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| Error::Validation(format!("bad job payload: {e}")))
    }
}

/// Outbound job queue boundary.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues one job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job could not be handed off.
    async fn enqueue(&self, job: &Job) -> Result<()>;
}

/// In-memory queue that records jobs. For tests.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    jobs: std::sync::Mutex<Vec<Job>>,
}

impl RecordingQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the enqueued jobs.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        // size cap applies to every producer, in-memory included
        let _ = job.to_payload()?;
        #[allow(clippy::unwrap_used)]
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_constructors_use_default_window() {
        let job = Job::whitelist_recently_read("u1");
        assert_eq!(
            job,
            Job::WhitelistRecentlyReadSenders {
                user_id: "u1".into(),
                recency_in_days: crate::config::RECENT_SENDER_WINDOW_DAYS,
            }
        );
    }

    #[test]
    fn test_job_payload_roundtrip() {
        let job = Job::WhitelistRecentlySentSenders {
            user_id: "u1".into(),
            recency_in_days: 7,
        };
        let payload = job.to_payload().unwrap();
        assert!(payload.contains(r#""jobType":"whitelistRecentlySentSenders""#));
        assert!(payload.contains(r#""recencyInDays":7"#));
        assert_eq!(Job::from_payload(&payload).unwrap(), job);
    }

    #[test]
    fn test_job_unknown_tag_rejected() {
        let err = Job::from_payload(r#"{"jobType":"definitelyNotAJob"}"#).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_job_payload_size_cap() {
        let job = Job::RuntimeErrorEmail {
            subject: "s".into(),
            message: "x".repeat(MAX_QUEUE_PAYLOAD_BYTES),
        };
        assert!(matches!(job.to_payload(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_sender_kind_query_operator() {
        assert_eq!(SenderKind::Read.query_operator(), "is:read");
        assert_eq!(SenderKind::Sent.query_operator(), "is:sent");
    }

    #[tokio::test]
    async fn test_recording_queue_applies_size_cap() {
        let queue = RecordingQueue::new();
        queue
            .enqueue(&Job::SetWatch {
                user_id: "u1".into(),
            })
            .await
            .unwrap();
        assert_eq!(queue.jobs().len(), 1);

        let oversized = Job::NotifyEmail {
            subject: "s".into(),
            message: "x".repeat(MAX_QUEUE_PAYLOAD_BYTES),
        };
        assert!(queue.enqueue(&oversized).await.is_err());
        assert_eq!(queue.jobs().len(), 1);
    }
}
