//! Error types and Gmail API error classification.

/// Result type alias for Gmail operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the Gmail API and its envelope handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The access token was rejected or the grant was revoked.
    ///
    /// Terminal for the user: callers must record the authorization as
    /// revoked and never retry automatically.
    #[error("Gmail invalid credentials for {email}")]
    InvalidCredentials {
        /// Mailbox owner the rejected call was made for.
        email: String,
    },

    /// The requested message/thread no longer exists.
    ///
    /// Message ids can churn independently of thread ids; documented call
    /// sites treat this as a success-no-op or fall back to the thread.
    #[error("requested entity not found in {action} for {email}")]
    RequestedEntityNotFound {
        /// API operation that observed the missing entity.
        action: &'static str,
        /// Mailbox owner.
        email: String,
    },

    /// Per-user concurrency backpressure signal. Caller backs off.
    #[error("too many concurrent Gmail requests for {email}")]
    TooManyConcurrentRequests {
        /// Mailbox owner.
        email: String,
    },

    /// Per-user quota backpressure signal. Caller backs off.
    #[error("Gmail quota exceeded for {email}")]
    QuotaExceeded {
        /// Mailbox owner.
        email: String,
    },

    /// A required header was missing from a full-format message.
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    /// Malformed push envelope or message payload. Rejects the one item.
    #[error("validation error: {0}")]
    Validation(String),

    /// Anything the taxonomy does not recognize, wrapped with context.
    #[error("Gmail API error in {action} for {email}: {detail}")]
    Unknown {
        /// API operation that failed.
        action: &'static str,
        /// Mailbox owner.
        email: String,
        /// Serialized original error.
        detail: String,
    },
}

impl Error {
    /// Classifies a Gmail API error body into the taxonomy.
    ///
    /// Google reports these conditions through the error message text, not
    /// distinct status codes, so classification is substring-based.
    #[must_use]
    pub fn classify(action: &'static str, email: &str, message: &str) -> Self {
        if message.contains("Invalid Credentials") || message.contains("invalid_grant") {
            Self::InvalidCredentials {
                email: email.to_owned(),
            }
        } else if message.contains("Requested entity was not found") {
            Self::RequestedEntityNotFound {
                action,
                email: email.to_owned(),
            }
        } else if message.contains("Too many concurrent requests") {
            Self::TooManyConcurrentRequests {
                email: email.to_owned(),
            }
        } else if message.contains("Quota exceeded for quota metric") {
            Self::QuotaExceeded {
                email: email.to_owned(),
            }
        } else {
            Self::Unknown {
                action,
                email: email.to_owned(),
                detail: message.to_owned(),
            }
        }
    }

    /// Whether this is the not-found condition.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::RequestedEntityNotFound { .. })
    }

    /// Whether this error means the user's authorization is gone.
    #[must_use]
    pub const fn is_invalid_credentials(&self) -> bool {
        matches!(self, Self::InvalidCredentials { .. })
    }

    /// Whether this is a backpressure signal rather than a permanent failure.
    #[must_use]
    pub const fn is_backpressure(&self) -> bool {
        matches!(
            self,
            Self::TooManyConcurrentRequests { .. } | Self::QuotaExceeded { .. }
        )
    }
}
