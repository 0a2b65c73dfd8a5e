//! Error types for the core pipeline.

use thiserror::Error;

use crate::user::UserId;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Gmail API operation failed.
    #[error("Gmail error: {0}")]
    Gmail(#[from] mailscreen_gmail::Error),

    /// Token refresh failed.
    #[error("OAuth error: {0}")]
    OAuth(#[from] mailscreen_oauth::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// User not found.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// The user's refresh token has passed its stored expiry.
    ///
    /// Terminal until the user re-authorizes; never retried automatically.
    #[error("refresh token expired for user {user_id}")]
    RefreshTokenExpired {
        /// The affected user.
        user_id: UserId,
    },

    /// Malformed input (push envelope, job payload, stored field).
    /// Rejects the one item, never the whole batch.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the user's authorization is gone and the
    /// condition must be recorded instead of alerted or retried.
    #[must_use]
    pub fn is_credential_expiry(&self) -> bool {
        match self {
            Self::RefreshTokenExpired { .. } => true,
            Self::Gmail(err) => err.is_invalid_credentials(),
            Self::OAuth(err) => err.is_invalid_grant(),
            _ => false,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_expiry_classification() {
        let err = Error::RefreshTokenExpired {
            user_id: UserId::new("u1"),
        };
        assert!(err.is_credential_expiry());

        let err = Error::Gmail(mailscreen_gmail::Error::classify(
            "messages.get",
            "a@b.com",
            "Invalid Credentials",
        ));
        assert!(err.is_credential_expiry());

        let err = Error::Validation("bad envelope".into());
        assert!(!err.is_credential_expiry());
    }
}
