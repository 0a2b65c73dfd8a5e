//! Error types for token refresh operations.

/// Result type alias for token operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Token refresh error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The authorization server rejected the refresh token.
    ///
    /// Google reports a revoked or expired refresh token as `invalid_grant`.
    /// Callers treat this as terminal for the user until re-authorization.
    #[error("refresh token rejected: {description}")]
    InvalidGrant {
        /// Human-readable description from the server.
        description: String,
    },

    /// `OAuth2` error from the server other than `invalid_grant`.
    #[error("OAuth2 error: {error} - {description}")]
    OAuth {
        /// Error code (e.g. `invalid_client`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// The token response was missing a required field.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Creates an error from a server error code and description.
    #[must_use]
    pub fn from_server(error: impl Into<String>, description: impl Into<String>) -> Self {
        let error = error.into();
        let description = description.into();
        if error == "invalid_grant" {
            Self::InvalidGrant { description }
        } else {
            Self::OAuth { error, description }
        }
    }

    /// Whether this error means the refresh token itself is no longer valid.
    #[must_use]
    pub const fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::InvalidGrant { .. })
    }
}
