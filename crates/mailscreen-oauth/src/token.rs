//! Access token types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An access token with its expiry, as persisted per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// Bearer token string.
    pub token: String,
    /// Expiration time.
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Creates an access token with an explicit expiry.
    #[must_use]
    pub const fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    /// Builds a token from a token endpoint response.
    ///
    /// # Errors
    ///
    /// Returns an error if the response carries no `expires_in`.
    pub fn from_response(response: TokenResponse) -> Result<Self> {
        let expires_in = response
            .expires_in
            .ok_or_else(|| Error::InvalidResponse("expires_in missing".into()))?;
        Ok(Self {
            token: response.access_token,
            expires_at: Utc::now() + Duration::seconds(i64::from(expires_in)),
        })
    }

    /// Checks if the token is expired (with a 60 second buffer).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(60) >= self.expires_at
    }
}

/// Token response from the `OAuth2` token endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type (usually "Bearer").
    pub token_type: String,
    /// Expires in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u32>,
    /// Scope granted by the authorization server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Error response from the `OAuth2` token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an [`Error`].
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::from_server(self.error, self.error_description)
    }
}
