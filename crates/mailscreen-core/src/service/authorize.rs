//! Per-user Gmail client construction with transparent token refresh.

use chrono::Utc;
use mailscreen_gmail::GmailClient;
use mailscreen_oauth::{AccessToken, TokenClient};
use tracing::debug;

use super::Pipeline;
use crate::error::{Error, Result};
use crate::notify::OperatorNotifier;
use crate::user::{User, UserRepository};

impl<N: OperatorNotifier> Pipeline<N> {
    /// Produces an authenticated Gmail client for one user, refreshing and
    /// persisting the access token if it has expired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshTokenExpired`] when the stored refresh token
    /// is past its expiry (terminal until re-authorization),
    /// [`Error::Validation`] when required token fields are missing, or a
    /// refresh error from the token endpoint.
    pub async fn authorize(&self, user: &User) -> Result<GmailClient> {
        authorize_gmail(
            &self.users,
            &self.token_client,
            user,
            self.gmail_base_url.as_deref(),
        )
        .await
    }
}

/// The authorize step, shared by the pipeline and the operator notifier.
pub(crate) async fn authorize_gmail(
    users: &UserRepository,
    token_client: &TokenClient,
    user: &User,
    gmail_base_url: Option<&str>,
) -> Result<GmailClient> {
    let refresh_token = user
        .refresh_token
        .as_deref()
        .ok_or_else(|| missing_field(user, "refresh_token"))?;
    user.gmail_id
        .as_deref()
        .ok_or_else(|| missing_field(user, "gmail_id"))?;

    if user.refresh_token_expired(Utc::now()) {
        return Err(Error::RefreshTokenExpired {
            user_id: user.id.clone(),
        });
    }

    let stored = match (&user.access_token, user.access_token_expire_at) {
        (Some(token), Some(expires_at)) => Some(AccessToken::new(token.clone(), expires_at)),
        _ => None,
    };

    let access_token = match stored {
        Some(token) if !token.is_expired() => token.token,
        _ => {
            debug!(user_id = %user.id, "access token expired, refreshing");
            let fresh = token_client.refresh_access_token(refresh_token).await?;
            users.store_access_token(&user.id, &fresh).await?;
            fresh.token
        }
    };

    let mut client = GmailClient::new(access_token, user.email.clone());
    if let Some(base_url) = gmail_base_url {
        client = client.with_base_url(base_url);
    }
    Ok(client)
}

fn missing_field(user: &User, field: &str) -> Error {
    Error::Validation(format!("user {} is missing {field}", user.id))
}
