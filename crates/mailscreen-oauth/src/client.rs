//! Token endpoint client.

use std::collections::HashMap;

use reqwest::Client;
use url::Url;

use crate::error::Result;
use crate::token::{AccessToken, ErrorResponse, TokenResponse};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Client for Google's `OAuth2` token endpoint.
#[derive(Debug, Clone)]
pub struct TokenClient {
    client_id: String,
    client_secret: String,
    token_url: Url,
    http_client: Client,
}

impl TokenClient {
    /// Creates a token client for Google.
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in endpoint URL fails to parse.
    pub fn google(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: Url::parse(GOOGLE_TOKEN_URL)?,
            http_client: Client::new(),
        })
    }

    /// Overrides the token endpoint URL. Used by tests against a local server.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid URL.
    pub fn with_token_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.token_url = Url::parse(url.as_ref())?;
        Ok(self)
    }

    /// Exchanges a refresh token for a fresh access token.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidGrant`] if the server rejects the
    /// refresh token, or another error variant for transport and protocol
    /// failures.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<AccessToken> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", &self.client_id);
        params.insert("client_secret", &self.client_secret);

        let response = self
            .http_client
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let error: ErrorResponse = response.json().await?;
            return Err(error.into_error());
        }

        let token_response: TokenResponse = response.json().await?;
        AccessToken::from_response(token_response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_access_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3599}"#,
            )
            .create_async()
            .await;

        let client = TokenClient::google("id", "secret")
            .unwrap()
            .with_token_url(format!("{}/token", server.url()))
            .unwrap();

        let token = client.refresh_access_token("refresh").await.unwrap();
        assert_eq!(token.token, "fresh");
        assert!(!token.is_expired());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_invalid_grant() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
            )
            .create_async()
            .await;

        let client = TokenClient::google("id", "secret")
            .unwrap()
            .with_token_url(format!("{}/token", server.url()))
            .unwrap();

        let err = client.refresh_access_token("stale").await.unwrap_err();
        assert!(err.is_invalid_grant());
    }
}
