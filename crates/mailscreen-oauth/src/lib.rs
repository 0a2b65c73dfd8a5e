//! # mailscreen-oauth
//!
//! `OAuth2` token refresh for the mailscreen Gmail pipeline.
//!
//! Consent and session management live outside this workspace; users arrive
//! with a refresh token already granted. This crate covers the one flow the
//! pipeline exercises at runtime: exchanging a refresh token for a fresh
//! access token at Google's token endpoint, and deciding when a stored token
//! needs that exchange.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod token;

pub use client::TokenClient;
pub use error::{Error, Result};
pub use token::{AccessToken, TokenResponse};
