//! # mailscreen-gmail
//!
//! Typed Gmail REST v1 client for the mailscreen screening pipeline.
//!
//! This crate provides:
//! - An authenticated per-user [`GmailClient`] (message list/get/modify/trash,
//!   batch label mutation, history listing, watch lifecycle, message import)
//! - Structured classification of Gmail API errors
//! - Push notification envelope decoding and subscription verification
//! - Header and body extraction from full-format message payloads
//!
//! Token refresh lives in `mailscreen-oauth`; this crate only consumes an
//! already-valid access token.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod error;
pub mod labels;
mod payload;
mod push;
mod types;

pub use client::{GmailClient, OutgoingMessage};
pub use error::{Error, Result};
pub use payload::{
    ExtractedMessage, Mailbox, extract_body, extract_full, extract_recipients, extract_sender,
};
pub use push::{PushNotification, decode_push_envelope};
pub use types::{
    FullMessage, Header, HistoryEntry, HistoryMessageAdded, HistoryPage, ImportResponse,
    MessageBody, MessagePart, MessageRef, WatchResponse,
};
