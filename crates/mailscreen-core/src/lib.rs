//! # mailscreen-core
//!
//! Core pipeline for the mailscreen Gmail screener.
//!
//! This crate provides:
//! - Data model and `SQLite` repositories (users, sender/domain rules,
//!   limbo staging, screeners)
//! - **Screening Rule Evaluator** - per-sender and per-domain overrides plus
//!   a transactional-mail heuristic
//! - **History Reconciliation Engine** - idempotent processing of Gmail push
//!   events against a per-user watermark
//! - **Limbo Staging Store** - messages held out of the inbox pending a
//!   human decision, resolved in bulk
//! - **Screener Scheduling & Delivery** - per-timezone daily scheduling and
//!   the half-hour delivery sweep
//! - Job payloads and the queue / notification boundaries

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod history;
pub mod job;
pub mod limbo;
pub mod notify;
pub mod rules;
pub mod screener;
pub mod service;
pub mod user;

pub use error::{Error, Result};
pub use history::{RunContext, RunOutcome};
pub use job::{Job, JobQueue, SenderKind};
pub use limbo::{LimboDecision, LimboMessage, LimboRepository, SenderGroup};
pub use notify::{OperatorNotice, OperatorNotifier, Severity, UserMailer};
pub use rules::{
    Classification, DomainRule, DomainRuleRepository, ScreenStatus, SenderRule,
    SenderRuleRepository, classify,
};
pub use screener::{Screener, ScreenerRepository, ScreenerStatus, ScreenerTimings};
pub use service::{GmailOperatorNotifier, Pipeline};
pub use user::{User, UserId, UserRepository};
