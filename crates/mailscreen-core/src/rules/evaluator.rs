//! The screening rule evaluator.
//!
//! Classification is deterministic given the message fields and the current
//! rule tables, and performs no writes. That determinism is what makes
//! reprocessing a replayed push event safe.

use std::sync::LazyLock;

use regex::Regex;

use super::model::{Classification, sender_domain};
use super::repository::{DomainRuleRepository, SenderRuleRepository};
use crate::Result;
use crate::config::SELF_NOTIFICATION_DOMAIN;
use crate::user::UserId;

/// Phrases that mark a message as carrying a one-time code.
const OTP_PHRASES: [&str; 11] = [
    "confirmation code",
    "login code",
    "one-time code",
    "one time code",
    "one-time password",
    "one time password",
    "one time passcode",
    "one-time passcode",
    "one-time pin",
    "one time pin",
    "verification code",
];

/// Phrases that mark a message as carrying a passwordless login link.
const MAGIC_LINK_PHRASES: [&str; 4] = [
    "login link",
    "passwordless login",
    "magic link",
    "magic login",
];

static SIX_DIGIT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\d{3}\s?\d{3}").unwrap()
});

/// A URL path this long is too long to be a homepage link and long enough
/// to plausibly carry a login token.
const MAGIC_LINK_MIN_PATH_CHARS: usize = 30;

static MAGIC_LINK_URL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(&format!(
        r"https?://([\w.-]+\.)+[\w.-]+/[\w/?%&=._-]{{{MAGIC_LINK_MIN_PATH_CHARS},}}"
    ))
    .unwrap()
});

/// Classifies one incoming message for one user.
///
/// Strict precedence order:
/// 1. A sender rule, if present, always wins.
/// 2. Mail from the product's own notification domain is always let in.
/// 3. A domain rule, if present.
/// 4. The transactional-mail heuristic ([`transactional_exception`]).
/// 5. Otherwise the message is held for screening.
///
/// # Errors
///
/// Returns an error if a rule lookup fails.
pub async fn classify(
    senders: &SenderRuleRepository,
    domains: &DomainRuleRepository,
    user_id: &UserId,
    sender_email: &str,
    subject: &str,
    snippet: &str,
    body: Option<&str>,
) -> Result<Classification> {
    if let Some(rule) = senders.get(user_id, sender_email).await? {
        return Ok(rule.status.into());
    }

    let domain = sender_domain(sender_email);
    if domain == SELF_NOTIFICATION_DOMAIN {
        return Ok(Classification::In);
    }
    if let Some(rule) = domains.get(user_id, &domain).await? {
        return Ok(rule.status.into());
    }

    if transactional_exception(subject, snippet, body) {
        return Ok(Classification::In);
    }

    Ok(Classification::ToScreen)
}

/// Whether a message looks like transactional security email (one-time
/// codes, password resets, magic links) that must never be screened out.
#[must_use]
pub fn transactional_exception(subject: &str, snippet: &str, body: Option<&str>) -> bool {
    let subject_lower = subject.to_lowercase();
    if contains_otp_phrase(&subject_lower)
        || contains_password_reset_phrase(&subject_lower)
        || subject_lower.contains("otp")
    {
        return true;
    }

    let snippet_lower = snippet.to_lowercase();
    if (contains_otp_phrase(&snippet_lower) && contains_six_digit_otp(snippet, true))
        || (contains_magic_link_phrase(&snippet_lower) && contains_magic_link(snippet))
    {
        return true;
    }

    if let Some(body) = body {
        let body_lower = body.to_lowercase();
        if (contains_otp_phrase(&body_lower) && contains_six_digit_otp(body, false))
            || (contains_magic_link_phrase(&body_lower) && contains_magic_link(body))
        {
            return true;
        }
    }

    false
}

fn contains_otp_phrase(text_lower: &str) -> bool {
    OTP_PHRASES.iter().any(|phrase| text_lower.contains(phrase))
}

fn contains_password_reset_phrase(text_lower: &str) -> bool {
    text_lower.contains("reset")
        && (text_lower.contains("password")
            || text_lower.contains("passcode")
            || text_lower.contains("passphrase"))
}

fn contains_magic_link_phrase(text_lower: &str) -> bool {
    MAGIC_LINK_PHRASES
        .iter()
        .any(|phrase| text_lower.contains(phrase))
}

fn contains_magic_link(text: &str) -> bool {
    MAGIC_LINK_URL.is_match(text)
}

/// Looks for a six-digit code, optionally split `123 456`.
///
/// `strict` requires a standalone token (no adjacent word characters);
/// otherwise only adjacent digits disqualify a candidate, so codes embedded
/// in markup still count.
fn contains_six_digit_otp(text: &str, strict: bool) -> bool {
    SIX_DIGIT.find_iter(text).any(|m| {
        let before = text[..m.start()].chars().next_back();
        let after = text[m.end()..].chars().next();
        if strict {
            !before.is_some_and(|c| c.is_alphanumeric() || c == '_')
                && !after.is_some_and(|c| c.is_alphanumeric() || c == '_')
        } else {
            !before.is_some_and(|c| c.is_ascii_digit())
                && !after.is_some_and(|c| c.is_ascii_digit())
        }
    })
}
