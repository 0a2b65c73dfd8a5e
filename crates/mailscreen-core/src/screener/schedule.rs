//! Next-screener time computation.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::SCREENER_VALIDITY_HOURS;
use crate::error::{Error, Result};

/// When the next screener fires and when it stops being accessible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenerTimings {
    /// The next occurrence of the user's daily time, in UTC.
    pub scheduled_at: DateTime<Utc>,
    /// Always `scheduled_at` plus [`SCREENER_VALIDITY_HOURS`].
    pub expire_at: DateTime<Utc>,
}

/// Validates a `HH:MM` daily time string.
///
/// # Errors
///
/// Returns a validation error for anything that is not a zero-padded
/// 24-hour `HH:MM`.
pub fn validate_daily_time(daily_time: &str) -> Result<(u32, u32)> {
    let invalid = || Error::Validation(format!("daily screener time not HH:MM: {daily_time}"));
    if daily_time.len() != 5 || daily_time.as_bytes()[2] != b':' {
        return Err(invalid());
    }
    let hour: u32 = daily_time[..2].parse().map_err(|_| invalid())?;
    let minute: u32 = daily_time[3..].parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Computes the next screener occurrence for a user.
///
/// The daily time is interpreted in the user's timezone for "today"; if
/// that instant is already at or before `now`, it rolls forward to
/// tomorrow. Ambiguous local times (fall-back) resolve to the earlier
/// instant; nonexistent local times (spring-forward) roll to the next day.
///
/// # Errors
///
/// Returns a validation error for a malformed time or unknown timezone.
pub fn next_screener_timings(
    daily_time: &str,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<ScreenerTimings> {
    let (hour, minute) = validate_daily_time(daily_time)?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| Error::Validation(format!("unknown timezone: {timezone}")))?;

    let local_now = now.with_timezone(&tz);
    let today = local_now.date_naive();
    let candidate = local_instant(tz, today, hour, minute);

    let scheduled_local = match candidate {
        Some(at) if at > local_now => at,
        _ => {
            let tomorrow = today
                .succ_opt()
                .ok_or_else(|| Error::Validation("date out of range".into()))?;
            local_instant(tz, tomorrow, hour, minute)
                .ok_or_else(|| Error::Validation("unrepresentable local time".into()))?
        }
    };

    let scheduled_at = scheduled_local.with_timezone(&Utc);
    Ok(ScreenerTimings {
        scheduled_at,
        expire_at: scheduled_at + Duration::hours(SCREENER_VALIDITY_HOURS),
    })
}

fn local_instant(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    match tz.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0) {
        LocalResult::Single(at) => Some(at),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}
