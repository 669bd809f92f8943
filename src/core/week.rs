//! Billing-week window arithmetic.
//!
//! Weekly subscriptions reset on a configurable week-start day. All instants
//! are UTC; the snapshot collector is expected to normalize timestamps before
//! persisting them.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};

use crate::core::config::WeekStartDay;

/// Midnight UTC of the most recent week-start day at or before `now`.
#[must_use]
pub fn week_start(now: DateTime<Utc>, start_day: WeekStartDay) -> DateTime<Utc> {
    let first_day = now.date_naive().week(start_day.weekday()).first_day();
    let midnight = first_day.and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&midnight)
}

/// The next weekly reset boundary strictly after `now`.
#[must_use]
pub fn next_week_reset(now: DateTime<Utc>, start_day: WeekStartDay) -> DateTime<Utc> {
    advance_weekly_past(week_start(now, start_day) + Duration::days(7), now)
}

/// Advance an instant by 7-day increments until it is strictly after `now`.
///
/// Reset hints and week boundaries describe a recurring weekly cycle, so a
/// stale instant is still meaningful once advanced.
#[must_use]
pub fn advance_weekly_past(mut instant: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    while instant <= now {
        instant += Duration::days(7);
    }
    instant
}

/// Whole days from `now` until `reset`, rounded up, minimum 1.
///
/// The minimum avoids a division by zero in weekly pacing when the reset is
/// imminent.
#[must_use]
pub fn days_until_reset(now: DateTime<Utc>, reset: DateTime<Utc>) -> u32 {
    let seconds = (reset - now).num_seconds();
    if seconds <= 0 {
        return 1;
    }
    #[allow(clippy::cast_precision_loss)] // seconds-per-week fits f64 exactly
    let days = (seconds as f64 / 86_400.0).ceil();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // ceil of a small positive
    let days = days as u32;
    days.max(1)
}
