//! Calendar-day usage windows
//!
//! Project usage is integrated per UTC day. Shortly after midnight the
//! previous day is recomputed as well, since the metrics store keeps
//! aggregating samples for a while after the day closes.

use crate::models::UsageWindow;
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};

/// Hours after midnight (inclusive) during which yesterday is recomputed
pub const YESTERDAY_CUTOFF_HOUR: u32 = 5;

/// Lookback passed to every summary query
pub const DAY_DURATION_LABEL: &str = "1d";

/// Windows that must be (re)computed at `now`, oldest first
pub fn usage_windows(now: DateTime<Utc>) -> Vec<UsageWindow> {
    let today = midnight(now);

    let mut windows = Vec::with_capacity(2);
    if now.hour() <= YESTERDAY_CUTOFF_HOUR {
        windows.push(day_window(today - Duration::days(1), now));
    }
    windows.push(day_window(today, now));
    windows
}

/// Window for the day starting at `start`, measured at `now`
pub fn day_window(start: DateTime<Utc>, now: DateTime<Utc>) -> UsageWindow {
    let end = start + Duration::days(1);
    let effective = now.clamp(start, end);

    UsageWindow {
        start,
        end,
        duration_label: DAY_DURATION_LABEL,
        range_seconds: (effective - start).num_seconds(),
    }
}

fn midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}
