use chrono::{DateTime, NaiveDateTime, NaiveTime, Timelike};

use crate::batch::Scan;

pub const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;
pub const ZERO_DURATION: &str = "00:00:00";

/// Elapsed time between two millisecond instants as `HH:MM:SS`.
///
/// Missing input yields `00:00:00`. A negative delta is treated as a
/// midnight crossover and has one day added. Sub-second remainders are
/// floored. Instants too far apart to subtract also yield `00:00:00`.
pub fn duration(first: Option<i64>, last: Option<i64>) -> String {
    let (Some(first), Some(last)) = (first, last) else {
        return ZERO_DURATION.to_string();
    };

    let Some(mut delta) = last.checked_sub(first) else {
        return ZERO_DURATION.to_string();
    };
    if delta < 0 {
        delta = delta.saturating_add(DAY_MILLIS);
    }
    format_hms(delta.max(0) / 1000)
}

pub fn format_hms(total_seconds: i64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

const TIME_FORMATS: &[&str] = &[
    "%H:%M:%S",
    "%H:%M",
    "%I:%M:%S %p",
    "%I:%M %p",
];

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y, %I:%M:%S %p",
    "%m/%d/%Y, %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

/// Milliseconds since midnight for a display time string.
///
/// Accepts 24-hour (`14:05`, `14:05:09`), 12-hour (`2:05 PM`,
/// `2:05:09 pm`) and date-prefixed forms (`1/2/2025, 3:04:05 PM`,
/// `2025-01-02 15:04:05`).
pub fn wall_clock_millis(raw: &str) -> Option<i64> {
    let normalized = raw.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return None;
    }

    let time = TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&normalized, fmt).ok())
        .or_else(|| {
            DATE_TIME_FORMATS.iter().find_map(|fmt| {
                NaiveDateTime::parse_from_str(&normalized, fmt)
                    .ok()
                    .map(|dt| dt.time())
            })
        })?;

    Some(
        i64::from(time.num_seconds_from_midnight()) * 1000
            + i64::from(time.nanosecond() / 1_000_000),
    )
}

/// Elapsed time across a batch, first scan to last.
///
/// Uses the epoch instants recorded at acceptance. Scans replayed without
/// them fall back to their display strings: full RFC 3339 timestamps when
/// both parse, else time-of-day with midnight crossover handling.
pub fn batch_duration(scans: &[Scan]) -> String {
    let (Some(first), Some(last)) = (scans.first(), scans.last()) else {
        return ZERO_DURATION.to_string();
    };

    if first.epoch_millis.is_some() && last.epoch_millis.is_some() {
        return duration(first.epoch_millis, last.epoch_millis);
    }

    let rfc3339 = |raw: &str| {
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|dt| dt.timestamp_millis())
    };
    if let (Some(start), Some(end)) =
        (rfc3339(&first.captured_at), rfc3339(&last.captured_at))
    {
        return format_hms(end.saturating_sub(start).max(0) / 1000);
    }

    duration(
        wall_clock_millis(&first.captured_at),
        wall_clock_millis(&last.captured_at),
    )
}
