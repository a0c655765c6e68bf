//! Timestamp parsing and duration rendering.

use chrono::{DateTime, Utc};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// `MM:SS`, or `H:MM:SS` once an hour has passed. Segments are zero padded
/// to two digits; sub-second remainders are dropped.
pub fn format_duration(total_ms: i64) -> String {
    let mut secs = total_ms.max(0) / 1000;
    let hours = secs / HOUR;
    secs -= hours * HOUR;
    let minutes = secs / MINUTE;
    secs -= minutes * MINUTE;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Coarse relative duration for history lists: `42s`, `3m 5s`, `2h 10m`,
/// `4d 1h`, or `>1w` beyond a week.
pub fn human_duration(total_ms: i64) -> String {
    let total = total_ms.max(0) / 1000;
    let seconds = total % MINUTE;
    if total < MINUTE {
        return format!("{}s", seconds);
    }
    let minutes = (total / MINUTE) % 60;
    if total < HOUR {
        return format!("{}m {}s", minutes, seconds);
    }
    let hours = (total / HOUR) % 24;
    if total < DAY {
        return format!("{}h {}m", hours, minutes);
    }
    let days = total / DAY;
    if days > 7 {
        return ">1w".to_string();
    }
    format!("{}d {}h", days, hours)
}

/// Rendered `finished - started`, when both ends are known.
pub fn elapsed(started: Option<DateTime<Utc>>, finished: Option<DateTime<Utc>>) -> Option<String> {
    match (started, finished) {
        (Some(s), Some(f)) => Some(format_duration((f - s).num_milliseconds())),
        _ => None,
    }
}
