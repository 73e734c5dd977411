// Wall-clock timestamps as printed by pcm and pqos
//
// Both tools print local time without a zone, either with or without a
// fractional seconds part.

use chrono::{Local, NaiveDateTime, TimeZone};

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

/// Parse `YYYY-MM-DD HH:MM:SS[.ffffff]` into fractional POSIX seconds
///
/// Local time is assumed. Times that do not exist locally (DST gap) are
/// read as UTC instead of being dropped.
pub fn parse_datetime(text: &str) -> Option<f64> {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return None;
    }

    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&cleaned, fmt).ok())?;

    let seconds = match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.timestamp(),
        None => naive.and_utc().timestamp(),
    };
    Some(seconds as f64 + f64::from(naive.and_utc().timestamp_subsec_micros()) / 1_000_000.0)
}

/// Parse separate date and time cells, as pcm writes them
pub fn parse_date_time(date: &str, time: &str) -> Option<f64> {
    parse_datetime(&format!("{} {}", date.trim(), time.trim()))
}

/// Whether the time-of-day part carries a fractional second
pub fn has_subseconds(text: &str) -> bool {
    text.split_whitespace()
        .last()
        .is_some_and(|time_of_day| time_of_day.contains('.'))
}
