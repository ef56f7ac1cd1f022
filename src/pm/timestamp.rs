use chrono::{DateTime, LocalResult, NaiveDateTime, SecondsFormat, TimeZone};
use chrono_tz::Tz;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses a reading timestamp.
///
/// RFC 3339 strings carry their own offset. Naive date-times are taken to be
/// wall-clock time in `timezone`; a wall-clock time skipped by a DST change
/// yields `None`, an ambiguous one resolves to the earlier instant.
pub fn parse_timestamp(raw: &str, timezone: Tz) -> Option<DateTime<Tz>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&timezone));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())?;

    match naive.and_local_timezone(timezone) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(dt, _) => Some(dt),
        LocalResult::None => None,
    }
}

/// Canonical stored form: RFC 3339 with the instant's own offset, `Z` for UTC.
pub fn format_timestamp<T: TimeZone>(dt: &DateTime<T>) -> String {
    dt.fixed_offset().to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
