//! Parsing of `--run-at` values for delayed jobs.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

use crate::error::QueueError;

/// Resolve a `run_at` argument relative to `now`.
///
/// Accepted forms:
/// - `+30s`, `+5m`, `+2h`, `+1d` (offset from now)
/// - RFC 3339 timestamps (`2026-01-02T03:04:05Z`, `2026-01-02T03:04:05+02:00`)
/// - naive `YYYY-MM-DDTHH:MM:SS` or `YYYY-MM-DD HH:MM:SS`, read as UTC
pub fn parse_run_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
    let input = input.trim();
    let invalid = || QueueError::InvalidRunAt(input.to_string());

    if let Some(offset) = input.strip_prefix('+') {
        if offset.len() < 2 || !offset.is_ascii() {
            return Err(invalid());
        }
        let (amount, unit) = offset.split_at(offset.len() - 1);
        if !amount.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount: i64 = amount.parse().map_err(|_| invalid())?;
        let delta = match unit {
            "s" => TimeDelta::try_seconds(amount),
            "m" => TimeDelta::try_minutes(amount),
            "h" => TimeDelta::try_hours(amount),
            "d" => TimeDelta::try_days(amount),
            _ => None,
        }
        .ok_or_else(invalid)?;
        return now.checked_add_signed(delta).ok_or_else(invalid);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(invalid)
}
