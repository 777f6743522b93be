//! Time-or-duration flag values.
//!
//! `--not-before` and `--not-after` take either an RFC 3339 timestamp or a
//! duration relative to now (`30m`, `1h30m`, `-5m`, `2d`).

use chrono::{DateTime, Duration, Utc};

use crate::{Error, Result};

/// Parses a time-or-duration value. Empty input means "not set".
pub fn parse_time_or_duration(
    flag: &'static str,
    value: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(time.with_timezone(&Utc)));
    }

    let duration = parse_duration(value).ok_or_else(|| {
        Error::Configuration(format!(
            "invalid value '{value}' for flag '--{flag}': expected an RFC 3339 time or a duration"
        ))
    })?;
    now.checked_add_signed(duration)
        .map(Some)
        .ok_or_else(|| Error::Configuration(format!("value '{value}' for flag '--{flag}' is out of range")))
}

/// Parses `[+-]<n><unit>...` with units `ms`, `s`, `m`, `h`, `d`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let (negative, mut rest) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };
    if rest.is_empty() {
        return None;
    }

    let mut total = Duration::zero();
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: i64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::try_milliseconds(amount)?,
            "s" => Duration::try_seconds(amount)?,
            "m" => Duration::try_minutes(amount)?,
            "h" => Duration::try_hours(amount)?,
            "d" => Duration::try_days(amount)?,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total = total.checked_add(&part)?;
    }

    Some(if negative { -total } else { total })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("-5m"), Some(Duration::minutes(-5)));
        assert_eq!(parse_duration("2d"), Some(Duration::days(2)));
        assert_eq!(parse_duration("1500ms"), Some(Duration::milliseconds(1500)));
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("10y"), None);
        assert_eq!(parse_duration("-"), None);
    }

    #[test]
    fn relative_to_now() {
        let t = parse_time_or_duration("not-after", "24h", now()).unwrap();
        assert_eq!(t, Some(now() + Duration::hours(24)));
    }

    #[test]
    fn absolute_time() {
        let t = parse_time_or_duration("not-before", "2026-03-04T05:06:07+01:00", now()).unwrap();
        assert_eq!(
            t.map(|t| t.to_rfc3339()),
            Some("2026-03-04T04:06:07+00:00".to_string())
        );
    }

    #[test]
    fn empty_is_unset() {
        assert_eq!(parse_time_or_duration("not-after", "  ", now()).unwrap(), None);
    }

    #[test]
    fn invalid_names_the_flag() {
        let err = parse_time_or_duration("not-after", "tomorrow", now()).unwrap_err();
        assert!(err.to_string().contains("--not-after"));
    }
}
