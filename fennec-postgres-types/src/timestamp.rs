use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use super::Error;

/// Parse a PostgreSQL text-format timestamp into float milliseconds since
/// the Unix epoch. Sub-millisecond precision is preserved in the fraction.
///
/// Accepts `YYYY-MM-DD HH:MM:SS[.ffffff][±HH[:MM[:SS]]]`. A missing offset
/// means UTC, which is how `timestamp` (without time zone) columns arrive.
pub fn pg_timestamp_to_millis(s: &str) -> Result<f64, Error> {
    let (body, offset_secs) = split_offset(s);
    let naive = parse_naive(body).ok_or_else(|| Error::Timestamp(s.to_string()))?;
    let micros = naive
        .and_utc()
        .timestamp_micros()
        .checked_sub(offset_secs * 1_000_000)
        .ok_or_else(|| Error::Timestamp(s.to_string()))?;

    Ok(micros as f64 / 1000.0)
}

/// Format milliseconds since epoch as a PostgreSQL timestamp at UTC.
pub fn millis_to_pg_timestamp(millis: f64) -> Result<String, Error> {
    let micros = (millis * 1000.0).round() as i64;
    let dt = DateTime::from_timestamp_micros(micros)
        .ok_or(Error::TimeOutOfRange(micros / 1000))?;

    Ok(dt.format("%Y-%m-%d %H:%M:%S%.6f+00").to_string())
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    let (date, time) = s.split_once([' ', 'T'])?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = parse_time(time)?;
    Some(date.and_time(time))
}

pub(crate) fn parse_time(s: &str) -> Option<NaiveTime> {
    let (hms, fraction) = match s.split_once('.') {
        Some((hms, fraction)) => (hms, fraction),
        None => (s, ""),
    };

    let mut parts = hms.split(':');
    let hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = parts.next()?.parse().ok()?;
    let second: u32 = parts.next().unwrap_or("0").parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    // Fractions longer than microseconds are truncated, matching Postgres.
    let mut micros = 0u32;
    for (i, c) in fraction.chars().take(6).enumerate() {
        micros += c.to_digit(10)? * 10u32.pow(5 - i as u32);
    }

    NaiveTime::from_hms_micro_opt(hour, minute, second, micros)
}

/// Split a trailing UTC offset off a timestamp string. Returns the body and
/// the offset in seconds (0 when absent).
fn split_offset(s: &str) -> (&str, i64) {
    // The date itself contains '-' separators; only look for a sign after
    // the time-of-day begins.
    let start = match s.find(' ').or_else(|| s.find('T')) {
        Some(i) => i,
        None => return (s, 0),
    };

    for (i, c) in s[start..].char_indices() {
        if c == '+' || c == '-' {
            let at = start + i;
            let mut parts = s[at + 1..].split(':');
            let hours: i64 = match parts.next().and_then(|p| p.parse().ok()) {
                Some(h) => h,
                None => return (s, 0),
            };
            let minutes: i64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            let seconds: i64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            let mut offset = hours * 3600 + minutes * 60 + seconds;
            if c == '-' {
                offset = -offset;
            }
            return (&s[..at], offset);
        }
    }

    (s, 0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_utc() {
        let ms = pg_timestamp_to_millis("2003-04-12 09:38:26").unwrap();
        assert_eq!(ms, 1050140306000.0);
    }

    #[test]
    fn test_parse_with_offset() {
        // 04:05:06-05 is 09:05:06 UTC.
        let with_offset = pg_timestamp_to_millis("2003-04-12 04:05:06-05").unwrap();
        let utc = pg_timestamp_to_millis("2003-04-12 09:05:06+00").unwrap();
        assert_eq!(with_offset, utc);
    }

    #[test]
    fn test_sub_millisecond_precision() {
        let ms = pg_timestamp_to_millis("2025-03-05 14:55:02.436109+00").unwrap();
        assert_eq!(ms, 1741186502436.109);
    }

    #[test]
    fn test_partial_offset_minutes() {
        let ist = pg_timestamp_to_millis("2024-01-15 12:00:00+05:30").unwrap();
        let utc = pg_timestamp_to_millis("2024-01-15 06:30:00+00").unwrap();
        assert_eq!(ist, utc);
    }

    #[test]
    fn test_roundtrip() {
        for ms in [0.0, 1.0, 1050134706000.0, 1741186502436.109, 4102444800000.0] {
            let formatted = millis_to_pg_timestamp(ms).unwrap();
            assert_eq!(pg_timestamp_to_millis(&formatted).unwrap(), ms);
        }
    }

    #[test]
    fn test_malformed() {
        assert!(pg_timestamp_to_millis("not a timestamp").is_err());
        assert!(pg_timestamp_to_millis("2024-13-40 00:00:00").is_err());
    }
}
