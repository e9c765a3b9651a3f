use super::Error;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Format milliseconds-since-midnight as a PostgreSQL `time` literal.
///
/// The valid domain is `[0, 86_400_000)`; both ends outside it are errors
/// rather than wrap-around.
pub fn milliseconds_to_pg_time(millis: i64) -> Result<String, Error> {
    if !(0..MILLIS_PER_DAY).contains(&millis) {
        return Err(Error::TimeOutOfRange(millis));
    }

    let hours = millis / 3_600_000;
    let minutes = (millis % 3_600_000) / 60_000;
    let seconds = (millis % 60_000) / 1000;
    let fraction = millis % 1000;

    if fraction == 0 {
        Ok(format!("{:02}:{:02}:{:02}", hours, minutes, seconds))
    } else {
        Ok(format!(
            "{:02}:{:02}:{:02}.{:03}",
            hours, minutes, seconds, fraction
        ))
    }
}

/// Parse a `time` literal into milliseconds since midnight. Fractions are
/// truncated to microseconds first, matching the server's precision.
pub fn pg_time_to_milliseconds(s: &str) -> Result<f64, Error> {
    let time = super::timestamp::parse_time(s).ok_or_else(|| Error::Time(s.to_string()))?;

    use chrono::Timelike;
    let micros = time.hour() as i64 * 3_600_000_000
        + time.minute() as i64 * 60_000_000
        + time.second() as i64 * 1_000_000
        + (time.nanosecond() / 1000) as i64;

    Ok(micros as f64 / 1000.0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_boundaries() {
        assert!(milliseconds_to_pg_time(-1).is_err());
        assert!(milliseconds_to_pg_time(86_400_000).is_err());
        assert_eq!(
            milliseconds_to_pg_time(86_399_999).unwrap(),
            "23:59:59.999"
        );
        assert_eq!(milliseconds_to_pg_time(0).unwrap(), "00:00:00");
    }

    #[test]
    fn test_roundtrip() {
        for ms in [0, 1, 999, 1000, 43_200_000, 86_399_999] {
            let formatted = milliseconds_to_pg_time(ms).unwrap();
            assert_eq!(pg_time_to_milliseconds(&formatted).unwrap(), ms as f64);
        }
    }

    #[test]
    fn test_microsecond_truncation() {
        // Nanosecond digits beyond the sixth are dropped, not rounded.
        assert_eq!(pg_time_to_milliseconds("00:00:00.1234569").unwrap(), 123.456);
    }

    #[test]
    fn test_malformed() {
        assert!(pg_time_to_milliseconds("25:00:00").is_err());
        assert!(pg_time_to_milliseconds("midnight").is_err());
    }
}
