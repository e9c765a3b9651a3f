use chrono::{DateTime, NaiveDate};

use super::Error;

/// Parse a PostgreSQL `date` into UTC-midnight milliseconds.
pub fn date_to_millis(s: &str) -> Result<i64, Error> {
    let date =
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| Error::Date(s.to_string()))?;

    Ok(date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::Date(s.to_string()))?
        .and_utc()
        .timestamp_millis())
}

/// Format UTC-midnight milliseconds back into a `date` literal.
pub fn millis_to_date(millis: i64) -> Result<String, Error> {
    let dt = DateTime::from_timestamp_millis(millis).ok_or(Error::TimeOutOfRange(millis))?;

    Ok(dt.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_date_to_millis() {
        assert_eq!(date_to_millis("1970-01-01").unwrap(), 0);
        assert_eq!(date_to_millis("2004-10-19").unwrap(), 1098144000000);
        assert_eq!(date_to_millis("1969-12-31").unwrap(), -86400000);
    }

    #[test]
    fn test_roundtrip() {
        for date in ["1970-01-01", "2004-10-19", "2038-01-19"] {
            let ms = date_to_millis(date).unwrap();
            assert_eq!(millis_to_date(ms).unwrap(), date);
        }
    }

    #[test]
    fn test_malformed() {
        assert!(date_to_millis("10/19/2004").is_err());
        assert!(date_to_millis("2004-02-30").is_err());
    }
}
