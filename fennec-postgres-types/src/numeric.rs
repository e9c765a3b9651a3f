use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::{bigint::SAFE_INTEGER_MAX, Error, Value};

/// Convert a PostgreSQL `numeric` literal into a client value.
///
/// Values that survive the trip through an f64 unchanged become numbers;
/// anything wider keeps its exact text so no precision is silently lost.
pub fn parse_pg_numeric(s: &str) -> Result<Value, Error> {
    if s.eq_ignore_ascii_case("nan") {
        return Ok(Value::String(s.to_string()));
    }

    let decimal = Decimal::from_str(s).map_err(|_| Error::Numeric(s.to_string()))?;

    if decimal.is_integer() {
        if let Some(int) = decimal.to_i64() {
            if int.unsigned_abs() <= SAFE_INTEGER_MAX {
                return Ok(Value::Int(int));
            }
        }
        return Ok(Value::String(s.to_string()));
    }

    // f64 Display prints the shortest round-tripping form; if that parses
    // back to the same decimal, the double carries the value exactly.
    match decimal.to_f64() {
        Some(float) if float.to_string().parse::<Decimal>().ok() == Some(decimal.normalize()) => {
            Ok(Value::Float(float))
        }
        _ => Ok(Value::String(s.to_string())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_small_integers() {
        assert_eq!(parse_pg_numeric("42").unwrap(), Value::Int(42));
        assert_eq!(parse_pg_numeric("-17").unwrap(), Value::Int(-17));
        assert_eq!(
            parse_pg_numeric("123456789012").unwrap(),
            Value::Int(123456789012)
        );
    }

    #[test]
    fn test_fractions() {
        assert_eq!(parse_pg_numeric("2.5").unwrap(), Value::Float(2.5));
        assert_eq!(parse_pg_numeric("-0.125").unwrap(), Value::Float(-0.125));
    }

    #[test]
    fn test_wide_values_stay_text() {
        // 2^53 + 1 does not fit a double.
        assert_eq!(
            parse_pg_numeric("9007199254740993").unwrap(),
            Value::String("9007199254740993".into())
        );
        // 0.1 + precision beyond f64.
        assert_eq!(
            parse_pg_numeric("0.12345678901234567890").unwrap(),
            Value::String("0.12345678901234567890".into())
        );
    }

    #[test]
    fn test_malformed() {
        assert!(parse_pg_numeric("four").is_err());
    }
}
