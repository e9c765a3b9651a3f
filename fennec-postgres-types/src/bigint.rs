use super::{Error, Value};

/// Largest integer magnitude a double represents exactly (2^53 - 1).
pub const SAFE_INTEGER_MAX: u64 = (1 << 53) - 1;

/// Parse a PostgreSQL `int2`/`int4`/`int8` literal.
///
/// The full 64-bit range is kept; [`Value::Int`] serializes through JSON
/// without truncation, so bigints past 2^53 arrive intact on the client.
pub fn parse_pg_int8(s: &str) -> Result<Value, Error> {
    Ok(Value::Int(s.trim().parse::<i64>()?))
}
