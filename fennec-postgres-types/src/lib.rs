//! PostgreSQL text-format values and their client encoding.
//!
//! Every value that crosses the replication stream is decoded here into a
//! [`Value`], the representation the sync engine ships to clients: timestamps
//! become float milliseconds since the Unix epoch, dates become UTC-midnight
//! milliseconds, `time` stays a decimal string, and integers wider than 2^53
//! ride through JSON as bigints.

pub mod array;
pub mod bigint;
pub mod date;
pub mod error;
pub mod numeric;
pub mod pg_time;
pub mod timestamp;
pub mod value;

pub use error::Error;
pub use value::Value;

pub use array::parse_pg_array;
pub use bigint::{parse_pg_int8, SAFE_INTEGER_MAX};
pub use date::{date_to_millis, millis_to_date};
pub use numeric::parse_pg_numeric;
pub use pg_time::{milliseconds_to_pg_time, pg_time_to_milliseconds};
pub use timestamp::{millis_to_pg_timestamp, pg_timestamp_to_millis};
