//! What's a project without a util module.

use chrono::{DateTime, Utc};

// 2000-01-01T00:00:00Z
static POSTGRES_EPOCH: i64 = 946684800000000000;

/// Number of microseconds since the Postgres epoch.
pub fn postgres_now() -> i64 {
    let start = DateTime::from_timestamp_nanos(POSTGRES_EPOCH).fixed_offset();
    let now = Utc::now().fixed_offset();
    // Panic if overflow.
    (now - start).num_microseconds().unwrap()
}

/// Epoch milliseconds right now; CVR `lastActive` and mutation timestamps
/// use this clock.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
