use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed timestamp: \"{0}\"")]
    Timestamp(String),

    #[error("malformed date: \"{0}\"")]
    Date(String),

    #[error("time out of range: {0}ms")]
    TimeOutOfRange(i64),

    #[error("malformed time: \"{0}\"")]
    Time(String),

    #[error("malformed numeric: \"{0}\"")]
    Numeric(String),

    #[error("malformed array: \"{0}\"")]
    Array(String),

    #[error("parse int")]
    ParseInt(#[from] ParseIntError),

    #[error("parse float")]
    ParseFloat(#[from] ParseFloatError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
