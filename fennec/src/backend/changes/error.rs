use thiserror::Error;

use crate::backend::executor::ExecutorError;

#[derive(Debug, Error)]
pub enum Error {
    /// The slot was terminated under us, usually by a newer stream taking
    /// over. Terminal for this stream; the consumer may reconnect.
    #[error("replication stream aborted")]
    Abort,

    /// The replica no longer matches upstream; it must be resynced from
    /// scratch.
    #[error(
        "configured publications {configured:?} diverged from upstream {upstream:?}; reset required"
    )]
    AutoResetSignal {
        configured: Vec<String>,
        upstream: Vec<String>,
    },

    #[error("replication slot \"{0}\" does not exist")]
    SlotMissing(String),

    #[error("table \"{table}\": {reason}")]
    UnsupportedTableSchema { table: String, reason: String },

    #[error("publication \"{publication}\": {reason}")]
    BadPublication { publication: String, reason: String },

    #[error("unsupported schema change: {0}")]
    UnsupportedSchemaChange(String),

    #[error("slot still in use after {0} attempts")]
    SlotBusy(usize),

    #[error("stream already started")]
    AlreadyStarted,

    #[error("{0}")]
    Wire(#[from] crate::net::Error),

    #[error("{0}")]
    Executor(#[from] ExecutorError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("replica: {0}")]
    Replica(String),
}

impl Error {
    /// Only schema mismatches force a resync; everything else can retry
    /// or reconnect.
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            Error::AutoResetSignal { .. } | Error::UnsupportedSchemaChange(_)
        )
    }
}
