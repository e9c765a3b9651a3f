//! Wire protocols: the PostgreSQL replication messages we consume upstream
//! and the JSON sync protocol we speak with clients.

pub mod messages;
pub mod sync;

pub use messages::replication::{
    Begin, Commit, Delete, Insert, KeepAlive, LogicalMessage, Origin, Relation, ReplicationMeta,
    StatusUpdate, Truncate, TupleData, Update, XLogData, XLogPayload,
};
pub use messages::{CopyData, FromBytes, ToBytes};

use bytes::{Buf, Bytes};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unexpected message code '{0}', expected '{1}'")]
    UnexpectedCode(char, char),

    #[error("unexpected replication meta message '{0}'")]
    UnexpectedReplicationMetaMessage(char),

    #[error("unexpected logical message '{0}'")]
    UnexpectedLogicalMessage(char),

    #[error("unexpected tuple marker '{0}'")]
    UnexpectedTupleMarker(char),

    #[error("message truncated")]
    Eof,

    #[error("not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read a NUL-terminated string out of the buffer, consuming the terminator.
pub fn c_string_buf(bytes: &mut Bytes) -> String {
    let mut buf = Vec::new();

    while bytes.has_remaining() {
        let byte = bytes.get_u8();
        if byte == 0 {
            break;
        }
        buf.push(byte);
    }

    String::from_utf8_lossy(&buf).to_string()
}
