pub mod keep_alive;
pub mod logical;
pub mod status_update;
pub mod xlog_data;

pub use keep_alive::KeepAlive;
pub use logical::begin::Begin;
pub use logical::commit::Commit;
pub use logical::delete::Delete;
pub use logical::insert::Insert;
pub use logical::message::LogicalMessage;
pub use logical::origin::Origin;
pub use logical::relation::Relation;
pub use logical::truncate::Truncate;
pub use logical::tuple_data::TupleData;
pub use logical::update::Update;
pub use logical::XLogPayload;
pub use status_update::StatusUpdate;
pub use xlog_data::XLogData;

use super::prelude::*;

/// Replication control messages that are not WAL data.
#[derive(Debug, Clone)]
pub enum ReplicationMeta {
    KeepAlive(KeepAlive),
    StatusUpdate(StatusUpdate),
}

impl FromBytes for ReplicationMeta {
    fn from_bytes(bytes: Bytes) -> Result<Self, Error> {
        match bytes.first().copied().unwrap_or(0) as char {
            'k' => Ok(Self::KeepAlive(KeepAlive::from_bytes(bytes)?)),
            'r' => Ok(Self::StatusUpdate(StatusUpdate::from_bytes(bytes)?)),
            c => Err(Error::UnexpectedReplicationMetaMessage(c)),
        }
    }
}

impl ToBytes for ReplicationMeta {
    fn to_bytes(&self) -> Result<Bytes, Error> {
        match self {
            Self::KeepAlive(ka) => ka.to_bytes(),
            Self::StatusUpdate(status) => status.to_bytes(),
        }
    }
}
