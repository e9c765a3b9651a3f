pub mod begin;
pub mod commit;
pub mod delete;
pub mod insert;
pub mod message;
pub mod origin;
pub mod relation;
pub mod string;
pub mod truncate;
pub mod tuple_data;
pub mod update;

use super::super::prelude::*;

use begin::Begin;
use commit::Commit;
use delete::Delete;
use insert::Insert;
use message::LogicalMessage;
use origin::Origin;
use relation::Relation;
use truncate::Truncate;
use update::Update;

/// One pgoutput logical decoding message.
#[derive(Debug, Clone)]
pub enum XLogPayload {
    Begin(Begin),
    Commit(Commit),
    Origin(Origin),
    Relation(Relation),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Truncate(Truncate),
    Message(LogicalMessage),
}

impl FromBytes for XLogPayload {
    fn from_bytes(bytes: Bytes) -> Result<Self, Error> {
        Ok(match bytes.first().copied().unwrap_or(0) as char {
            'B' => Self::Begin(Begin::from_bytes(bytes)?),
            'C' => Self::Commit(Commit::from_bytes(bytes)?),
            'O' => Self::Origin(Origin::from_bytes(bytes)?),
            'R' => Self::Relation(Relation::from_bytes(bytes)?),
            'I' => Self::Insert(Insert::from_bytes(bytes)?),
            'U' => Self::Update(Update::from_bytes(bytes)?),
            'D' => Self::Delete(Delete::from_bytes(bytes)?),
            'T' => Self::Truncate(Truncate::from_bytes(bytes)?),
            'M' => Self::Message(LogicalMessage::from_bytes(bytes)?),
            c => return Err(Error::UnexpectedLogicalMessage(c)),
        })
    }
}
