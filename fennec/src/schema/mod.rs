//! Shared data model: table schemas, relationships, name mapping and row
//! keys. Both halves of the system agree on these.

pub mod names;
pub mod relationship;
pub mod row;
pub mod table;

pub use names::NameMapper;
pub use relationship::{Correlation, Relationship, RelationshipPath};
pub use row::{encode_row_key, row_key, Row};
pub use table::{ColumnSchema, TableSchema, ValueType};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("table \"{0}\" has no primary key")]
    NoPrimaryKey(String),

    #[error("table \"{0}\" has no column \"{1}\"")]
    UnknownColumn(String, String),

    #[error("row for \"{0}\" is missing primary key column \"{1}\"")]
    MissingKeyColumn(String, String),
}
