//! Incremental view maintenance.
//!
//! Registered queries compile into operator pipelines over in-memory table
//! sources. Sources push row changes through the pipeline; the terminal
//! consumer applies the resulting view changes to a ref-counted entry tree.
//!
//! Operator kinds and change kinds are both closed sets, so dispatch is by
//! tagged enum rather than trait objects.

pub mod change;
pub mod exists;
pub mod fan;
pub mod filter;
pub mod join;
pub mod measure;
pub mod operator;
pub mod pipeline;
pub mod schema;
pub mod skip;
pub mod source;
pub mod take;
pub mod view;

pub use change::{Change, ChildChange, Node, SourceChange};
pub use operator::{FetchRequest, Operator};
pub use pipeline::{build_format, build_pipeline, TableRegistry};
pub use schema::SourceSchema;
pub use source::{MemorySource, SourceRef};
pub use view::{apply_change, batch_view_updates, Entry, ViewFormat, ViewSlot};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown table \"{0}\"")]
    UnknownTable(String),

    #[error("unknown relationship \"{0}\" on \"{1}\"")]
    UnknownRelationship(String, String),

    #[error("subquery index {0} out of bounds")]
    BadSubquery(usize),
}
