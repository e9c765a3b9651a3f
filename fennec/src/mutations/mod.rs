//! Client-side mutation tracking.

pub mod tracker;

pub use tracker::{EphemeralId, MutationTracker, ServerResult};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("unknown ephemeral mutation {0}")]
    UnknownEphemeral(u64),

    #[error("duplicate result for mutation {0}")]
    DuplicateResult(u64),

    #[error("mutation result for foreign client \"{0}\"")]
    ForeignClient(String),
}
