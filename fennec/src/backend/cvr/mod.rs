//! Client view records: per client-group memoisation of what each client
//! has, plus the view syncer that keeps it current and the purger that
//! garbage-collects the inactive.

pub mod purger;
pub mod store;
pub mod syncer;

pub use purger::Purger;
pub use store::{Cvr, CvrStore, QueryRecord};
pub use syncer::ViewSyncer;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Executor(#[from] crate::backend::executor::ExecutorError),

    #[error("{0}")]
    Changes(#[from] crate::backend::changes::Error),

    #[error("{0}")]
    Ivm(#[from] crate::ivm::Error),

    #[error("unknown custom query \"{0}\"")]
    UnknownCustomQuery(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
