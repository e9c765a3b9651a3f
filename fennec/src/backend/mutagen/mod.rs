//! Server-side mutation execution.

pub mod processor;
pub mod push;

pub use processor::{Mutagen, MutatorFn};
pub use push::{handle_push, PushOutcome, PushParams};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Mutation id at or below the stored LMID; informational, the batch
    /// continues.
    #[error("mutation {received} already processed (lmid {lmid})")]
    AlreadyProcessed { received: u64, lmid: u64 },

    /// Mutation id beyond lmid + 1; the batch stops and the client retries
    /// from the first missing id.
    #[error("Client {client_id} sent mutation ID {received} but expected {expected}")]
    OutOfOrder {
        client_id: String,
        received: u64,
        expected: u64,
    },

    #[error("{0}")]
    Executor(#[from] crate::backend::executor::ExecutorError),
}
