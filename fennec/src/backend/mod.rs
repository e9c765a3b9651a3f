//! Server side: change capture from PostgreSQL, the SQLite replica, per
//! client-group CVRs and the mutation processor.

pub mod changes;
pub mod cvr;
pub mod executor;
pub mod mutagen;
pub mod replicator;

pub use executor::{Executor, ExecutorError, SqlRow};
