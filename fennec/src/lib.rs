//! Fennec, a client-side sync engine for PostgreSQL.
//!
//! The server half captures logical replication into a watermarked change
//! stream, maintains a SQLite replica and per-client-group CVRs, and
//! executes pushed mutations. The client half keeps a local store and an
//! incremental view-maintenance engine fed by pokes, with optimistic
//! mutations tracked until the server settles them.

pub mod backend;
pub mod cli;
pub mod config;
pub mod ivm;
pub mod mutations;
pub mod net;
pub mod poke;
pub mod queries;
pub mod query;
pub mod schema;
pub mod store;
pub mod util;

use tracing_subscriber::EnvFilter;

/// Initialize the process-wide logger. Safe to call more than once; only
/// the first call installs the subscriber, so log-level isolation is
/// best-effort by design of the global registry.
pub fn logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
