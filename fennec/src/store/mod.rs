//! The client's local store: an ordered keyed map with prefix watches.
//!
//! Keys use a handful of well-known prefixes; everything else is a table
//! row keyed by `<table>/<pk-encoded>`.

pub mod keys;
pub mod memory;

pub use keys::{desired_key, desired_prefix, got_key, got_prefix, mutation_key, mutation_prefix};
pub use memory::{Diff, DiffOp, Store, WriteBatch};
