pub mod client;
pub mod query;
pub mod replication;

pub use client::*;
pub use query::*;
pub use replication::*;
