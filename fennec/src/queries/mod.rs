//! Desired-query lifecycle on the client.

pub mod manager;

pub use manager::{QueryManager, QuerySpec, QuerySubscription, MAX_TTL_MS};
