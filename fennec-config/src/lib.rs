// Submodules
pub mod client;
pub mod core;
pub mod error;
pub mod general;
pub mod overrides;
pub mod purge;
pub mod replication;

pub use client::Client;
pub use core::Config;
pub use error::Error;
pub use general::General;
pub use overrides::Overrides;
pub use purge::Purge;
pub use replication::Replication;
