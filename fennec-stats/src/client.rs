use serde::{Deserialize, Serialize};

/// Per-client-group counters on the view-syncer side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientStats {
    /// Pokes sent to this client group.
    pub pokes: u64,
    /// Row patch operations shipped.
    pub row_patches: u64,
    /// Desired-query changes received.
    pub query_changes: u64,
    /// Mutations pushed by this client group.
    pub mutations: u64,
}
