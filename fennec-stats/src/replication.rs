use serde::{Deserialize, Serialize};

/// Progress counters for one replication stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReplicationStats {
    /// Watermark of the last commit emitted downstream.
    pub last_watermark: String,
    /// Watermark last acknowledged back to the slot.
    pub last_acked: String,
    /// Committed transactions emitted.
    pub transactions: u64,
    /// Data messages emitted (inserts, updates, deletes, truncates).
    pub messages: u64,
    /// Messages dropped by row filtering.
    pub filtered: u64,
    /// Raw WAL bytes consumed.
    pub bytes: u64,
}

/// Counters for the replica writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReplicatorStats {
    pub applied_transactions: u64,
    pub applied_changes: u64,
    pub schema_changes: u64,
}
