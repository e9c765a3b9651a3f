use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upstream change-capture settings: which publications to stream, where
/// the replica lives, and how aggressively to copy tables on initial sync.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Replication {
    /// Application identifier. Internal schemas on the upstream database are
    /// named after it.
    #[serde(default = "Replication::app_id")]
    pub app_id: String,

    /// Shard number of this sync service. Each shard owns its own internal
    /// schema and `clients` table upstream.
    #[serde(default)]
    pub shard_num: u16,

    /// Upstream publications to subscribe to.
    #[serde(default)]
    pub publications: Vec<String>,

    /// Path to the on-disk SQLite replica.
    #[serde(default = "Replication::replica_path")]
    pub replica_path: PathBuf,

    /// Parallel upstream connections used during initial table copy.
    ///
    /// _Default:_ `4`
    #[serde(default = "Replication::table_copy_workers")]
    pub table_copy_workers: usize,

    /// Target number of rows per copy partition for large tables.
    ///
    /// _Default:_ `100000`
    #[serde(default = "Replication::copy_partition_rows")]
    pub copy_partition_rows: u64,

    /// How many times to retry `start_stream` when the replication slot is
    /// still held by a previous owner.
    ///
    /// _Default:_ `5`
    #[serde(default = "Replication::slot_retry_attempts")]
    pub slot_retry_attempts: usize,

    /// Delay between slot retries, in milliseconds.
    ///
    /// _Default:_ `100`
    #[serde(default = "Replication::slot_retry_delay")]
    pub slot_retry_delay: u64,
}

impl Replication {
    fn app_id() -> String {
        "fennec".into()
    }

    fn replica_path() -> PathBuf {
        "fennec-replica.db".into()
    }

    fn table_copy_workers() -> usize {
        4
    }

    fn copy_partition_rows() -> u64 {
        100_000
    }

    fn slot_retry_attempts() -> usize {
        5
    }

    fn slot_retry_delay() -> u64 {
        100
    }

    pub fn slot_retry_delay_duration(&self) -> Duration {
        Duration::from_millis(self.slot_retry_delay)
    }

    /// Name of the internal shard schema upstream, `<app_id>_<shard_num>`.
    pub fn shard_schema(&self) -> String {
        format!("{}_{}", self.app_id, self.shard_num)
    }
}

impl Default for Replication {
    fn default() -> Self {
        Self {
            app_id: Self::app_id(),
            shard_num: 0,
            publications: vec![],
            replica_path: Self::replica_path(),
            table_copy_workers: Self::table_copy_workers(),
            copy_partition_rows: Self::copy_partition_rows(),
            slot_retry_attempts: Self::slot_retry_attempts(),
            slot_retry_delay: Self::slot_retry_delay(),
        }
    }
}
