use std::time::Duration;

use serde::{Deserialize, Serialize};

/// CVR garbage-collection settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Purge {
    /// Client groups inactive for longer than this are purged, in
    /// milliseconds.
    ///
    /// _Default:_ 30 days.
    #[serde(default = "Purge::inactivity_threshold")]
    pub inactivity_threshold: u64,

    /// Maximum CVRs deleted per pass. Grows by `increment` while the purger
    /// is falling behind.
    ///
    /// _Default:_ `10`
    #[serde(default = "Purge::max_cvrs_per_purge")]
    pub max_cvrs_per_purge: u64,

    /// Added to `max_cvrs_per_purge` when the purgeable backlog grew across
    /// a pass.
    ///
    /// _Default:_ `10`
    #[serde(default = "Purge::increment")]
    pub increment: u64,

    /// Shortest sleep between passes, in milliseconds.
    ///
    /// _Default:_ 1 minute.
    #[serde(default = "Purge::min_sleep")]
    pub min_sleep: u64,

    /// Longest sleep between passes, in milliseconds.
    ///
    /// _Default:_ 16 minutes.
    #[serde(default = "Purge::max_sleep")]
    pub max_sleep: u64,
}

impl Purge {
    fn inactivity_threshold() -> u64 {
        30 * 24 * 3600 * 1000
    }

    fn max_cvrs_per_purge() -> u64 {
        10
    }

    fn increment() -> u64 {
        10
    }

    fn min_sleep() -> u64 {
        60_000
    }

    fn max_sleep() -> u64 {
        16 * 60_000
    }

    pub fn inactivity_threshold_duration(&self) -> Duration {
        Duration::from_millis(self.inactivity_threshold)
    }

    pub fn min_sleep_duration(&self) -> Duration {
        Duration::from_millis(self.min_sleep)
    }

    pub fn max_sleep_duration(&self) -> Duration {
        Duration::from_millis(self.max_sleep)
    }
}

impl Default for Purge {
    fn default() -> Self {
        Self {
            inactivity_threshold: Self::inactivity_threshold(),
            max_cvrs_per_purge: Self::max_cvrs_per_purge(),
            increment: Self::increment(),
            min_sleep: Self::min_sleep(),
            max_sleep: Self::max_sleep(),
        }
    }
}
