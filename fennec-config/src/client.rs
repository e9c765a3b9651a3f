use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client-engine tunables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Client {
    /// How long to batch desired-query changes before flushing one
    /// `changeDesiredQueries` message, in milliseconds.
    ///
    /// _Default:_ `10`
    #[serde(default = "Client::query_change_throttle")]
    pub query_change_throttle: u64,

    /// Maximum number of no-longer-desired queries kept warm in the
    /// recent-queries LRU before their data is released.
    ///
    /// _Default:_ `250`
    #[serde(default = "Client::max_recent_queries")]
    pub max_recent_queries: usize,
}

impl Client {
    fn query_change_throttle() -> u64 {
        10
    }

    fn max_recent_queries() -> usize {
        250
    }

    pub fn query_change_throttle_duration(&self) -> Duration {
        Duration::from_millis(self.query_change_throttle)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self {
            query_change_throttle: Self::query_change_throttle(),
            max_recent_queries: Self::max_recent_queries(),
        }
    }
}
