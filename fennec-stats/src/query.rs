use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Wall-clock accounting of incremental pushes, keyed by query ID.
///
/// The IVM measure operator feeds this; it is the metrics delegate the
/// pipeline reports into.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryStats {
    pub queries: IndexMap<String, QueryPushStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryPushStats {
    /// Number of pushes observed.
    pub pushes: u64,
    /// Total wall-clock across pushes, in microseconds.
    pub total_micros: u64,
    /// Slowest single push, in microseconds.
    pub max_micros: u64,
}

impl QueryStats {
    /// Record one push against a query.
    pub fn record(&mut self, query_id: &str, elapsed: Duration) {
        let micros = elapsed.as_micros() as u64;
        let entry = self.queries.entry(query_id.to_string()).or_default();
        entry.pushes += 1;
        entry.total_micros += micros;
        entry.max_micros = entry.max_micros.max(micros);
    }
}
