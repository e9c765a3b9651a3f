use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fennec_config::Purge;

use crate::backend::executor::Executor;

use super::Error;

/// Outcome of one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub purged: u64,
    pub remaining: u64,
}

/// Deletes CVRs whose `lastActive` predates the inactivity threshold.
///
/// Candidates are selected with `FOR UPDATE SKIP LOCKED`, so client groups
/// currently locked by a syncer (which takes `FOR UPDATE`) are excluded
/// automatically.
pub struct Purger {
    config: Purge,
    schema: String,
    batch: u64,
    last_remaining: u64,
}

impl Purger {
    pub fn new(shard_schema: &str, config: Purge) -> Self {
        Self {
            batch: config.max_cvrs_per_purge,
            config,
            schema: format!("{shard_schema}_cvr"),
            last_remaining: 0,
        }
    }

    /// Run until cancelled, sleeping exponentially between passes: the
    /// minimum while there is a backlog, doubling up to the maximum when
    /// there is not.
    pub async fn run(
        &mut self,
        executor: &dyn Executor,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        let mut sleep = self.config.min_sleep_duration();

        loop {
            // Jitter keeps shards from purging in lockstep.
            let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(sleep + jitter) => (),
            }

            let now_ms = chrono::Utc::now().timestamp_millis();
            let outcome = self.purge_once(executor, now_ms).await?;

            sleep = if outcome.remaining > 0 {
                self.config.min_sleep_duration()
            } else {
                (sleep * 2).min(self.config.max_sleep_duration())
            };
            debug!(
                "purged {} cvrs, {} remaining, next pass in {:?}",
                outcome.purged, outcome.remaining, sleep
            );
        }
    }

    /// One pass: delete up to the current batch size of the oldest
    /// inactive CVRs. Grows the batch when the backlog grew across passes.
    pub async fn purge_once(
        &mut self,
        executor: &dyn Executor,
        now_ms: i64,
    ) -> Result<PurgeOutcome, Error> {
        let schema = &self.schema;
        let cutoff = now_ms - self.config.inactivity_threshold as i64;

        let candidates = executor
            .fetch_all(&format!(
                r#"SELECT "clientGroupID" FROM "{schema}"."instances" WHERE "lastActive" < {cutoff} ORDER BY "lastActive" ASC LIMIT {} FOR UPDATE SKIP LOCKED"#,
                self.batch
            ))
            .await?;

        let mut purged = 0;
        for row in &candidates {
            let Some(group) = row.first().and_then(|v| v.as_deref()) else {
                continue;
            };
            let escaped = group.replace('\'', "''");
            // Foreign keys cascade queries and rowsVersion.
            executor
                .execute(&format!(
                    r#"DELETE FROM "{schema}"."instances" WHERE "clientGroupID" = '{escaped}'"#
                ))
                .await?;
            purged += 1;
        }

        let remaining: u64 = executor
            .fetch_all(&format!(
                r#"SELECT count(*) FROM "{schema}"."instances" WHERE "lastActive" < {cutoff}"#
            ))
            .await?
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.as_deref())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if remaining > self.last_remaining {
            self.batch += self.config.increment;
            info!(
                "purge backlog grew to {}; raising batch to {}",
                remaining, self.batch
            );
        }
        self.last_remaining = remaining;

        Ok(PurgeOutcome { purged, remaining })
    }

    pub fn batch_size(&self) -> u64 {
        self.batch
    }

    /// Sleep bounds, exposed for the worker loop.
    pub fn sleep_bounds(&self) -> (Duration, Duration) {
        (
            self.config.min_sleep_duration(),
            self.config.max_sleep_duration(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::executor::testing::ScriptedExecutor;

    fn purger() -> Purger {
        Purger::new("fennec_0", Purge::default())
    }

    #[tokio::test]
    async fn test_purge_selects_skip_locked() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![vec![Some("g1".into())], vec![Some("g2".into())]]);
        executor.push_rows(vec![vec![Some("0".into())]]);

        let outcome = purger().purge_once(&executor, 1_000_000_000).await.unwrap();
        assert_eq!(outcome.purged, 2);
        assert_eq!(outcome.remaining, 0);

        let selects = executor.executed_matching("FOR UPDATE SKIP LOCKED");
        assert_eq!(selects.len(), 1);
        assert!(selects[0].contains("ORDER BY \"lastActive\" ASC"));

        let deletes = executor.executed_matching("DELETE FROM");
        assert_eq!(deletes.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_grows_with_backlog() {
        let mut purger = purger();
        let initial = purger.batch_size();

        // Pass 1: backlog appears.
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![]);
        executor.push_rows(vec![vec![Some("50".into())]]);
        purger.purge_once(&executor, 0).await.unwrap();
        assert_eq!(purger.batch_size(), initial + Purge::default().increment);

        // Pass 2: backlog shrank; batch holds.
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![]);
        executor.push_rows(vec![vec![Some("10".into())]]);
        purger.purge_once(&executor, 0).await.unwrap();
        assert_eq!(purger.batch_size(), initial + Purge::default().increment);
    }
}
