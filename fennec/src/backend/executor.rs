use async_trait::async_trait;
use thiserror::Error;

/// One result row, text format. `None` is SQL NULL.
pub type SqlRow = Vec<Option<String>>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("{0}")]
    Database(String),

    /// The object (typically a replication slot) is locked by another
    /// backend; retryable.
    #[error("object in use: {0}")]
    ObjectInUse(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection lost")]
    ConnectionLost,
}

/// Named interface to the upstream PostgreSQL connection pool.
///
/// Everything the server side needs from Postgres outside the replication
/// protocol goes through here as SQL; the driver itself is an external
/// collaborator.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a statement, returning the affected-row count.
    async fn execute(&self, sql: &str) -> Result<u64, ExecutorError>;

    /// Run a query, returning all rows in text format.
    async fn fetch_all(&self, sql: &str) -> Result<Vec<SqlRow>, ExecutorError>;
}

/// Scripted double used by unit tests: canned responses per statement
/// prefix, with every executed statement recorded.
#[cfg(test)]
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default, Clone)]
    pub struct ScriptedExecutor {
        state: Arc<Mutex<State>>,
    }

    #[derive(Default)]
    struct State {
        executed: Vec<String>,
        responses: VecDeque<Result<Vec<SqlRow>, ExecutorError>>,
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue the response for the next `fetch_all`.
        pub fn push_rows(&self, rows: Vec<SqlRow>) {
            self.state.lock().responses.push_back(Ok(rows));
        }

        pub fn push_error(&self, error: ExecutorError) {
            self.state.lock().responses.push_back(Err(error));
        }

        pub fn executed(&self) -> Vec<String> {
            self.state.lock().executed.clone()
        }

        pub fn executed_matching(&self, needle: &str) -> Vec<String> {
            self.executed()
                .into_iter()
                .filter(|sql| sql.contains(needle))
                .collect()
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(&self, sql: &str) -> Result<u64, ExecutorError> {
            self.state.lock().executed.push(sql.to_string());
            Ok(0)
        }

        async fn fetch_all(&self, sql: &str) -> Result<Vec<SqlRow>, ExecutorError> {
            let mut state = self.state.lock();
            state.executed.push(sql.to_string());
            state.responses.pop_front().unwrap_or_else(|| Ok(vec![]))
        }
    }
}
