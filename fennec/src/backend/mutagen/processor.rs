use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::executor::Executor;
use crate::net::messages::replication::logical::string::escape;
use crate::net::sync::{Mutation, MutationId, MutationResponse, MutationResult, PushRequest, PushResponse};

use super::Error;

/// An application mutator. Runs inside the mutation's transaction; a
/// returned error is recorded as the mutation's result.
pub type MutatorFn = Arc<
    dyn Fn(
            Arc<dyn Executor>,
            Vec<serde_json::Value>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<serde_json::Value>, String>> + Send>>
        + Send
        + Sync,
>;

/// Executes push requests against the authoritative store with the LMID
/// discipline: exactly-once per mutation, in order, per client.
pub struct Mutagen {
    executor: Arc<dyn Executor>,
    shard_schema: String,
    mutators: BTreeMap<String, MutatorFn>,
}

impl Mutagen {
    pub fn new(executor: Arc<dyn Executor>, shard_schema: &str) -> Self {
        Self {
            executor,
            shard_schema: shard_schema.to_string(),
            mutators: BTreeMap::new(),
        }
    }

    /// Register a mutator under `namespace|name`.
    pub fn register(&mut self, name: &str, mutator: MutatorFn) {
        self.mutators.insert(name.to_string(), mutator);
    }

    /// Process a push: one transaction per mutation. Already-processed and
    /// app errors continue the batch; out-of-order stops it; unknown
    /// errors propagate.
    pub async fn process_push(&self, push: &PushRequest) -> Result<PushResponse, Error> {
        let mut responses = vec![];

        for mutation in &push.mutations {
            match self.process_mutation(&push.client_group_id, mutation).await? {
                Processed::Ok(data) => {
                    responses.push(MutationResponse {
                        id: id_of(mutation),
                        result: MutationResult::Ok { data },
                    });
                }
                Processed::AlreadyProcessed => {
                    debug!(
                        "mutation {} from {} already processed",
                        mutation.id, mutation.client_id
                    );
                    responses.push(MutationResponse {
                        id: id_of(mutation),
                        result: MutationResult::error(
                            "alreadyProcessed",
                            format!("mutation {} already processed", mutation.id),
                        ),
                    });
                }
                Processed::App(details) => {
                    responses.push(MutationResponse {
                        id: id_of(mutation),
                        result: MutationResult::error("app", details),
                    });
                }
                Processed::OutOfOrder(details) => {
                    warn!("stopping push batch: {}", details);
                    responses.push(MutationResponse {
                        id: id_of(mutation),
                        result: MutationResult::error("oooMutation", details),
                    });
                    break;
                }
            }
        }

        Ok(PushResponse {
            mutations: responses,
        })
    }

    /// One mutation: check-and-advance the LMID, run the mutator, commit.
    /// An application error retries in error mode: fresh transaction, LMID
    /// re-check, mutator skipped, error written to the mutations table.
    async fn process_mutation(
        &self,
        client_group_id: &str,
        mutation: &Mutation,
    ) -> Result<Processed, Error> {
        match self.attempt(client_group_id, mutation, None).await {
            Ok(data) => Ok(Processed::Ok(data)),
            Err(Attempt::Protocol(err)) => classify(err),
            Err(Attempt::App(app_error)) => {
                match self
                    .attempt(client_group_id, mutation, Some(&app_error))
                    .await
                {
                    Ok(_) => Ok(Processed::App(app_error)),
                    Err(Attempt::Protocol(err)) => classify(err),
                    Err(Attempt::App(_)) => unreachable!("error mode skips the mutator"),
                }
            }
        }
    }

    async fn attempt(
        &self,
        client_group_id: &str,
        mutation: &Mutation,
        error_mode: Option<&str>,
    ) -> Result<Option<serde_json::Value>, Attempt> {
        let executor = self.executor.clone();
        let shard = &self.shard_schema;
        let group = escape(client_group_id, '\'');
        let client = escape(&mutation.client_id, '\'');

        executor.execute("BEGIN").await.map_err(protocol)?;

        let result = async {
            let stored = executor
                .fetch_all(&format!(
                    r#"SELECT "lastMutationID" FROM "{shard}"."clients" WHERE "clientGroupID" = '{group}' AND "clientID" = '{client}' FOR UPDATE"#
                ))
                .await
                .map_err(protocol)?;
            let lmid: u64 = stored
                .first()
                .and_then(|row| row.first())
                .and_then(|v| v.as_deref())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            if mutation.id <= lmid {
                return Err(Attempt::Protocol(Error::AlreadyProcessed {
                    received: mutation.id,
                    lmid,
                }));
            }
            if mutation.id > lmid + 1 {
                return Err(Attempt::Protocol(Error::OutOfOrder {
                    client_id: mutation.client_id.clone(),
                    received: mutation.id,
                    expected: lmid + 1,
                }));
            }

            executor
                .execute(&format!(
                    r#"INSERT INTO "{shard}"."clients" ("clientGroupID", "clientID", "lastMutationID") VALUES ('{group}', '{client}', {id}) ON CONFLICT ("clientGroupID", "clientID") DO UPDATE SET "lastMutationID" = {id}"#,
                    id = mutation.id
                ))
                .await
                .map_err(protocol)?;

            let (result_json, data) = match error_mode {
                Some(app_error) => (
                    serde_json::json!({"error": "app", "details": app_error}).to_string(),
                    None,
                ),
                None => {
                    let mutator = self
                        .mutators
                        .get(&mutation.name)
                        .ok_or_else(|| Attempt::App(format!("unknown mutator \"{}\"", mutation.name)))?;
                    let data = mutator(executor.clone(), mutation.args.clone())
                        .await
                        .map_err(Attempt::App)?;
                    (
                        serde_json::to_value(&data)
                            .map(|d| if d.is_null() { serde_json::json!({}) } else { serde_json::json!({"data": d}) })
                            .unwrap_or(serde_json::json!({}))
                            .to_string(),
                        data,
                    )
                }
            };

            executor
                .execute(&format!(
                    r#"INSERT INTO "{shard}"."mutations" ("clientGroupID", "clientID", "mutationID", "result") VALUES ('{group}', '{client}', {}, '{}')"#,
                    mutation.id,
                    escape(&result_json, '\'')
                ))
                .await
                .map_err(protocol)?;

            Ok(data)
        }
        .await;

        match &result {
            Ok(_) => {
                executor.execute("COMMIT").await.map_err(protocol)?;
            }
            Err(_) => {
                let _ = executor.execute("ROLLBACK").await;
            }
        }

        result
    }
}

/// Outcome of one mutation, after any error-mode retry.
enum Processed {
    Ok(Option<serde_json::Value>),
    AlreadyProcessed,
    App(String),
    OutOfOrder(String),
}

enum Attempt {
    /// LMID-discipline or infrastructure error.
    Protocol(Error),
    /// The application mutator threw.
    App(String),
}

/// LMID-discipline errors become responses; anything else propagates and
/// stops the batch.
fn classify(err: Error) -> Result<Processed, Error> {
    match err {
        Error::AlreadyProcessed { .. } => Ok(Processed::AlreadyProcessed),
        Error::OutOfOrder { .. } => Ok(Processed::OutOfOrder(err.to_string())),
        other => Err(other),
    }
}

fn protocol(err: crate::backend::executor::ExecutorError) -> Attempt {
    Attempt::Protocol(Error::Executor(err))
}

fn id_of(mutation: &Mutation) -> MutationId {
    MutationId {
        client_id: mutation.client_id.clone(),
        id: mutation.id,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::executor::testing::ScriptedExecutor;

    fn mutation(client: &str, id: u64, name: &str) -> Mutation {
        Mutation {
            client_id: client.into(),
            id,
            name: name.into(),
            args: vec![],
            timestamp: 0.0,
        }
    }

    fn ok_mutator() -> MutatorFn {
        Arc::new(|_executor, _args| Box::pin(async { Ok(None) }))
    }

    fn failing_mutator(message: &'static str) -> MutatorFn {
        Arc::new(move |_executor, _args| Box::pin(async move { Err(message.to_string()) }))
    }

    fn lmid_row(lmid: Option<u64>) -> Vec<Vec<Option<String>>> {
        match lmid {
            Some(lmid) => vec![vec![Some(lmid.to_string())]],
            None => vec![],
        }
    }

    #[tokio::test]
    async fn test_out_of_order_bails_batch() {
        let executor = ScriptedExecutor::new();
        // Mutations 1, 2 succeed; 5 is out of order; 4 is never attempted.
        executor.push_rows(lmid_row(None));
        executor.push_rows(lmid_row(Some(1)));
        executor.push_rows(lmid_row(Some(2)));

        let mut mutagen = Mutagen::new(Arc::new(executor.clone()), "fennec_0");
        mutagen.register("foo|bar", ok_mutator());

        let push = PushRequest {
            client_group_id: "g1".into(),
            mutations: vec![
                mutation("cid", 1, "foo|bar"),
                mutation("cid", 2, "foo|bar"),
                mutation("cid", 5, "foo|bar"),
                mutation("cid", 4, "foo|bar"),
            ],
            push_version: 1,
            schema_version: None,
        };

        let response = mutagen.process_push(&push).await.unwrap();
        assert_eq!(response.mutations.len(), 3);
        assert!(response.mutations[0].result.is_ok());
        assert!(response.mutations[1].result.is_ok());
        match &response.mutations[2].result {
            MutationResult::Error { error, details, .. } => {
                assert_eq!(error, "oooMutation");
                assert_eq!(
                    details.as_deref(),
                    Some("Client cid sent mutation ID 5 but expected 3")
                );
            }
            other => panic!("expected error, got {:?}", other),
        }

        // Two result rows written, none for the failed mutation.
        let written = executor.executed_matching("INSERT INTO \"fennec_0\".\"mutations\"");
        assert_eq!(written.len(), 2);

        // LMID advanced to 2 and no further.
        let lmid_writes = executor.executed_matching("\"lastMutationID\" = ");
        assert!(lmid_writes.last().unwrap().contains("= 2"));
    }

    #[tokio::test]
    async fn test_app_error_writes_result_and_continues() {
        let executor = ScriptedExecutor::new();
        // First attempt of mutation 3, then its error-mode retry.
        executor.push_rows(lmid_row(Some(2)));
        executor.push_rows(lmid_row(Some(2)));

        let mut mutagen = Mutagen::new(Arc::new(executor.clone()), "fennec_0");
        mutagen.register("foo|baz", failing_mutator("application error"));

        let push = PushRequest {
            client_group_id: "g1".into(),
            mutations: vec![mutation("cid", 3, "foo|baz")],
            push_version: 1,
            schema_version: None,
        };

        let response = mutagen.process_push(&push).await.unwrap();
        assert_eq!(response.mutations.len(), 1);
        match &response.mutations[0].result {
            MutationResult::Error { error, details, .. } => {
                assert_eq!(error, "app");
                assert_eq!(details.as_deref(), Some("application error"));
            }
            other => panic!("expected app error, got {:?}", other),
        }

        // The error-mode transaction recorded the error result.
        let written = executor.executed_matching("INSERT INTO \"fennec_0\".\"mutations\"");
        assert_eq!(written.len(), 1);
        assert!(written[0].contains("application error"));

        // LMID still advanced to 3.
        let lmid_writes = executor.executed_matching("\"lastMutationID\" = 3");
        assert!(!lmid_writes.is_empty());
    }

    #[tokio::test]
    async fn test_already_processed_continues() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(lmid_row(Some(7)));
        executor.push_rows(lmid_row(Some(7)));

        let mut mutagen = Mutagen::new(Arc::new(executor.clone()), "fennec_0");
        mutagen.register("foo|bar", ok_mutator());

        let push = PushRequest {
            client_group_id: "g1".into(),
            mutations: vec![mutation("cid", 7, "foo|bar"), mutation("cid", 8, "foo|bar")],
            push_version: 1,
            schema_version: None,
        };

        let response = mutagen.process_push(&push).await.unwrap();
        assert_eq!(response.mutations.len(), 2);
        match &response.mutations[0].result {
            MutationResult::Error { error, .. } => assert_eq!(error, "alreadyProcessed"),
            other => panic!("expected alreadyProcessed, got {:?}", other),
        }
        assert!(response.mutations[1].result.is_ok());
    }
}
