use serde::Deserialize;
use tracing::warn;

use crate::net::sync::{PushError, PushRequest, PushResponse, PUSH_VERSION};

use super::processor::Mutagen;

/// Query-string parameters of the push endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PushParams {
    /// Upstream schema the app's tables live in.
    pub schema: String,
    #[serde(rename = "appID")]
    pub app_id: String,
}

/// Outcome of a push call: a per-mutation response or a transport-level
/// error that moved no LMIDs.
#[derive(Debug)]
pub enum PushOutcome {
    Response(PushResponse),
    Error(PushError),
}

/// The push endpoint, transport-free: the HTTP layer hands in parsed
/// params and the raw JSON body.
pub async fn handle_push(
    mutagen: &Mutagen,
    params: &PushParams,
    expected_app_id: &str,
    body: &str,
) -> PushOutcome {
    if params.app_id != expected_app_id {
        warn!(
            "push for app \"{}\" arrived at app \"{}\"",
            params.app_id, expected_app_id
        );
        return PushOutcome::Error(PushError {
            error: "http".into(),
            mutation_ids: None,
        });
    }

    let push: PushRequest = match serde_json::from_str(body) {
        Ok(push) => push,
        Err(err) => {
            warn!("malformed push body: {}", err);
            return PushOutcome::Error(PushError {
                error: "http".into(),
                mutation_ids: None,
            });
        }
    };

    if push.push_version != PUSH_VERSION {
        return PushOutcome::Error(PushError {
            error: "unsupportedPushVersion".into(),
            mutation_ids: Some(
                push.mutations
                    .iter()
                    .map(|m| crate::net::sync::MutationId {
                        client_id: m.client_id.clone(),
                        id: m.id,
                    })
                    .collect(),
            ),
        });
    }

    match mutagen.process_push(&push).await {
        Ok(response) => PushOutcome::Response(response),
        Err(err) => {
            warn!("push processing failed: {}", err);
            PushOutcome::Error(PushError {
                error: "http".into(),
                mutation_ids: None,
            })
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::backend::executor::testing::ScriptedExecutor;

    fn params() -> PushParams {
        PushParams {
            schema: "public".into(),
            app_id: "fennec".into(),
        }
    }

    fn mutagen() -> Mutagen {
        Mutagen::new(Arc::new(ScriptedExecutor::new()), "fennec_0")
    }

    #[tokio::test]
    async fn test_unsupported_push_version() {
        let body = r#"{
            "clientGroupID": "g1",
            "mutations": [{"clientID":"c1","id":1,"name":"foo|bar","args":[],"timestamp":0.0}],
            "pushVersion": 2
        }"#;

        match handle_push(&mutagen(), &params(), "fennec", body).await {
            PushOutcome::Error(error) => {
                assert_eq!(error.error, "unsupportedPushVersion");
                assert_eq!(error.mutation_ids.unwrap().len(), 1);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_app_id() {
        match handle_push(&mutagen(), &params(), "otherapp", "{}").await {
            PushOutcome::Error(error) => assert_eq!(error.error, "http"),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body() {
        match handle_push(&mutagen(), &params(), "fennec", "not json").await {
            PushOutcome::Error(error) => assert_eq!(error.error, "http"),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_valid_push_processes() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![]); // no lmid yet

        let mut mutagen = Mutagen::new(Arc::new(executor), "fennec_0");
        mutagen.register(
            "foo|bar",
            Arc::new(|_executor, _args| Box::pin(async { Ok(None) })),
        );

        let body = r#"{
            "clientGroupID": "g1",
            "mutations": [{"clientID":"c1","id":1,"name":"foo|bar","args":[],"timestamp":0.0}],
            "pushVersion": 1
        }"#;

        match handle_push(&mutagen, &params(), "fennec", body).await {
            PushOutcome::Response(response) => {
                assert_eq!(response.mutations.len(), 1);
                assert!(response.mutations[0].result.is_ok());
            }
            other => panic!("expected response, got {:?}", other),
        }
    }
}
