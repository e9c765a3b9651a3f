use serde::{Deserialize, Serialize};

/// The push protocol version this server speaks.
pub const PUSH_VERSION: u32 = 1;

/// A batch of client mutations headed upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    #[serde(rename = "clientGroupID")]
    pub client_group_id: String,
    pub mutations: Vec<Mutation>,
    pub push_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

/// One client mutation. `id` is strictly monotone per client and fits in
/// 53 bits so it survives JSON consumers that read numbers as doubles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub id: u64,
    /// Mutator name, `namespace|name` for namespaced mutators.
    pub name: String,
    pub args: Vec<serde_json::Value>,
    pub timestamp: f64,
}

/// Response to a push: one entry per processed mutation, in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushResponse {
    pub mutations: Vec<MutationResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationResponse {
    pub id: MutationId,
    pub result: MutationResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct MutationId {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub id: u64,
}

/// Outcome of one mutation. The empty object is success.
///
/// `Error` must come first: untagged deserialization tries variants in
/// order and success would otherwise swallow error objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MutationResult {
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
}

impl MutationResult {
    pub fn ok() -> Self {
        MutationResult::Ok { data: None }
    }

    pub fn error(kind: &str, details: impl ToString) -> Self {
        MutationResult::Error {
            error: kind.to_string(),
            details: Some(details.to_string()),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, MutationResult::Ok { .. })
    }
}

/// Transport-level push failure. Does not advance any LMID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushError {
    pub error: String,
    #[serde(rename = "mutationIDs")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation_ids: Option<Vec<MutationId>>,
}
