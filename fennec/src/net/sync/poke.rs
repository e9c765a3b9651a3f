use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::push::{MutationId, MutationResponse};
use super::queries::QueriesPatchOp;

/// Opens a poke. Parts follow until `PokeEnd` with the same ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PokeStart {
    #[serde(rename = "pokeID")]
    pub poke_id: String,
    /// Cookie the client must currently hold for this poke to apply.
    pub base_cookie: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_versions: Option<SchemaVersions>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersions {
    pub min_supported_version: u32,
    pub max_supported_version: u32,
}

/// One slice of a poke. All fields are optional; parts are concatenated
/// in order during assembly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PokePart {
    #[serde(rename = "pokeID")]
    pub poke_id: String,

    /// New last-mutation-IDs, keyed by client ID.
    #[serde(rename = "lastMutationIDChanges")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_mutation_id_changes: Option<BTreeMap<String, u64>>,

    /// Desired-query updates, keyed by client ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_queries_patches: Option<BTreeMap<String, Vec<QueriesPatchOp>>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub got_queries_patch: Option<Vec<QueriesPatchOp>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_patch: Option<Vec<RowPatchOp>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutations_patch: Option<Vec<MutationPatchOp>>,
}

/// Closes a poke. `cookie` becomes the client's new position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PokeEnd {
    #[serde(rename = "pokeID")]
    pub poke_id: String,
    pub cookie: String,
    /// Discard the accumulated poke without applying.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancel: bool,
}

/// One row operation inside a poke. Row values are in server name space;
/// the client maps them before writing to the local store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RowPatchOp {
    #[serde(rename_all = "camelCase")]
    Put {
        table_name: String,
        value: serde_json::Map<String, serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        table_name: String,
        id: serde_json::Map<String, serde_json::Value>,
        merge: serde_json::Map<String, serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    Del {
        table_name: String,
        id: serde_json::Map<String, serde_json::Value>,
    },
    Clear,
}

/// Server-written mutation results flowing down in pokes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum MutationPatchOp {
    Put { mutation: MutationResponse },
    Del { id: MutationId },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_poke_part_field_names() {
        let part = PokePart {
            poke_id: "p1".into(),
            last_mutation_id_changes: Some(BTreeMap::from([("c1".to_string(), 23u64)])),
            ..Default::default()
        };

        let wire = serde_json::to_value(&part).unwrap();
        assert_eq!(wire["pokeID"], "p1");
        assert_eq!(wire["lastMutationIDChanges"]["c1"], 23);
        // Absent sections are omitted entirely.
        assert!(wire.get("rowsPatch").is_none());
    }

    #[test]
    fn test_row_patch_ops() {
        let wire = r#"[
            {"op":"put","tableName":"issue","value":{"id":"a","title":"hi"}},
            {"op":"update","tableName":"issue","id":{"id":"a"},"merge":{"title":"hello"}},
            {"op":"del","tableName":"issue","id":{"id":"a"}},
            {"op":"clear"}
        ]"#;

        let ops: Vec<RowPatchOp> = serde_json::from_str(wire).unwrap();
        assert_eq!(ops.len(), 4);
        assert!(matches!(ops[3], RowPatchOp::Clear));
    }

    #[test]
    fn test_poke_end_cancel_default() {
        let end: PokeEnd = serde_json::from_str(r#"{"pokeID":"p","cookie":"1"}"#).unwrap();
        assert!(!end.cancel);
        // `cancel: false` is not serialized.
        assert!(!serde_json::to_string(&end).unwrap().contains("cancel"));
    }
}
