use serde::{Deserialize, Serialize};

use crate::query::Ast;

/// One desired-query change. `put` registers a query (by AST for legacy
/// queries, by name and args for custom ones); `del` withdraws it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum QueriesPatchOp {
    Put {
        hash: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ast: Option<Ast>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Vec<serde_json::Value>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ttl: Option<u64>,
    },
    Del {
        hash: String,
    },
}

impl QueriesPatchOp {
    pub fn hash(&self) -> &str {
        match self {
            QueriesPatchOp::Put { hash, .. } => hash,
            QueriesPatchOp::Del { hash } => hash,
        }
    }

    pub fn is_del(&self) -> bool {
        matches!(self, QueriesPatchOp::Del { .. })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_del_wire_shape() {
        let op = QueriesPatchOp::Del { hash: "h1".into() };
        assert_eq!(
            serde_json::to_string(&op).unwrap(),
            r#"{"op":"del","hash":"h1"}"#
        );
    }

    #[test]
    fn test_custom_put() {
        let wire = r#"{"op":"put","hash":"h2","name":"issuesByOwner","args":["alice"],"ttl":60000}"#;
        let op: QueriesPatchOp = serde_json::from_str(wire).unwrap();
        match &op {
            QueriesPatchOp::Put { name, ttl, ast, .. } => {
                assert_eq!(name.as_deref(), Some("issuesByOwner"));
                assert_eq!(*ttl, Some(60000));
                assert!(ast.is_none());
            }
            _ => panic!("expected put"),
        }
        assert_eq!(op.hash(), "h2");
    }
}
