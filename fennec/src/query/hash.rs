use std::hash::Hasher;

use fnv::FnvHasher;

use super::ast::{Ast, Condition};

/// Stable content hash of a query AST, as 16 hex digits.
///
/// The AST is canonicalised first so semantically identical queries (AND
/// operand order, nested AND inside AND) hash alike across sessions and
/// processes.
pub fn hash_of_ast(ast: &Ast) -> String {
    let mut canonical = ast.clone();
    for query in &mut canonical.queries {
        if let Some(condition) = query.where_.take() {
            query.where_ = Some(normalize(condition));
        }
    }

    let serialized = serde_json::to_string(&canonical).expect("AST serializes");
    hex(fnv1a(serialized.as_bytes()))
}

/// Hash for a custom (named) query: mixes the name and the JSON arguments.
pub fn hash_of_name_and_args(name: &str, args: &[serde_json::Value]) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    hasher.write(b"|");
    for arg in args {
        hasher.write(arg.to_string().as_bytes());
        hasher.write(b"\0");
    }
    hex(hasher.finish())
}

/// Flatten nested AND/OR of the same kind, normalize singletons, and sort
/// operands by their serialized form.
fn normalize(condition: Condition) -> Condition {
    match condition {
        Condition::And { conditions } => normalize_compound(conditions, true),
        Condition::Or { conditions } => normalize_compound(conditions, false),
        Condition::Not { condition } => Condition::Not {
            condition: Box::new(normalize(*condition)),
        },
        simple => simple,
    }
}

fn normalize_compound(conditions: Vec<Condition>, and: bool) -> Condition {
    let mut flat = vec![];

    for condition in conditions {
        match normalize(condition) {
            Condition::And { conditions } if and => flat.extend(conditions),
            Condition::Or { conditions } if !and => flat.extend(conditions),
            other => flat.push(other),
        }
    }

    if flat.len() == 1 {
        return flat.remove(0);
    }

    flat.sort_by_key(|c| serde_json::to_string(c).expect("condition serializes"));
    flat.dedup();

    if and {
        Condition::And { conditions: flat }
    } else {
        Condition::Or { conditions: flat }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

fn hex(hash: u64) -> String {
    format!("{:016x}", hash)
}

#[cfg(test)]
mod test {
    use super::super::ast::{SimpleOperator, SubQuery};
    use super::*;

    fn open(field: &str) -> Condition {
        Condition::simple(field, SimpleOperator::Eq, "open")
    }

    #[test]
    fn test_stable_across_calls() {
        let ast = Ast::table("issue");
        assert_eq!(hash_of_ast(&ast), hash_of_ast(&ast));
        assert_eq!(hash_of_ast(&ast).len(), 16);
    }

    #[test]
    fn test_operand_order_irrelevant() {
        let a = Ast {
            queries: vec![SubQuery {
                table: "issue".into(),
                where_: Some(Condition::and(vec![open("status"), open("kind")])),
                ..Default::default()
            }],
        };
        let b = Ast {
            queries: vec![SubQuery {
                table: "issue".into(),
                where_: Some(Condition::and(vec![open("kind"), open("status")])),
                ..Default::default()
            }],
        };

        assert_eq!(hash_of_ast(&a), hash_of_ast(&b));
    }

    #[test]
    fn test_nested_and_flattens() {
        let nested = Ast {
            queries: vec![SubQuery {
                table: "issue".into(),
                where_: Some(Condition::and(vec![
                    open("a"),
                    Condition::and(vec![open("b"), open("c")]),
                ])),
                ..Default::default()
            }],
        };
        let flat = Ast {
            queries: vec![SubQuery {
                table: "issue".into(),
                where_: Some(Condition::and(vec![open("a"), open("b"), open("c")])),
                ..Default::default()
            }],
        };

        assert_eq!(hash_of_ast(&nested), hash_of_ast(&flat));
    }

    #[test]
    fn test_different_tables_differ() {
        assert_ne!(
            hash_of_ast(&Ast::table("issue")),
            hash_of_ast(&Ast::table("comment"))
        );
    }

    #[test]
    fn test_custom_hash() {
        let args = vec![serde_json::json!("alice"), serde_json::json!(5)];
        let h1 = hash_of_name_and_args("issuesByOwner", &args);
        let h2 = hash_of_name_and_args("issuesByOwner", &args);
        assert_eq!(h1, h2);

        assert_ne!(h1, hash_of_name_and_args("issuesByOwner", &[]));
        assert_ne!(h1, hash_of_name_and_args("other", &args));
    }
}
