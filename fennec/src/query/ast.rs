use serde::{Deserialize, Serialize};

use fennec_postgres_types::Value;

/// A query. Subqueries live in one arena and refer to each other by index;
/// relationship edges are by name. Index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    pub queries: Vec<SubQuery>,
}

impl Ast {
    pub fn root(&self) -> &SubQuery {
        &self.queries[0]
    }

    /// Single-table query without relationships.
    pub fn table(table: &str) -> Self {
        Self {
            queries: vec![SubQuery {
                table: table.to_string(),
                ..Default::default()
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuery {
    pub table: String,

    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_: Option<Condition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<Ordering>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Resume point into the ordering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<Bound>,

    /// Relationship edges to hydrate, each pointing at an arena index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<RelatedLink>,

    /// Materialize as a single row instead of an ordered sequence.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub singular: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedLink {
    /// Relationship name on the source table.
    pub relationship: String,
    /// Arena index of the subquery applied to the destination.
    pub subquery: usize,
    /// Junction levels are hidden in materialized output.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ordering {
    pub field: String,
    pub direction: Direction,
}

impl Ordering {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bound {
    /// Ordering-field values of the resume row.
    pub key: Vec<Value>,
    pub inclusive: bool,
}

/// Predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    #[serde(rename_all = "camelCase")]
    Simple {
        field: String,
        op: SimpleOperator,
        value: Value,
    },
    And {
        conditions: Vec<Condition>,
    },
    Or {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
    /// Correlated existence of related rows.
    #[serde(rename_all = "camelCase")]
    Exists {
        relationship: String,
        subquery: usize,
        negated: bool,
    },
}

impl Condition {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::And { conditions }
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Or { conditions }
    }

    pub fn simple(field: &str, op: SimpleOperator, value: impl Into<Value>) -> Self {
        Condition::Simple {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimpleOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "ILIKE")]
    ILike,
    #[serde(rename = "IS")]
    Is,
    #[serde(rename = "IS NOT")]
    IsNot,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let ast = Ast {
            queries: vec![SubQuery {
                table: "issue".into(),
                where_: Some(Condition::simple("status", SimpleOperator::Eq, "open")),
                order_by: vec![Ordering::desc("modified")],
                limit: Some(10),
                ..Default::default()
            }],
        };

        let wire = serde_json::to_value(&ast).unwrap();
        let query = &wire["queries"][0];
        assert_eq!(query["table"], "issue");
        assert_eq!(query["where"]["op"], "=");
        assert_eq!(query["orderBy"][0]["direction"], "desc");

        let back: Ast = serde_json::from_value(wire).unwrap();
        assert_eq!(back, ast);
    }
}
