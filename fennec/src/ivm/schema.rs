use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;

use crate::query::{Direction, Ordering};
use crate::schema::{encode_row_key, Row};

use fennec_postgres_types::Value;

/// What an operator's output looks like: column source, ordering, and the
/// relationship schemas hanging off it.
#[derive(Debug, Clone, Default)]
pub struct SourceSchema {
    pub table: String,
    pub primary_key: Vec<String>,
    /// Output sort. The primary key is always the final tiebreak.
    pub sort: Vec<Ordering>,
    pub relationships: BTreeMap<String, SourceSchema>,
}

impl SourceSchema {
    pub fn new(table: &str, primary_key: &[&str], sort: Vec<Ordering>) -> Self {
        Self {
            table: table.to_string(),
            primary_key: primary_key.iter().map(|k| k.to_string()).collect(),
            sort,
            relationships: BTreeMap::new(),
        }
    }

    pub fn relationship(&self, name: &str) -> Option<&SourceSchema> {
        self.relationships.get(name)
    }

    /// Compare rows under this schema's sort, tiebreaking on primary key.
    pub fn compare_rows(&self, a: &Row, b: &Row) -> CmpOrdering {
        static NULL: Value = Value::Null;

        for ordering in &self.sort {
            let left = a.get(&ordering.field).unwrap_or(&NULL);
            let right = b.get(&ordering.field).unwrap_or(&NULL);
            let by_field = match ordering.direction {
                Direction::Asc => left.cmp(right),
                Direction::Desc => right.cmp(left),
            };
            if by_field != CmpOrdering::Equal {
                return by_field;
            }
        }

        self.pk_key(a).cmp(&self.pk_key(b))
    }

    /// Encoded primary key of a row, used for identity and tiebreaks.
    pub fn pk_key(&self, row: &Row) -> String {
        static NULL: Value = Value::Null;
        let values: Vec<&Value> = self
            .primary_key
            .iter()
            .map(|k| row.get(k).unwrap_or(&NULL))
            .collect();
        encode_row_key(&values)
    }

    /// Whether two rows are the same row (same primary key).
    pub fn same_row(&self, a: &Row, b: &Row) -> bool {
        self.pk_key(a) == self.pk_key(b)
    }
}
