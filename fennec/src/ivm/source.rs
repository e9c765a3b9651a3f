use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::query::{Bound, Ordering};
use crate::schema::Row;

use fennec_postgres_types::Value;

use super::change::{Change, Node, SourceChange};
use super::operator::FetchRequest;
use super::schema::SourceSchema;

/// Shared handle to a table source. The client engine is single-threaded;
/// the lock is there so pipelines and the poke applier can share the map.
pub type SourceRef = Arc<Mutex<MemorySource>>;

/// In-memory table: rows indexed by primary key and by each configured
/// ordering.
#[derive(Debug)]
pub struct MemorySource {
    schema: SourceSchema,
    /// Primary-key index.
    rows: BTreeMap<String, Row>,
    /// Secondary indexes, one per registered sort.
    indexes: Vec<SortIndex>,
}

#[derive(Debug)]
struct SortIndex {
    sort: Vec<Ordering>,
    schema: SourceSchema,
    map: BTreeMap<SortKey, Row>,
}

/// Sort-field values plus the encoded primary key as final tiebreak.
type SortKey = (Vec<Value>, String);

impl SortIndex {
    fn key(&self, row: &Row) -> SortKey {
        let values = self
            .sort
            .iter()
            .map(|o| sort_value(row, o))
            .collect::<Vec<_>>();
        (values, self.schema.pk_key(row))
    }
}

// Index keys hold plain values; direction is applied at fetch.
fn sort_value(row: &Row, ordering: &Ordering) -> Value {
    row.get(&ordering.field).cloned().unwrap_or(Value::Null)
}

impl MemorySource {
    pub fn new(schema: SourceSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            indexes: vec![],
        }
    }

    pub fn shared(schema: SourceSchema) -> SourceRef {
        Arc::new(Mutex::new(Self::new(schema)))
    }

    pub fn schema(&self) -> &SourceSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Register a secondary ordering; idempotent per sort.
    pub fn add_ordering(&mut self, sort: Vec<Ordering>) {
        if sort.is_empty() || self.indexes.iter().any(|i| i.sort == sort) {
            return;
        }

        let mut schema = self.schema.clone();
        schema.sort = sort.clone();

        let mut index = SortIndex {
            sort,
            schema,
            map: BTreeMap::new(),
        };
        for row in self.rows.values() {
            index.map.insert(index.key(row), row.clone());
        }
        self.indexes.push(index);
    }

    pub fn get(&self, pk_key: &str) -> Option<&Row> {
        self.rows.get(pk_key)
    }

    /// Apply a change to the table, returning the pipeline change to push.
    ///
    /// An update whose primary key did not move becomes an `Edit`; one that
    /// did is a remove followed by an add, which the caller pushes in turn.
    pub fn apply(&mut self, change: &SourceChange) -> Vec<Change> {
        match change {
            SourceChange::Insert(row) => {
                self.insert(row.clone());
                vec![Change::Add {
                    node: Node::row(row.clone()),
                }]
            }
            SourceChange::Delete(row) => {
                let key = self.schema.pk_key(row);
                match self.remove(&key) {
                    Some(stored) => vec![Change::Remove {
                        node: Node::row(stored),
                    }],
                    None => vec![],
                }
            }
            SourceChange::Update { old, new } => {
                if self.schema.same_row(old, new) {
                    self.remove(&self.schema.pk_key(old));
                    self.insert(new.clone());
                    vec![Change::Edit {
                        node: Node::row(new.clone()),
                        old_node: Node::row(old.clone()),
                    }]
                } else {
                    let mut changes = vec![];
                    if let Some(stored) = self.remove(&self.schema.pk_key(old)) {
                        changes.push(Change::Remove {
                            node: Node::row(stored),
                        });
                    }
                    self.insert(new.clone());
                    changes.push(Change::Add {
                        node: Node::row(new.clone()),
                    });
                    changes
                }
            }
        }
    }

    /// Delete every row. Truncate arrives as this.
    pub fn clear(&mut self) -> Vec<Change> {
        let removed: Vec<Row> = self.rows.values().cloned().collect();
        self.rows.clear();
        for index in &mut self.indexes {
            index.map.clear();
        }

        removed
            .into_iter()
            .map(|row| Change::Remove {
                node: Node::row(row),
            })
            .collect()
    }

    fn insert(&mut self, row: Row) {
        for index in &mut self.indexes {
            index.map.insert(index.key(&row), row.clone());
        }
        self.rows.insert(self.schema.pk_key(&row), row);
    }

    fn remove(&mut self, pk_key: &str) -> Option<Row> {
        let row = self.rows.remove(pk_key)?;
        for index in &mut self.indexes {
            let key = index.key(&row);
            index.map.remove(&key);
        }
        Some(row)
    }

    /// Rows under `sort` (default: primary key order), honoring constraint
    /// and start bound.
    pub fn fetch_sorted(&self, sort: &[Ordering], req: &FetchRequest) -> Vec<Row> {
        let mut rows: Vec<Row> = match self.indexes.iter().find(|i| i.sort == sort) {
            Some(index) => index.map.values().cloned().collect(),
            None if sort.is_empty() => self.rows.values().cloned().collect(),
            None => {
                let mut schema = self.schema.clone();
                schema.sort = sort.to_vec();
                let mut rows: Vec<Row> = self.rows.values().cloned().collect();
                rows.sort_by(|a, b| schema.compare_rows(a, b));
                rows
            }
        };

        // Index order is ascending on stored values; apply direction.
        if !sort.is_empty() && self.indexes.iter().any(|i| i.sort == sort) {
            let mut schema = self.schema.clone();
            schema.sort = sort.to_vec();
            rows.sort_by(|a, b| schema.compare_rows(a, b));
        }

        if let Some(constraint) = &req.constraint {
            rows.retain(|row| constraint.matches(row));
        }

        if let Some(start) = &req.start {
            let mut schema = self.schema.clone();
            schema.sort = sort.to_vec();
            rows = apply_bound(rows, start, &schema);
        }

        rows
    }
}

fn apply_bound(rows: Vec<Row>, bound: &Bound, schema: &SourceSchema) -> Vec<Row> {
    let mut bound_row = Row::new();
    for (ordering, value) in schema.sort.iter().zip(bound.key.iter()) {
        bound_row.insert(ordering.field.clone(), value.clone());
    }
    // Bound keys may include the primary key tuple after the sort fields.
    for (pk, value) in schema
        .primary_key
        .iter()
        .zip(bound.key.iter().skip(schema.sort.len()))
    {
        bound_row.insert(pk.clone(), value.clone());
    }

    rows.into_iter()
        .filter(|row| {
            let ord = schema.compare_rows(row, &bound_row);
            if bound.inclusive {
                ord != std::cmp::Ordering::Less
            } else {
                ord == std::cmp::Ordering::Greater
            }
        })
        .collect()
}

/// Pipeline leaf: reads one table in one sort order.
#[derive(Debug)]
pub struct SourceOperator {
    source: SourceRef,
    schema: SourceSchema,
}

impl SourceOperator {
    pub fn new(source: SourceRef, sort: Vec<Ordering>) -> Self {
        let mut schema = source.lock().schema().clone();
        schema.sort = sort.clone();
        source.lock().add_ordering(sort);

        Self { source, schema }
    }

    pub fn schema(&self) -> &SourceSchema {
        &self.schema
    }

    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        self.source
            .lock()
            .fetch_sorted(&self.schema.sort, req)
            .into_iter()
            .map(Node::row)
            .collect()
    }

    pub fn push(&mut self, table: &str, change: &SourceChange) -> Vec<Change> {
        if table != self.schema.table {
            return vec![];
        }

        // The pipeline applied the change to the shared source already;
        // emit the pipeline form in this operator's sort.
        match change {
            SourceChange::Insert(row) => vec![Change::Add {
                node: Node::row(row.clone()),
            }],
            SourceChange::Delete(row) => vec![Change::Remove {
                node: Node::row(row.clone()),
            }],
            SourceChange::Update { old, new } => {
                if self.schema.same_row(old, new) {
                    vec![Change::Edit {
                        node: Node::row(new.clone()),
                        old_node: Node::row(old.clone()),
                    }]
                } else {
                    vec![
                        Change::Remove {
                            node: Node::row(old.clone()),
                        },
                        Change::Add {
                            node: Node::row(new.clone()),
                        },
                    ]
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ivm::operator::Constraint;

    fn row(id: &str, num: i64) -> Row {
        Row::from([
            ("id".to_string(), Value::String(id.into())),
            ("num".to_string(), Value::Int(num)),
        ])
    }

    fn source() -> MemorySource {
        let mut source = MemorySource::new(SourceSchema::new("issue", &["id"], vec![]));
        for (id, num) in [("b", 2), ("a", 1), ("c", 3)] {
            source.apply(&SourceChange::Insert(row(id, num)));
        }
        source
    }

    #[test]
    fn test_pk_order() {
        let source = source();
        let rows = source.fetch_sorted(&[], &FetchRequest::all());
        let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(
            ids,
            vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into())
            ]
        );
    }

    #[test]
    fn test_secondary_ordering() {
        let mut source = source();
        source.add_ordering(vec![Ordering::desc("num")]);

        let rows = source.fetch_sorted(&[Ordering::desc("num")], &FetchRequest::all());
        let nums: Vec<_> = rows.iter().map(|r| r["num"].clone()).collect();
        assert_eq!(nums, vec![Value::Int(3), Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn test_constraint() {
        let source = source();
        let req = FetchRequest {
            constraint: Some(Constraint {
                fields: vec!["num".into()],
                values: vec![Value::Int(2)],
            }),
            start: None,
        };
        let rows = source.fetch_sorted(&[], &req);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Value::String("b".into()));
    }

    #[test]
    fn test_start_bound_exclusive() {
        let source = source();
        let req = FetchRequest {
            constraint: None,
            start: Some(Bound {
                key: vec![Value::String("a".into())],
                inclusive: false,
            }),
        };
        let rows = source.fetch_sorted(&[], &req);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], Value::String("b".into()));
    }

    #[test]
    fn test_update_moves_pk() {
        let mut source = source();
        let changes = source.apply(&SourceChange::Update {
            old: row("a", 1),
            new: row("z", 1),
        });
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], Change::Remove { .. }));
        assert!(matches!(changes[1], Change::Add { .. }));
        assert!(source.get("a").is_none());
        assert!(source.get("z").is_some());
    }

    #[test]
    fn test_clear() {
        let mut source = source();
        let removed = source.clear();
        assert_eq!(removed.len(), 3);
        assert!(source.is_empty());
    }
}
