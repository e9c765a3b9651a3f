use fnv::FnvHashMap as HashMap;

use super::change::{Change, Node, SourceChange};
use super::operator::{FetchRequest, Operator};
use super::schema::SourceSchema;

/// Fan-out / fan-in pair for OR-rewritten queries, fused into one stage.
///
/// A push is duplicated into every branch (fan-out); branch outputs merge
/// with per-row reference counts so a row matching several branches
/// surfaces exactly once (fan-in).
#[derive(Debug)]
pub struct FanOperator {
    branches: Vec<Operator>,
    counts: HashMap<String, usize>,
    schema: SourceSchema,
}

impl FanOperator {
    pub fn new(branches: Vec<Operator>) -> Self {
        assert!(!branches.is_empty());
        let schema = branches[0].schema().clone();

        Self {
            branches,
            counts: HashMap::default(),
            schema,
        }
    }

    pub fn schema(&self) -> &SourceSchema {
        &self.schema
    }

    pub fn destroy(&mut self) {
        for branch in &mut self.branches {
            branch.destroy();
        }
        self.counts.clear();
    }

    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        let mut merged: Vec<Node> = vec![];
        self.counts.clear();

        for branch in &mut self.branches {
            for node in branch.fetch(req) {
                let key = self.schema.pk_key(&node.row);
                let count = self.counts.entry(key).or_insert(0);
                *count += 1;
                if *count == 1 {
                    merged.push(node);
                }
            }
        }

        merged.sort_by(|a, b| self.schema.compare_rows(&a.row, &b.row));
        merged
    }

    pub fn push(&mut self, table: &str, change: &SourceChange) -> Vec<Change> {
        let mut out = vec![];

        for i in 0..self.branches.len() {
            for change in self.branches[i].push(table, change) {
                match change {
                    Change::Add { node } => {
                        let key = self.schema.pk_key(&node.row);
                        let count = self.counts.entry(key).or_insert(0);
                        *count += 1;
                        if *count == 1 {
                            out.push(Change::Add { node });
                        }
                    }
                    Change::Remove { node } => {
                        let key = self.schema.pk_key(&node.row);
                        match self.counts.get_mut(&key) {
                            Some(count) if *count > 1 => *count -= 1,
                            Some(_) => {
                                self.counts.remove(&key);
                                out.push(Change::Remove { node });
                            }
                            None => (),
                        }
                    }
                    Change::Edit { node, old_node } => {
                        // Every matching branch reports the same edit; emit
                        // it once per push.
                        let already = out.iter().any(|c| match c {
                            Change::Edit { node: n, .. } => {
                                self.schema.same_row(&n.row, &node.row)
                            }
                            _ => false,
                        });
                        if !already {
                            out.push(Change::Edit { node, old_node });
                        }
                    }
                    Change::Child { row, child } => {
                        let already = out.iter().any(|c| match c {
                            Change::Child { row: r, child: ch } => {
                                self.schema.same_row(r, &row)
                                    && ch.relationship_name == child.relationship_name
                            }
                            _ => false,
                        });
                        if !already {
                            out.push(Change::Child { row, child });
                        }
                    }
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ivm::filter::FilterOperator;
    use crate::ivm::source::{MemorySource, SourceOperator};
    use crate::ivm::{SourceRef, SourceSchema as Schema};
    use crate::query::{Condition, SimpleOperator};
    use crate::schema::Row;
    use fennec_postgres_types::Value;

    fn row(id: &str, status: &str, kind: &str) -> Row {
        Row::from([
            ("id".to_string(), Value::String(id.into())),
            ("status".to_string(), Value::String(status.into())),
            ("kind".to_string(), Value::String(kind.into())),
        ])
    }

    /// status = 'open' OR kind = 'bug'
    fn fan() -> (FanOperator, SourceRef) {
        let source = MemorySource::shared(Schema::new("issue", &["id"], vec![]));
        source
            .lock()
            .apply(&SourceChange::Insert(row("a", "open", "bug")));
        source
            .lock()
            .apply(&SourceChange::Insert(row("b", "closed", "bug")));
        source
            .lock()
            .apply(&SourceChange::Insert(row("c", "closed", "chore")));

        let branch = |cond: Condition, source: &SourceRef| {
            Operator::Filter(FilterOperator::new(
                Box::new(Operator::Source(SourceOperator::new(source.clone(), vec![]))),
                cond,
            ))
        };

        let op = FanOperator::new(vec![
            branch(
                Condition::simple("status", SimpleOperator::Eq, "open"),
                &source,
            ),
            branch(Condition::simple("kind", SimpleOperator::Eq, "bug"), &source),
        ]);

        (op, source)
    }

    #[test]
    fn test_dedup_fetch() {
        let (mut op, _) = fan();
        let nodes = op.fetch(&FetchRequest::all());
        // "a" matches both branches but appears once.
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].row["id"], Value::String("a".into()));
        assert_eq!(nodes[1].row["id"], Value::String("b".into()));
    }

    #[test]
    fn test_remove_from_one_branch_keeps_row() {
        let (mut op, source) = fan();
        op.fetch(&FetchRequest::all());

        // "a" stops being open but is still a bug.
        let change = SourceChange::Update {
            old: row("a", "open", "bug"),
            new: row("a", "closed", "bug"),
        };
        source.lock().apply(&change);
        let out = op.push("issue", &change);

        // Branch 1 reports remove, branch 2 reports edit. The row stays.
        assert!(!out
            .iter()
            .any(|c| matches!(c, Change::Remove { .. })));
    }

    #[test]
    fn test_remove_from_last_branch_removes() {
        let (mut op, source) = fan();
        op.fetch(&FetchRequest::all());

        let change = SourceChange::Delete(row("b", "closed", "bug"));
        source.lock().apply(&change);
        let out = op.push("issue", &change);

        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Change::Remove { .. }));
    }
}
