use fnv::FnvHashMap as HashMap;

use crate::schema::{Correlation, Row};

use fennec_postgres_types::Value;

use super::change::{Change, Node, SourceChange};
use super::operator::{FetchRequest, Operator};
use super::schema::SourceSchema;

/// EXISTS / NOT EXISTS over a correlated child input.
///
/// Keeps a per-parent count of matching children; a child change that
/// crosses the 0↔1 boundary turns into an add or remove of the parent,
/// anything else forwards as a child change.
#[derive(Debug)]
pub struct ExistsOperator {
    parent: Box<Operator>,
    child: Box<Operator>,
    correlation: Correlation,
    relationship_name: String,
    negated: bool,
    counts: HashMap<String, usize>,
    schema: SourceSchema,
}

impl ExistsOperator {
    pub fn new(
        parent: Box<Operator>,
        child: Box<Operator>,
        correlation: Correlation,
        relationship_name: &str,
        negated: bool,
    ) -> Self {
        let schema = parent.schema().clone();

        Self {
            parent,
            child,
            correlation,
            relationship_name: relationship_name.to_string(),
            negated,
            counts: HashMap::default(),
            schema,
        }
    }

    pub fn schema(&self) -> &SourceSchema {
        &self.schema
    }

    pub fn destroy(&mut self) {
        self.parent.destroy();
        self.child.destroy();
        self.counts.clear();
    }

    fn parent_values(&self, row: &Row) -> Vec<Value> {
        self.correlation
            .source_fields
            .iter()
            .map(|f| row.get(f).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn child_values(&self, row: &Row) -> Vec<Value> {
        self.correlation
            .dest_fields
            .iter()
            .map(|f| row.get(f).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn passes(&self, count: usize) -> bool {
        (count > 0) != self.negated
    }

    /// Current matching-child count for a parent, filling the cache from a
    /// child fetch on first sight.
    fn count(&mut self, parent_row: &Row) -> usize {
        let key = self.schema.pk_key(parent_row);
        if let Some(count) = self.counts.get(&key) {
            return *count;
        }

        let values = self.parent_values(parent_row);
        let count = self
            .child
            .fetch(&FetchRequest::constrained(
                &self.correlation.dest_fields,
                values,
            ))
            .len();
        self.counts.insert(key, count);
        count
    }

    fn set_count(&mut self, parent_row: &Row, count: usize) {
        let key = self.schema.pk_key(parent_row);
        self.counts.insert(key, count);
    }

    fn parents_of(&mut self, values: Vec<Value>) -> Vec<Node> {
        self.parent.fetch(&FetchRequest::constrained(
            &self.correlation.source_fields,
            values,
        ))
    }

    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        let parents = self.parent.fetch(req);
        let mut out = vec![];
        for node in parents {
            let count = self.count(&node.row);
            if self.passes(count) {
                out.push(node);
            }
        }
        out
    }

    pub fn push(&mut self, table: &str, change: &SourceChange) -> Vec<Change> {
        let mut out = vec![];

        for parent_change in self.parent.push(table, change) {
            match parent_change {
                Change::Add { node } => {
                    let count = self.count(&node.row);
                    if self.passes(count) {
                        out.push(Change::Add { node });
                    }
                }
                Change::Remove { node } => {
                    let count = self.count(&node.row);
                    let key = self.schema.pk_key(&node.row);
                    self.counts.remove(&key);
                    if self.passes(count) {
                        out.push(Change::Remove { node });
                    }
                }
                Change::Child { row, child } => {
                    let count = self.count(&row);
                    if self.passes(count) {
                        out.push(Change::Child { row, child });
                    }
                }
                Change::Edit { node, old_node } => {
                    if self.parent_values(&node.row) == self.parent_values(&old_node.row) {
                        let count = self.count(&node.row);
                        if self.passes(count) {
                            out.push(Change::Edit { node, old_node });
                        }
                    } else {
                        // Correlation moved; treat as remove + add.
                        let old_count = self.count(&old_node.row);
                        self.counts.remove(&self.schema.pk_key(&old_node.row));
                        if self.passes(old_count) {
                            out.push(Change::Remove { node: old_node });
                        }
                        self.counts.remove(&self.schema.pk_key(&node.row));
                        let new_count = self.count(&node.row);
                        if self.passes(new_count) {
                            out.push(Change::Add { node });
                        }
                    }
                }
            }
        }

        for child_change in self.child.push(table, change) {
            match &child_change {
                Change::Add { node } => {
                    self.child_delta(node.row.clone(), 1, &mut out, &child_change);
                }
                Change::Remove { node } => {
                    self.child_delta(node.row.clone(), -1, &mut out, &child_change);
                }
                Change::Edit { node, old_node } => {
                    if self.child_values(&node.row) == self.child_values(&old_node.row) {
                        self.forward_child(node.row.clone(), &child_change, &mut out);
                    } else {
                        let removed = Change::Remove {
                            node: old_node.clone(),
                        };
                        self.child_delta(old_node.row.clone(), -1, &mut out, &removed);
                        let added = Change::Add { node: node.clone() };
                        self.child_delta(node.row.clone(), 1, &mut out, &added);
                    }
                }
                Change::Child { row, .. } => {
                    self.forward_child(row.clone(), &child_change, &mut out);
                }
            }
        }

        out
    }

    /// Apply a ±1 child count change, emitting parent add/remove on the
    /// 0↔1 boundary and a child change otherwise.
    fn child_delta(&mut self, child_row: Row, delta: i64, out: &mut Vec<Change>, change: &Change) {
        let values = self.child_values(&child_row);
        // The child source already includes this push, so a fresh fetch
        // counts the post-change state.
        let fetched_after = self
            .child
            .fetch(&FetchRequest::constrained(
                &self.correlation.dest_fields,
                values.clone(),
            ))
            .len();
        let parents = self.parents_of(values);

        for parent in parents {
            let key = self.schema.pk_key(&parent.row);
            let after = match self.counts.get(&key) {
                // Cached counts predate this push.
                Some(cached) => (*cached as i64 + delta).max(0) as usize,
                None => fetched_after,
            };
            let before = (after as i64 - delta).max(0) as usize;
            self.set_count(&parent.row, after);

            let was = self.passes(before);
            let is = self.passes(after);
            match (was, is) {
                (false, true) => out.push(Change::Add { node: parent }),
                (true, false) => out.push(Change::Remove { node: parent }),
                (true, true) => out.push(Change::child(
                    parent.row,
                    &self.relationship_name,
                    change.clone(),
                )),
                (false, false) => (),
            }
        }
    }

    fn forward_child(&mut self, child_row: Row, change: &Change, out: &mut Vec<Change>) {
        let values = self.child_values(&child_row);
        for parent in self.parents_of(values) {
            let count = self.count(&parent.row);
            if self.passes(count) {
                out.push(Change::child(
                    parent.row,
                    &self.relationship_name,
                    change.clone(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ivm::source::{MemorySource, SourceOperator};
    use crate::ivm::{SourceRef, SourceSchema as Schema};

    fn issue(id: &str) -> Row {
        Row::from([("id".to_string(), Value::String(id.into()))])
    }

    fn label(id: &str, issue_id: &str) -> Row {
        Row::from([
            ("id".to_string(), Value::String(id.into())),
            ("issueId".to_string(), Value::String(issue_id.into())),
        ])
    }

    fn exists(negated: bool) -> (ExistsOperator, SourceRef, SourceRef) {
        let issues = MemorySource::shared(Schema::new("issue", &["id"], vec![]));
        let labels = MemorySource::shared(Schema::new("label", &["id"], vec![]));

        issues.lock().apply(&SourceChange::Insert(issue("i1")));
        issues.lock().apply(&SourceChange::Insert(issue("i2")));
        labels
            .lock()
            .apply(&SourceChange::Insert(label("l1", "i1")));

        let op = ExistsOperator::new(
            Box::new(Operator::Source(SourceOperator::new(issues.clone(), vec![]))),
            Box::new(Operator::Source(SourceOperator::new(labels.clone(), vec![]))),
            Correlation::new(&["id"], &["issueId"]),
            "labels",
            negated,
        );

        (op, issues, labels)
    }

    #[test]
    fn test_exists_filters_parents() {
        let (mut op, _, _) = exists(false);
        let nodes = op.fetch(&FetchRequest::all());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].row["id"], Value::String("i1".into()));
    }

    #[test]
    fn test_not_exists_inverts() {
        let (mut op, _, _) = exists(true);
        let nodes = op.fetch(&FetchRequest::all());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].row["id"], Value::String("i2".into()));
    }

    #[test]
    fn test_boundary_add_emits_parent_add() {
        let (mut op, _, labels) = exists(false);
        op.fetch(&FetchRequest::all());

        let change = SourceChange::Insert(label("l2", "i2"));
        labels.lock().apply(&change);
        let out = op.push("label", &change);

        assert_eq!(out.len(), 1);
        match &out[0] {
            Change::Add { node } => assert_eq!(node.row["id"], Value::String("i2".into())),
            other => panic!("expected parent add, got {:?}", other),
        }
    }

    #[test]
    fn test_non_boundary_add_is_child_change() {
        let (mut op, _, labels) = exists(false);
        op.fetch(&FetchRequest::all());

        let change = SourceChange::Insert(label("l2", "i1"));
        labels.lock().apply(&change);
        let out = op.push("label", &change);

        assert_eq!(out.len(), 1);
        match &out[0] {
            Change::Child { row, child } => {
                assert_eq!(row["id"], Value::String("i1".into()));
                assert_eq!(child.relationship_name, "labels");
            }
            other => panic!("expected child change, got {:?}", other),
        }
    }

    #[test]
    fn test_boundary_remove_emits_parent_remove() {
        let (mut op, _, labels) = exists(false);
        op.fetch(&FetchRequest::all());

        let change = SourceChange::Delete(label("l1", "i1"));
        labels.lock().apply(&change);
        let out = op.push("label", &change);

        assert_eq!(out.len(), 1);
        match &out[0] {
            Change::Remove { node } => assert_eq!(node.row["id"], Value::String("i1".into())),
            other => panic!("expected parent remove, got {:?}", other),
        }
    }
}
