use crate::schema::{Correlation, Row};

use fennec_postgres_types::Value;

use super::change::{Change, Node, SourceChange};
use super::operator::{FetchRequest, Operator};
use super::schema::SourceSchema;

/// Nested-loop join driven by parent order. Child rows matching the
/// correlation hang off each parent node under `relationship_name`.
#[derive(Debug)]
pub struct JoinOperator {
    parent: Box<Operator>,
    child: Box<Operator>,
    correlation: Correlation,
    relationship_name: String,
    schema: SourceSchema,
}

impl JoinOperator {
    pub fn new(
        parent: Box<Operator>,
        child: Box<Operator>,
        correlation: Correlation,
        relationship_name: &str,
    ) -> Self {
        let mut schema = parent.schema().clone();
        schema
            .relationships
            .insert(relationship_name.to_string(), child.schema().clone());

        Self {
            parent,
            child,
            correlation,
            relationship_name: relationship_name.to_string(),
            schema,
        }
    }

    pub fn schema(&self) -> &SourceSchema {
        &self.schema
    }

    pub fn destroy(&mut self) {
        self.parent.destroy();
        self.child.destroy();
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

    /// Hydrate the relationship on one parent node.
    fn hydrate(&mut self, mut node: Node) -> Node {
        let values = self.parent_values(&node.row);
        let children = self.child.fetch(&FetchRequest::constrained(
            &self.correlation.dest_fields,
            values,
        ));
        node.relationships
            .push((self.relationship_name.clone(), children));
        node
    }

    /// Parents currently correlated with these child-side values.
    fn parents_of(&mut self, values: Vec<Value>) -> Vec<Node> {
        self.parent.fetch(&FetchRequest::constrained(
            &self.correlation.source_fields,
            values,
        ))
    }

    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        let parents = self.parent.fetch(req);
        parents.into_iter().map(|node| self.hydrate(node)).collect()
    }

    pub fn push(&mut self, table: &str, change: &SourceChange) -> Vec<Change> {
        let mut out = vec![];

        for parent_change in self.parent.push(table, change) {
            match parent_change {
                Change::Add { node } => out.push(Change::Add {
                    node: self.hydrate(node),
                }),
                Change::Remove { node } => out.push(Change::Remove {
                    node: self.hydrate(node),
                }),
                Change::Child { row, child } => out.push(Change::Child { row, child }),
                Change::Edit { node, old_node } => {
                    // A parent edit that moves the correlation re-parents
                    // its children.
                    if self.parent_values(&node.row) == self.parent_values(&old_node.row) {
                        out.push(Change::Edit { node, old_node });
                    } else {
                        out.push(Change::Remove {
                            node: self.hydrate(old_node),
                        });
                        out.push(Change::Add {
                            node: self.hydrate(node),
                        });
                    }
                }
            }
        }

        for child_change in self.child.push(table, change) {
            match &child_change {
                Change::Edit { node, old_node }
                    if self.child_values(&node.row) != self.child_values(&old_node.row) =>
                {
                    // Correlation moved: old parents lose the child, new
                    // parents gain it.
                    let removed = Change::Remove {
                        node: old_node.clone(),
                    };
                    for parent in self.parents_of(self.child_values(&old_node.row)) {
                        out.push(Change::child(
                            parent.row,
                            &self.relationship_name,
                            removed.clone(),
                        ));
                    }
                    let added = Change::Add { node: node.clone() };
                    for parent in self.parents_of(self.child_values(&node.row)) {
                        out.push(Change::child(
                            parent.row,
                            &self.relationship_name,
                            added.clone(),
                        ));
                    }
                }
                _ => {
                    let values = self.child_values(child_change.row());
                    for parent in self.parents_of(values) {
                        out.push(Change::child(
                            parent.row,
                            &self.relationship_name,
                            child_change.clone(),
                        ));
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
    use crate::ivm::source::{MemorySource, SourceOperator};
    use crate::ivm::SourceSchema as Schema;

    fn issue(id: &str) -> Row {
        Row::from([("id".to_string(), Value::String(id.into()))])
    }

    fn comment(id: &str, issue_id: &str) -> Row {
        Row::from([
            ("id".to_string(), Value::String(id.into())),
            ("issueId".to_string(), Value::String(issue_id.into())),
        ])
    }

    fn join() -> (JoinOperator, super::super::SourceRef, super::super::SourceRef) {
        let issues = MemorySource::shared(Schema::new("issue", &["id"], vec![]));
        let comments = MemorySource::shared(Schema::new("comment", &["id"], vec![]));

        issues.lock().apply(&SourceChange::Insert(issue("i1")));
        issues.lock().apply(&SourceChange::Insert(issue("i2")));
        comments
            .lock()
            .apply(&SourceChange::Insert(comment("c1", "i1")));
        comments
            .lock()
            .apply(&SourceChange::Insert(comment("c2", "i1")));

        let join = JoinOperator::new(
            Box::new(Operator::Source(SourceOperator::new(issues.clone(), vec![]))),
            Box::new(Operator::Source(SourceOperator::new(
                comments.clone(),
                vec![],
            ))),
            Correlation::new(&["id"], &["issueId"]),
            "comments",
        );

        (join, issues, comments)
    }

    #[test]
    fn test_fetch_hydrates_children() {
        let (mut join, _, _) = join();
        let nodes = join.fetch(&FetchRequest::all());
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].relationship("comments").unwrap().len(), 2);
        assert_eq!(nodes[1].relationship("comments").unwrap().len(), 0);
    }

    #[test]
    fn test_child_add_targets_parent() {
        let (mut join, _, comments) = join();
        let change = SourceChange::Insert(comment("c3", "i2"));
        comments.lock().apply(&change);

        let out = join.push("comment", &change);
        assert_eq!(out.len(), 1);
        match &out[0] {
            Change::Child { row, child } => {
                assert_eq!(row["id"], Value::String("i2".into()));
                assert_eq!(child.relationship_name, "comments");
                assert!(matches!(*child.change, Change::Add { .. }));
            }
            other => panic!("expected child change, got {:?}", other),
        }
    }

    #[test]
    fn test_parent_add_hydrates() {
        let (mut join, issues, _) = join();
        let change = SourceChange::Insert(issue("i0"));
        issues.lock().apply(&change);

        let out = join.push("issue", &change);
        assert_eq!(out.len(), 1);
        match &out[0] {
            Change::Add { node } => {
                assert_eq!(node.relationship("comments").unwrap().len(), 0);
            }
            other => panic!("expected add, got {:?}", other),
        }
    }

    #[test]
    fn test_child_edit_moves_correlation() {
        let (mut join, _, comments) = join();
        let change = SourceChange::Update {
            old: comment("c1", "i1"),
            new: comment("c1", "i2"),
        };
        comments.lock().apply(&change);

        let out = join.push("comment", &change);
        // Remove under i1, add under i2.
        assert_eq!(out.len(), 2);
        match (&out[0], &out[1]) {
            (
                Change::Child { row: r1, child: c1 },
                Change::Child { row: r2, child: c2 },
            ) => {
                assert_eq!(r1["id"], Value::String("i1".into()));
                assert!(matches!(*c1.change, Change::Remove { .. }));
                assert_eq!(r2["id"], Value::String("i2".into()));
                assert!(matches!(*c2.change, Change::Add { .. }));
            }
            other => panic!("expected two child changes, got {:?}", other),
        }
    }
}
