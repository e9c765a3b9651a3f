use crate::schema::Row;

/// A row with its hydrated relationships.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub row: Row,
    pub relationships: Vec<(String, Vec<Node>)>,
}

impl Node {
    pub fn row(row: Row) -> Self {
        Self {
            row,
            relationships: vec![],
        }
    }

    pub fn relationship(&self, name: &str) -> Option<&[Node]> {
        self.relationships
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, nodes)| nodes.as_slice())
    }
}

/// A change flowing through the pipeline.
///
/// Nested-relationship changes bubble as `Child` changes carrying the
/// parent row only; the receiver must not re-traverse other relationships.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Add {
        node: Node,
    },
    Remove {
        node: Node,
    },
    Child {
        row: Row,
        child: ChildChange,
    },
    Edit {
        node: Node,
        old_node: Node,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildChange {
    pub relationship_name: String,
    pub change: Box<Change>,
}

impl Change {
    /// The row this change is anchored on.
    pub fn row(&self) -> &Row {
        match self {
            Change::Add { node } => &node.row,
            Change::Remove { node } => &node.row,
            Change::Child { row, .. } => row,
            Change::Edit { node, .. } => &node.row,
        }
    }

    pub fn child(row: Row, relationship_name: &str, change: Change) -> Self {
        Change::Child {
            row,
            child: ChildChange {
                relationship_name: relationship_name.to_string(),
                change: Box::new(change),
            },
        }
    }
}

/// A change arriving at a table source from the replication stream or an
/// optimistic mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceChange {
    Insert(Row),
    Update { old: Row, new: Row },
    Delete(Row),
}
