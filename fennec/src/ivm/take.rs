use crate::schema::Row;

use super::change::{Change, Node, SourceChange};
use super::operator::{FetchRequest, Operator};
use super::schema::SourceSchema;

/// Windowed top-N in the input's order, with the primary key as the stable
/// tiebreak (the input schema's comparator already ends on it).
#[derive(Debug)]
pub struct TakeOperator {
    input: Box<Operator>,
    limit: usize,
    /// Last hydration request; the window tracks this view of the input.
    req: FetchRequest,
    /// Rows currently inside the window, in order. `None` until hydrated.
    window: Option<Vec<Row>>,
}

impl TakeOperator {
    pub fn new(input: Box<Operator>, limit: usize) -> Self {
        Self {
            input,
            limit,
            req: FetchRequest::all(),
            window: None,
        }
    }

    pub fn schema(&self) -> &SourceSchema {
        self.input.schema()
    }

    pub fn destroy(&mut self) {
        self.window = None;
        self.input.destroy();
    }

    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        self.req = req.clone();
        let nodes: Vec<Node> = self
            .input
            .fetch(req)
            .into_iter()
            .take(self.limit)
            .collect();
        self.window = Some(nodes.iter().map(|n| n.row.clone()).collect());
        nodes
    }

    /// Fetch and drop the per-fetch window state.
    pub fn cleanup(&mut self, req: &FetchRequest) -> Vec<Node> {
        let nodes = self.fetch(req);
        self.window = None;
        nodes
    }

    fn in_window(&self, row: &Row) -> bool {
        let schema = self.input.schema();
        self.window
            .as_ref()
            .map(|window| {
                window
                    .iter()
                    .any(|w| schema.compare_rows(w, row) == std::cmp::Ordering::Equal)
            })
            .unwrap_or(false)
    }

    pub fn push(&mut self, table: &str, change: &SourceChange) -> Vec<Change> {
        let input_changes = self.input.push(table, change);
        if self.window.is_none() {
            return vec![];
        }

        let mut out = vec![];
        for change in input_changes {
            self.apply(change, &mut out);
        }
        out
    }

    /// Recompute the window from the (already updated) input and emit the
    /// difference against the previous window.
    fn apply(&mut self, change: Change, out: &mut Vec<Change>) {
        match change {
            Change::Child { row, child } => {
                if self.in_window(&row) {
                    out.push(Change::Child { row, child });
                }
                return;
            }
            Change::Edit {
                ref node,
                ref old_node,
            } => {
                let was_in = self.in_window(&old_node.row);
                let new_window = self.refresh();
                let schema = self.input.schema();
                let is_in = new_window
                    .iter()
                    .any(|n| schema.same_row(&n.row, &node.row));

                match (was_in, is_in) {
                    (true, true) => out.push(change.clone()),
                    (true, false) => {
                        out.push(Change::Remove {
                            node: old_node.clone(),
                        });
                        // A row from just outside filled the vacancy.
                        if let Some(entered) = self.entered(&new_window) {
                            out.push(Change::Add { node: entered });
                        }
                    }
                    (false, true) => {
                        if let Some(evicted) = self.evicted(&new_window) {
                            out.push(Change::Remove { node: evicted });
                        }
                        out.push(Change::Add { node: node.clone() });
                    }
                    (false, false) => (),
                }
                self.store(new_window);
                return;
            }
            _ => (),
        }

        match change {
            Change::Add { node } => {
                let new_window = self.refresh();
                let schema = self.input.schema();
                let is_in = new_window
                    .iter()
                    .any(|n| schema.same_row(&n.row, &node.row));

                if is_in {
                    if let Some(evicted) = self.evicted(&new_window) {
                        out.push(Change::Remove { node: evicted });
                    }
                    out.push(Change::Add { node });
                }
                self.store(new_window);
            }
            Change::Remove { node } => {
                let was_in = self.in_window(&node.row);
                let new_window = self.refresh();

                if was_in {
                    out.push(Change::Remove { node });
                    if let Some(entered) = self.entered(&new_window) {
                        out.push(Change::Add { node: entered });
                    }
                }
                self.store(new_window);
            }
            _ => unreachable!("child and edit handled above"),
        }
    }

    fn refresh(&mut self) -> Vec<Node> {
        let req = self.req.clone();
        self.input
            .fetch(&req)
            .into_iter()
            .take(self.limit)
            .collect()
    }

    fn store(&mut self, window: Vec<Node>) {
        self.window = Some(window.iter().map(|n| n.row.clone()).collect());
    }

    /// The row present in `new_window` but absent from the old one.
    fn entered(&mut self, new_window: &[Node]) -> Option<Node> {
        let schema = self.input.schema();
        let old = self.window.as_ref()?;
        new_window
            .iter()
            .find(|n| !old.iter().any(|o| schema.same_row(o, &n.row)))
            .cloned()
    }

    /// The row present in the old window but absent from `new_window`.
    fn evicted(&mut self, new_window: &[Node]) -> Option<Node> {
        let schema = self.input.schema();
        let old = self.window.clone()?;
        let gone = old
            .into_iter()
            .find(|o| !new_window.iter().any(|n| schema.same_row(&n.row, o)))?;
        Some(Node::row(gone))
    }
}
