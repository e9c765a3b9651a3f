use std::cmp::Ordering as CmpOrdering;

use crate::query::Bound;
use crate::schema::Row;

use super::change::{Change, Node, SourceChange};
use super::operator::{FetchRequest, Operator};
use super::schema::SourceSchema;

/// Resume from a key, exclusive or inclusive. Rows ordering before the
/// bound never leave this operator.
#[derive(Debug)]
pub struct SkipOperator {
    pub input: Box<Operator>,
    bound: Bound,
    bound_row: Row,
}

impl SkipOperator {
    pub fn new(input: Box<Operator>, bound: Bound) -> Self {
        let schema = input.schema();
        let mut bound_row = Row::new();
        for (ordering, value) in schema.sort.iter().zip(bound.key.iter()) {
            bound_row.insert(ordering.field.clone(), value.clone());
        }
        for (pk, value) in schema
            .primary_key
            .iter()
            .zip(bound.key.iter().skip(schema.sort.len()))
        {
            bound_row.insert(pk.clone(), value.clone());
        }

        Self {
            input,
            bound,
            bound_row,
        }
    }

    pub fn schema(&self) -> &SourceSchema {
        self.input.schema()
    }

    fn in_range(&self, row: &Row) -> bool {
        let ord = self.input.schema().compare_rows(row, &self.bound_row);
        if self.bound.inclusive {
            ord != CmpOrdering::Less
        } else {
            ord == CmpOrdering::Greater
        }
    }

    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        let mut req = req.clone();
        // The tighter of the two starts wins; ours is a hard floor.
        if req.start.is_none() {
            req.start = Some(self.bound.clone());
        }

        self.input
            .fetch(&req)
            .into_iter()
            .filter(|node| self.in_range(&node.row))
            .collect()
    }

    pub fn push(&mut self, table: &str, change: &SourceChange) -> Vec<Change> {
        let mut out = vec![];

        for change in self.input.push(table, change) {
            match change {
                Change::Add { node } => {
                    if self.in_range(&node.row) {
                        out.push(Change::Add { node });
                    }
                }
                Change::Remove { node } => {
                    if self.in_range(&node.row) {
                        out.push(Change::Remove { node });
                    }
                }
                Change::Child { row, child } => {
                    if self.in_range(&row) {
                        out.push(Change::Child { row, child });
                    }
                }
                Change::Edit { node, old_node } => {
                    let was_in = self.in_range(&old_node.row);
                    let is_in = self.in_range(&node.row);
                    match (was_in, is_in) {
                        (true, true) => out.push(Change::Edit { node, old_node }),
                        (true, false) => out.push(Change::Remove { node: old_node }),
                        (false, true) => out.push(Change::Add { node }),
                        (false, false) => (),
                    }
                }
            }
        }

        out
    }
}
