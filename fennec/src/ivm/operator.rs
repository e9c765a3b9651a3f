use fennec_postgres_types::Value;

use crate::query::Bound;

use super::change::{Change, Node, SourceChange};
use super::exists::ExistsOperator;
use super::fan::FanOperator;
use super::filter::FilterOperator;
use super::join::JoinOperator;
use super::measure::MeasureOperator;
use super::schema::SourceSchema;
use super::skip::SkipOperator;
use super::source::SourceOperator;
use super::take::TakeOperator;

/// Snapshot read request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRequest {
    /// Restrict output to rows whose `fields` equal `values`. Joins use
    /// this to correlate children with one parent.
    pub constraint: Option<Constraint>,
    /// Resume point into the operator's ordering.
    pub start: Option<Bound>,
}

impl FetchRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn constrained(fields: &[String], values: Vec<Value>) -> Self {
        Self {
            constraint: Some(Constraint {
                fields: fields.to_vec(),
                values,
            }),
            start: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub fields: Vec<String>,
    pub values: Vec<Value>,
}

impl Constraint {
    pub fn matches(&self, row: &crate::schema::Row) -> bool {
        static NULL: Value = Value::Null;
        self.fields
            .iter()
            .zip(self.values.iter())
            .all(|(field, value)| row.get(field).unwrap_or(&NULL) == value)
    }
}

/// One stage of a query pipeline. The set is closed; dispatch is by tag.
#[derive(Debug)]
pub enum Operator {
    Source(SourceOperator),
    Filter(FilterOperator),
    Exists(ExistsOperator),
    Join(JoinOperator),
    Take(TakeOperator),
    Skip(SkipOperator),
    Fan(FanOperator),
    Measure(MeasureOperator),
}

impl Operator {
    /// Snapshot read: nodes in this operator's output order.
    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        match self {
            Operator::Source(op) => op.fetch(req),
            Operator::Filter(op) => op.fetch(req),
            Operator::Exists(op) => op.fetch(req),
            Operator::Join(op) => op.fetch(req),
            Operator::Take(op) => op.fetch(req),
            Operator::Skip(op) => op.fetch(req),
            Operator::Fan(op) => op.fetch(req),
            Operator::Measure(op) => op.fetch(req),
        }
    }

    /// Fetch and release any per-fetch state kept for the request.
    pub fn cleanup(&mut self, req: &FetchRequest) -> Vec<Node> {
        match self {
            Operator::Take(op) => op.cleanup(req),
            other => other.fetch(req),
        }
    }

    /// Output schema of this operator.
    pub fn schema(&self) -> &SourceSchema {
        match self {
            Operator::Source(op) => op.schema(),
            Operator::Filter(op) => op.schema(),
            Operator::Exists(op) => op.schema(),
            Operator::Join(op) => op.schema(),
            Operator::Take(op) => op.schema(),
            Operator::Skip(op) => op.schema(),
            Operator::Fan(op) => op.schema(),
            Operator::Measure(op) => op.schema(),
        }
    }

    /// React to a table change. The owning pipeline has already applied it
    /// to the table source; returned changes are this operator's output.
    pub fn push(&mut self, table: &str, change: &SourceChange) -> Vec<Change> {
        match self {
            Operator::Source(op) => op.push(table, change),
            Operator::Filter(op) => op.push(table, change),
            Operator::Exists(op) => op.push(table, change),
            Operator::Join(op) => op.push(table, change),
            Operator::Take(op) => op.push(table, change),
            Operator::Skip(op) => op.push(table, change),
            Operator::Fan(op) => op.push(table, change),
            Operator::Measure(op) => op.push(table, change),
        }
    }

    /// Release resources. Sources are shared and survive.
    pub fn destroy(&mut self) {
        match self {
            Operator::Source(_) => (),
            Operator::Filter(op) => op.input.destroy(),
            Operator::Exists(op) => op.destroy(),
            Operator::Join(op) => op.destroy(),
            Operator::Take(op) => op.destroy(),
            Operator::Skip(op) => op.input.destroy(),
            Operator::Fan(op) => op.destroy(),
            Operator::Measure(op) => op.input.destroy(),
        }
    }
}
