use std::sync::Arc;

use fnv::FnvHashMap as HashMap;
use parking_lot::Mutex;

use fennec_stats::QueryStats;

use crate::query::{Ast, Condition, SubQuery};
use crate::schema::{Relationship, RelationshipPath, TableSchema};

use super::change::SourceChange;
use super::exists::ExistsOperator;
use super::fan::FanOperator;
use super::filter::FilterOperator;
use super::join::JoinOperator;
use super::measure::MeasureOperator;
use super::operator::Operator;
use super::schema::SourceSchema;
use super::skip::SkipOperator;
use super::source::{MemorySource, SourceOperator, SourceRef};
use super::take::TakeOperator;
use super::view::ViewFormat;
use super::Error;

/// Tables and relationships available to query pipelines, plus the shared
/// in-memory sources the pipelines read.
#[derive(Debug, Default)]
pub struct TableRegistry {
    sources: HashMap<String, SourceRef>,
    relationships: HashMap<String, HashMap<String, Relationship>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&mut self, table: &TableSchema) {
        let pk: Vec<&str> = table.primary_key.iter().map(|k| k.as_str()).collect();
        let schema = SourceSchema::new(&table.name, &pk, vec![]);
        self.sources
            .insert(table.name.clone(), MemorySource::shared(schema));
    }

    pub fn register_relationship(&mut self, relationship: Relationship) {
        self.relationships
            .entry(relationship.source_table.clone())
            .or_default()
            .insert(relationship.name.clone(), relationship);
    }

    pub fn source(&self, table: &str) -> Result<SourceRef, Error> {
        self.sources
            .get(table)
            .cloned()
            .ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    pub fn relationship(&self, table: &str, name: &str) -> Result<&Relationship, Error> {
        self.relationships
            .get(table)
            .and_then(|map| map.get(name))
            .ok_or_else(|| Error::UnknownRelationship(name.to_string(), table.to_string()))
    }

    /// Apply a change to a table source; the returned flag says whether the
    /// table is known.
    pub fn apply(&self, table: &str, change: &SourceChange) -> bool {
        match self.sources.get(table) {
            Some(source) => {
                source.lock().apply(change);
                true
            }
            None => false,
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &String> {
        self.sources.keys()
    }
}

/// Compile a query AST into an operator pipeline over the registry's
/// sources, wrapped in a measure stage reporting against `query_id`.
pub fn build_pipeline(
    ast: &Ast,
    registry: &TableRegistry,
    query_id: &str,
    stats: Arc<Mutex<QueryStats>>,
) -> Result<Operator, Error> {
    let root = build_subquery(ast, 0, registry)?;

    Ok(Operator::Measure(MeasureOperator::new(
        Box::new(root),
        query_id,
        stats,
    )))
}

/// The view format matching a compiled pipeline's output.
pub fn build_format(ast: &Ast, index: usize) -> Result<ViewFormat, Error> {
    let query = ast.queries.get(index).ok_or(Error::BadSubquery(index))?;

    let mut format = if query.singular {
        ViewFormat::singular()
    } else {
        ViewFormat::ordered()
    };

    for link in &query.related {
        let inner = build_format(ast, link.subquery)?;
        let child = if link.hidden {
            ViewFormat::hidden(&link.relationship, inner)
        } else {
            inner
        };
        format.relationships.insert(link.relationship.clone(), child);
    }

    Ok(format)
}

fn build_subquery(ast: &Ast, index: usize, registry: &TableRegistry) -> Result<Operator, Error> {
    let query = ast.queries.get(index).ok_or(Error::BadSubquery(index))?;
    let mut op = base_operator(query, registry)?;

    if let Some(condition) = &query.where_ {
        op = build_condition(op, condition, ast, query, registry)?;
    }

    if let Some(start) = &query.start {
        op = Operator::Skip(SkipOperator::new(Box::new(op), start.clone()));
    }

    for link in &query.related {
        let relationship = registry.relationship(&query.table, &link.relationship)?;
        let dest = build_subquery(ast, link.subquery, registry)?;

        op = match &relationship.path {
            RelationshipPath::Direct { correlation, .. } => Operator::Join(JoinOperator::new(
                Box::new(op),
                Box::new(dest),
                correlation.clone(),
                &link.relationship,
            )),
            RelationshipPath::Junction {
                first,
                junction_table,
                second,
                ..
            } => {
                let junction = Operator::Source(SourceOperator::new(
                    registry.source(junction_table)?,
                    vec![],
                ));
                let inner = Operator::Join(JoinOperator::new(
                    Box::new(junction),
                    Box::new(dest),
                    second.clone(),
                    &link.relationship,
                ));
                Operator::Join(JoinOperator::new(
                    Box::new(op),
                    Box::new(inner),
                    first.clone(),
                    &link.relationship,
                ))
            }
        };
    }

    if let Some(limit) = query.limit {
        op = Operator::Take(TakeOperator::new(Box::new(op), limit as usize));
    }

    Ok(op)
}

fn base_operator(query: &SubQuery, registry: &TableRegistry) -> Result<Operator, Error> {
    let source = registry.source(&query.table)?;
    Ok(Operator::Source(SourceOperator::new(
        source,
        query.order_by.clone(),
    )))
}

/// Compile a predicate onto `input`. Correlated EXISTS conditions become
/// exists operators; OR fans out into parallel branches; everything else
/// is a plain filter.
fn build_condition(
    input: Operator,
    condition: &Condition,
    ast: &Ast,
    query: &SubQuery,
    registry: &TableRegistry,
) -> Result<Operator, Error> {
    match condition {
        Condition::Or { conditions } => {
            let mut branches = Vec::with_capacity(conditions.len());
            for branch in conditions {
                let base = base_operator(query, registry)?;
                branches.push(build_condition(base, branch, ast, query, registry)?);
            }
            // The original input was only a template; shared sources make
            // the per-branch bases equivalent.
            drop(input);
            Ok(Operator::Fan(FanOperator::new(branches)))
        }
        Condition::And { conditions } => {
            let (exists, plain): (Vec<_>, Vec<_>) = conditions
                .iter()
                .partition(|c| matches!(c, Condition::Exists { .. }));

            let mut op = input;
            if !plain.is_empty() {
                let filter = Condition::And {
                    conditions: plain.into_iter().cloned().collect(),
                };
                op = Operator::Filter(FilterOperator::new(Box::new(op), filter));
            }
            for condition in exists {
                op = build_condition(op, condition, ast, query, registry)?;
            }
            Ok(op)
        }
        Condition::Exists {
            relationship,
            subquery,
            negated,
        } => {
            let rel = registry.relationship(&query.table, relationship)?;
            let child = build_subquery(ast, *subquery, registry)?;
            let correlation = match &rel.path {
                RelationshipPath::Direct { correlation, .. } => correlation.clone(),
                // Existence through a junction is existence of junction rows.
                RelationshipPath::Junction { first, .. } => first.clone(),
            };
            Ok(Operator::Exists(ExistsOperator::new(
                Box::new(input),
                Box::new(child),
                correlation,
                relationship,
                *negated,
            )))
        }
        Condition::Not { condition } => match condition.as_ref() {
            Condition::Exists {
                relationship,
                subquery,
                negated,
            } => build_condition(
                input,
                &Condition::Exists {
                    relationship: relationship.clone(),
                    subquery: *subquery,
                    negated: !negated,
                },
                ast,
                query,
                registry,
            ),
            other => Ok(Operator::Filter(FilterOperator::new(
                Box::new(input),
                Condition::Not {
                    condition: Box::new(other.clone()),
                },
            ))),
        },
        simple => Ok(Operator::Filter(FilterOperator::new(
            Box::new(input),
            simple.clone(),
        ))),
    }
}
