use crate::query::{Condition, SimpleOperator};
use crate::schema::Row;

use fennec_postgres_types::Value;

use super::change::{Change, Node, SourceChange};
use super::operator::{FetchRequest, Operator};
use super::schema::SourceSchema;

/// Stateless predicate over the input's rows.
#[derive(Debug)]
pub struct FilterOperator {
    pub input: Box<Operator>,
    condition: Condition,
}

impl FilterOperator {
    pub fn new(input: Box<Operator>, condition: Condition) -> Self {
        Self { input, condition }
    }

    pub fn schema(&self) -> &SourceSchema {
        self.input.schema()
    }

    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        self.input
            .fetch(req)
            .into_iter()
            .filter(|node| evaluate(&self.condition, &node.row))
            .collect()
    }

    pub fn push(&mut self, table: &str, change: &SourceChange) -> Vec<Change> {
        let mut out = vec![];

        for change in self.input.push(table, change) {
            match change {
                Change::Add { node } => {
                    if evaluate(&self.condition, &node.row) {
                        out.push(Change::Add { node });
                    }
                }
                Change::Remove { node } => {
                    if evaluate(&self.condition, &node.row) {
                        out.push(Change::Remove { node });
                    }
                }
                Change::Child { row, child } => {
                    if evaluate(&self.condition, &row) {
                        out.push(Change::Child { row, child });
                    }
                }
                Change::Edit { node, old_node } => {
                    let was_in = evaluate(&self.condition, &old_node.row);
                    let is_in = evaluate(&self.condition, &node.row);
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

/// Evaluate a predicate against a row. `Exists` conditions are compiled
/// into operators before this runs and never reach here.
pub fn evaluate(condition: &Condition, row: &Row) -> bool {
    match condition {
        Condition::Simple { field, op, value } => {
            static NULL: Value = Value::Null;
            simple(row.get(field).unwrap_or(&NULL), *op, value)
        }
        Condition::And { conditions } => conditions.iter().all(|c| evaluate(c, row)),
        Condition::Or { conditions } => conditions.iter().any(|c| evaluate(c, row)),
        Condition::Not { condition } => !evaluate(condition, row),
        Condition::Exists { .. } => true,
    }
}

fn simple(left: &Value, op: SimpleOperator, right: &Value) -> bool {
    use SimpleOperator::*;

    // SQL comparison semantics: NULL compares unknown, except IS / IS NOT.
    match op {
        Is => left == right,
        IsNot => left != right,
        _ if left.is_null() || right.is_null() => false,
        Eq => left == right,
        Ne => left != right,
        Lt => left < right,
        Le => left <= right,
        Gt => left > right,
        Ge => left >= right,
        In => in_list(left, right),
        Like => like(left, right, false),
        ILike => like(left, right, true),
    }
}

fn in_list(left: &Value, right: &Value) -> bool {
    match right {
        Value::Json(serde_json::Value::Array(items)) => items.iter().any(|item| {
            serde_json::from_value::<Value>(item.clone())
                .map(|v| &v == left)
                .unwrap_or(false)
        }),
        _ => false,
    }
}

fn like(left: &Value, right: &Value, case_insensitive: bool) -> bool {
    let (Some(text), Some(pattern)) = (left.as_str(), right.as_str()) else {
        return false;
    };

    if case_insensitive {
        like_match(&text.to_lowercase(), &pattern.to_lowercase())
    } else {
        like_match(text, pattern)
    }
}

/// SQL LIKE: `%` matches any run, `_` any single character, `\` escapes.
fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_inner(&text, &pattern)
}

fn like_inner(text: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('%') => {
            // Greedy backtracking over the remaining text.
            (0..=text.len()).any(|skip| like_inner(&text[skip..], &pattern[1..]))
        }
        Some('_') => !text.is_empty() && like_inner(&text[1..], &pattern[1..]),
        Some('\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && like_inner(&text[1..], &pattern[2..])
        }
        Some(c) => text.first() == Some(c) && like_inner(&text[1..], &pattern[1..]),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(status: &str) -> Row {
        Row::from([("status".to_string(), Value::String(status.into()))])
    }

    #[test]
    fn test_simple_operators() {
        let open = row("open");
        assert!(evaluate(
            &Condition::simple("status", SimpleOperator::Eq, "open"),
            &open
        ));
        assert!(!evaluate(
            &Condition::simple("status", SimpleOperator::Ne, "open"),
            &open
        ));
    }

    #[test]
    fn test_null_semantics() {
        let mut no_status = Row::new();
        no_status.insert("status".to_string(), Value::Null);

        // = against NULL is never true; IS is.
        assert!(!evaluate(
            &Condition::simple("status", SimpleOperator::Eq, Value::Null),
            &no_status
        ));
        assert!(evaluate(
            &Condition::simple("status", SimpleOperator::Is, Value::Null),
            &no_status
        ));
        assert!(!evaluate(
            &Condition::simple("status", SimpleOperator::IsNot, Value::Null),
            &no_status
        ));
    }

    #[test]
    fn test_in() {
        let value = Value::Json(serde_json::json!(["open", "closed"]));
        assert!(evaluate(
            &Condition::simple("status", SimpleOperator::In, value.clone()),
            &row("open")
        ));
        assert!(!evaluate(
            &Condition::simple("status", SimpleOperator::In, value),
            &row("stale")
        ));
    }

    #[test]
    fn test_like() {
        assert!(like_match("hello world", "hello%"));
        assert!(like_match("hello world", "%world"));
        assert!(like_match("hello world", "h_llo%"));
        assert!(!like_match("hello world", "hello"));
        assert!(like_match("50%", "50\\%"));
        assert!(!like_match("505", "50\\%"));
    }

    #[test]
    fn test_ilike() {
        assert!(evaluate(
            &Condition::simple("status", SimpleOperator::ILike, "OP%"),
            &row("open")
        ));
        assert!(!evaluate(
            &Condition::simple("status", SimpleOperator::Like, "OP%"),
            &row("open")
        ));
    }

    #[test]
    fn test_compound() {
        let open = row("open");
        let cond = Condition::and(vec![
            Condition::simple("status", SimpleOperator::Eq, "open"),
            Condition::Not {
                condition: Box::new(Condition::simple("status", SimpleOperator::Eq, "closed")),
            },
        ]);
        assert!(evaluate(&cond, &open));

        let cond = Condition::or(vec![
            Condition::simple("status", SimpleOperator::Eq, "closed"),
            Condition::simple("status", SimpleOperator::Eq, "open"),
        ]);
        assert!(evaluate(&cond, &open));
    }
}
