use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use fennec_stats::QueryStats;

use super::change::{Change, Node, SourceChange};
use super::operator::{FetchRequest, Operator};
use super::schema::SourceSchema;

/// Wraps a pipeline input and records wall-clock per push against the
/// originating query ID.
#[derive(Debug)]
pub struct MeasureOperator {
    pub input: Box<Operator>,
    query_id: String,
    stats: Arc<Mutex<QueryStats>>,
}

impl MeasureOperator {
    pub fn new(input: Box<Operator>, query_id: &str, stats: Arc<Mutex<QueryStats>>) -> Self {
        Self {
            input,
            query_id: query_id.to_string(),
            stats,
        }
    }

    pub fn schema(&self) -> &SourceSchema {
        self.input.schema()
    }

    pub fn fetch(&mut self, req: &FetchRequest) -> Vec<Node> {
        self.input.fetch(req)
    }

    pub fn push(&mut self, table: &str, change: &SourceChange) -> Vec<Change> {
        let start = Instant::now();
        let out = self.input.push(table, change);
        self.stats.lock().record(&self.query_id, start.elapsed());
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ivm::source::{MemorySource, SourceOperator};
    use crate::ivm::SourceSchema as Schema;
    use crate::schema::Row;
    use fennec_postgres_types::Value;

    #[test]
    fn test_records_pushes() {
        let source = MemorySource::shared(Schema::new("issue", &["id"], vec![]));
        let stats = Arc::new(Mutex::new(QueryStats::default()));

        let mut op = MeasureOperator::new(
            Box::new(Operator::Source(SourceOperator::new(source.clone(), vec![]))),
            "q1",
            stats.clone(),
        );

        let row = Row::from([("id".to_string(), Value::String("a".into()))]);
        let change = SourceChange::Insert(row);
        source.lock().apply(&change);
        op.push("issue", &change);
        op.push("other", &change);

        let stats = stats.lock();
        assert_eq!(stats.queries["q1"].pushes, 2);
    }
}
