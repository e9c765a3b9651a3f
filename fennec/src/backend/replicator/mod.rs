//! Applies the change stream to the on-disk SQLite replica.

pub mod replica;

pub use replica::Replica;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use fennec_stats::ReplicatorStats;

use super::changes::{
    AckSender, ChangeStream, ChangeStreamMessage, ControlMessage, DataChange, Error, Watermark,
};

/// Drives a change stream into the replica, committing the watermark in
/// the same transaction as the data and acking after each durable commit.
pub struct Replicator {
    replica: Replica,
    stats: Arc<Mutex<ReplicatorStats>>,
}

impl Replicator {
    pub fn new(replica: Replica) -> Self {
        Self {
            replica,
            stats: Arc::new(Mutex::new(ReplicatorStats::default())),
        }
    }

    pub fn stats(&self) -> Arc<Mutex<ReplicatorStats>> {
        self.stats.clone()
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Consume the stream until it ends. Returns the last durable
    /// watermark.
    pub async fn run(
        &mut self,
        stream: &mut ChangeStream,
        acks: AckSender,
    ) -> Result<Watermark, Error> {
        let mut last = self.replica.watermark()?;

        while let Some(message) = stream.next().await {
            match message? {
                ChangeStreamMessage::Begin { .. } => {
                    self.replica.begin()?;
                }
                ChangeStreamMessage::Data(change) => {
                    self.apply(change)?;
                }
                ChangeStreamMessage::Commit { watermark } => {
                    self.replica.commit(&watermark)?;
                    self.stats.lock().applied_transactions += 1;
                    last = watermark.clone();
                    acks.ack(watermark).await;
                }
                ChangeStreamMessage::Rollback => {
                    debug!("rolling back current replica transaction");
                    self.replica.rollback()?;
                }
                ChangeStreamMessage::Control(ControlMessage::ResetRequired) => {
                    error!("upstream requires resync; stopping replication");
                    return Err(Error::UnsupportedSchemaChange(
                        "reset required by change source".into(),
                    ));
                }
            }
        }

        info!("change stream ended at {}", last);
        Ok(last)
    }

    fn apply(&mut self, change: DataChange) -> Result<(), Error> {
        self.stats.lock().applied_changes += 1;

        match change {
            DataChange::Insert { table, row } => self.replica.upsert(&table, &row),
            DataChange::Update { table, key, row } => {
                if let Some(key) = key {
                    self.replica.delete(&table, &key)?;
                }
                self.replica.upsert(&table, &row)
            }
            DataChange::Delete { table, key } => self.replica.delete(&table, &key),
            DataChange::Truncate { tables } => {
                for table in tables {
                    self.replica.truncate(&table)?;
                }
                Ok(())
            }
            DataChange::Ddl(event) => {
                self.stats.lock().schema_changes += 1;
                self.replica.apply_ddl(&event)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::changes::ddl::DdlEvent;
    use super::*;
    use crate::schema::Row;
    use fennec_postgres_types::Value;

    fn row(id: &str, title: &str) -> Row {
        Row::from([
            ("id".to_string(), Value::String(id.into())),
            ("title".to_string(), Value::String(title.into())),
        ])
    }

    #[test]
    fn test_apply_transaction() {
        let mut replicator = Replicator::new(Replica::open_in_memory().unwrap());
        replicator
            .replica()
            .ensure_table("issue", &["id".to_string()])
            .unwrap();

        let watermark = Watermark::min();
        replicator.replica.begin().unwrap();
        replicator
            .apply(DataChange::Insert {
                table: "issue".into(),
                row: row("a", "hello"),
            })
            .unwrap();
        replicator
            .apply(DataChange::Insert {
                table: "issue".into(),
                row: row("b", "world"),
            })
            .unwrap();
        replicator
            .apply(DataChange::Delete {
                table: "issue".into(),
                key: row("b", "world"),
            })
            .unwrap();
        replicator.replica.commit(&watermark).unwrap();

        let rows = replicator.replica().scan("issue").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], Value::String("hello".into()));
        assert_eq!(replicator.replica().watermark().unwrap(), watermark);
    }

    #[test]
    fn test_key_moving_update() {
        let mut replicator = Replicator::new(Replica::open_in_memory().unwrap());
        replicator
            .replica()
            .ensure_table("issue", &["id".to_string()])
            .unwrap();

        replicator.replica.begin().unwrap();
        replicator
            .apply(DataChange::Insert {
                table: "issue".into(),
                row: row("a", "hello"),
            })
            .unwrap();
        replicator
            .apply(DataChange::Update {
                table: "issue".into(),
                key: Some(row("a", "hello")),
                row: row("z", "hello"),
            })
            .unwrap();
        replicator.replica.commit(&Watermark::min()).unwrap();

        let rows = replicator.replica().scan("issue").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Value::String("z".into()));
    }

    #[test]
    fn test_create_table_ddl() {
        let mut replicator = Replicator::new(Replica::open_in_memory().unwrap());

        replicator.replica.begin().unwrap();
        replicator
            .apply(DataChange::Ddl(DdlEvent {
                tag: "CREATE TABLE".into(),
                object_type: Some("table".into()),
                object_identity: Some("public.label".into()),
                columns: None,
            }))
            .unwrap();
        replicator
            .apply(DataChange::Insert {
                table: "label".into(),
                row: row("l1", "bug"),
            })
            .unwrap();
        replicator.replica.commit(&Watermark::min()).unwrap();

        assert_eq!(replicator.replica().scan("label").unwrap().len(), 1);
    }
}
