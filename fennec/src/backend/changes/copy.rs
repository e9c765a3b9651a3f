use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use fennec_config::Replication;

use crate::backend::executor::Executor;
use crate::backend::replicator::Replica;
use crate::net::messages::replication::logical::string::escape;
use crate::schema::Row;

use super::decode::column_value;
use super::error::Error;
use super::watermark::{Lsn, Watermark};

/// Copy the full contents of every published table into a fresh replica.
///
/// Creates the replication slot first so the copied snapshot and the
/// stream position agree, partitions large tables by row count, and
/// records the replica in the shard's `replicas` table (idempotently, so
/// a retried sync does not double-insert).
pub async fn initial_sync(
    executor: &dyn Executor,
    config: &Replication,
    replica: &Replica,
    slot: &str,
) -> Result<Watermark, Error> {
    let created = executor
        .fetch_all(&format!(
            "SELECT lsn FROM pg_create_logical_replication_slot('{}', 'pgoutput')",
            escape(slot, '\'')
        ))
        .await?;
    let lsn: Lsn = created
        .first()
        .and_then(|row| row.first())
        .and_then(|v| v.as_deref())
        .ok_or_else(|| Error::SlotMissing(slot.to_string()))?
        .parse()?;
    let watermark = Watermark::from_lsn(lsn);

    let publications = config
        .publications
        .iter()
        .map(|p| format!("'{}'", escape(p, '\'')))
        .collect::<Vec<_>>()
        .join(", ");
    let tables = executor
        .fetch_all(&format!(
            "SELECT schemaname, tablename FROM pg_publication_tables \
             WHERE pubname IN ({publications}) ORDER BY tablename"
        ))
        .await?;

    for row in &tables {
        let schema = text(row, 0).to_string();
        let table = text(row, 1).to_string();
        copy_table(executor, config, replica, &schema, &table).await?;
    }

    replica.begin()?;
    replica.commit(&watermark)?;

    let shard = config.shard_schema();
    executor
        .execute(&format!(
            r#"INSERT INTO "{shard}"."replicas" ("slot", "version", "initialSchema") VALUES ('{}', '{}', '{{}}') ON CONFLICT ("slot") DO NOTHING"#,
            escape(slot, '\''),
            watermark
        ))
        .await?;

    prune_replicas(executor, config).await?;

    info!("initial sync complete at {}", watermark);
    Ok(watermark)
}

async fn copy_table(
    executor: &dyn Executor,
    config: &Replication,
    replica: &Replica,
    schema: &str,
    table: &str,
) -> Result<(), Error> {
    let qualified = format!(r#""{}"."{}""#, escape(schema, '"'), escape(table, '"'));

    // Column names, types and key membership in one scan.
    let columns = executor
        .fetch_all(&format!(
            "SELECT a.attname, a.atttypid, COALESCE(i.indisprimary, false) \
             FROM pg_attribute a \
             LEFT JOIN pg_index i ON i.indrelid = a.attrelid AND a.attnum = ANY(i.indkey) \
                  AND i.indisprimary \
             WHERE a.attrelid = '{qualified}'::regclass AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum"
        ))
        .await?;

    let specs: Vec<(String, i32, bool)> = columns
        .iter()
        .map(|row| {
            (
                text(row, 0).to_string(),
                text(row, 1).parse().unwrap_or(25),
                text(row, 2) == "t",
            )
        })
        .collect();
    let primary_key: Vec<String> = specs
        .iter()
        .filter(|(_, _, key)| *key)
        .map(|(name, _, _)| name.clone())
        .collect();
    if primary_key.is_empty() {
        return Err(Error::UnsupportedTableSchema {
            table: format!("{schema}.{table}"),
            reason: "no primary key".into(),
        });
    }

    replica.ensure_table(table, &primary_key)?;

    let count: u64 = executor
        .fetch_all(&format!("SELECT count(*) FROM {qualified}"))
        .await?
        .first()
        .and_then(|row| row.first())
        .and_then(|v| v.as_deref())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    // Large tables copy in row-count partitions across parallel workers;
    // small ones are a single part.
    let partition_rows = config.copy_partition_rows.max(1);
    let partitions = count.div_ceil(partition_rows).max(1);

    let select_list = specs
        .iter()
        .map(|(name, _, _)| format!(r#""{}"::text"#, escape(name, '"')))
        .collect::<Vec<_>>()
        .join(", ");
    let order_by = primary_key
        .iter()
        .map(|name| format!(r#""{}""#, escape(name, '"')))
        .collect::<Vec<_>>()
        .join(", ");

    let copied: Vec<Result<u64, Error>> = stream::iter(0..partitions)
        .map(|partition| {
            let sql = format!(
                "SELECT {select_list} FROM {qualified} ORDER BY {order_by} \
                 LIMIT {partition_rows} OFFSET {}",
                partition * partition_rows
            );
            let specs = specs.clone();
            async move {
                let rows = executor.fetch_all(&sql).await?;
                let mut copied = 0;
                for row in rows {
                    let mut out = Row::new();
                    for (index, (name, oid, _)) in specs.iter().enumerate() {
                        let value = match row.get(index).and_then(|v| v.as_deref()) {
                            Some(text) => column_value(*oid, text),
                            None => fennec_postgres_types::Value::Null,
                        };
                        out.insert(name.clone(), value);
                    }
                    replica.upsert(table, &out)?;
                    copied += 1;
                }
                Ok(copied)
            }
        })
        .buffer_unordered(config.table_copy_workers.max(1))
        .collect()
        .await;

    let mut total = 0;
    for result in copied {
        total += result?;
    }
    info!(
        "copied {} rows into \"{}\" ({} partitions)",
        total, table, partitions
    );
    Ok(())
}

/// Keep at most the two newest replicas. Once a third syncs, the oldest
/// slot and its bookkeeping row are dropped, which is what lets a resync
/// proceed without disrupting the live stream.
pub async fn prune_replicas(executor: &dyn Executor, config: &Replication) -> Result<(), Error> {
    let shard = config.shard_schema();
    let rows = executor
        .fetch_all(&format!(
            r#"SELECT "slot" FROM "{shard}"."replicas" ORDER BY "version""#
        ))
        .await?;

    if rows.len() < 3 {
        return Ok(());
    }

    for row in &rows[..rows.len() - 2] {
        let slot = text(row, 0);
        warn!("dropping superseded replica slot \"{}\"", slot);
        executor
            .execute(&format!(
                "SELECT pg_drop_replication_slot('{}')",
                escape(slot, '\'')
            ))
            .await?;
        executor
            .execute(&format!(
                r#"DELETE FROM "{shard}"."replicas" WHERE "slot" = '{}'"#,
                escape(slot, '\'')
            ))
            .await?;
    }

    Ok(())
}

fn text<'a>(row: &'a [Option<String>], index: usize) -> &'a str {
    row.get(index).and_then(|v| v.as_deref()).unwrap_or("")
}
