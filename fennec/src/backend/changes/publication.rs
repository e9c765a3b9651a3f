use std::time::Duration;

use tracing::{info, warn};

use crate::backend::executor::Executor;
use crate::net::messages::replication::logical::string::escape;

use super::error::Error;

/// Column name reserved for replica row versioning; upstream tables must
/// not use it.
pub const RESERVED_VERSION_COLUMN: &str = "_0_version";

/// How long to poll for a REPLICA IDENTITY change to become visible.
const IDENTITY_POLL_TIMEOUT: Duration = Duration::from_secs(2);
const IDENTITY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Validate the configured publications and the tables they publish.
///
/// Every publication must publish insert, update, delete and truncate;
/// every published table needs a replica identity that carries its primary
/// key, selecting a suitable unique index where necessary.
pub async fn validate_publications(
    executor: &dyn Executor,
    publications: &[String],
) -> Result<(), Error> {
    if publications.is_empty() {
        return Err(Error::BadPublication {
            publication: String::new(),
            reason: "no publications configured".into(),
        });
    }

    let list = quoted_list(publications);
    let rows = executor
        .fetch_all(&format!(
            "SELECT pubname, pubinsert, pubupdate, pubdelete, pubtruncate \
             FROM pg_publication WHERE pubname IN ({list})"
        ))
        .await?;

    let mut seen = vec![];
    for row in &rows {
        let name = text(row, 0);
        seen.push(name.to_string());
        for (index, operation) in ["insert", "update", "delete", "truncate"]
            .iter()
            .enumerate()
        {
            if text(row, index + 1) != "t" {
                return Err(Error::BadPublication {
                    publication: name.to_string(),
                    reason: format!("does not publish {operation}"),
                });
            }
        }
    }

    for publication in publications {
        if !seen.contains(publication) {
            return Err(Error::BadPublication {
                publication: publication.clone(),
                reason: "does not exist upstream".into(),
            });
        }
    }

    let tables = executor
        .fetch_all(&format!(
            "SELECT schemaname, tablename FROM pg_publication_tables WHERE pubname IN ({list})"
        ))
        .await?;

    for row in &tables {
        let schema = text(row, 0);
        let table = text(row, 1);
        validate_table(executor, schema, table).await?;
    }

    Ok(())
}

async fn validate_table(executor: &dyn Executor, schema: &str, table: &str) -> Result<(), Error> {
    for identifier in [schema, table] {
        if !valid_identifier(identifier) {
            return Err(Error::UnsupportedTableSchema {
                table: format!("{schema}.{table}"),
                reason: format!("identifier \"{identifier}\" contains disallowed characters"),
            });
        }
    }

    let qualified = format!(r#""{}"."{}""#, escape(schema, '"'), escape(table, '"'));

    let columns = executor
        .fetch_all(&format!(
            "SELECT attname FROM pg_attribute \
             WHERE attrelid = '{qualified}'::regclass AND attnum > 0 AND NOT attisdropped"
        ))
        .await?;

    for row in &columns {
        let column = text(row, 0);
        if column == RESERVED_VERSION_COLUMN {
            return Err(Error::UnsupportedTableSchema {
                table: format!("{schema}.{table}"),
                reason: format!("column name \"{RESERVED_VERSION_COLUMN}\" is reserved"),
            });
        }
        if !valid_identifier(column) {
            return Err(Error::UnsupportedTableSchema {
                table: format!("{schema}.{table}"),
                reason: format!("column \"{column}\" contains disallowed characters"),
            });
        }
    }

    ensure_replica_identity(executor, schema, table, &qualified).await
}

/// The replica identity must carry the primary key. Tables with identity
/// NOTHING (or no primary key under DEFAULT) get a unique, non-deferrable,
/// non-partial index promoted with `REPLICA IDENTITY USING INDEX`.
async fn ensure_replica_identity(
    executor: &dyn Executor,
    schema: &str,
    table: &str,
    qualified: &str,
) -> Result<(), Error> {
    let identity = executor
        .fetch_all(&format!(
            "SELECT relreplident FROM pg_class WHERE oid = '{qualified}'::regclass"
        ))
        .await?;
    let identity = identity.first().map(|row| text(row, 0)).unwrap_or("n");

    let has_pk = !executor
        .fetch_all(&format!(
            "SELECT indexrelid FROM pg_index \
             WHERE indrelid = '{qualified}'::regclass AND indisprimary"
        ))
        .await?
        .is_empty();

    let ok = match identity {
        "f" => true,
        "d" => has_pk,
        "i" => true,
        _ => false,
    };
    if ok {
        return Ok(());
    }

    let candidates = executor
        .fetch_all(&format!(
            "SELECT c.relname FROM pg_index i JOIN pg_class c ON c.oid = i.indexrelid \
             WHERE i.indrelid = '{qualified}'::regclass \
               AND i.indisunique AND i.indimmediate AND i.indpred IS NULL \
               AND NOT EXISTS (\
                 SELECT 1 FROM pg_attribute a \
                 WHERE a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) AND NOT a.attnotnull)"
        ))
        .await?;

    let index = candidates
        .first()
        .map(|row| text(row, 0).to_string())
        .ok_or_else(|| Error::UnsupportedTableSchema {
            table: format!("{schema}.{table}"),
            reason: "no replica identity and no suitable unique index".into(),
        })?;

    info!(
        "selecting replica identity index \"{}\" for {}",
        index, qualified
    );
    executor
        .execute(&format!(
            r#"ALTER TABLE {qualified} REPLICA IDENTITY USING INDEX "{}""#,
            escape(&index, '"')
        ))
        .await?;

    // The change is observed through a fresh snapshot; poll briefly.
    let deadline = std::time::Instant::now() + IDENTITY_POLL_TIMEOUT;
    loop {
        let rows = executor
            .fetch_all(&format!(
                "SELECT relreplident FROM pg_class WHERE oid = '{qualified}'::regclass"
            ))
            .await?;
        if rows.first().map(|row| text(row, 0)) == Some("i") {
            return Ok(());
        }
        if std::time::Instant::now() >= deadline {
            warn!("replica identity change on {} not yet visible", qualified);
            return Ok(());
        }
        tokio::time::sleep(IDENTITY_POLL_INTERVAL).await;
    }
}

/// Upstream publications as seen right now; used for the auto-reset check.
pub async fn upstream_publications(executor: &dyn Executor) -> Result<Vec<String>, Error> {
    let rows = executor
        .fetch_all("SELECT pubname FROM pg_publication ORDER BY pubname")
        .await?;
    Ok(rows.iter().map(|row| text(row, 0).to_string()).collect())
}

fn valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && !identifier.starts_with(|c: char| c.is_ascii_digit())
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quoted_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("'{}'", escape(name, '\'')))
        .collect::<Vec<_>>()
        .join(", ")
}

fn text<'a>(row: &'a [Option<String>], index: usize) -> &'a str {
    row.get(index).and_then(|v| v.as_deref()).unwrap_or("")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::executor::testing::ScriptedExecutor;

    fn pub_row(name: &str, truncate: bool) -> Vec<Option<String>> {
        vec![
            Some(name.to_string()),
            Some("t".into()),
            Some("t".into()),
            Some("t".into()),
            Some(if truncate { "t" } else { "f" }.into()),
        ]
    }

    #[tokio::test]
    async fn test_missing_operation_rejected() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![pub_row("app_pub", false)]);

        let err = validate_publications(&executor, &["app_pub".to_string()])
            .await
            .unwrap_err();
        match err {
            Error::BadPublication { reason, .. } => assert!(reason.contains("truncate")),
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_publication_rejected() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![]);

        let err = validate_publications(&executor, &["app_pub".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadPublication { .. }));
    }

    #[tokio::test]
    async fn test_reserved_column_rejected() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![pub_row("app_pub", true)]);
        // One published table.
        executor.push_rows(vec![vec![Some("public".into()), Some("foo".into())]]);
        // Its columns include the reserved one.
        executor.push_rows(vec![
            vec![Some("id".into())],
            vec![Some(RESERVED_VERSION_COLUMN.to_string())],
        ]);

        let err = validate_publications(&executor, &["app_pub".to_string()])
            .await
            .unwrap_err();
        match err {
            Error::UnsupportedTableSchema { reason, .. } => {
                assert!(reason.contains("reserved"))
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_identity_index_selected() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![pub_row("app_pub", true)]);
        executor.push_rows(vec![vec![Some("public".into()), Some("foo".into())]]);
        executor.push_rows(vec![vec![Some("id".into())]]);
        // relreplident = n, no pk, one candidate index, then visible 'i'.
        executor.push_rows(vec![vec![Some("n".into())]]);
        executor.push_rows(vec![]);
        executor.push_rows(vec![vec![Some("foo_key".into())]]);
        executor.push_rows(vec![vec![Some("i".into())]]);

        validate_publications(&executor, &["app_pub".to_string()])
            .await
            .unwrap();

        let alters = executor.executed_matching("REPLICA IDENTITY USING INDEX");
        assert_eq!(alters.len(), 1);
        assert!(alters[0].contains("\"foo_key\""));
    }

    #[test]
    fn test_valid_identifier() {
        assert!(valid_identifier("issue_table2"));
        assert!(!valid_identifier("2fast"));
        assert!(!valid_identifier("has space"));
        assert!(!valid_identifier("quote\"d"));
        assert!(!valid_identifier(""));
    }
}
