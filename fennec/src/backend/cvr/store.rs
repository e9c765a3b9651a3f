use std::collections::BTreeMap;

use crate::backend::changes::Watermark;
use crate::backend::executor::Executor;
use crate::net::messages::replication::logical::string::escape;

use super::Error;

/// One client group's view record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cvr {
    pub client_group_id: String,
    /// Cookie of the last poke; also the row-version high water mark.
    pub version: String,
    /// Epoch milliseconds of the last contact.
    pub last_active: i64,
    pub desired: BTreeMap<String, QueryRecord>,
    pub got: BTreeMap<String, QueryRecord>,
    /// Row key → content hash of what the client holds.
    pub rows: BTreeMap<String, String>,
    pub lmids: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub hash: String,
    /// Serialized query: the AST for legacy queries, `{name,args}` for
    /// custom ones.
    pub spec: serde_json::Value,
    pub ttl: u64,
}

/// SQL persistence for CVRs through the upstream executor.
///
/// Loads take `FOR UPDATE` on the instance row, which is what keeps the
/// purger (`FOR UPDATE SKIP LOCKED`) off client groups that are mid-sync.
pub struct CvrStore {
    schema: String,
    shard_schema: String,
}

impl CvrStore {
    pub fn new(shard_schema: &str) -> Self {
        Self {
            schema: format!("{shard_schema}_cvr"),
            shard_schema: shard_schema.to_string(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Idempotent table setup.
    pub async fn setup(&self, executor: &dyn Executor) -> Result<(), Error> {
        let schema = &self.schema;
        let statements = [
            format!(r#"CREATE SCHEMA IF NOT EXISTS "{schema}""#),
            format!(
                r#"CREATE TABLE IF NOT EXISTS "{schema}"."instances" (
                    "clientGroupID" TEXT PRIMARY KEY,
                    "version" TEXT NOT NULL,
                    "lastActive" BIGINT NOT NULL
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS "{schema}"."queries" (
                    "clientGroupID" TEXT NOT NULL REFERENCES "{schema}"."instances" ("clientGroupID") ON DELETE CASCADE,
                    "hash" TEXT NOT NULL,
                    "spec" JSONB NOT NULL,
                    "ttl" BIGINT NOT NULL,
                    "got" BOOL NOT NULL DEFAULT false,
                    PRIMARY KEY ("clientGroupID", "hash")
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS "{schema}"."rowsVersion" (
                    "clientGroupID" TEXT NOT NULL REFERENCES "{schema}"."instances" ("clientGroupID") ON DELETE CASCADE,
                    "rowKey" TEXT NOT NULL,
                    "rowVersion" TEXT NOT NULL,
                    PRIMARY KEY ("clientGroupID", "rowKey")
                )"#
            ),
        ];

        for statement in &statements {
            executor.execute(statement).await?;
        }
        Ok(())
    }

    /// Load a CVR, locking its instance row for the duration of the
    /// caller's transaction. A missing CVR is created on first contact.
    pub async fn load(
        &self,
        executor: &dyn Executor,
        client_group_id: &str,
        now_ms: i64,
    ) -> Result<Cvr, Error> {
        let schema = &self.schema;
        let group = escape(client_group_id, '\'');

        let instance = executor
            .fetch_all(&format!(
                r#"SELECT "version", "lastActive" FROM "{schema}"."instances" WHERE "clientGroupID" = '{group}' FOR UPDATE"#
            ))
            .await?;

        let mut cvr = Cvr {
            client_group_id: client_group_id.to_string(),
            version: Watermark::MIN.to_string(),
            last_active: now_ms,
            ..Default::default()
        };

        match instance.first() {
            Some(row) => {
                cvr.version = text(row, 0).to_string();
                cvr.last_active = text(row, 1).parse().unwrap_or(now_ms);
            }
            None => {
                executor
                    .execute(&format!(
                        r#"INSERT INTO "{schema}"."instances" ("clientGroupID", "version", "lastActive") VALUES ('{group}', '{}', {now_ms})"#,
                        Watermark::MIN
                    ))
                    .await?;
                return Ok(cvr);
            }
        }

        let queries = executor
            .fetch_all(&format!(
                r#"SELECT "hash", "spec", "ttl", "got" FROM "{schema}"."queries" WHERE "clientGroupID" = '{group}'"#
            ))
            .await?;
        for row in &queries {
            let record = QueryRecord {
                hash: text(row, 0).to_string(),
                spec: serde_json::from_str(text(row, 1)).unwrap_or(serde_json::Value::Null),
                ttl: text(row, 2).parse().unwrap_or(0),
            };
            if text(row, 3) == "t" {
                cvr.got.insert(record.hash.clone(), record.clone());
            }
            cvr.desired.insert(record.hash.clone(), record);
        }

        let rows = executor
            .fetch_all(&format!(
                r#"SELECT "rowKey", "rowVersion" FROM "{schema}"."rowsVersion" WHERE "clientGroupID" = '{group}'"#
            ))
            .await?;
        for row in &rows {
            cvr.rows
                .insert(text(row, 0).to_string(), text(row, 1).to_string());
        }

        let lmids = executor
            .fetch_all(&format!(
                r#"SELECT "clientID", "lastMutationID" FROM "{shard}"."clients" WHERE "clientGroupID" = '{group}'"#,
                shard = self.shard_schema
            ))
            .await?;
        for row in &lmids {
            cvr.lmids
                .insert(text(row, 0).to_string(), text(row, 1).parse().unwrap_or(0));
        }

        Ok(cvr)
    }

    /// Persist the differences between `old` and `new`. The instance row
    /// is written unconditionally, touching `lastActive`.
    pub async fn save(
        &self,
        executor: &dyn Executor,
        old: &Cvr,
        new: &Cvr,
    ) -> Result<(), Error> {
        let schema = &self.schema;
        let group = escape(&new.client_group_id, '\'');

        executor
            .execute(&format!(
                r#"UPDATE "{schema}"."instances" SET "version" = '{}', "lastActive" = {} WHERE "clientGroupID" = '{group}'"#,
                escape(&new.version, '\''),
                new.last_active
            ))
            .await?;

        for (hash, record) in &new.desired {
            let got = new.got.contains_key(hash);
            let unchanged = old.desired.get(hash) == Some(record)
                && old.got.contains_key(hash) == got;
            if unchanged {
                continue;
            }
            executor
                .execute(&format!(
                    r#"INSERT INTO "{schema}"."queries" ("clientGroupID", "hash", "spec", "ttl", "got") VALUES ('{group}', '{}', '{}', {}, {}) ON CONFLICT ("clientGroupID", "hash") DO UPDATE SET "spec" = EXCLUDED."spec", "ttl" = EXCLUDED."ttl", "got" = EXCLUDED."got""#,
                    escape(&record.hash, '\''),
                    escape(&record.spec.to_string(), '\''),
                    record.ttl,
                    got
                ))
                .await?;
        }
        for hash in old.desired.keys() {
            if !new.desired.contains_key(hash) {
                executor
                    .execute(&format!(
                        r#"DELETE FROM "{schema}"."queries" WHERE "clientGroupID" = '{group}' AND "hash" = '{}'"#,
                        escape(hash, '\'')
                    ))
                    .await?;
            }
        }

        for (key, version) in &new.rows {
            if old.rows.get(key) == Some(version) {
                continue;
            }
            executor
                .execute(&format!(
                    r#"INSERT INTO "{schema}"."rowsVersion" ("clientGroupID", "rowKey", "rowVersion") VALUES ('{group}', '{}', '{}') ON CONFLICT ("clientGroupID", "rowKey") DO UPDATE SET "rowVersion" = EXCLUDED."rowVersion""#,
                    escape(key, '\''),
                    escape(version, '\'')
                ))
                .await?;
        }
        for key in old.rows.keys() {
            if !new.rows.contains_key(key) {
                executor
                    .execute(&format!(
                        r#"DELETE FROM "{schema}"."rowsVersion" WHERE "clientGroupID" = '{group}' AND "rowKey" = '{}'"#,
                        escape(key, '\'')
                    ))
                    .await?;
            }
        }

        Ok(())
    }
}

fn text<'a>(row: &'a [Option<String>], index: usize) -> &'a str {
    row.get(index).and_then(|v| v.as_deref()).unwrap_or("")
}
