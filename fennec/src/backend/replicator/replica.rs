use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::backend::changes::ddl::DdlEvent;
use crate::backend::changes::{Error, Watermark};
use crate::schema::{encode_row_key, Row};

use fennec_postgres_types::Value;

/// The on-disk replica. Each table stores rows as `(key, data)` with the
/// primary-key encoding as key and the row as JSON, which is all the view
/// syncer needs to rebuild pipelines.
///
/// The watermark row commits in the same transaction as the data it
/// covers, so a crash can never leave the two out of step.
#[derive(Clone)]
pub struct Replica {
    conn: Arc<Mutex<Connection>>,
}

const STATE_TABLE: &str = "_fennec_replication_state";
const TABLES_TABLE: &str = "_fennec_tables";

impl Replica {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(sqlite_err)?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(sqlite_err)?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{STATE_TABLE}" (
                lock INTEGER PRIMARY KEY CHECK (lock = 1),
                watermark TEXT NOT NULL
            );
            INSERT OR IGNORE INTO "{STATE_TABLE}" (lock, watermark) VALUES (1, '{min}');
            CREATE TABLE IF NOT EXISTS "{TABLES_TABLE}" (
                name TEXT PRIMARY KEY,
                pk TEXT NOT NULL
            );
            "#,
            min = Watermark::MIN,
        ))
        .map_err(sqlite_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn watermark(&self) -> Result<Watermark, Error> {
        let conn = self.conn.lock();
        let watermark: String = conn
            .query_row(
                &format!(r#"SELECT watermark FROM "{STATE_TABLE}""#),
                [],
                |row| row.get(0),
            )
            .map_err(sqlite_err)?;
        watermark.parse()
    }

    pub fn begin(&self) -> Result<(), Error> {
        self.conn
            .lock()
            .execute_batch("BEGIN")
            .map_err(sqlite_err)
    }

    /// Commit the open transaction together with its watermark.
    pub fn commit(&self, watermark: &Watermark) -> Result<(), Error> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(r#"UPDATE "{STATE_TABLE}" SET watermark = ?1"#),
            [watermark.as_str()],
        )
        .map_err(sqlite_err)?;
        conn.execute_batch("COMMIT").map_err(sqlite_err)
    }

    pub fn rollback(&self) -> Result<(), Error> {
        self.conn
            .lock()
            .execute_batch("ROLLBACK")
            .map_err(sqlite_err)
    }

    /// Register a table and create its storage. Idempotent.
    pub fn ensure_table(&self, name: &str, primary_key: &[String]) -> Result<(), Error> {
        validate_name(name)?;
        let conn = self.conn.lock();
        conn.execute(
            &format!(r#"INSERT OR IGNORE INTO "{TABLES_TABLE}" (name, pk) VALUES (?1, ?2)"#),
            rusqlite::params![name, serde_json::to_string(primary_key)?],
        )
        .map_err(sqlite_err)?;
        conn.execute_batch(&format!(
            r#"CREATE TABLE IF NOT EXISTS "t_{name}" (key TEXT PRIMARY KEY, data TEXT NOT NULL)"#
        ))
        .map_err(sqlite_err)?;
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<(), Error> {
        validate_name(name)?;
        let conn = self.conn.lock();
        conn.execute(
            &format!(r#"DELETE FROM "{TABLES_TABLE}" WHERE name = ?1"#),
            [name],
        )
        .map_err(sqlite_err)?;
        conn.execute_batch(&format!(r#"DROP TABLE IF EXISTS "t_{name}""#))
            .map_err(sqlite_err)
    }

    pub fn tables(&self) -> Result<Vec<(String, Vec<String>)>, Error> {
        let conn = self.conn.lock();
        let mut statement = conn
            .prepare(&format!(r#"SELECT name, pk FROM "{TABLES_TABLE}" ORDER BY name"#))
            .map_err(sqlite_err)?;
        let rows = statement
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(sqlite_err)?;

        let mut tables = vec![];
        for row in rows {
            let (name, pk) = row.map_err(sqlite_err)?;
            tables.push((name, serde_json::from_str(&pk)?));
        }
        Ok(tables)
    }

    fn primary_key(&self, table: &str) -> Result<Vec<String>, Error> {
        let conn = self.conn.lock();
        let pk: String = conn
            .query_row(
                &format!(r#"SELECT pk FROM "{TABLES_TABLE}" WHERE name = ?1"#),
                [table],
                |row| row.get(0),
            )
            .map_err(|_| Error::Replica(format!("unknown replica table \"{table}\"")))?;
        Ok(serde_json::from_str(&pk)?)
    }

    fn key_of(&self, table: &str, row: &Row) -> Result<String, Error> {
        let pk = self.primary_key(table)?;
        let values: Vec<&Value> = pk
            .iter()
            .map(|k| row.get(k).unwrap_or(&Value::Null))
            .collect();
        Ok(encode_row_key(&values))
    }

    pub fn upsert(&self, table: &str, row: &Row) -> Result<(), Error> {
        validate_name(table)?;
        let key = self.key_of(table, row)?;
        let data = serde_json::to_string(row)?;
        self.conn
            .lock()
            .execute(
                &format!(r#"INSERT OR REPLACE INTO "t_{table}" (key, data) VALUES (?1, ?2)"#),
                rusqlite::params![key, data],
            )
            .map_err(sqlite_err)?;
        Ok(())
    }

    pub fn delete(&self, table: &str, key_row: &Row) -> Result<(), Error> {
        validate_name(table)?;
        let key = self.key_of(table, key_row)?;
        self.conn
            .lock()
            .execute(
                &format!(r#"DELETE FROM "t_{table}" WHERE key = ?1"#),
                [key],
            )
            .map_err(sqlite_err)?;
        Ok(())
    }

    pub fn truncate(&self, table: &str) -> Result<(), Error> {
        validate_name(table)?;
        self.conn
            .lock()
            .execute(&format!(r#"DELETE FROM "t_{table}""#), [])
            .map_err(sqlite_err)?;
        Ok(())
    }

    /// All rows of a table, in key order.
    pub fn scan(&self, table: &str) -> Result<Vec<Row>, Error> {
        validate_name(table)?;
        let conn = self.conn.lock();
        let mut statement = conn
            .prepare(&format!(r#"SELECT data FROM "t_{table}" ORDER BY key"#))
            .map_err(sqlite_err)?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sqlite_err)?;

        let mut out = vec![];
        for data in rows {
            out.push(serde_json::from_str(&data.map_err(sqlite_err)?)?);
        }
        Ok(out)
    }

    pub fn apply_ddl(&self, event: &DdlEvent) -> Result<(), Error> {
        if !event.supported() {
            return Err(Error::UnsupportedSchemaChange(event.tag.clone()));
        }

        match event.tag.as_str() {
            "CREATE TABLE" => {
                let Some(table) = event.table_name() else {
                    return Ok(());
                };
                let pk = match &event.columns {
                    Some(columns) => {
                        let pk: Vec<String> = columns
                            .iter()
                            .filter(|c| c.primary_key)
                            .map(|c| c.name.clone())
                            .collect();
                        if pk.is_empty() {
                            vec!["id".to_string()]
                        } else {
                            pk
                        }
                    }
                    // The trigger payload carries no column list; assume
                    // the conventional key until the first relation
                    // message refreshes it.
                    None => vec!["id".to_string()],
                };
                info!("replica: creating table \"{}\"", table);
                self.ensure_table(table, &pk)
            }
            "DROP TABLE" => {
                if let Some(table) = event.table_name() {
                    info!("replica: dropping table \"{}\"", table);
                    self.drop_table(table)?;
                }
                Ok(())
            }
            other => {
                // Index and publication changes don't alter stored rows.
                warn!("replica: ignoring ddl \"{}\"", other);
                Ok(())
            }
        }
    }
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::Replica(format!("bad table name \"{name}\"")));
    }
    Ok(())
}

fn sqlite_err(err: rusqlite::Error) -> Error {
    Error::Replica(err.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(id: &str) -> Row {
        Row::from([("id".to_string(), Value::String(id.into()))])
    }

    #[test]
    fn test_watermark_transactional_with_data() {
        let replica = Replica::open_in_memory().unwrap();
        replica.ensure_table("issue", &["id".to_string()]).unwrap();
        assert_eq!(replica.watermark().unwrap(), Watermark::min());

        replica.begin().unwrap();
        replica.upsert("issue", &row("a")).unwrap();
        replica.rollback().unwrap();

        // Rolled back: neither data nor watermark moved.
        assert!(replica.scan("issue").unwrap().is_empty());
        assert_eq!(replica.watermark().unwrap(), Watermark::min());

        let watermark: Watermark = "00000000000000ff".parse().unwrap();
        replica.begin().unwrap();
        replica.upsert("issue", &row("a")).unwrap();
        replica.commit(&watermark).unwrap();

        assert_eq!(replica.scan("issue").unwrap().len(), 1);
        assert_eq!(replica.watermark().unwrap(), watermark);
    }

    #[test]
    fn test_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");

        {
            let replica = Replica::open(&path).unwrap();
            replica.ensure_table("issue", &["id".to_string()]).unwrap();
            replica.upsert("issue", &row("a")).unwrap();
        }

        let replica = Replica::open(&path).unwrap();
        assert_eq!(replica.scan("issue").unwrap().len(), 1);
        assert_eq!(
            replica.tables().unwrap(),
            vec![("issue".to_string(), vec!["id".to_string()])]
        );
    }

    #[test]
    fn test_composite_key() {
        let replica = Replica::open_in_memory().unwrap();
        replica
            .ensure_table("edge", &["src".to_string(), "dst".to_string()])
            .unwrap();

        let edge = Row::from([
            ("src".to_string(), Value::String("a".into())),
            ("dst".to_string(), Value::String("b".into())),
        ]);
        replica.upsert("edge", &edge).unwrap();
        replica.delete("edge", &edge).unwrap();
        assert!(replica.scan("edge").unwrap().is_empty());
    }

    #[test]
    fn test_bad_table_name_rejected() {
        let replica = Replica::open_in_memory().unwrap();
        assert!(replica.ensure_table("nope; drop", &[]).is_err());
    }
}
