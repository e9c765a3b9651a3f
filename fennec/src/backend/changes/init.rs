use tracing::{info, warn};

use fennec_config::Replication;

use crate::backend::executor::{Executor, ExecutorError};

use super::error::Error;

/// Idempotent shard setup: internal schemas, metadata tables, the metadata
/// publication, and (best-effort) the DDL event triggers.
///
/// Returns whether DDL detection is active. Event triggers need superuser;
/// without it the change source falls back to drift detection and a warn.
pub async fn setup_shard(executor: &dyn Executor, config: &Replication) -> Result<bool, Error> {
    let app = &config.app_id;
    let shard = config.shard_schema();

    let statements = [
        format!(r#"CREATE SCHEMA IF NOT EXISTS "{app}""#),
        format!(r#"CREATE SCHEMA IF NOT EXISTS "{shard}""#),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{app}"."schemaVersions" (
                "minSupportedVersion" INT,
                "maxSupportedVersion" INT,
                "lock" BOOL PRIMARY KEY DEFAULT true CHECK (lock)
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{app}"."permissions" (
                "permissions" JSONB,
                "hash" TEXT,
                "lock" BOOL PRIMARY KEY DEFAULT true CHECK (lock)
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{shard}"."clients" (
                "clientGroupID" TEXT NOT NULL,
                "clientID" TEXT NOT NULL,
                "lastMutationID" BIGINT NOT NULL,
                "userID" TEXT,
                PRIMARY KEY ("clientGroupID", "clientID")
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{shard}"."mutations" (
                "clientGroupID" TEXT NOT NULL,
                "clientID" TEXT NOT NULL,
                "mutationID" BIGINT NOT NULL,
                "result" JSONB NOT NULL,
                PRIMARY KEY ("clientGroupID", "clientID", "mutationID")
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{shard}"."shardConfig" (
                "publications" TEXT[] NOT NULL,
                "ddlDetection" BOOL NOT NULL,
                "initialSchema" JSONB,
                "lock" BOOL PRIMARY KEY DEFAULT true CHECK (lock)
            )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS "{shard}"."replicas" (
                "slot" TEXT PRIMARY KEY,
                "version" TEXT NOT NULL,
                "initialSchema" JSONB
            )"#
        ),
    ];

    for statement in &statements {
        executor.execute(statement).await?;
    }

    // The metadata publication ships this shard's clients table to the
    // change stream so client bookkeeping rides the same WAL.
    let metadata_publication = format!("_{app}_metadata_{}", config.shard_num);
    let existing = executor
        .fetch_all(&format!(
            "SELECT pubname FROM pg_publication WHERE pubname = '{metadata_publication}'"
        ))
        .await?;
    if existing.is_empty() {
        executor
            .execute(&format!(
                r#"CREATE PUBLICATION "{metadata_publication}" FOR TABLES IN SCHEMA "{shard}""#
            ))
            .await?;
    }

    let ddl_detection = match create_event_triggers(executor, config).await {
        Ok(()) => true,
        Err(Error::Executor(ExecutorError::PermissionDenied(_))) => {
            warn!(
                "cannot create event triggers (not superuser); schema changes will require resync"
            );
            false
        }
        Err(err) => return Err(err),
    };

    info!("shard \"{}\" ready", shard);
    Ok(ddl_detection)
}

/// Event triggers that embed DDL events into the WAL via
/// `pg_logical_emit_message`, so schema changes arrive in commit order.
async fn create_event_triggers(
    executor: &dyn Executor,
    config: &Replication,
) -> Result<(), Error> {
    let app = &config.app_id;
    let prefix = format!("{app}.ddl");

    executor
        .execute(&format!(
            r#"CREATE OR REPLACE FUNCTION "{app}".emit_ddl_event() RETURNS event_trigger AS $$
DECLARE
    rec record;
BEGIN
    FOR rec IN SELECT * FROM pg_event_trigger_ddl_commands() LOOP
        PERFORM pg_logical_emit_message(
            true,
            '{prefix}',
            json_build_object(
                'tag', rec.command_tag,
                'objectType', rec.object_type,
                'objectIdentity', rec.object_identity
            )::text
        );
    END LOOP;
END;
$$ LANGUAGE plpgsql"#
        ))
        .await?;

    let trigger = format!("_{app}_ddl_{}", config.shard_num);
    let existing = executor
        .fetch_all(&format!(
            "SELECT evtname FROM pg_event_trigger WHERE evtname = '{trigger}'"
        ))
        .await?;
    if existing.is_empty() {
        executor
            .execute(&format!(
                r#"CREATE EVENT TRIGGER "{trigger}" ON ddl_command_end
                   EXECUTE FUNCTION "{app}".emit_ddl_event()"#
            ))
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::executor::testing::ScriptedExecutor;

    #[tokio::test]
    async fn test_setup_creates_shard_objects() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![]); // metadata publication missing
        executor.push_rows(vec![]); // event trigger missing

        let config = Replication::default();
        let ddl = setup_shard(&executor, &config).await.unwrap();
        assert!(ddl);

        let executed = executor.executed();
        assert!(executed.iter().any(|sql| sql.contains(r#""fennec_0"."clients""#)));
        assert!(executed.iter().any(|sql| sql.contains(r#""fennec_0"."replicas""#)));
        assert!(executed
            .iter()
            .any(|sql| sql.contains(r#"CREATE PUBLICATION "_fennec_metadata_0""#)));
        assert!(executed
            .iter()
            .any(|sql| sql.contains("CREATE EVENT TRIGGER")));
    }

    #[tokio::test]
    async fn test_setup_idempotent_when_objects_exist() {
        let executor = ScriptedExecutor::new();
        executor.push_rows(vec![vec![Some("_fennec_metadata_0".into())]]);
        executor.push_rows(vec![vec![Some("_fennec_ddl_0".into())]]);

        setup_shard(&executor, &Replication::default()).await.unwrap();

        let executed = executor.executed();
        assert!(!executed
            .iter()
            .any(|sql| sql.contains("CREATE PUBLICATION")));
        assert!(!executed
            .iter()
            .any(|sql| sql.contains("CREATE EVENT TRIGGER")));
    }
}
