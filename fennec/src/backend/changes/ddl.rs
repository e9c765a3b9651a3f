use serde::{Deserialize, Serialize};

/// A schema-change event captured by the DDL event triggers and shipped
/// through the WAL as a logical decoding message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DdlEvent {
    /// Command tag: `CREATE TABLE`, `ALTER TABLE`, `DROP INDEX`, ...
    pub tag: String,
    #[serde(default)]
    pub object_type: Option<String>,
    /// Schema-qualified identity, e.g. `public.issue`.
    #[serde(default)]
    pub object_identity: Option<String>,
    /// The new column list for table events, when the trigger captured it.
    #[serde(default)]
    pub columns: Option<Vec<DdlColumn>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DdlColumn {
    pub name: String,
    pub type_oid: i32,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl DdlEvent {
    /// Whether this event can be applied to the replica without a resync.
    pub fn supported(&self) -> bool {
        matches!(
            self.tag.as_str(),
            "CREATE TABLE"
                | "DROP TABLE"
                | "ALTER TABLE"
                | "CREATE INDEX"
                | "DROP INDEX"
                | "ALTER PUBLICATION"
        )
    }

    /// Bare table name from the qualified identity.
    pub fn table_name(&self) -> Option<&str> {
        self.object_identity
            .as_deref()
            .map(|identity| identity.rsplit('.').next().unwrap_or(identity))
    }
}
