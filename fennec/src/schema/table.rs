use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use fennec_postgres_types::Value;

use super::Error;

/// Logical column type, after PG types are folded down to what clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Json,
}

/// Client-side default generator, run when a mutation omits the column.
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Clone)]
pub struct ColumnSchema {
    pub name: String,
    /// Upstream column name, when it differs from the client name.
    pub server_name: Option<String>,
    pub value_type: ValueType,
    pub optional: bool,
    /// Generated upstream; the value is withheld from the server on insert.
    pub server_generated: bool,
    pub insert_default: Option<DefaultFn>,
    pub update_default: Option<DefaultFn>,
}

impl ColumnSchema {
    pub fn new(name: &str, value_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            server_name: None,
            value_type,
            optional: false,
            server_generated: false,
            insert_default: None,
            update_default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_server_name(mut self, server_name: &str) -> Self {
        self.server_name = Some(server_name.to_string());
        self
    }

    /// Name the upstream database knows this column by.
    pub fn upstream_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Debug for ColumnSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnSchema")
            .field("name", &self.name)
            .field("server_name", &self.server_name)
            .field("value_type", &self.value_type)
            .field("optional", &self.optional)
            .field("server_generated", &self.server_generated)
            .field("insert_default", &self.insert_default.is_some())
            .field("update_default", &self.update_default.is_some())
            .finish()
    }
}

impl PartialEq for ColumnSchema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.server_name == other.server_name
            && self.value_type == other.value_type
            && self.optional == other.optional
            && self.server_generated == other.server_generated
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    /// Upstream table name, when it differs from the client name.
    pub server_name: Option<String>,
    pub columns: Vec<ColumnSchema>,
    /// Non-empty primary key tuple, in key order.
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnSchema>, primary_key: &[&str]) -> Result<Self, Error> {
        if primary_key.is_empty() {
            return Err(Error::NoPrimaryKey(name.to_string()));
        }
        for key in primary_key {
            if !columns.iter().any(|c| c.name == *key) {
                return Err(Error::UnknownColumn(name.to_string(), key.to_string()));
            }
        }

        Ok(Self {
            name: name.to_string(),
            server_name: None,
            columns,
            primary_key: primary_key.iter().map(|k| k.to_string()).collect(),
        })
    }

    pub fn with_server_name(mut self, server_name: &str) -> Self {
        self.server_name = Some(server_name.to_string());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Name the upstream database knows this table by.
    pub fn upstream_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.name)
    }
}
