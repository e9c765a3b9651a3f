use fnv::FnvHashMap as HashMap;

use super::{Row, TableSchema};

/// Bi-directional client ↔ server name translation.
///
/// Built once from the table schemas; tables and columns without a server
/// name pass through unchanged. Row translation maps keys only, never
/// values.
#[derive(Debug, Default, Clone)]
pub struct NameMapper {
    to_server: HashMap<String, TableNames>,
    to_client: HashMap<String, TableNames>,
}

#[derive(Debug, Clone, Default)]
struct TableNames {
    table: String,
    columns: HashMap<String, String>,
}

impl NameMapper {
    pub fn new(tables: &[TableSchema]) -> Self {
        let mut to_server = HashMap::default();
        let mut to_client = HashMap::default();

        for table in tables {
            let mut forward = TableNames {
                table: table.upstream_name().to_string(),
                columns: HashMap::default(),
            };
            let mut backward = TableNames {
                table: table.name.clone(),
                columns: HashMap::default(),
            };

            for column in &table.columns {
                forward
                    .columns
                    .insert(column.name.clone(), column.upstream_name().to_string());
                backward
                    .columns
                    .insert(column.upstream_name().to_string(), column.name.clone());
            }

            to_server.insert(table.name.clone(), forward);
            to_client.insert(table.upstream_name().to_string(), backward);
        }

        Self {
            to_server,
            to_client,
        }
    }

    pub fn table_to_server<'a>(&'a self, table: &'a str) -> &'a str {
        self.to_server
            .get(table)
            .map(|t| t.table.as_str())
            .unwrap_or(table)
    }

    pub fn table_to_client<'a>(&'a self, table: &'a str) -> &'a str {
        self.to_client
            .get(table)
            .map(|t| t.table.as_str())
            .unwrap_or(table)
    }

    pub fn column_to_server<'a>(&'a self, table: &str, column: &'a str) -> &'a str {
        self.to_server
            .get(table)
            .and_then(|t| t.columns.get(column))
            .map(|c| c.as_str())
            .unwrap_or(column)
    }

    pub fn column_to_client<'a>(&'a self, server_table: &str, column: &'a str) -> &'a str {
        self.to_client
            .get(server_table)
            .and_then(|t| t.columns.get(column))
            .map(|c| c.as_str())
            .unwrap_or(column)
    }

    /// Translate a row's column names from server to client space.
    pub fn row_to_client(&self, server_table: &str, row: Row) -> Row {
        match self.to_client.get(server_table) {
            Some(names) => row
                .into_iter()
                .map(|(column, value)| {
                    let column = names.columns.get(&column).cloned().unwrap_or(column);
                    (column, value)
                })
                .collect(),
            None => row,
        }
    }

    /// Translate a row's column names from client to server space.
    pub fn row_to_server(&self, client_table: &str, row: Row) -> Row {
        match self.to_server.get(client_table) {
            Some(names) => row
                .into_iter()
                .map(|(column, value)| {
                    let column = names.columns.get(&column).cloned().unwrap_or(column);
                    (column, value)
                })
                .collect(),
            None => row,
        }
    }
}
