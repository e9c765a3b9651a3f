use std::collections::BTreeMap;

use fennec_postgres_types::Value;

use super::{Error, TableSchema};

/// A row: column name to value. BTreeMap keeps serialization stable.
pub type Row = BTreeMap<String, Value>;

/// Encode primary-key values into the key segment of a local-store key.
///
/// Segments are joined by `\u{0}`; any separator or escape byte inside a
/// string value is escaped first, so composite keys cannot collide.
pub fn encode_row_key(values: &[&Value]) -> String {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s
                .replace('\u{1}', "\u{1}\u{1}")
                .replace('\u{0}', "\u{1}\u{2}"),
            other => serde_json::to_string(other).unwrap_or_default(),
        })
        .collect::<Vec<_>>()
        .join("\u{0}")
}

/// Full local-store key for a row: `<table>/<pk-encoded>`.
pub fn row_key(table: &TableSchema, row: &Row) -> Result<String, Error> {
    let mut values = Vec::with_capacity(table.primary_key.len());

    for key in &table.primary_key {
        values.push(
            row.get(key)
                .ok_or_else(|| Error::MissingKeyColumn(table.name.clone(), key.clone()))?,
        );
    }

    Ok(format!("{}/{}", table.name, encode_row_key(&values)))
}

#[cfg(test)]
mod test {
    use super::super::{ColumnSchema, ValueType};
    use super::*;

    fn issue_table() -> TableSchema {
        TableSchema::new(
            "issue",
            vec![
                ColumnSchema::new("id", ValueType::String),
                ColumnSchema::new("num", ValueType::Number),
            ],
            &["id", "num"],
        )
        .unwrap()
    }

    #[test]
    fn test_row_key() {
        let table = issue_table();
        let row = Row::from([
            ("id".to_string(), Value::String("a".into())),
            ("num".to_string(), Value::Int(7)),
        ]);

        assert_eq!(row_key(&table, &row).unwrap(), "issue/a\u{0}7");
    }

    #[test]
    fn test_missing_key_column() {
        let table = issue_table();
        let row = Row::from([("id".to_string(), Value::String("a".into()))]);
        assert!(row_key(&table, &row).is_err());
    }

    #[test]
    fn test_composite_keys_cannot_collide() {
        let a = encode_row_key(&[&Value::String("x\u{0}".into()), &Value::String("y".into())]);
        let b = encode_row_key(&[&Value::String("x".into()), &Value::String("\u{0}y".into())]);
        assert_ne!(a, b);
    }
}
