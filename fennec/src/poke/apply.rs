use std::collections::BTreeMap;

use crate::mutations::MutationTracker;
use crate::net::sync::{MutationPatchOp, MutationResponse, PokePart, QueriesPatchOp, RowPatchOp};
use crate::schema::{row_key, NameMapper, Row, TableSchema};
use crate::store::{self, Store, WriteBatch};

use super::Error;

/// Translate merged poke parts into one atomic store write, then notify
/// the mutation tracker. Row values arrive in server name space and are
/// mapped before they touch the store.
pub fn apply_poke(
    client_id: &str,
    parts: &[PokePart],
    store: &Store,
    tracker: &MutationTracker,
    mapper: &NameMapper,
    tables: &BTreeMap<String, TableSchema>,
) -> Result<(), Error> {
    let mut batch = WriteBatch::new();
    // Rows written earlier in this merged patch, so updates see them.
    let mut overlay: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    let mut mutation_responses: Vec<MutationResponse> = vec![];
    let mut final_lmid: Option<u64> = None;

    for part in parts {
        if let Some(changes) = &part.last_mutation_id_changes {
            if let Some(lmid) = changes.get(client_id) {
                final_lmid = Some(*lmid);
            }
        }

        if let Some(patches) = &part.desired_queries_patches {
            for (patch_client, ops) in patches {
                for op in ops {
                    match op {
                        QueriesPatchOp::Put { hash, .. } => {
                            let value = serde_json::to_value(op).unwrap_or_default();
                            batch.set(store::desired_key(patch_client, hash), value);
                        }
                        QueriesPatchOp::Del { hash } => {
                            batch.del(store::desired_key(patch_client, hash));
                        }
                    }
                }
            }
        }

        if let Some(ops) = &part.got_queries_patch {
            for op in ops {
                match op {
                    QueriesPatchOp::Put { hash, .. } => {
                        batch.set(store::got_key(hash), serde_json::Value::Bool(true));
                    }
                    QueriesPatchOp::Del { hash } => {
                        batch.del(store::got_key(hash));
                    }
                }
            }
        }

        if let Some(ops) = &part.rows_patch {
            for op in ops {
                apply_row_op(op, store, mapper, tables, &mut batch, &mut overlay)?;
            }
        }

        if let Some(ops) = &part.mutations_patch {
            for op in ops {
                match op {
                    MutationPatchOp::Put { mutation } => {
                        let value = serde_json::to_value(mutation).unwrap_or_default();
                        batch.set(
                            store::mutation_key(&mutation.id.client_id, mutation.id.id),
                            value,
                        );
                        if mutation.id.client_id == client_id {
                            mutation_responses.push(mutation.clone());
                        }
                    }
                    MutationPatchOp::Del { id } => {
                        batch.del(store::mutation_key(&id.client_id, id.id));
                    }
                }
            }
        }
    }

    store.write(batch);

    if !mutation_responses.is_empty() {
        tracker.process_mutation_responses(&mutation_responses)?;
    }
    if let Some(lmid) = final_lmid {
        tracker.lmid_advanced(lmid);
    }

    Ok(())
}

fn apply_row_op(
    op: &RowPatchOp,
    store: &Store,
    mapper: &NameMapper,
    tables: &BTreeMap<String, TableSchema>,
    batch: &mut WriteBatch,
    overlay: &mut BTreeMap<String, serde_json::Value>,
) -> Result<(), Error> {
    match op {
        RowPatchOp::Put { table_name, value } => {
            let (schema, row) = to_client_row(table_name, value, mapper, tables)?;
            let key = row_key(schema, &row).map_err(|_| Error::UnknownTable(table_name.clone()))?;
            let value = serde_json::to_value(&row).unwrap_or_default();
            overlay.insert(key.clone(), value.clone());
            batch.set(key, value);
        }
        RowPatchOp::Update {
            table_name,
            id,
            merge,
        } => {
            let (schema, id_row) = to_client_row(table_name, id, mapper, tables)?;
            let key =
                row_key(schema, &id_row).map_err(|_| Error::UnknownTable(table_name.clone()))?;

            let mut row: Row = overlay
                .get(&key)
                .cloned()
                .or_else(|| store.get(&key))
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_else(|| id_row.clone());

            let (_, merge_row) = to_client_row(table_name, merge, mapper, tables)?;
            for (column, value) in merge_row {
                row.insert(column, value);
            }

            let value = serde_json::to_value(&row).unwrap_or_default();
            overlay.insert(key.clone(), value.clone());
            batch.set(key, value);
        }
        RowPatchOp::Del { table_name, id } => {
            let (schema, id_row) = to_client_row(table_name, id, mapper, tables)?;
            let key =
                row_key(schema, &id_row).map_err(|_| Error::UnknownTable(table_name.clone()))?;
            overlay.remove(&key);
            batch.del(key);
        }
        RowPatchOp::Clear => {
            for (key, _) in store.scan_prefix("") {
                if !key.starts_with("d/") && !key.starts_with("g/") && !key.starts_with("m/") {
                    batch.del(key);
                }
            }
            overlay.clear();
        }
    }

    Ok(())
}

/// Map a server-named JSON row into a client-named typed row.
fn to_client_row<'a>(
    server_table: &str,
    value: &serde_json::Map<String, serde_json::Value>,
    mapper: &NameMapper,
    tables: &'a BTreeMap<String, TableSchema>,
) -> Result<(&'a TableSchema, Row), Error> {
    let client_table = mapper.table_to_client(server_table);
    let schema = tables
        .get(client_table)
        .ok_or_else(|| Error::UnknownTable(server_table.to_string()))?;

    let mut row = Row::new();
    for (column, value) in value {
        let value = serde_json::from_value(value.clone())
            .unwrap_or(fennec_postgres_types::Value::Null);
        row.insert(column.clone(), value);
    }

    Ok((schema, mapper.row_to_client(server_table, row)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::{ColumnSchema, ValueType};
    use serde_json::json;

    fn tables() -> BTreeMap<String, TableSchema> {
        let issue = TableSchema::new(
            "issue",
            vec![
                ColumnSchema::new("id", ValueType::String),
                ColumnSchema::new("ownerId", ValueType::String).with_server_name("owner_id"),
            ],
            &["id"],
        )
        .unwrap()
        .with_server_name("issues");

        BTreeMap::from([("issue".to_string(), issue)])
    }

    fn mapper() -> NameMapper {
        NameMapper::new(&tables().into_values().collect::<Vec<_>>())
    }

    fn row_map(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_put_maps_names() {
        let store = Store::new();
        let tracker = MutationTracker::new("c1");

        let part = PokePart {
            poke_id: "p".into(),
            rows_patch: Some(vec![RowPatchOp::Put {
                table_name: "issues".into(),
                value: row_map(json!({"id": "a", "owner_id": "alice"})),
            }]),
            ..Default::default()
        };

        apply_poke("c1", &[part], &store, &tracker, &mapper(), &tables()).unwrap();

        let row = store.get("issue/a").unwrap();
        assert_eq!(row["ownerId"], json!("alice"));
        assert!(row.get("owner_id").is_none());
    }

    #[test]
    fn test_update_merges_within_batch() {
        let store = Store::new();
        let tracker = MutationTracker::new("c1");

        let part = PokePart {
            poke_id: "p".into(),
            rows_patch: Some(vec![
                RowPatchOp::Put {
                    table_name: "issues".into(),
                    value: row_map(json!({"id": "a", "owner_id": "alice"})),
                },
                RowPatchOp::Update {
                    table_name: "issues".into(),
                    id: row_map(json!({"id": "a"})),
                    merge: row_map(json!({"owner_id": "bob"})),
                },
            ]),
            ..Default::default()
        };

        apply_poke("c1", &[part], &store, &tracker, &mapper(), &tables()).unwrap();
        assert_eq!(store.get("issue/a").unwrap()["ownerId"], json!("bob"));
    }

    #[test]
    fn test_clear_keeps_metadata_keys() {
        let store = Store::new();
        store.set("issue/a", json!({"id": "a"}));
        store.set(store::got_key("h1"), json!(true));

        let part = PokePart {
            poke_id: "p".into(),
            rows_patch: Some(vec![RowPatchOp::Clear]),
            ..Default::default()
        };
        apply_poke(
            "c1",
            &[part],
            &store,
            &MutationTracker::new("c1"),
            &mapper(),
            &tables(),
        )
        .unwrap();

        assert!(store.get("issue/a").is_none());
        assert!(store.get(&store::got_key("h1")).is_some());
    }

    #[test]
    fn test_unknown_table_errors() {
        let store = Store::new();
        let part = PokePart {
            poke_id: "p".into(),
            rows_patch: Some(vec![RowPatchOp::Put {
                table_name: "nope".into(),
                value: row_map(json!({"id": "a"})),
            }]),
            ..Default::default()
        };

        let err = apply_poke(
            "c1",
            &[part],
            &store,
            &MutationTracker::new("c1"),
            &mapper(),
            &tables(),
        )
        .unwrap_err();
        assert_eq!(err, Error::UnknownTable("nope".into()));
    }
}
