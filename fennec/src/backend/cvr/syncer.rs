use std::collections::BTreeMap;
use std::hash::Hasher;
use std::sync::Arc;

use fnv::FnvHasher;
use parking_lot::Mutex;
use tracing::{debug, warn};

use fennec_stats::QueryStats;

use crate::backend::executor::Executor;
use crate::backend::replicator::Replica;
use crate::ivm::{
    build_pipeline, FetchRequest, Node, SourceChange, SourceSchema, TableRegistry,
};
use crate::net::sync::{
    PokeEnd, PokePart, PokeStart, QueriesPatchOp, RowPatchOp, ServerMessage,
};
use crate::query::Ast;
use crate::schema::Relationship;

use super::store::{Cvr, CvrStore, QueryRecord};
use super::Error;

type CustomQueryFn = Arc<dyn Fn(&[serde_json::Value]) -> Ast + Send + Sync>;

/// Keeps each client group's CVR in line with its desired queries and the
/// replica, emitting pokes for the difference.
pub struct ViewSyncer {
    store: CvrStore,
    replica: Replica,
    relationships: Vec<Relationship>,
    custom: BTreeMap<String, CustomQueryFn>,
    stats: Arc<Mutex<QueryStats>>,
}

impl ViewSyncer {
    pub fn new(shard_schema: &str, replica: Replica) -> Self {
        Self {
            store: CvrStore::new(shard_schema),
            replica,
            relationships: vec![],
            custom: BTreeMap::new(),
            stats: Arc::new(Mutex::new(QueryStats::default())),
        }
    }

    pub fn register_relationship(&mut self, relationship: Relationship) {
        self.relationships.push(relationship);
    }

    /// Register the server-side definition of a custom (named) query.
    pub fn register_custom(&mut self, name: &str, build: CustomQueryFn) {
        self.custom.insert(name.to_string(), build);
    }

    pub fn cvr_store(&self) -> &CvrStore {
        &self.store
    }

    /// Apply a desired-queries patch for one client group and return the
    /// pokes that bring the client current.
    pub async fn change_desired_queries(
        &self,
        executor: &dyn Executor,
        client_group_id: &str,
        patch: &[QueriesPatchOp],
        now_ms: i64,
    ) -> Result<Vec<ServerMessage>, Error> {
        let old = self.store.load(executor, client_group_id, now_ms).await?;
        let mut cvr = old.clone();
        cvr.last_active = now_ms;

        for op in patch {
            match op {
                QueriesPatchOp::Put { hash, ttl, .. } => {
                    let record = QueryRecord {
                        hash: hash.clone(),
                        spec: serde_json::to_value(op)?,
                        ttl: ttl.unwrap_or(0),
                    };
                    cvr.desired.insert(hash.clone(), record);
                }
                QueriesPatchOp::Del { hash } => {
                    cvr.desired.remove(hash);
                    cvr.got.remove(hash);
                }
            }
        }

        let pokes = self.sync(&mut cvr)?;
        self.store.save(executor, &old, &cvr).await?;
        Ok(pokes)
    }

    /// Re-evaluate a client group after the replica advanced.
    pub async fn advance(
        &self,
        executor: &dyn Executor,
        client_group_id: &str,
        now_ms: i64,
    ) -> Result<Vec<ServerMessage>, Error> {
        let old = self.store.load(executor, client_group_id, now_ms).await?;
        let mut cvr = old.clone();
        cvr.last_active = now_ms;

        let pokes = self.sync(&mut cvr)?;
        self.store.save(executor, &old, &cvr).await?;
        Ok(pokes)
    }

    /// Hydrate every desired query against the replica snapshot, diff the
    /// row set against the CVR, and mutate the CVR to the new state.
    fn sync(&self, cvr: &mut Cvr) -> Result<Vec<ServerMessage>, Error> {
        let watermark = self.replica.watermark()?;
        let registry = self.load_registry()?;

        let mut rows: BTreeMap<String, (String, crate::schema::Row)> = BTreeMap::new();
        let mut got_patch = vec![];

        let desired: Vec<QueryRecord> = cvr.desired.values().cloned().collect();
        for record in desired {
            let ast = match self.ast_of(&record) {
                Ok(ast) => ast,
                Err(Error::UnknownCustomQuery(name)) => {
                    warn!("skipping unknown custom query \"{}\"", name);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let mut pipeline =
                build_pipeline(&ast, &registry, &record.hash, self.stats.clone())?;
            let schema = pipeline.schema().clone();
            for node in pipeline.fetch(&FetchRequest::all()) {
                collect_rows(&node, &schema, &mut rows);
            }

            if !cvr.got.contains_key(&record.hash) {
                cvr.got.insert(record.hash.clone(), record.clone());
                got_patch.push(QueriesPatchOp::Put {
                    hash: record.hash.clone(),
                    ast: None,
                    name: None,
                    args: None,
                    ttl: Some(record.ttl),
                });
            }
        }

        for hash in cvr.got.keys().cloned().collect::<Vec<_>>() {
            if !cvr.desired.contains_key(&hash) {
                cvr.got.remove(&hash);
                got_patch.push(QueriesPatchOp::Del { hash });
            }
        }

        // Diff the fetched row set against what the client holds.
        let mut rows_patch = vec![];
        let mut new_rows = BTreeMap::new();
        for (key, (table, row)) in &rows {
            let hash = content_hash(row);
            if cvr.rows.get(key) != Some(&hash) {
                rows_patch.push(RowPatchOp::Put {
                    table_name: table.clone(),
                    value: row_to_json(row),
                });
            }
            new_rows.insert(key.clone(), hash);
        }
        for key in cvr.rows.keys() {
            if !rows.contains_key(key) {
                let (table, pk_json) = match split_row_key(key, &registry) {
                    Some(parts) => parts,
                    None => continue,
                };
                rows_patch.push(RowPatchOp::Del {
                    table_name: table,
                    id: pk_json,
                });
            }
        }
        cvr.rows = new_rows;

        let cookie = watermark.to_string();
        if rows_patch.is_empty() && got_patch.is_empty() && cvr.version == cookie {
            debug!("client group \"{}\" already current", cvr.client_group_id);
            return Ok(vec![]);
        }

        // Re-send current lmids with every poke; the client's tracker
        // treats lmid advances as monotone so repeats are harmless.
        let lmid_changes = (!cvr.lmids.is_empty()).then(|| cvr.lmids.clone());

        let base_cookie =
            (cvr.version != crate::backend::changes::Watermark::MIN).then(|| cvr.version.clone());
        let poke_id = uuid::Uuid::new_v4().to_string();
        cvr.version = cookie.clone();

        Ok(vec![
            ServerMessage::PokeStart(PokeStart {
                poke_id: poke_id.clone(),
                base_cookie,
                schema_versions: None,
            }),
            ServerMessage::PokePart(PokePart {
                poke_id: poke_id.clone(),
                last_mutation_id_changes: lmid_changes,
                desired_queries_patches: None,
                got_queries_patch: (!got_patch.is_empty()).then_some(got_patch),
                rows_patch: (!rows_patch.is_empty()).then_some(rows_patch),
                mutations_patch: None,
            }),
            ServerMessage::PokeEnd(PokeEnd {
                poke_id,
                cookie,
                cancel: false,
            }),
        ])
    }

    /// Materialize the replica into an IVM registry.
    fn load_registry(&self) -> Result<TableRegistry, Error> {
        let mut registry = TableRegistry::new();

        for (table, pk) in self.replica.tables()? {
            let pk_refs: Vec<&str> = pk.iter().map(|k| k.as_str()).collect();
            let schema = crate::schema::TableSchema::new(
                &table,
                pk.iter()
                    .map(|k| {
                        crate::schema::ColumnSchema::new(
                            k,
                            crate::schema::ValueType::String,
                        )
                    })
                    .collect(),
                &pk_refs,
            )
            .map_err(|_| Error::Ivm(crate::ivm::Error::UnknownTable(table.clone())))?;
            registry.register_table(&schema);

            for row in self.replica.scan(&table)? {
                registry.apply(&table, &SourceChange::Insert(row));
            }
        }

        for relationship in &self.relationships {
            registry.register_relationship(relationship.clone());
        }

        Ok(registry)
    }

    fn ast_of(&self, record: &QueryRecord) -> Result<Ast, Error> {
        if let Some(ast) = record.spec.get("ast") {
            if !ast.is_null() {
                return Ok(serde_json::from_value(ast.clone())?);
            }
        }
        if let Some(name) = record.spec.get("name").and_then(|n| n.as_str()) {
            let args: Vec<serde_json::Value> = record
                .spec
                .get("args")
                .and_then(|a| a.as_array())
                .cloned()
                .unwrap_or_default();
            let build = self
                .custom
                .get(name)
                .ok_or_else(|| Error::UnknownCustomQuery(name.to_string()))?;
            return Ok(build(&args));
        }
        // Bare AST without the patch-op wrapper.
        Ok(serde_json::from_value(record.spec.clone())?)
    }
}

fn collect_rows(
    node: &Node,
    schema: &SourceSchema,
    out: &mut BTreeMap<String, (String, crate::schema::Row)>,
) {
    let key = format!("{}/{}", schema.table, schema.pk_key(&node.row));
    out.insert(key, (schema.table.clone(), node.row.clone()));

    for (name, children) in &node.relationships {
        if let Some(child_schema) = schema.relationship(name) {
            for child in children {
                collect_rows(child, child_schema, out);
            }
        }
    }
}

fn content_hash(row: &crate::schema::Row) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(
        serde_json::to_string(row)
            .unwrap_or_default()
            .as_bytes(),
    );
    format!("{:016x}", hasher.finish())
}

fn row_to_json(row: &crate::schema::Row) -> serde_json::Map<String, serde_json::Value> {
    row.iter()
        .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or_default()))
        .collect()
}

/// Recover `(table, pk columns)` from a stored row key for del patches.
fn split_row_key(
    key: &str,
    registry: &TableRegistry,
) -> Option<(String, serde_json::Map<String, serde_json::Value>)> {
    let (table, pk_encoded) = key.split_once('/')?;
    let source = registry.source(table).ok()?;
    let pk = source.lock().schema().primary_key.clone();

    let mut id = serde_json::Map::new();
    for (column, segment) in pk.iter().zip(pk_encoded.split('\u{0}')) {
        let unescaped = segment
            .replace("\u{1}\u{2}", "\u{0}")
            .replace("\u{1}\u{1}", "\u{1}");
        id.insert(column.clone(), serde_json::Value::String(unescaped));
    }
    Some((table.to_string(), id))
}
