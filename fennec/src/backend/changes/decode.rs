use fnv::FnvHashMap as HashMap;
use tracing::{error, warn};

use fennec_postgres_types::{
    date_to_millis, parse_pg_array, parse_pg_int8, parse_pg_numeric, pg_timestamp_to_millis, Value,
};

use crate::net::messages::replication::logical::tuple_data::Column as TupleColumn;
use crate::net::{Relation, TupleData, XLogData, XLogPayload};
use crate::schema::Row;

use super::ddl::DdlEvent;
use super::error::Error;
use super::watermark::{Lsn, Watermark};

/// One message of the language-neutral change stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeStreamMessage {
    /// Opens a transaction. The watermark of the closing commit is already
    /// known from the WAL, which lets replay skip whole transactions.
    Begin { commit_watermark: Watermark },
    Data(DataChange),
    Commit { watermark: Watermark },
    Rollback,
    Control(ControlMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataChange {
    Insert {
        table: String,
        row: Row,
    },
    Update {
        table: String,
        /// Previous identity, present when the key changed.
        key: Option<Row>,
        row: Row,
    },
    Delete {
        table: String,
        key: Row,
    },
    Truncate {
        tables: Vec<String>,
    },
    Ddl(DdlEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    ResetRequired,
}

/// Decodes pgoutput WAL messages into change-stream messages.
///
/// Keeps the relation cache, applies row filtering (other shards' internal
/// tables and explicitly excluded tables, with the surrounding
/// begin/commit still emitted), and detects schema drift when event
/// triggers are unavailable.
#[derive(Debug)]
pub struct ChangeDecoder {
    app_id: String,
    shard_num: u16,
    ddl_detection: bool,
    ddl_prefix: String,
    relations: HashMap<i32, Relation>,
    filtered: u64,
}

impl ChangeDecoder {
    pub fn new(app_id: &str, shard_num: u16, ddl_detection: bool) -> Self {
        Self {
            app_id: app_id.to_string(),
            shard_num,
            ddl_detection,
            ddl_prefix: format!("{}.ddl", app_id),
            relations: HashMap::default(),
            filtered: 0,
        }
    }

    pub fn filtered(&self) -> u64 {
        self.filtered
    }

    /// Decode one WAL message. Most produce zero or one change-stream
    /// message; schema drift produces the rollback/reset pair.
    pub fn decode(&mut self, xlog: &XLogData) -> Result<Vec<ChangeStreamMessage>, Error> {
        let payload = xlog.payload()?;

        Ok(match payload {
            XLogPayload::Begin(begin) => vec![ChangeStreamMessage::Begin {
                commit_watermark: Watermark::from_lsn(Lsn::from_i64(begin.final_lsn)),
            }],
            XLogPayload::Commit(commit) => vec![ChangeStreamMessage::Commit {
                watermark: Watermark::from_lsn(Lsn::from_i64(commit.commit_lsn)),
            }],
            XLogPayload::Origin(_) => vec![],
            XLogPayload::Relation(relation) => {
                if !self.ddl_detection {
                    if let Some(known) = self.relations.get(&relation.oid) {
                        if known.columns != relation.columns || known.name != relation.name {
                            error!(
                                "schema of \"{}\" changed without DDL detection; resync required",
                                relation.name
                            );
                            self.relations.insert(relation.oid, relation);
                            return Ok(vec![
                                ChangeStreamMessage::Rollback,
                                ChangeStreamMessage::Control(ControlMessage::ResetRequired),
                            ]);
                        }
                    }
                }
                self.relations.insert(relation.oid, relation);
                vec![]
            }
            XLogPayload::Insert(insert) => {
                let Some(relation) = self.relation(insert.oid)? else {
                    return Ok(vec![]);
                };
                let row = tuple_to_row(&insert.tuple, relation, None)?;
                vec![ChangeStreamMessage::Data(DataChange::Insert {
                    table: relation.name.clone(),
                    row,
                })]
            }
            XLogPayload::Update(update) => {
                let Some(relation) = self.relation(update.oid)? else {
                    return Ok(vec![]);
                };
                let key = match update.key.as_ref().or(update.old.as_ref()) {
                    Some(tuple) => Some(tuple_to_row(tuple, relation, None)?),
                    None => None,
                };
                let row = tuple_to_row(&update.new, relation, key.as_ref())?;
                vec![ChangeStreamMessage::Data(DataChange::Update {
                    table: relation.name.clone(),
                    key,
                    row,
                })]
            }
            XLogPayload::Delete(delete) => {
                let Some(relation) = self.relation(delete.oid)? else {
                    return Ok(vec![]);
                };
                let Some(identity) = delete.identity() else {
                    warn!("delete without identity on \"{}\"", relation.name);
                    return Ok(vec![]);
                };
                let key = tuple_to_row(identity, relation, None)?;
                vec![ChangeStreamMessage::Data(DataChange::Delete {
                    table: relation.name.clone(),
                    key,
                })]
            }
            XLogPayload::Truncate(truncate) => {
                let mut tables = vec![];
                for oid in &truncate.oids {
                    if let Some(relation) = self.relation(*oid)? {
                        tables.push(relation.name.clone());
                    }
                }
                if tables.is_empty() {
                    return Ok(vec![]);
                }
                vec![ChangeStreamMessage::Data(DataChange::Truncate { tables })]
            }
            XLogPayload::Message(message) => {
                if message.prefix != self.ddl_prefix {
                    return Ok(vec![]);
                }
                if !self.ddl_detection {
                    return Ok(vec![]);
                }
                let event: DdlEvent = serde_json::from_slice(&message.content)?;
                vec![ChangeStreamMessage::Data(DataChange::Ddl(event))]
            }
        })
    }

    /// Look up a cached relation, filtering out tables this shard must not
    /// see. `None` means drop the message (the enclosing begin/commit pair
    /// is still emitted and may end up empty).
    fn relation(&mut self, oid: i32) -> Result<Option<&Relation>, Error> {
        // Split borrow: decide filtering from immutable fields first.
        let excluded = match self.relations.get(&oid) {
            Some(relation) => self.is_excluded(relation),
            None => {
                warn!("data message for unknown relation {}", oid);
                return Ok(None);
            }
        };

        if excluded {
            self.filtered += 1;
            return Ok(None);
        }

        Ok(self.relations.get(&oid))
    }

    /// Internal tables of *other* shards never leave this shard's stream.
    fn is_excluded(&self, relation: &Relation) -> bool {
        let ns = &relation.namespace;
        if let Some(shard) = ns
            .strip_prefix(&format!("{}_", self.app_id))
            .and_then(|n| n.parse::<u16>().ok())
        {
            return shard != self.shard_num;
        }
        false
    }
}

/// Convert a decoded tuple into a typed row using the relation's column
/// types. Unchanged TOAST columns fall back to the old row when we have
/// one, otherwise they are omitted.
fn tuple_to_row(tuple: &TupleData, relation: &Relation, old: Option<&Row>) -> Result<Row, Error> {
    let mut row = Row::new();

    for (index, column) in tuple.columns.iter().enumerate() {
        let Some(spec) = relation.columns.get(index) else {
            return Err(Error::UnsupportedSchemaChange(format!(
                "tuple has more columns than relation \"{}\"",
                relation.name
            )));
        };

        match column {
            TupleColumn::Null => {
                row.insert(spec.name.clone(), Value::Null);
            }
            TupleColumn::UnchangedToast => {
                if let Some(value) = old.and_then(|o| o.get(&spec.name)) {
                    row.insert(spec.name.clone(), value.clone());
                }
            }
            TupleColumn::Text(text) => {
                row.insert(spec.name.clone(), column_value(spec.oid, text));
            }
        }
    }

    Ok(row)
}

/// PG type oid → client value, through the text-format codecs. Unknown
/// types stay strings.
pub fn column_value(oid: i32, text: &str) -> Value {
    let parsed = match oid {
        // bool
        16 => Some(Value::Bool(text == "t" || text == "true")),
        // int2, int4, int8
        20 | 21 | 23 => parse_pg_int8(text).ok(),
        // float4, float8
        700 | 701 => text.parse::<f64>().ok().map(Value::Float),
        // numeric
        1700 => parse_pg_numeric(text).ok(),
        // timestamp, timestamptz
        1114 | 1184 => pg_timestamp_to_millis(text).ok().map(Value::Float),
        // date
        1082 => date_to_millis(text).ok().map(Value::Int),
        // time stays a decimal string
        1083 => Some(Value::String(text.to_string())),
        // json, jsonb
        114 | 3802 => serde_json::from_str(text).ok().map(Value::Json),
        // int2[], int4[], int8[]
        1005 | 1007 | 1016 => parse_pg_array(text, &parse_pg_int8).ok(),
        // text[], varchar[]
        1009 | 1015 => parse_pg_array(text, &|s| Ok(Value::String(s.to_string()))).ok(),
        _ => None,
    };

    parsed.unwrap_or_else(|| Value::String(text.to_string()))
}
