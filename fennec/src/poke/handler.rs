use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::mutations::MutationTracker;
use crate::net::sync::{PokeEnd, PokePart, PokeStart};
use crate::schema::{NameMapper, TableSchema};
use crate::store::Store;

use super::apply::apply_poke;
use super::Error;

/// A poke fully assembled and waiting for the next frame.
#[derive(Debug, Clone)]
pub struct CompletePoke {
    pub base_cookie: Option<String>,
    pub cookie: String,
    pub parts: Vec<PokePart>,
}

#[derive(Debug)]
struct Assembling {
    start: PokeStart,
    parts: Vec<PokePart>,
}

#[derive(Debug, Default)]
struct Buffer {
    current: Option<Assembling>,
    queue: Vec<CompletePoke>,
}

/// Buffers poke messages and applies completed pokes in merged batches.
///
/// `apply_queued` is the frame-paced entry point: the driver calls it once
/// per animation frame (or yielded task tick). The per-client apply mutex
/// makes merge + store write + tracker notification atomic.
#[derive(Clone)]
pub struct PokeHandler {
    buffer: Arc<Mutex<Buffer>>,
    /// Held across merge+apply so mutation-result processing and LMID
    /// advance are atomic with the store write.
    apply: Arc<Mutex<Option<String>>>,
    store: Store,
    tracker: MutationTracker,
    mapper: Arc<NameMapper>,
    tables: Arc<BTreeMap<String, TableSchema>>,
    client_id: String,
}

impl PokeHandler {
    pub fn new(
        client_id: &str,
        store: Store,
        tracker: MutationTracker,
        mapper: NameMapper,
        tables: Vec<TableSchema>,
    ) -> Self {
        let tables = tables
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect::<BTreeMap<_, _>>();

        Self {
            buffer: Arc::new(Mutex::new(Buffer::default())),
            apply: Arc::new(Mutex::new(None)),
            store,
            tracker,
            mapper: Arc::new(mapper),
            tables: Arc::new(tables),
            client_id: client_id.to_string(),
        }
    }

    pub fn handle_poke_start(&self, start: PokeStart) -> Result<(), Error> {
        let mut buffer = self.buffer.lock();
        if let Some(current) = &buffer.current {
            warn!(
                "poke \"{}\" started while \"{}\" was assembling; dropping the unfinished one",
                start.poke_id, current.start.poke_id
            );
        }
        buffer.current = Some(Assembling {
            start,
            parts: vec![],
        });
        Ok(())
    }

    pub fn handle_poke_part(&self, part: PokePart) -> Result<(), Error> {
        let mut buffer = self.buffer.lock();
        match &mut buffer.current {
            Some(current) if current.start.poke_id == part.poke_id => {
                current.parts.push(part);
                Ok(())
            }
            Some(current) => {
                let expected = current.start.poke_id.clone();
                buffer.clear();
                Err(Error::UnexpectedPart {
                    expected,
                    got: part.poke_id,
                })
            }
            None => {
                buffer.clear();
                Err(Error::PartWithoutStart(part.poke_id))
            }
        }
    }

    pub fn handle_poke_end(&self, end: PokeEnd) -> Result<(), Error> {
        let mut buffer = self.buffer.lock();
        match buffer.current.take() {
            Some(current) if current.start.poke_id == end.poke_id => {
                if end.cancel {
                    debug!("poke \"{}\" cancelled", end.poke_id);
                    return Ok(());
                }
                let complete = CompletePoke {
                    base_cookie: current.start.base_cookie.clone(),
                    cookie: end.cookie,
                    parts: current.parts,
                };
                buffer.queue.push(complete);
                Ok(())
            }
            Some(current) => {
                let expected = current.start.poke_id.clone();
                buffer.clear();
                Err(Error::UnexpectedEnd {
                    expected,
                    got: end.poke_id,
                })
            }
            None => {
                buffer.clear();
                Err(Error::UnexpectedEnd {
                    expected: String::new(),
                    got: end.poke_id,
                })
            }
        }
    }

    /// Apply everything queued as one merged patch. Returns whether any
    /// poke was applied. Called once per frame by the driver.
    pub fn apply_queued(&self) -> Result<bool, Error> {
        let mut cookie_slot = self.apply.lock();

        let pokes = {
            let mut buffer = self.buffer.lock();
            std::mem::take(&mut buffer.queue)
        };
        if pokes.is_empty() {
            return Ok(false);
        }

        // Merge by concatenation; each poke must chain off the previous
        // cookie.
        let mut expected = cookie_slot.clone();
        let mut parts = vec![];
        let mut final_cookie = None;
        for poke in pokes {
            if poke.base_cookie != expected {
                self.buffer.lock().clear();
                return Err(Error::CookieGap {
                    expected,
                    got: poke.base_cookie,
                });
            }
            expected = Some(poke.cookie.clone());
            final_cookie = Some(poke.cookie);
            parts.extend(poke.parts);
        }

        apply_poke(
            &self.client_id,
            &parts,
            &self.store,
            &self.tracker,
            &self.mapper,
            &self.tables,
        )?;

        *cookie_slot = final_cookie;
        Ok(true)
    }

    /// Run the frame-paced driver: applies queued pokes after each yield
    /// until cancelled.
    pub fn spawn_driver(&self, cancel: tokio_util::sync::CancellationToken) {
        let handler = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::task::yield_now() => {
                        if let Err(err) = handler.apply_queued() {
                            warn!("poke apply failed: {}", err);
                        }
                        // Frame pacing: yield_now resolves immediately, so
                        // sleep a beat when nothing is pending.
                        if handler.buffer.lock().queue.is_empty() {
                            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                        }
                    }
                }
            }
        });
    }

    /// The cookie of the last applied poke.
    pub fn cookie(&self) -> Option<String> {
        self.apply.lock().clone()
    }

    /// Connection dropped: everything buffered is void; the next
    /// connection re-hydrates.
    pub fn disconnect(&self) {
        self.buffer.lock().clear();
    }
}

impl Buffer {
    fn clear(&mut self) {
        self.current = None;
        self.queue.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::net::sync::{MutationPatchOp, RowPatchOp};
    use crate::schema::{ColumnSchema, ValueType};
    use serde_json::json;

    fn tables() -> Vec<TableSchema> {
        vec![TableSchema::new(
            "issue",
            vec![
                ColumnSchema::new("id", ValueType::String),
                ColumnSchema::new("title", ValueType::String),
            ],
            &["id"],
        )
        .unwrap()]
    }

    fn handler() -> (PokeHandler, Store, MutationTracker) {
        let store = Store::new();
        let tracker = MutationTracker::new("c1");
        let mapper = NameMapper::new(&tables());
        let handler = PokeHandler::new("c1", store.clone(), tracker.clone(), mapper, tables());
        (handler, store, tracker)
    }

    fn start(id: &str, base: Option<&str>) -> PokeStart {
        PokeStart {
            poke_id: id.into(),
            base_cookie: base.map(|c| c.to_string()),
            schema_versions: None,
        }
    }

    fn end(id: &str, cookie: &str) -> PokeEnd {
        PokeEnd {
            poke_id: id.into(),
            cookie: cookie.into(),
            cancel: false,
        }
    }

    fn rows_part(id: &str, ops: Vec<RowPatchOp>) -> PokePart {
        PokePart {
            poke_id: id.into(),
            rows_patch: Some(ops),
            ..Default::default()
        }
    }

    fn put(issue_id: &str, title: &str) -> RowPatchOp {
        RowPatchOp::Put {
            table_name: "issue".into(),
            value: serde_json::from_value(json!({"id": issue_id, "title": title})).unwrap(),
        }
    }

    #[test]
    fn test_merged_apply_with_single_lmid_advance() {
        let (handler, store, tracker) = handler();

        let (e1, _rx1) = tracker.track_mutation();
        tracker.mutation_id_assigned(e1, 1).unwrap();

        // Two back-to-back pokes; the second updates the same row and
        // advances the lmid.
        handler.handle_poke_start(start("p1", None)).unwrap();
        handler
            .handle_poke_part(rows_part("p1", vec![put("a", "hello")]))
            .unwrap();
        handler.handle_poke_end(end("p1", "1")).unwrap();

        handler.handle_poke_start(start("p2", Some("1"))).unwrap();
        let mut part = rows_part("p2", vec![put("a", "hello again")]);
        part.last_mutation_id_changes = Some(BTreeMap::from([("c1".to_string(), 1u64)]));
        handler.handle_poke_part(part).unwrap();
        handler.handle_poke_end(end("p2", "2")).unwrap();

        // One frame: one merged apply.
        assert!(handler.apply_queued().unwrap());
        assert_eq!(handler.cookie().as_deref(), Some("2"));
        assert_eq!(
            store.get("issue/a").unwrap()["title"],
            json!("hello again")
        );
        assert_eq!(tracker.size(), 0);
        assert!(!handler.apply_queued().unwrap());
    }

    #[test]
    fn test_part_with_wrong_poke_id_clears() {
        let (handler, _, _) = handler();
        handler.handle_poke_start(start("p1", None)).unwrap();
        let err = handler
            .handle_poke_part(rows_part("other", vec![]))
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedPart { .. }));

        // Buffer was cleared; nothing applies.
        assert!(!handler.apply_queued().unwrap());
    }

    #[test]
    fn test_cookie_gap_clears_queue() {
        let (handler, _, _) = handler();

        handler.handle_poke_start(start("p1", Some("99"))).unwrap();
        handler.handle_poke_end(end("p1", "100")).unwrap();

        let err = handler.apply_queued().unwrap_err();
        assert!(matches!(err, Error::CookieGap { .. }));
        assert!(!handler.apply_queued().unwrap());
    }

    #[test]
    fn test_cancel_discards() {
        let (handler, store, _) = handler();

        handler.handle_poke_start(start("p1", None)).unwrap();
        handler
            .handle_poke_part(rows_part("p1", vec![put("a", "hi")]))
            .unwrap();
        handler
            .handle_poke_end(PokeEnd {
                poke_id: "p1".into(),
                cookie: "1".into(),
                cancel: true,
            })
            .unwrap();

        assert!(!handler.apply_queued().unwrap());
        assert!(store.get("issue/a").is_none());
    }

    #[test]
    fn test_disconnect_clears() {
        let (handler, _, _) = handler();
        handler.handle_poke_start(start("p1", None)).unwrap();
        handler
            .handle_poke_part(rows_part("p1", vec![put("a", "hi")]))
            .unwrap();
        handler.disconnect();

        // The unfinished poke is gone; a fresh end for it errors.
        let err = handler.handle_poke_end(end("p1", "1")).unwrap_err();
        assert!(matches!(err, Error::UnexpectedEnd { .. }));
    }

    #[test]
    fn test_mutation_results_forwarded() {
        use crate::net::sync::{MutationId, MutationResponse, MutationResult};

        let (handler, _, tracker) = handler();
        let (e1, mut rx) = tracker.track_mutation();
        tracker.mutation_id_assigned(e1, 3).unwrap();

        handler.handle_poke_start(start("p1", None)).unwrap();
        handler
            .handle_poke_part(PokePart {
                poke_id: "p1".into(),
                mutations_patch: Some(vec![MutationPatchOp::Put {
                    mutation: MutationResponse {
                        id: MutationId {
                            client_id: "c1".into(),
                            id: 3,
                        },
                        result: MutationResult::ok(),
                    },
                }]),
                ..Default::default()
            })
            .unwrap();
        handler.handle_poke_end(end("p1", "1")).unwrap();

        handler.apply_queued().unwrap();
        assert!(matches!(rx.try_recv(), Ok(Ok(None))));
    }
}
