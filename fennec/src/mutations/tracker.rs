use std::collections::BTreeMap;
use std::sync::Arc;

use fnv::FnvHashMap as HashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::warn;

use crate::net::sync::{MutationResult, PushResponse};

use super::Error;

/// Token handed out before a mutation ID is minted.
pub type EphemeralId = u64;

/// What the server ultimately said about a mutation.
pub type ServerResult = Result<Option<serde_json::Value>, MutationResult>;

struct Entry {
    mutation_id: Option<u64>,
    resolver: Option<oneshot::Sender<ServerResult>>,
}

struct Inner {
    client_id: String,
    next_ephemeral: EphemeralId,
    entries: HashMap<EphemeralId, Entry>,
    by_mutation_id: BTreeMap<u64, EphemeralId>,
    lmid: u64,
    all_applied: Vec<Box<dyn Fn() + Send>>,
}

/// Tracks in-flight client mutations from `track_mutation` to settlement.
///
/// Settlement comes from push responses, from mutation-result pokes, or in
/// bulk when the LMID advances past an outstanding ID.
#[derive(Clone)]
pub struct MutationTracker {
    inner: Arc<Mutex<Inner>>,
}

impl MutationTracker {
    pub fn new(client_id: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                client_id: client_id.to_string(),
                next_ephemeral: 1,
                entries: HashMap::default(),
                by_mutation_id: BTreeMap::new(),
                lmid: 0,
                all_applied: vec![],
            })),
        }
    }

    /// Register a callback fired each time the set of mutations beyond the
    /// current LMID drains to empty. Fired synchronously from settlement.
    pub fn on_all_applied(&self, callback: Box<dyn Fn() + Send>) {
        self.inner.lock().all_applied.push(callback);
    }

    /// Begin tracking a mutation. The receiver resolves with the server's
    /// authoritative result.
    pub fn track_mutation(&self) -> (EphemeralId, oneshot::Receiver<ServerResult>) {
        let mut inner = self.inner.lock();
        let ephemeral = inner.next_ephemeral;
        inner.next_ephemeral += 1;

        let (tx, rx) = oneshot::channel();
        inner.entries.insert(
            ephemeral,
            Entry {
                mutation_id: None,
                resolver: Some(tx),
            },
        );

        (ephemeral, rx)
    }

    /// Bind a persistent mutation ID to an ephemeral one.
    pub fn mutation_id_assigned(&self, ephemeral: EphemeralId, mutation_id: u64) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(&ephemeral) {
            Some(entry) => {
                entry.mutation_id = Some(mutation_id);
                inner.by_mutation_id.insert(mutation_id, ephemeral);
                Ok(())
            }
            None => Err(Error::UnknownEphemeral(ephemeral)),
        }
    }

    /// Settle a mutation locally before an ID was assigned; used when
    /// persistence of the optimistic write fails.
    pub fn reject_mutation(&self, ephemeral: EphemeralId, error: MutationResult) {
        let fire = {
            let mut inner = self.inner.lock();
            let was_outstanding = inner.outstanding() > 0;
            let entry = inner.entries.remove(&ephemeral);
            if let Some(mut entry) = entry {
                if let Some(mid) = entry.mutation_id {
                    inner.by_mutation_id.remove(&mid);
                }
                if let Some(resolver) = entry.resolver.take() {
                    let _ = resolver.send(Err(error));
                }
            }
            was_outstanding && inner.check_drained()
        };
        self.fire_all_applied(fire);
    }

    /// Outstanding mutations: entries beyond the current LMID plus entries
    /// that have no mutation ID yet.
    pub fn size(&self) -> usize {
        let inner = self.inner.lock();
        inner.outstanding()
    }

    /// Handle a push response. `ok` results must arrive at most once per
    /// mutation; a repeated `alreadyProcessed` is silently ignored.
    pub fn process_push_response(&self, response: &PushResponse) -> Result<(), Error> {
        let fire = {
            let mut inner = self.inner.lock();
            let was_outstanding = inner.outstanding() > 0;
            for mutation in &response.mutations {
                if mutation.id.client_id != inner.client_id {
                    return Err(Error::ForeignClient(mutation.id.client_id.clone()));
                }

                let mid = mutation.id.id;
                let ephemeral = inner.by_mutation_id.get(&mid).copied();

                match (&mutation.result, ephemeral) {
                    (_, Some(ephemeral)) => {
                        inner.settle(ephemeral, result_of(&mutation.result));
                    }
                    (MutationResult::Error { error, .. }, None) if error == "alreadyProcessed" => {
                        // A second response for an already-settled mutation.
                    }
                    (_, None) => return Err(Error::DuplicateResult(mid)),
                }
            }
            was_outstanding && inner.check_drained()
        };
        self.fire_all_applied(fire);
        Ok(())
    }

    /// Handle mutation results arriving through a poke (`m/` patch
    /// entries). Returns the largest mutation ID observed so the caller
    /// can ack it upstream.
    pub fn process_mutation_responses(
        &self,
        responses: &[crate::net::sync::MutationResponse],
    ) -> Result<Option<u64>, Error> {
        let mut largest = None;
        let fire = {
            let mut inner = self.inner.lock();
            let was_outstanding = inner.outstanding() > 0;
            for mutation in responses {
                if mutation.id.client_id != inner.client_id {
                    return Err(Error::ForeignClient(mutation.id.client_id.clone()));
                }
                largest = largest.max(Some(mutation.id.id));
                if let Some(ephemeral) = inner.by_mutation_id.get(&mutation.id.id).copied() {
                    inner.settle(ephemeral, result_of(&mutation.result));
                }
            }
            was_outstanding && inner.check_drained()
        };
        self.fire_all_applied(fire);
        Ok(largest)
    }

    /// The server's LMID advanced: resolve every outstanding mutation at or
    /// below it with an empty ok result. Covers results that were written
    /// authoritatively but never delivered, e.g. across a reconnect.
    pub fn lmid_advanced(&self, lmid: u64) {
        let fire = {
            let mut inner = self.inner.lock();
            let was_outstanding = inner.outstanding() > 0;
            if lmid < inner.lmid {
                warn!("lmid went backwards: {} < {}", lmid, inner.lmid);
            }
            inner.lmid = inner.lmid.max(lmid);

            let settled: Vec<EphemeralId> = inner
                .by_mutation_id
                .range(..=lmid)
                .map(|(_, e)| *e)
                .collect();
            for ephemeral in settled {
                inner.settle(ephemeral, Ok(None));
            }
            was_outstanding && inner.check_drained()
        };
        self.fire_all_applied(fire);
    }

    /// Reconnect: everything at or below the server's last known mutation
    /// ID is resolved, then the LMID advances.
    pub fn on_connected(&self, last_mutation_id: u64) {
        self.lmid_advanced(last_mutation_id);
    }

    fn fire_all_applied(&self, fire: bool) {
        if !fire {
            return;
        }
        // Callbacks run outside the lock but still synchronously within
        // the settling call, so deferred work drains before any later
        // event.
        let callbacks = std::mem::take(&mut self.inner.lock().all_applied);
        for callback in &callbacks {
            callback();
        }
        self.inner.lock().all_applied.splice(0..0, callbacks);
    }
}

impl Inner {
    fn outstanding(&self) -> usize {
        self.entries
            .values()
            .filter(|e| match e.mutation_id {
                Some(mid) => mid > self.lmid,
                None => true,
            })
            .count()
    }

    fn settle(&mut self, ephemeral: EphemeralId, result: ServerResult) {
        if let Some(mut entry) = self.entries.remove(&ephemeral) {
            if let Some(mid) = entry.mutation_id {
                self.by_mutation_id.remove(&mid);
            }
            if let Some(resolver) = entry.resolver.take() {
                let _ = resolver.send(result);
            }
        }
    }

    /// True when nothing remains beyond the current LMID.
    fn check_drained(&self) -> bool {
        self.outstanding() == 0
    }
}

fn result_of(result: &MutationResult) -> ServerResult {
    match result {
        MutationResult::Ok { data } => Ok(data.clone()),
        error => Err(error.clone()),
    }
}
