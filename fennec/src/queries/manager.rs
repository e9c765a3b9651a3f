use std::num::NonZeroUsize;
use std::sync::Arc;

use fnv::FnvHashSet as HashSet;
use indexmap::IndexMap;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::warn;

use crate::mutations::MutationTracker;
use crate::net::sync::{ClientMessage, QueriesPatchOp};
use crate::query::{hash_of_ast, hash_of_name_and_args, Ast};
use crate::store::{self, Store};

/// Queries stay desired for at most ten minutes after their last local
/// subscription drops; larger requests clamp here.
pub const MAX_TTL_MS: u64 = 10 * 60 * 1000;

/// What a desired query is, as the server needs to see it.
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySpec {
    Legacy(Ast),
    Custom {
        name: String,
        args: Vec<serde_json::Value>,
    },
}

/// Handle returned by `add_*`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySubscription {
    pub hash: String,
    id: u64,
}

struct QueryEntry {
    ref_count: usize,
    ttl: u64,
    spec: QuerySpec,
    got_callbacks: Vec<(u64, Box<dyn FnMut(bool) + Send>)>,
}

type SendFn = Box<dyn Fn(ClientMessage) + Send>;

struct Inner {
    client_id: String,
    queries: IndexMap<String, QueryEntry>,
    /// Hashes whose ref count reached zero, in drop order. Eviction emits
    /// the actual `del`.
    recent: LruCache<String, ()>,
    queued: Vec<QueriesPatchOp>,
    /// `del`s held back while mutations are outstanding, so rebases still
    /// see their data in scope.
    deferred_dels: Vec<String>,
    got: HashSet<String>,
    send: SendFn,
    warned_ttl: bool,
    next_subscription: u64,
}

/// Maintains the client's desired query set and mirrors it to the server
/// in batched `changeDesiredQueries` messages.
#[derive(Clone)]
pub struct QueryManager {
    inner: Arc<Mutex<Inner>>,
    store: Store,
    tracker: MutationTracker,
}

impl QueryManager {
    pub fn new(
        client_id: &str,
        store: Store,
        tracker: MutationTracker,
        max_recent_queries: usize,
        send: SendFn,
    ) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            client_id: client_id.to_string(),
            queries: IndexMap::new(),
            recent: LruCache::new(
                NonZeroUsize::new(max_recent_queries.max(1)).expect("max(1) is non-zero"),
            ),
            queued: vec![],
            deferred_dels: vec![],
            got: HashSet::default(),
            send,
            warned_ttl: false,
            next_subscription: 1,
        }));

        // Got state flows from the store's `g/` prefix, initial scan first.
        let got_inner = inner.clone();
        store.watch(
            store::got_prefix(),
            true,
            Box::new(move |diffs| {
                let mut inner = got_inner.lock();
                for diff in diffs {
                    let hash = match store::keys::hash_of_key(&diff.key) {
                        Some(hash) => hash.to_string(),
                        None => continue,
                    };
                    let got = diff.op != crate::store::DiffOp::Del;
                    if got {
                        inner.got.insert(hash.clone());
                    } else {
                        inner.got.remove(&hash);
                    }
                    if let Some(entry) = inner.queries.get_mut(&hash) {
                        for (_, callback) in entry.got_callbacks.iter_mut() {
                            callback(got);
                        }
                    }
                }
            }),
        );

        // Deferred dels drain the moment the last tracked mutation lands.
        let drain_inner = inner.clone();
        tracker.on_all_applied(Box::new(move || {
            let mut inner = drain_inner.lock();
            let deferred = std::mem::take(&mut inner.deferred_dels);
            for hash in deferred {
                inner.queued.push(QueriesPatchOp::Del { hash });
            }
            inner.flush();
        }));

        Self {
            inner,
            store,
            tracker,
        }
    }

    /// Register an AST query. The got callback fires immediately with the
    /// current state and again on every transition.
    pub fn add_legacy(
        &self,
        ast: &Ast,
        ttl: u64,
        got_callback: Option<Box<dyn FnMut(bool) + Send>>,
    ) -> QuerySubscription {
        let hash = hash_of_ast(ast);
        self.add(hash, QuerySpec::Legacy(ast.clone()), ttl, got_callback)
    }

    /// Register a custom (named) query.
    pub fn add_custom(
        &self,
        name: &str,
        args: &[serde_json::Value],
        ttl: u64,
        got_callback: Option<Box<dyn FnMut(bool) + Send>>,
    ) -> QuerySubscription {
        let hash = hash_of_name_and_args(name, args);
        self.add(
            hash,
            QuerySpec::Custom {
                name: name.to_string(),
                args: args.to_vec(),
            },
            ttl,
            got_callback,
        )
    }

    /// TTL-only update; sends a put only when the clamped TTL grows.
    pub fn update_legacy(&self, ast: &Ast, ttl: u64) {
        self.update(&hash_of_ast(ast), ttl);
    }

    pub fn update_custom(&self, name: &str, args: &[serde_json::Value], ttl: u64) {
        self.update(&hash_of_name_and_args(name, args), ttl);
    }

    fn add(
        &self,
        hash: String,
        spec: QuerySpec,
        ttl: u64,
        got_callback: Option<Box<dyn FnMut(bool) + Send>>,
    ) -> QuerySubscription {
        let mut inner = self.inner.lock();
        let ttl = inner.clamp_ttl(ttl);

        let id = inner.next_subscription;
        inner.next_subscription += 1;

        let got = inner.got.contains(&hash);
        let is_new = !inner.queries.contains_key(&hash);

        let entry = inner.queries.entry(hash.clone()).or_insert_with(|| QueryEntry {
            ref_count: 0,
            ttl: 0,
            spec: spec.clone(),
            got_callbacks: vec![],
        });

        entry.ref_count += 1;
        let needs_put = is_new || ttl > entry.ttl;
        if needs_put {
            entry.ttl = entry.ttl.max(ttl);
        }

        if let Some(mut callback) = got_callback {
            callback(got);
            entry.got_callbacks.push((id, callback));
        }

        // Coming back from the recent tail revives the query.
        inner.recent.pop(&hash);

        if needs_put {
            let put = inner.put_op(&hash);
            inner.queued.push(put);
        }

        QuerySubscription { hash, id }
    }

    fn update(&self, hash: &str, ttl: u64) {
        let mut inner = self.inner.lock();
        let ttl = inner.clamp_ttl(ttl);

        let grow = match inner.queries.get_mut(hash) {
            Some(entry) if ttl > entry.ttl => {
                entry.ttl = ttl;
                true
            }
            _ => false,
        };
        if grow {
            let put = inner.put_op(hash);
            inner.queued.push(put);
        }
    }

    /// Drop one subscription. At ref count zero the hash moves into the
    /// recent-queries tail; eviction from the tail emits the `del`.
    pub fn unsubscribe(&self, subscription: &QuerySubscription) {
        let evicted = {
            let mut inner = self.inner.lock();

            let emptied = match inner.queries.get_mut(&subscription.hash) {
                Some(entry) => {
                    entry
                        .got_callbacks
                        .retain(|(id, _)| *id != subscription.id);
                    entry.ref_count = entry.ref_count.saturating_sub(1);
                    entry.ref_count == 0
                }
                None => false,
            };

            if emptied {
                inner.recent.push(subscription.hash.clone(), ())
            } else {
                None
            }
        };

        if let Some((hash, ())) = evicted {
            self.queue_del(hash);
        }
    }

    /// Queue a `del`, deferring while any mutation is outstanding.
    fn queue_del(&self, hash: String) {
        let mut inner = self.inner.lock();
        inner.queries.shift_remove(&hash);

        if self.tracker.size() > 0 {
            inner.deferred_dels.push(hash);
        } else {
            inner.queued.push(QueriesPatchOp::Del { hash });
        }
    }

    /// Connection bootstrap: the ops that bring the server's view (the
    /// store's desired keys) in line with memory, minus anything a prior
    /// attempt already sent.
    pub fn queries_patch(&self, last_patch: Option<&[QueriesPatchOp]>) -> Vec<QueriesPatchOp> {
        let inner = self.inner.lock();
        let mut ops = vec![];

        let stored: HashSet<String> = self
            .store
            .keys_with_prefix(&store::desired_prefix(&inner.client_id))
            .into_iter()
            .filter_map(|key| store::keys::hash_of_key(&key).map(|h| h.to_string()))
            .collect();

        for hash in inner.queries.keys() {
            if !stored.contains(hash) {
                ops.push(inner.put_op(hash));
            }
        }
        for hash in &stored {
            if !inner.queries.contains_key(hash) {
                ops.push(QueriesPatchOp::Del { hash: hash.clone() });
            }
        }

        if let Some(last) = last_patch {
            ops.retain(|op| !last.contains(op));
        }

        ops
    }

    /// Drain queued ops into one `changeDesiredQueries` message. Driven by
    /// the throttle timer.
    pub fn flush_batch(&self) {
        self.inner.lock().flush();
    }

    /// Run the throttle timer: flush the queued batch every `interval`
    /// until cancelled.
    pub fn spawn_flusher(
        &self,
        interval: std::time::Duration,
        cancel: tokio_util::sync::CancellationToken,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => manager.flush_batch(),
                }
            }
        });
    }

    pub fn desired_len(&self) -> usize {
        self.inner.lock().queries.len()
    }

    #[cfg(test)]
    fn queued_len(&self) -> usize {
        self.inner.lock().queued.len()
    }
}

impl Inner {
    fn clamp_ttl(&mut self, ttl: u64) -> u64 {
        if ttl > MAX_TTL_MS {
            if !self.warned_ttl {
                warn!("query ttl {}ms exceeds maximum, clamping to {}ms", ttl, MAX_TTL_MS);
                self.warned_ttl = true;
            }
            MAX_TTL_MS
        } else {
            ttl
        }
    }

    fn put_op(&self, hash: &str) -> QueriesPatchOp {
        let entry = &self.queries[hash];
        match &entry.spec {
            QuerySpec::Legacy(ast) => QueriesPatchOp::Put {
                hash: hash.to_string(),
                ast: Some(ast.clone()),
                name: None,
                args: None,
                ttl: Some(entry.ttl),
            },
            QuerySpec::Custom { name, args } => QueriesPatchOp::Put {
                hash: hash.to_string(),
                ast: None,
                name: Some(name.clone()),
                args: Some(args.clone()),
                ttl: Some(entry.ttl),
            },
        }
    }

    fn flush(&mut self) {
        if self.queued.is_empty() {
            return;
        }
        let patch = std::mem::take(&mut self.queued);
        (self.send)(ClientMessage::ChangeDesiredQueries {
            desired_queries_patch: patch,
        });
    }
}
