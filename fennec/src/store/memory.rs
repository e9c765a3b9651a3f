use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// One observed key change.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    pub op: DiffOp,
    pub key: String,
    pub new_value: Option<serde_json::Value>,
    pub old_value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Add,
    Del,
    Change,
}

/// A batch of writes applied atomically in one commit.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<(String, Option<serde_json::Value>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl ToString, value: serde_json::Value) -> &mut Self {
        self.ops.push((key.to_string(), Some(value)));
        self
    }

    pub fn del(&mut self, key: impl ToString) -> &mut Self {
        self.ops.push((key.to_string(), None));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

type WatchCallback = Box<dyn FnMut(&[Diff]) + Send>;

struct Watcher {
    id: u64,
    prefix: String,
    callback: WatchCallback,
}

#[derive(Default)]
struct Inner {
    map: BTreeMap<String, serde_json::Value>,
    watchers: Vec<Watcher>,
    next_watcher: u64,
    /// Commits awaiting watcher dispatch, in commit order.
    pending: Vec<Vec<Diff>>,
    notifying: bool,
}

/// Ordered in-memory keyed store.
///
/// Watch callbacks observe commits in the order they land. A callback may
/// read or write the store; nested commits queue behind the active
/// dispatch instead of re-entering it.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().map.get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    pub fn set(&self, key: impl ToString, value: serde_json::Value) {
        let mut batch = WriteBatch::new();
        batch.set(key, value);
        self.write(batch);
    }

    pub fn del(&self, key: &str) {
        let mut batch = WriteBatch::new();
        batch.del(key);
        self.write(batch);
    }

    /// Keys and values under a prefix, in key order.
    pub fn scan_prefix(&self, prefix: &str) -> Vec<(String, serde_json::Value)> {
        let inner = self.inner.lock();
        inner
            .map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.scan_prefix(prefix).into_iter().map(|(k, _)| k).collect()
    }

    /// Apply a batch atomically and notify watchers with the resulting
    /// diffs, in commit order.
    pub fn write(&self, batch: WriteBatch) {
        let mut diffs: BTreeMap<String, Diff> = BTreeMap::new();
        {
            let mut inner = self.inner.lock();
            for (key, value) in batch.ops {
                let old_value = inner.map.get(&key).cloned();
                match value {
                    Some(value) => {
                        let op = if old_value.is_some() {
                            DiffOp::Change
                        } else {
                            DiffOp::Add
                        };
                        if old_value.as_ref() == Some(&value) {
                            continue;
                        }
                        inner.map.insert(key.clone(), value.clone());
                        merge_diff(&mut diffs, key, op, Some(value), old_value);
                    }
                    None => {
                        if old_value.is_none() {
                            continue;
                        }
                        inner.map.remove(&key);
                        merge_diff(&mut diffs, key, DiffOp::Del, None, old_value);
                    }
                }
            }
        }

        if diffs.is_empty() {
            return;
        }

        {
            let mut inner = self.inner.lock();
            inner.pending.push(diffs.into_values().collect());
            if inner.notifying {
                // The active dispatch will pick this commit up in order.
                return;
            }
            inner.notifying = true;
        }

        self.drain_pending();
    }

    fn drain_pending(&self) {
        loop {
            let (diffs, mut watchers) = {
                let mut inner = self.inner.lock();
                if inner.pending.is_empty() {
                    inner.notifying = false;
                    return;
                }
                let diffs = inner.pending.remove(0);
                // Watchers are moved out while running so a callback may
                // touch the store without re-entering the lock.
                (diffs, std::mem::take(&mut inner.watchers))
            };

            for watcher in watchers.iter_mut() {
                let matching: Vec<Diff> = diffs
                    .iter()
                    .filter(|d| d.key.starts_with(&watcher.prefix))
                    .cloned()
                    .collect();
                if !matching.is_empty() {
                    (watcher.callback)(&matching);
                }
            }

            let mut inner = self.inner.lock();
            // New watchers registered by callbacks land behind the set.
            let added = std::mem::take(&mut inner.watchers);
            watchers.extend(added);
            inner.watchers = watchers;
        }
    }

    /// Observe changes under a prefix. With `initial`, current entries are
    /// delivered as adds before any commit diff.
    pub fn watch(
        &self,
        prefix: &str,
        initial: bool,
        mut callback: WatchCallback,
    ) -> u64 {
        if initial {
            let existing: Vec<Diff> = self
                .scan_prefix(prefix)
                .into_iter()
                .map(|(key, value)| Diff {
                    op: DiffOp::Add,
                    key,
                    new_value: Some(value),
                    old_value: None,
                })
                .collect();
            if !existing.is_empty() {
                callback(&existing);
            }
        }

        let mut inner = self.inner.lock();
        let id = inner.next_watcher;
        inner.next_watcher += 1;
        inner.watchers.push(Watcher {
            id,
            prefix: prefix.to_string(),
            callback,
        });
        id
    }

    pub fn unwatch(&self, id: u64) {
        self.inner.lock().watchers.retain(|w| w.id != id);
    }
}

fn merge_diff(
    diffs: &mut BTreeMap<String, Diff>,
    key: String,
    op: DiffOp,
    new_value: Option<serde_json::Value>,
    old_value: Option<serde_json::Value>,
) {
    match diffs.remove(&key) {
        // Two writes to one key in a batch collapse to their net effect.
        Some(first) => {
            let op = match (first.op, op) {
                (DiffOp::Add, DiffOp::Del) => {
                    return;
                }
                (DiffOp::Add, _) => DiffOp::Add,
                (_, DiffOp::Del) => DiffOp::Del,
                _ => DiffOp::Change,
            };
            diffs.insert(
                key.clone(),
                Diff {
                    op,
                    key,
                    new_value,
                    old_value: first.old_value,
                },
            );
        }
        None => {
            diffs.insert(
                key.clone(),
                Diff {
                    op,
                    key,
                    new_value,
                    old_value,
                },
            );
        }
    }
}
