//! Materialized views: ref-counted entry trees the pipeline's output is
//! applied to.

pub mod apply;
pub mod format;

pub use apply::apply_change;
pub use format::ViewFormat;

use std::collections::BTreeMap;

use crate::schema::Row;

/// Run a batch of view updates. The callback is invoked exactly once,
/// synchronously, before this returns. Embedders hook frame pacing around
/// this call; pushes inside it stay synchronous.
pub fn batch_view_updates<T>(apply: impl FnOnce() -> T) -> T {
    apply()
}

/// A materialized row plus its hidden fields: the reference count and the
/// nested relationship views.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub row: Row,
    /// Number of producers referencing this row. ≥1 while in view; a
    /// transient 0 only occurs inside edit relocation.
    pub ref_count: u32,
    pub relationships: BTreeMap<String, ViewSlot>,
}

impl Entry {
    pub fn new(row: Row) -> Self {
        Self {
            row,
            ref_count: 1,
            relationships: BTreeMap::new(),
        }
    }
}

/// A view is either a single entry or an ordered sequence under the
/// relationship's sort.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewSlot {
    Singular(Option<Box<Entry>>),
    Ordered(Vec<Entry>),
}

impl ViewSlot {
    pub fn empty(singular: bool) -> Self {
        if singular {
            ViewSlot::Singular(None)
        } else {
            ViewSlot::Ordered(vec![])
        }
    }

    pub fn entries(&self) -> Vec<&Entry> {
        match self {
            ViewSlot::Singular(entry) => entry.iter().map(|e| e.as_ref()).collect(),
            ViewSlot::Ordered(entries) => entries.iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ViewSlot::Singular(entry) => usize::from(entry.is_some()),
            ViewSlot::Ordered(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
