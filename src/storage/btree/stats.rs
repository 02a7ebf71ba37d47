use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of B-tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeStatsSnapshot {
    /// Number of leaf page searches performed
    pub leaf_searches: u64,
    /// Number of internal page searches performed
    pub internal_searches: u64,
    /// Number of inserts that added a new record to a leaf
    pub leaf_inserts: u64,
    /// Number of inserts that replaced the value of an existing key
    pub leaf_updates: u64,
    /// Number of leaf page splits performed
    pub leaf_splits: u64,
    /// Number of internal page splits performed
    pub internal_splits: u64,
    /// Number of times a split reached the root and grew the tree
    pub root_splits: u64,
    /// Number of pages allocated by committed inserts
    pub pages_allocated: u64,
    /// Number of replaced pages handed back to the store
    pub pages_reclaimed: u64,
}

/// Thread-safe statistics tracking for B-tree operations.
#[derive(Default, Debug)]
pub struct BTreeStats {
    leaf_searches: AtomicU64,
    internal_searches: AtomicU64,
    leaf_inserts: AtomicU64,
    leaf_updates: AtomicU64,
    leaf_splits: AtomicU64,
    internal_splits: AtomicU64,
    root_splits: AtomicU64,
    pages_allocated: AtomicU64,
    pages_reclaimed: AtomicU64,
}

impl BTreeStats {
    /// Returns the current count of leaf page searches.
    pub fn leaf_searches(&self) -> u64 {
        self.leaf_searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page searches.
    pub fn internal_searches(&self) -> u64 {
        self.internal_searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of inserts that added a record.
    pub fn leaf_inserts(&self) -> u64 {
        self.leaf_inserts.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of inserts that updated an existing key.
    pub fn leaf_updates(&self) -> u64 {
        self.leaf_updates.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of leaf page splits.
    pub fn leaf_splits(&self) -> u64 {
        self.leaf_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page splits.
    pub fn internal_splits(&self) -> u64 {
        self.internal_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of splits that grew a new root.
    pub fn root_splits(&self) -> u64 {
        self.root_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of pages allocated by committed inserts.
    pub fn pages_allocated(&self) -> u64 {
        self.pages_allocated.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of replaced pages freed back to the store.
    pub fn pages_reclaimed(&self) -> u64 {
        self.pages_reclaimed.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_leaf_searches(&self) {
        self.leaf_searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_searches(&self) {
        self.internal_searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_inserts(&self) {
        self.leaf_inserts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_updates(&self) {
        self.leaf_updates.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn add_leaf_splits(&self, count: u64) {
        self.leaf_splits.fetch_add(count, AtomicOrdering::Relaxed);
    }

    pub(crate) fn add_internal_splits(&self, count: u64) {
        self.internal_splits.fetch_add(count, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_splits(&self) {
        self.root_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn add_pages_allocated(&self, count: u64) {
        self.pages_allocated
            .fetch_add(count, AtomicOrdering::Relaxed);
    }

    pub(crate) fn add_pages_reclaimed(&self, count: u64) {
        self.pages_reclaimed
            .fetch_add(count, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            leaf_searches: self.leaf_searches(),
            internal_searches: self.internal_searches(),
            leaf_inserts: self.leaf_inserts(),
            leaf_updates: self.leaf_updates(),
            leaf_splits: self.leaf_splits(),
            internal_splits: self.internal_splits(),
            root_splits: self.root_splits(),
            pages_allocated: self.pages_allocated(),
            pages_reclaimed: self.pages_reclaimed(),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "bnode::btree::stats",
            leaf_searches = snapshot.leaf_searches,
            internal_searches = snapshot.internal_searches,
            leaf_inserts = snapshot.leaf_inserts,
            leaf_updates = snapshot.leaf_updates,
            leaf_splits = snapshot.leaf_splits,
            internal_splits = snapshot.internal_splits,
            root_splits = snapshot.root_splits,
            pages_allocated = snapshot.pages_allocated,
            pages_reclaimed = snapshot.pages_reclaimed,
            "btree stats snapshot"
        );
    }
}
