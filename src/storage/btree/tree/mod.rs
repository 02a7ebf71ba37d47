use std::sync::Arc;

use parking_lot::Mutex;

use super::cursor::Cursor;
use super::node::{NodeBuf, NodeKind, NodeRef};
use super::stats::{BTreeStats, BTreeStatsSnapshot};
use crate::primitives::pager::{PageRef, PageStore};
use crate::types::page::validate_page_size;
use crate::types::{BTreeError, PageId, Result};

mod insert;
mod readers;
mod verify;

use readers::ReaderRegistry;
pub(crate) use readers::ReaderGuard;

pub use verify::VerifyReport;

/// Deepest tree a descent will follow before declaring the structure corrupt.
pub(crate) const MAX_DEPTH: usize = 32;

/// Configuration knobs for the B-tree.
#[derive(Clone, Debug)]
pub struct BTreeOptions {
    /// Free the pages an insert replaced once no reader can still reach them.
    ///
    /// Frees are deferred while lookups or cursors that started on an older
    /// root are running. Disable to keep every replaced page readable.
    pub reclaim_replaced_pages: bool,
    /// Run [`BTree::verify`] when opening an existing tree.
    pub verify_on_open: bool,
}

impl Default for BTreeOptions {
    fn default() -> Self {
        Self {
            reclaim_replaced_pages: true,
            verify_on_open: false,
        }
    }
}

/// Copy-on-write B-tree over byte keys and byte values.
///
/// Every insert rewrites the pages on its root-to-leaf path into freshly
/// allocated pages and publishes the new root through
/// [`PageStore::set_root`]. Lookups and cursors register as readers before
/// reading the published root, so the pages they can reach stay intact until
/// they finish and they never observe a half-applied insert.
pub struct BTree {
    store: Arc<dyn PageStore>,
    page_size: usize,
    options: BTreeOptions,
    stats: Arc<BTreeStats>,
    writer: Mutex<()>,
    readers: ReaderRegistry,
}

impl BTree {
    /// Open an existing tree or create a brand-new one if the store has no root yet.
    pub fn open_or_create(store: &Arc<dyn PageStore>, options: BTreeOptions) -> Result<Self> {
        let store = Arc::clone(store);
        let page_size = store.page_size();
        validate_page_size(page_size)?;
        let tree = Self {
            store,
            page_size,
            options,
            stats: Arc::new(BTreeStats::default()),
            writer: Mutex::new(()),
            readers: ReaderRegistry::default(),
        };
        match tree.store.root()? {
            Some(root) => {
                NodeRef::parse(&tree.load(root)?)?;
                tracing::debug!(
                    target: "bnode::btree::tree",
                    root = root.0,
                    page_size,
                    "opened existing tree"
                );
                if tree.options.verify_on_open {
                    let report = tree.verify()?;
                    tracing::debug!(
                        target: "bnode::btree::tree",
                        depth = report.depth,
                        keys = report.keys,
                        "verified tree on open"
                    );
                }
            }
            None => {
                let root = tree.create_sentinel_root()?;
                tracing::debug!(
                    target: "bnode::btree::tree",
                    root = root.0,
                    page_size,
                    "created tree with sentinel leaf"
                );
            }
        }
        Ok(tree)
    }

    fn create_sentinel_root(&self) -> Result<PageId> {
        let mut leaf = NodeBuf::new(self.page_size);
        leaf.set_header(NodeKind::Leaf, 1);
        leaf.append_record(0, PageId::NULL, &[], &[])?;
        let image = leaf.into_page(self.page_size)?;
        let id = self.store.allocate_page()?;
        let published = self
            .store
            .write_page(id, &image)
            .and_then(|()| self.store.set_root(id));
        if let Err(err) = published {
            if let Err(free_err) = self.store.free_page(id) {
                tracing::warn!(
                    target: "bnode::btree::tree",
                    page = id.0,
                    error = %free_err,
                    "failed to release sentinel page"
                );
            }
            return Err(err);
        }
        Ok(id)
    }

    /// Return the currently published root page.
    pub fn root_page(&self) -> Result<PageId> {
        self.store
            .root()?
            .ok_or(BTreeError::Corruption("store has no published root"))
    }

    /// Page size shared by the tree and its store.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Options the tree was opened with.
    pub fn options(&self) -> &BTreeOptions {
        &self.options
    }

    /// Access the live statistics counters for this tree.
    pub fn stats(&self) -> Arc<BTreeStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot the current statistics counters.
    pub fn stats_snapshot(&self) -> BTreeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Emit the current statistics to the tracing sink.
    pub fn emit_stats(&self) {
        self.stats.emit_tracing();
    }

    pub(crate) fn load(&self, id: PageId) -> Result<PageRef> {
        self.store.read_page(id)
    }

    /// Returns the value stored under `key`, if any.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(BTreeError::Invalid("keys must be non-empty"));
        }
        let _reader = self.begin_read();
        let mut current = self.root_page()?;
        for _ in 0..MAX_DEPTH {
            let page = self.load(current)?;
            let node = NodeRef::parse(&page)?;
            if node.is_empty() {
                return Err(BTreeError::CorruptNode("node without entries"));
            }
            let idx = node.lookup_le(key)?;
            match node.kind() {
                NodeKind::Internal => {
                    self.stats.inc_internal_searches();
                    current = node
                        .pointer(idx)
                        .ok_or(BTreeError::CorruptNode("internal slot without child"))?;
                }
                NodeKind::Leaf => {
                    self.stats.inc_leaf_searches();
                    let (found, value) = node.record(idx)?;
                    return Ok((found == key).then(|| value.to_vec()));
                }
            }
        }
        Err(BTreeError::CorruptNode("tree deeper than supported"))
    }

    /// Like [`BTree::lookup`] but reports an absent key as [`BTreeError::KeyNotFound`].
    pub fn lookup_required(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.lookup(key)?.ok_or(BTreeError::KeyNotFound)
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Number of levels from the root down to the leaves; a lone root leaf is depth 1.
    pub fn depth(&self) -> Result<usize> {
        let _reader = self.begin_read();
        let mut current = self.root_page()?;
        for depth in 1..=MAX_DEPTH {
            let page = self.load(current)?;
            let node = NodeRef::parse(&page)?;
            match node.kind() {
                NodeKind::Leaf => return Ok(depth),
                NodeKind::Internal => {
                    current = node
                        .pointer(0)
                        .ok_or(BTreeError::CorruptNode("internal slot without child"))?;
                }
            }
        }
        Err(BTreeError::CorruptNode("tree deeper than supported"))
    }

    /// Ordered cursor over every user record.
    pub fn cursor(&self) -> Result<Cursor<'_>> {
        Cursor::new(self, &[])
    }

    /// Ordered cursor over user records with keys `>= start`.
    pub fn range_from(&self, start: &[u8]) -> Result<Cursor<'_>> {
        Cursor::new(self, start)
    }

    /// Calls `visit` for every user record in key order.
    pub fn for_each<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        for entry in self.cursor()? {
            let (key, value) = entry?;
            visit(&key, &value)?;
        }
        Ok(())
    }
}
