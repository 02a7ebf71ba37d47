use smallvec::SmallVec;

use super::{BTree, MAX_DEPTH};
use crate::primitives::pager::{PageRef, PageStore};
use crate::storage::btree::node::{entry_len, max_entry_len, NodeBuf, NodeKind, NodeRef};
use crate::storage::btree::split::split_node;
use crate::types::{BTreeError, PageId, Result};

/// A page on the root-to-leaf path, with the slot the descent took.
struct PathEntry {
    page_id: PageId,
    page: PageRef,
    slot: usize,
}

/// What a rewritten level hands to its parent.
enum InsertOutcome {
    Done {
        page: PageId,
    },
    Split {
        left_min: Vec<u8>,
        left_page: PageId,
        right_min: Vec<u8>,
        right_page: PageId,
    },
}

/// Pages written by one insert that has not been published yet.
struct PendingWrite<'a> {
    store: &'a dyn PageStore,
    page_size: usize,
    allocated: Vec<PageId>,
    leaf_splits: u64,
    internal_splits: u64,
}

impl<'a> PendingWrite<'a> {
    fn new(store: &'a dyn PageStore, page_size: usize) -> Self {
        Self {
            store,
            page_size,
            allocated: Vec::new(),
            leaf_splits: 0,
            internal_splits: 0,
        }
    }

    fn write_node(&mut self, node: NodeBuf) -> Result<PageId> {
        let image = node.into_page(self.page_size)?;
        let id = self.store.allocate_page()?;
        self.allocated.push(id);
        self.store.write_page(id, &image)?;
        Ok(id)
    }

    /// Writes `node`, splitting it first when it no longer fits a page.
    fn finish_node(&mut self, node: NodeBuf) -> Result<InsertOutcome> {
        if node.num_bytes()? <= self.page_size {
            let page = self.write_node(node)?;
            return Ok(InsertOutcome::Done { page });
        }
        let (split, kind) = {
            let view = node.as_node()?;
            (split_node(&view, self.page_size)?, view.kind())
        };
        let left_min = split.left.as_node()?.key(0)?.to_vec();
        let right_min = split.separator;
        let split_at = split.split_at;
        let left_page = self.write_node(split.left)?;
        let right_page = self.write_node(split.right)?;
        match kind {
            NodeKind::Leaf => self.leaf_splits += 1,
            NodeKind::Internal => self.internal_splits += 1,
        }
        tracing::trace!(
            target: "bnode::btree::split",
            kind = ?kind,
            split_at,
            left = left_page.0,
            right = right_page.0,
            "split page"
        );
        Ok(InsertOutcome::Split {
            left_min,
            left_page,
            right_min,
            right_page,
        })
    }

    fn rollback(self) {
        for id in self.allocated.iter().rev() {
            if let Err(err) = self.store.free_page(*id) {
                tracing::warn!(
                    target: "bnode::btree::insert",
                    page = id.0,
                    error = %err,
                    "failed to release page of aborted insert"
                );
            }
        }
    }
}

fn key_count(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| BTreeError::Invalid("node key count overflow"))
}

/// Rebuilds `leaf` with `key` set to `value`. Returns the new node and
/// whether an existing record was replaced.
fn leaf_with_record(
    leaf: &NodeRef<'_>,
    key: &[u8],
    value: &[u8],
    page_size: usize,
) -> Result<(NodeBuf, bool)> {
    let len = leaf.len();
    let idx = leaf.lookup_le(key)?;
    let mut out = NodeBuf::new(page_size);
    if leaf.key(idx)? == key {
        out.set_header(NodeKind::Leaf, key_count(len)?);
        out.append_range(leaf, 0, 0, idx)?;
        out.append_record(idx, PageId::NULL, key, value)?;
        out.append_range(leaf, idx + 1, idx + 1, len - idx - 1)?;
        Ok((out, true))
    } else {
        out.set_header(NodeKind::Leaf, key_count(len + 1)?);
        out.append_range(leaf, 0, 0, idx + 1)?;
        out.append_record(idx + 1, PageId::NULL, key, value)?;
        out.append_range(leaf, idx + 2, idx + 1, len - idx - 1)?;
        Ok((out, false))
    }
}

/// Rebuilds `parent` around the rewritten child at `slot`.
fn internal_with_child(
    parent: &NodeRef<'_>,
    slot: usize,
    child: InsertOutcome,
    page_size: usize,
) -> Result<NodeBuf> {
    let len = parent.len();
    let mut out = NodeBuf::new(page_size);
    match child {
        InsertOutcome::Done { page } => {
            out.set_header(NodeKind::Internal, key_count(len)?);
            out.append_range(parent, 0, 0, slot)?;
            out.append_record(slot, page, parent.key(slot)?, &[])?;
            out.append_range(parent, slot + 1, slot + 1, len - slot - 1)?;
        }
        InsertOutcome::Split {
            left_min,
            left_page,
            right_min,
            right_page,
        } => {
            out.set_header(NodeKind::Internal, key_count(len + 1)?);
            out.append_range(parent, 0, 0, slot)?;
            out.append_record(slot, left_page, &left_min, &[])?;
            out.append_record(slot + 1, right_page, &right_min, &[])?;
            out.append_range(parent, slot + 2, slot + 1, len - slot - 1)?;
        }
    }
    Ok(out)
}

impl BTree {
    /// Inserts `key` with `value`, replacing the value if the key exists.
    ///
    /// The insert either publishes a new root covering the change or fails
    /// leaving the previously published tree untouched.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(BTreeError::Invalid("keys must be non-empty"));
        }
        let len = entry_len(key.len(), value.len());
        let max = max_entry_len(self.page_size);
        if len > max {
            return Err(BTreeError::OversizedRecord { len, max });
        }

        let _writer = self.writer.lock();
        let old_root = self.root_page()?;
        let (path, leaf_id, leaf_page) = self.collect_path(old_root, key)?;

        let mut pending = PendingWrite::new(self.store.as_ref(), self.page_size);
        let applied = self.rewrite_path(&mut pending, &path, &leaf_page, key, value);
        let (new_root, updated, root_split) = match applied {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    target: "bnode::btree::insert",
                    error = %err,
                    pages = pending.allocated.len(),
                    "insert aborted; releasing written pages"
                );
                pending.rollback();
                return Err(err);
            }
        };

        if let Err(err) = self.store.set_root(new_root) {
            tracing::warn!(
                target: "bnode::btree::insert",
                error = %err,
                root = new_root.0,
                "failed to publish root; releasing written pages"
            );
            pending.rollback();
            return Err(err);
        }

        self.stats.add_pages_allocated(pending.allocated.len() as u64);
        self.stats.add_leaf_splits(pending.leaf_splits);
        self.stats.add_internal_splits(pending.internal_splits);
        if updated {
            self.stats.inc_leaf_updates();
        } else {
            self.stats.inc_leaf_inserts();
        }
        if root_split {
            self.stats.inc_root_splits();
            tracing::debug!(
                target: "bnode::btree::insert",
                old_root = old_root.0,
                new_root = new_root.0,
                "root split; tree grew one level"
            );
        }

        if self.options.reclaim_replaced_pages {
            let retired = path
                .iter()
                .map(|entry| entry.page_id)
                .chain(std::iter::once(leaf_id));
            self.retire_pages(retired);
        }
        Ok(())
    }

    /// Reads and validates every page from `root` to the leaf covering `key`.
    fn collect_path(
        &self,
        root: PageId,
        key: &[u8],
    ) -> Result<(SmallVec<[PathEntry; 8]>, PageId, PageRef)> {
        let mut path: SmallVec<[PathEntry; 8]> = SmallVec::new();
        let mut current = root;
        for _ in 0..MAX_DEPTH {
            let page = self.load(current)?;
            let node = NodeRef::parse(&page)?;
            if node.is_empty() {
                return Err(BTreeError::CorruptNode("node without entries"));
            }
            if node.num_bytes() > self.page_size {
                return Err(BTreeError::CorruptNode("node larger than page"));
            }
            let slot = node.lookup_le(key)?;
            match node.kind() {
                NodeKind::Leaf => {
                    self.stats.inc_leaf_searches();
                    return Ok((path, current, page));
                }
                NodeKind::Internal => {
                    self.stats.inc_internal_searches();
                    let child = node
                        .pointer(slot)
                        .ok_or(BTreeError::CorruptNode("internal slot without child"))?;
                    path.push(PathEntry {
                        page_id: current,
                        page: page.clone(),
                        slot,
                    });
                    current = child;
                }
            }
        }
        Err(BTreeError::CorruptNode("tree deeper than supported"))
    }

    /// Writes replacement pages bottom-up. Returns the new root, whether the
    /// leaf record was an update, and whether the root split.
    fn rewrite_path(
        &self,
        pending: &mut PendingWrite<'_>,
        path: &[PathEntry],
        leaf_page: &PageRef,
        key: &[u8],
        value: &[u8],
    ) -> Result<(PageId, bool, bool)> {
        let leaf = NodeRef::parse(leaf_page)?;
        let (rebuilt, updated) = leaf_with_record(&leaf, key, value, self.page_size)?;
        let mut outcome = pending.finish_node(rebuilt)?;

        for entry in path.iter().rev() {
            let parent = NodeRef::parse(&entry.page)?;
            let rebuilt = internal_with_child(&parent, entry.slot, outcome, self.page_size)?;
            outcome = pending.finish_node(rebuilt)?;
        }

        match outcome {
            InsertOutcome::Done { page } => Ok((page, updated, false)),
            InsertOutcome::Split {
                left_min,
                left_page,
                right_min,
                right_page,
            } => {
                let mut root = NodeBuf::new(self.page_size);
                root.set_header(NodeKind::Internal, 2);
                root.append_record(0, left_page, &left_min, &[])?;
                root.append_record(1, right_page, &right_min, &[])?;
                let page = pending.write_node(root)?;
                Ok((page, updated, true))
            }
        }
    }
}
