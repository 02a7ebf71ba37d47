use parking_lot::Mutex;

use super::BTree;
use crate::types::PageId;

#[derive(Default)]
struct ReaderState {
    active: usize,
    retired: Vec<PageId>,
}

/// Tracks readers walking the tree and the replaced pages they may still reach.
///
/// A page retired by an insert is only handed back to the store once every
/// reader that registered before the new root was published has finished.
#[derive(Default)]
pub(crate) struct ReaderRegistry {
    state: Mutex<ReaderState>,
}

impl ReaderRegistry {
    fn enter(&self) {
        self.state.lock().active += 1;
    }

    /// Drops one reader and returns the pages that became unreachable.
    fn leave(&self) -> Vec<PageId> {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            std::mem::take(&mut state.retired)
        } else {
            Vec::new()
        }
    }

    /// Queues `pages` and returns what may be freed right away.
    fn retire(&self, pages: impl IntoIterator<Item = PageId>) -> Vec<PageId> {
        let mut state = self.state.lock();
        state.retired.extend(pages);
        if state.active == 0 {
            std::mem::take(&mut state.retired)
        } else {
            Vec::new()
        }
    }

    fn snapshot(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.active, state.retired.len())
    }
}

/// Registration of one reader; releases deferred pages when the last one drops.
pub(crate) struct ReaderGuard<'a> {
    tree: &'a BTree,
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        let ready = self.tree.readers.leave();
        if !ready.is_empty() {
            self.tree.free_retired(ready);
        }
    }
}

impl BTree {
    /// Registers a reader. Must be taken before the root is read.
    pub(crate) fn begin_read(&self) -> ReaderGuard<'_> {
        self.readers.enter();
        ReaderGuard { tree: self }
    }

    /// Hands replaced pages to the reclaimer once no reader can reach them.
    pub(crate) fn retire_pages(&self, pages: impl IntoIterator<Item = PageId>) {
        let ready = self.readers.retire(pages);
        if !ready.is_empty() {
            self.free_retired(ready);
        }
    }

    /// Replaced pages still waiting for older readers to finish.
    pub fn pages_awaiting_reclaim(&self) -> usize {
        self.readers.snapshot().1
    }

    fn free_retired(&self, pages: Vec<PageId>) {
        let mut freed = 0u64;
        for id in pages {
            match self.store.free_page(id) {
                Ok(()) => freed += 1,
                Err(err) => tracing::warn!(
                    target: "bnode::btree::reclaim",
                    page = id.0,
                    error = %err,
                    "failed to reclaim replaced page"
                ),
            }
        }
        if freed > 0 {
            tracing::trace!(target: "bnode::btree::reclaim", freed, "reclaimed replaced pages");
        }
        self.stats.add_pages_reclaimed(freed);
    }
}
