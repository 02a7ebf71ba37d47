use std::sync::Arc;

use parking_lot::RwLock;

use super::{PageRef, PageStore};
use crate::types::page::validate_page_size;
use crate::types::{BTreeError, PageId, Result};

enum Slot {
    Free,
    Blank,
    Image(PageRef),
}

struct MemInner {
    // Index 0 stands for the null page and stays `Free`.
    slots: Vec<Slot>,
    free: Vec<PageId>,
    live: usize,
    root: Option<PageId>,
}

/// Page store that keeps every page image in memory.
///
/// Images are immutable `Arc<[u8]>` values, so a reader that already fetched a
/// page keeps a consistent copy while a writer installs replacements.
pub struct MemPageStore {
    page_size: usize,
    max_pages: Option<usize>,
    inner: RwLock<MemInner>,
}

impl MemPageStore {
    /// Creates an empty store with pages of `page_size` bytes.
    pub fn new(page_size: usize) -> Result<Self> {
        validate_page_size(page_size)?;
        Ok(Self {
            page_size,
            max_pages: None,
            inner: RwLock::new(MemInner {
                slots: vec![Slot::Free],
                free: Vec::new(),
                live: 0,
                root: None,
            }),
        })
    }

    /// Creates a store that refuses to hold more than `max_pages` live pages.
    pub fn with_page_limit(page_size: usize, max_pages: usize) -> Result<Self> {
        let mut store = Self::new(page_size)?;
        store.max_pages = Some(max_pages);
        Ok(store)
    }

    /// Convenience constructor returning the store behind an `Arc`.
    pub fn shared(page_size: usize) -> Result<Arc<Self>> {
        Self::new(page_size).map(Arc::new)
    }

    /// Number of allocated, not yet freed pages.
    pub fn live_pages(&self) -> usize {
        self.inner.read().live
    }
}

impl PageStore for MemPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.write();
        if let Some(limit) = self.max_pages {
            if inner.live >= limit {
                return Err(BTreeError::AllocationFailure("page limit reached"));
            }
        }
        let id = match inner.free.pop() {
            Some(id) => {
                inner.slots[id.0 as usize] = Slot::Blank;
                id
            }
            None => {
                inner.slots.push(Slot::Blank);
                PageId((inner.slots.len() - 1) as u64)
            }
        };
        inner.live += 1;
        Ok(id)
    }

    fn read_page(&self, id: PageId) -> Result<PageRef> {
        let inner = self.inner.read();
        match inner.slots.get(id.0 as usize) {
            Some(Slot::Image(image)) => Ok(Arc::clone(image)),
            Some(Slot::Blank) => Err(BTreeError::Invalid("read of unwritten page")),
            Some(Slot::Free) | None => Err(BTreeError::Invalid("read of unallocated page")),
        }
    }

    fn write_page(&self, id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(BTreeError::Invalid("page image has wrong length"));
        }
        let mut inner = self.inner.write();
        let slot = inner
            .slots
            .get_mut(id.0 as usize)
            .ok_or(BTreeError::Invalid("write to unallocated page"))?;
        if matches!(slot, Slot::Free) {
            return Err(BTreeError::Invalid("write to unallocated page"));
        }
        *slot = Slot::Image(Arc::from(data));
        Ok(())
    }

    fn free_page(&self, id: PageId) -> Result<()> {
        let mut inner = self.inner.write();
        let slot = inner
            .slots
            .get_mut(id.0 as usize)
            .ok_or(BTreeError::Invalid("free of unallocated page"))?;
        if matches!(slot, Slot::Free) {
            return Err(BTreeError::Invalid("free of unallocated page"));
        }
        *slot = Slot::Free;
        inner.free.push(id);
        inner.live -= 1;
        Ok(())
    }

    fn root(&self) -> Result<Option<PageId>> {
        Ok(self.inner.read().root)
    }

    fn set_root(&self, root: PageId) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.slots.get(root.0 as usize) {
            Some(Slot::Image(_)) => {
                inner.root = Some(root);
                Ok(())
            }
            _ => Err(BTreeError::Invalid("root must be a written page")),
        }
    }
}
