use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::meta::{Meta, META_LEN};
use super::{PageRef, PageStore};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::page::validate_page_size;
use crate::types::{BTreeError, PageId, Result};

/// Marker at the start of a page that sits on the free chain.
const FREE_MAGIC: [u8; 4] = *b"FREE";
const FREE_LINK_LEN: usize = 12;

struct FileState {
    meta: Meta,
    // Free chain in allocation order: the last entry is `meta.free_head`.
    free: Vec<PageId>,
}

/// Page store backed by a single file.
///
/// Page 0 holds the [`Meta`] record; page `n` lives at byte offset
/// `n * page_size`. Publishing a root rewrites the meta record, which also
/// persists the allocation high-water mark. Freed pages form a chain: each
/// one stores the id of the page freed before it and the meta record points
/// at the newest, so reclaimed pages are reused after a reopen.
pub struct FilePageStore {
    io: Arc<dyn FileIo>,
    page_size: usize,
    state: Mutex<FileState>,
}

impl FilePageStore {
    /// Creates a new store in an empty file at `path`.
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        validate_page_size(page_size)?;
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path.as_ref())?);
        if !io.is_empty()? {
            return Err(BTreeError::Invalid("refusing to create store over non-empty file"));
        }
        let meta = Meta::new(page_size as u32);
        let mut page0 = vec![0u8; page_size];
        meta.encode(&mut page0)?;
        io.write_at(0, &page0)?;
        tracing::debug!(
            target: "bnode::pager",
            path = %path.as_ref().display(),
            page_size,
            "created file page store"
        );
        Ok(Self {
            io,
            page_size,
            state: Mutex::new(FileState {
                meta,
                free: Vec::new(),
            }),
        })
    }

    /// Opens an existing store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path.as_ref())?);
        let mut hdr = [0u8; META_LEN];
        io.read_at(0, &mut hdr)?;
        let meta = Meta::decode(&hdr)?;
        let page_size = meta.page_size as usize;
        validate_page_size(page_size)
            .map_err(|_| BTreeError::Corruption("meta page size out of range"))?;
        let free = load_free_chain(io.as_ref(), page_size, &meta)?;
        tracing::debug!(
            target: "bnode::pager",
            path = %path.as_ref().display(),
            page_size,
            root = ?meta.root,
            next_page = meta.next_page.0,
            free_pages = free.len(),
            "opened file page store"
        );
        Ok(Self {
            io,
            page_size,
            state: Mutex::new(FileState { meta, free }),
        })
    }

    /// Opens the store at `path`, creating it when the file is missing or empty.
    pub fn open_or_create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let exists = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        if exists {
            let store = Self::open(path)?;
            if store.page_size != page_size {
                return Err(BTreeError::Invalid("store page size differs from requested"));
            }
            Ok(store)
        } else {
            Self::create(path, page_size)
        }
    }

    /// Flushes written pages and metadata to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }

    /// Snapshot of the in-memory metadata.
    pub fn meta(&self) -> Meta {
        self.state.lock().meta.clone()
    }

    fn page_offset(&self, id: PageId) -> u64 {
        id.0 * self.page_size as u64
    }

    fn check_range(state: &FileState, id: PageId) -> Result<()> {
        if id.is_null() || id >= state.meta.next_page {
            return Err(BTreeError::Invalid("page id beyond end of store"));
        }
        Ok(())
    }

    /// Number of pages waiting on the free chain.
    pub fn free_pages(&self) -> usize {
        self.state.lock().free.len()
    }

    fn write_meta(&self, meta: &Meta) -> Result<()> {
        let mut hdr = [0u8; META_LEN];
        meta.encode(&mut hdr)?;
        self.io.write_at(0, &hdr)
    }
}

impl PageStore for FilePageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut state = self.state.lock();
        if let Some(&id) = state.free.last() {
            let mut meta = state.meta.clone();
            meta.free_head = state
                .free
                .len()
                .checked_sub(2)
                .map(|idx| state.free[idx])
                .unwrap_or(PageId::NULL);
            self.write_meta(&meta)?;
            state.meta = meta;
            state.free.pop();
            return Ok(id);
        }
        let id = state.meta.next_page;
        let next = id
            .0
            .checked_add(1)
            .ok_or(BTreeError::AllocationFailure("page id space exhausted"))?;
        state.meta.next_page = PageId(next);
        Ok(id)
    }

    fn read_page(&self, id: PageId) -> Result<PageRef> {
        Self::check_range(&self.state.lock(), id)?;
        let mut buf = vec![0u8; self.page_size];
        self.io.read_at(self.page_offset(id), &mut buf)?;
        Ok(PageRef::from(buf))
    }

    fn write_page(&self, id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(BTreeError::Invalid("page image has wrong length"));
        }
        Self::check_range(&self.state.lock(), id)?;
        self.io.write_at(self.page_offset(id), data)
    }

    fn free_page(&self, id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_range(&state, id)?;
        if state.free.contains(&id) {
            return Err(BTreeError::Invalid("free of unallocated page"));
        }
        let mut link = vec![0u8; self.page_size];
        link[0..4].copy_from_slice(&FREE_MAGIC);
        link[4..FREE_LINK_LEN].copy_from_slice(&state.meta.free_head.0.to_le_bytes());
        self.io.write_at(self.page_offset(id), &link)?;
        let mut meta = state.meta.clone();
        meta.free_head = id;
        self.write_meta(&meta)?;
        state.meta = meta;
        state.free.push(id);
        Ok(())
    }

    fn root(&self) -> Result<Option<PageId>> {
        Ok(self.state.lock().meta.root)
    }

    fn set_root(&self, root: PageId) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_range(&state, root)?;
        let mut meta = state.meta.clone();
        meta.root = Some(root);
        self.write_meta(&meta)?;
        state.meta = meta;
        Ok(())
    }
}

/// Walks the free chain from `meta.free_head` and returns it oldest first.
fn load_free_chain(io: &dyn FileIo, page_size: usize, meta: &Meta) -> Result<Vec<PageId>> {
    let mut chain = Vec::new();
    let mut next = meta.free_head;
    let mut link = [0u8; FREE_LINK_LEN];
    while !next.is_null() {
        if next >= meta.next_page {
            return Err(BTreeError::Corruption("free chain points beyond end of store"));
        }
        if chain.len() as u64 >= meta.next_page.0 || chain.contains(&next) {
            return Err(BTreeError::Corruption("free chain loops"));
        }
        io.read_at(next.0 * page_size as u64, &mut link)?;
        if link[0..4] != FREE_MAGIC {
            return Err(BTreeError::Corruption("free chain page lacks marker"));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&link[4..FREE_LINK_LEN]);
        chain.push(next);
        next = PageId(u64::from_le_bytes(raw));
    }
    chain.reverse();
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pages_survive_reopen() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");
        let id = {
            let store = FilePageStore::create(&path, 256)?;
            let id = store.allocate_page()?;
            store.write_page(id, &[5u8; 256])?;
            store.set_root(id)?;
            store.sync()?;
            id
        };
        let store = FilePageStore::open(&path)?;
        assert_eq!(store.page_size(), 256);
        assert_eq!(store.root()?, Some(id));
        assert!(store.read_page(id)?.iter().all(|b| *b == 5));
        assert_eq!(store.allocate_page()?, PageId(id.0 + 1));
        Ok(())
    }

    #[test]
    fn create_refuses_existing_data() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");
        FilePageStore::create(&path, 128)?;
        assert!(matches!(
            FilePageStore::create(&path, 128),
            Err(BTreeError::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn out_of_range_ids_are_rejected() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let store = FilePageStore::create(dir.path().join("pages.db"), 128)?;
        assert!(matches!(
            store.read_page(PageId(3)),
            Err(BTreeError::Invalid(_))
        ));
        assert!(matches!(
            store.read_page(PageId::NULL),
            Err(BTreeError::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn freed_pages_are_reused() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let store = FilePageStore::create(dir.path().join("pages.db"), 128)?;
        let a = store.allocate_page()?;
        let b = store.allocate_page()?;
        store.free_page(a)?;
        assert!(store.free_page(a).is_err());
        assert_eq!(store.allocate_page()?, a);
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn free_chain_survives_reopen() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");
        let (a, b, c) = {
            let store = FilePageStore::create(&path, 128)?;
            let a = store.allocate_page()?;
            let b = store.allocate_page()?;
            let c = store.allocate_page()?;
            store.free_page(a)?;
            store.free_page(c)?;
            store.sync()?;
            (a, b, c)
        };
        let store = FilePageStore::open(&path)?;
        assert_eq!(store.free_pages(), 2);
        assert_eq!(store.meta().free_head, c);
        assert!(store.free_page(a).is_err());
        assert_eq!(store.allocate_page()?, c);
        assert_eq!(store.allocate_page()?, a);
        assert_eq!(store.meta().free_head, PageId::NULL);
        assert_eq!(store.allocate_page()?, PageId(b.0 + 2));
        Ok(())
    }

    #[test]
    fn allocation_from_free_chain_is_persisted() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");
        {
            let store = FilePageStore::create(&path, 128)?;
            let a = store.allocate_page()?;
            store.allocate_page()?;
            store.free_page(a)?;
            assert_eq!(store.allocate_page()?, a);
        }
        let store = FilePageStore::open(&path)?;
        assert_eq!(store.free_pages(), 0);
        assert_eq!(store.allocate_page()?, PageId(3));
        Ok(())
    }

    #[test]
    fn damaged_free_chain_is_reported() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("pages.db");
        {
            let store = FilePageStore::create(&path, 128)?;
            let a = store.allocate_page()?;
            store.free_page(a)?;
            store.io.write_at(store.page_offset(a), &[0u8; 4])?;
        }
        assert!(matches!(
            FilePageStore::open(&path),
            Err(BTreeError::Corruption("free chain page lacks marker"))
        ));
        Ok(())
    }
}
