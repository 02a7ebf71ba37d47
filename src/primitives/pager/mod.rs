#![forbid(unsafe_code)]

//! Page storage consumed by the B-tree.
//!
//! The tree never holds raw buffers across operations; it asks a
//! [`PageStore`] for immutable page images, writes replacement images to
//! freshly allocated pages and publishes a new root as the last step of
//! every insert.

use std::sync::Arc;

use crate::types::{PageId, Result};

mod file;
mod mem;
mod meta;

pub use file::FilePageStore;
pub use mem::MemPageStore;
pub use meta::{Meta, META_LEN};

/// Immutable page image handed out by a store.
pub type PageRef = Arc<[u8]>;

/// Fixed-size page storage plus the published root pointer.
pub trait PageStore: Send + Sync + 'static {
    /// Page size in bytes; every image read or written has exactly this length.
    fn page_size(&self) -> usize;
    /// Reserves a page id. The page has no image until it is written.
    fn allocate_page(&self) -> Result<PageId>;
    /// Returns the current image of `id`.
    fn read_page(&self, id: PageId) -> Result<PageRef>;
    /// Stores `data` as the image of `id`.
    fn write_page(&self, id: PageId, data: &[u8]) -> Result<()>;
    /// Returns `id` to the store for reuse.
    fn free_page(&self, id: PageId) -> Result<()>;
    /// Currently published root, if any.
    fn root(&self) -> Result<Option<PageId>>;
    /// Publishes `root`. This is the single visibility point of a write.
    fn set_root(&self, root: PageId) -> Result<()>;
}
