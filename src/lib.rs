//! Disk-friendly copy-on-write B-tree: a byte-exact node page format and the
//! insert-with-split algorithm on top of it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use config::Config;
pub use primitives::pager::{FilePageStore, MemPageStore, PageStore};
pub use storage::btree::{BTree, BTreeOptions, BTreeStatsSnapshot, Cursor, VerifyReport};
pub use types::{BTreeError, PageId, Result};
