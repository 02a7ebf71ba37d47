//! Index structures built on the page stores.

/// B-tree data structure implementation.
///
/// Node codec, split logic and the copy-on-write tree controller.
pub mod btree;

pub use btree::{BTree, BTreeOptions, Cursor, VerifyReport};
