#![forbid(unsafe_code)]

//! Copy-on-write B-tree over fixed-size node pages.

/// Node page format and accessors.
pub mod node;
/// Splitting of overflowing nodes.
pub mod split;
mod cursor;
mod stats;
mod tree;

pub use cursor::Cursor;
pub use node::{NodeBuf, NodeKind, NodeRef};
pub use split::{split_node, SplitNodes};
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use tree::{BTree, BTreeOptions, VerifyReport};

#[cfg(test)]
mod tests;
