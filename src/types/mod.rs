#![forbid(unsafe_code)]

//! Identifiers, errors and on-page constants shared by every layer.

use std::fmt;

pub mod checksum;
pub mod page;

pub use checksum::page_crc32;

/// Identifier of a fixed-size page inside a [`crate::primitives::pager::PageStore`].
///
/// `PageId(0)` is the null page: it is never handed out by a store and is what
/// an unused pointer slot on a leaf decodes to.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PageId(pub u64);

impl PageId {
    /// The null page reference.
    pub const NULL: PageId = PageId(0);

    /// Returns true for the null page reference.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by the node codec, the tree controller and the page stores.
#[derive(thiserror::Error, Debug)]
pub enum BTreeError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A page image failed a structural check.
    #[error("corrupt node: {0}")]
    CorruptNode(&'static str),
    /// Store metadata (not a node image) failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A single key/value pair is too large to be stored in a page.
    #[error("record of {len} bytes exceeds the {max} byte entry limit")]
    OversizedRecord {
        /// Encoded entry length, including pointer, offset and record header.
        len: usize,
        /// Largest entry length accepted for the page size in use.
        max: usize,
    },
    /// The requested key is not present in the tree.
    #[error("key not found")]
    KeyNotFound,
    /// The page store could not provide a new page.
    #[error("page allocation failed: {0}")]
    AllocationFailure(&'static str),
    /// A caller supplied an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration could not be loaded or failed validation.
    #[error("config: {0}")]
    Config(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BTreeError>;
