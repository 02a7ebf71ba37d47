//! Fixed layout constants for node pages.
//!
//! ```text
//! | kind | nkeys | pointers   | offsets    | records ... | unused |
//! | 2B   | 2B    | nkeys * 8B | nkeys * 2B |             |        |
//!
//! record: | klen:2B | vlen:2B | key | value |
//! ```
//!
//! Every multi-byte field is little-endian.

use super::{BTreeError, Result};

/// Default page size in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Smallest page size a store accepts.
pub const MIN_PAGE_SIZE: usize = 64;
/// Largest page size a store accepts. Node builders hold up to two pages, and
/// record offsets are stored as `u16`.
pub const MAX_PAGE_SIZE: usize = 16384;

/// Node header length (`kind:u16` + `nkeys:u16`).
pub const NODE_HEADER_LEN: usize = 4;
/// Size of a child pointer slot.
pub const POINTER_LEN: usize = 8;
/// Size of an offset table entry.
pub const OFFSET_LEN: usize = 2;
/// Record header length (`klen:u16` + `vlen:u16`).
pub const RECORD_HEADER_LEN: usize = 4;
/// Bytes a single entry costs beyond its key and value bytes.
pub const ENTRY_OVERHEAD: usize = POINTER_LEN + OFFSET_LEN + RECORD_HEADER_LEN;

/// Checks that `page_size` is usable for node pages.
pub fn validate_page_size(page_size: usize) -> Result<()> {
    if page_size < MIN_PAGE_SIZE {
        return Err(BTreeError::Invalid("page size below minimum"));
    }
    if page_size > MAX_PAGE_SIZE {
        return Err(BTreeError::Invalid("page size above maximum"));
    }
    Ok(())
}
