use std::convert::TryFrom;
use std::ops::Range;

use crate::types::{page_crc32, BTreeError, PageId, Result};

/// File magic stored at the start of page 0.
pub const META_MAGIC: [u8; 4] = *b"BNOD";
/// Current meta page format version.
pub const META_FORMAT_VERSION: u16 = 2;
/// Bytes of page 0 occupied by the meta record.
pub const META_LEN: usize = 40;

const MAGIC: Range<usize> = 0..4;
const FORMAT_VERSION: Range<usize> = 4..6;
const PAGE_SIZE: Range<usize> = 8..12;
const ROOT: Range<usize> = 12..20;
const NEXT_PAGE: Range<usize> = 20..28;
const FREE_HEAD: Range<usize> = 28..36;
const CRC32: Range<usize> = 36..40;

/// Store metadata kept in page 0 of a file-backed store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Meta {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Published root page, if a tree has been created.
    pub root: Option<PageId>,
    /// Next never-used page id.
    pub next_page: PageId,
    /// Most recently freed page, head of the on-disk free chain.
    pub free_head: PageId,
}

impl Meta {
    /// Metadata for a brand-new store.
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            root: None,
            next_page: PageId(1),
            free_head: PageId::NULL,
        }
    }

    /// Encodes the meta record into the first [`META_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < META_LEN {
            return Err(BTreeError::Invalid("meta buffer too small"));
        }
        let hdr = &mut dst[..META_LEN];
        hdr.fill(0);
        hdr[MAGIC].copy_from_slice(&META_MAGIC);
        hdr[FORMAT_VERSION].copy_from_slice(&META_FORMAT_VERSION.to_le_bytes());
        hdr[PAGE_SIZE].copy_from_slice(&self.page_size.to_le_bytes());
        let root = self.root.map(|id| id.0).unwrap_or(0);
        hdr[ROOT].copy_from_slice(&root.to_le_bytes());
        hdr[NEXT_PAGE].copy_from_slice(&self.next_page.0.to_le_bytes());
        hdr[FREE_HEAD].copy_from_slice(&self.free_head.0.to_le_bytes());
        let crc = page_crc32(0, &hdr[..CRC32.start]);
        hdr[CRC32].copy_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    /// Decodes and validates a meta record.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < META_LEN {
            return Err(BTreeError::Corruption("meta record truncated"));
        }
        let hdr = &src[..META_LEN];
        if hdr[MAGIC] != META_MAGIC {
            return Err(BTreeError::Corruption("bad meta magic"));
        }
        let stored_crc = u32::from_le_bytes(fixed(&hdr[CRC32])?);
        if page_crc32(0, &hdr[..CRC32.start]) != stored_crc {
            return Err(BTreeError::Corruption("meta checksum mismatch"));
        }
        let version = u16::from_le_bytes(fixed(&hdr[FORMAT_VERSION])?);
        if version != META_FORMAT_VERSION {
            return Err(BTreeError::Corruption("unsupported meta format version"));
        }
        let page_size = u32::from_le_bytes(fixed(&hdr[PAGE_SIZE])?);
        let root = u64::from_le_bytes(fixed(&hdr[ROOT])?);
        let next_page = u64::from_le_bytes(fixed(&hdr[NEXT_PAGE])?);
        let free_head = u64::from_le_bytes(fixed(&hdr[FREE_HEAD])?);
        if next_page == 0 || root >= next_page || free_head >= next_page {
            return Err(BTreeError::Corruption("meta page ids out of range"));
        }
        Ok(Self {
            page_size,
            root: (root != 0).then_some(PageId(root)),
            next_page: PageId(next_page),
            free_head: PageId(free_head),
        })
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    <[u8; N]>::try_from(bytes).map_err(|_| BTreeError::Corruption("meta field truncated"))
}
