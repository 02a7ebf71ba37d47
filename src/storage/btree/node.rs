use std::convert::TryFrom;

use crate::types::page::{
    ENTRY_OVERHEAD, NODE_HEADER_LEN, OFFSET_LEN, POINTER_LEN, RECORD_HEADER_LEN,
};
use crate::types::{BTreeError, PageId, Result};

const KIND_OFFSET: usize = 0;
const NKEYS_OFFSET: usize = 2;

/// Logical kind of a node page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    /// Leaf page holding user key/value records.
    Leaf = 1,
    /// Internal page holding separator keys and child pointers.
    Internal = 2,
}

impl NodeKind {
    /// Converts the on-page discriminant to a [`NodeKind`].
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            1 => Ok(Self::Leaf),
            2 => Ok(Self::Internal),
            _ => Err(BTreeError::CorruptNode("unknown node kind")),
        }
    }

    /// Returns the on-page discriminant.
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Bytes an entry with the given key and value lengths adds to a node.
pub fn entry_len(key_len: usize, value_len: usize) -> usize {
    ENTRY_OVERHEAD + key_len + value_len
}

/// Largest entry accepted for `page_size`.
///
/// Capping entries at half the usable page guarantees that any node which
/// overflows by a single entry can be split into two nodes that both fit.
pub fn max_entry_len(page_size: usize) -> usize {
    page_size.saturating_sub(NODE_HEADER_LEN) / 2
}

fn records_start(nkeys: usize) -> usize {
    NODE_HEADER_LEN + nkeys * (POINTER_LEN + OFFSET_LEN)
}

fn pointer_pos(idx: usize) -> usize {
    NODE_HEADER_LEN + idx * POINTER_LEN
}

fn offset_pos(nkeys: usize, idx: usize) -> usize {
    debug_assert!(idx >= 1);
    NODE_HEADER_LEN + nkeys * POINTER_LEN + (idx - 1) * OFFSET_LEN
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16> {
    let bytes = buf
        .get(pos..pos + 2)
        .ok_or(BTreeError::CorruptNode("u16 field beyond page"))?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u64(buf: &[u8], pos: usize) -> Result<u64> {
    let bytes = buf
        .get(pos..pos + 8)
        .ok_or(BTreeError::CorruptNode("u64 field beyond page"))?;
    let arr = <[u8; 8]>::try_from(bytes)
        .map_err(|_| BTreeError::CorruptNode("u64 field beyond page"))?;
    Ok(u64::from_le_bytes(arr))
}

fn write_bytes(buf: &mut [u8], pos: usize, src: &[u8]) -> Result<()> {
    let dst = buf
        .get_mut(pos..pos + src.len())
        .ok_or(BTreeError::Invalid("node buffer overflow"))?;
    dst.copy_from_slice(src);
    Ok(())
}

/// Read-only view over a validated node image.
///
/// [`NodeRef::parse`] checks the header, the pointer and offset tables and the
/// framing of every record once, so that later accessors can only fail on a
/// caller-supplied index that is out of range.
#[derive(Clone, Copy, Debug)]
pub struct NodeRef<'a> {
    buf: &'a [u8],
    kind: NodeKind,
    nkeys: u16,
    used: usize,
}

/// Header facts of a node image that already passed [`NodeRef::parse`].
#[derive(Clone, Copy, Debug)]
pub(crate) struct NodeShape {
    kind: NodeKind,
    nkeys: u16,
    used: usize,
}

impl<'a> NodeRef<'a> {
    /// Validates `buf` as a node image.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < NODE_HEADER_LEN {
            return Err(BTreeError::CorruptNode("page shorter than node header"));
        }
        let kind = NodeKind::from_u16(read_u16(buf, KIND_OFFSET)?)?;
        let nkeys = read_u16(buf, NKEYS_OFFSET)?;
        let n = nkeys as usize;
        let start = records_start(n);
        if start > buf.len() {
            return Err(BTreeError::CorruptNode(
                "pointer and offset tables exceed page",
            ));
        }

        let mut prev = 0usize;
        for idx in 1..=n {
            let end = read_u16(buf, offset_pos(n, idx))? as usize;
            if end < prev {
                return Err(BTreeError::CorruptNode("offset table not monotonic"));
            }
            let pos = start + prev;
            if pos + RECORD_HEADER_LEN > buf.len() {
                return Err(BTreeError::CorruptNode("record header beyond page"));
            }
            let klen = read_u16(buf, pos)? as usize;
            let vlen = read_u16(buf, pos + 2)? as usize;
            if prev + RECORD_HEADER_LEN + klen + vlen != end {
                return Err(BTreeError::CorruptNode(
                    "record length disagrees with offset table",
                ));
            }
            if kind == NodeKind::Internal {
                if vlen != 0 {
                    return Err(BTreeError::CorruptNode("internal record carries a value"));
                }
                if read_u64(buf, pointer_pos(idx - 1))? == 0 {
                    return Err(BTreeError::CorruptNode("internal node has null child"));
                }
            }
            prev = end;
        }
        let used = start + prev;
        if used > buf.len() {
            return Err(BTreeError::CorruptNode("records exceed page"));
        }
        Ok(Self {
            buf,
            kind,
            nkeys,
            used,
        })
    }

    pub(crate) fn shape(&self) -> NodeShape {
        NodeShape {
            kind: self.kind,
            nkeys: self.nkeys,
            used: self.used,
        }
    }

    /// Re-attaches `shape` to the unchanged image it was parsed from.
    pub(crate) fn with_shape(buf: &'a [u8], shape: NodeShape) -> Self {
        Self {
            buf,
            kind: shape.kind,
            nkeys: shape.nkeys,
            used: shape.used,
        }
    }

    /// Node kind stored in the header.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Returns true for leaf nodes.
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Number of keys stored in the node.
    pub fn num_keys(&self) -> u16 {
        self.nkeys
    }

    /// Number of keys as a `usize`.
    pub fn len(&self) -> usize {
        self.nkeys as usize
    }

    /// Returns true when the node holds no keys.
    pub fn is_empty(&self) -> bool {
        self.nkeys == 0
    }

    /// Child pointer at `idx`, or `None` when `idx` is past the last key.
    pub fn pointer(&self, idx: usize) -> Option<PageId> {
        if idx >= self.len() {
            return None;
        }
        read_u64(self.buf, pointer_pos(idx)).ok().map(PageId)
    }

    /// Start of record `idx` relative to the record region. Index 0 is always 0.
    pub fn offset(&self, idx: usize) -> Result<u16> {
        if idx == 0 {
            return Ok(0);
        }
        if idx > self.len() {
            return Err(BTreeError::Invalid("offset index out of range"));
        }
        read_u16(self.buf, offset_pos(self.len(), idx))
    }

    /// Absolute byte position where record `idx` begins.
    pub fn kv_pos(&self, idx: usize) -> Result<usize> {
        Ok(records_start(self.len()) + self.offset(idx)? as usize)
    }

    /// Key bytes of record `idx`.
    pub fn key(&self, idx: usize) -> Result<&'a [u8]> {
        self.record(idx).map(|(key, _)| key)
    }

    /// Value bytes of record `idx`; always empty on internal nodes.
    pub fn value(&self, idx: usize) -> Result<&'a [u8]> {
        self.record(idx).map(|(_, value)| value)
    }

    /// Key and value bytes of record `idx`.
    pub fn record(&self, idx: usize) -> Result<(&'a [u8], &'a [u8])> {
        if idx >= self.len() {
            return Err(BTreeError::Invalid("record index out of range"));
        }
        let pos = self.kv_pos(idx)?;
        let klen = read_u16(self.buf, pos)? as usize;
        let vlen = read_u16(self.buf, pos + 2)? as usize;
        let key_start = pos + RECORD_HEADER_LEN;
        let key = self
            .buf
            .get(key_start..key_start + klen)
            .ok_or(BTreeError::CorruptNode("record key truncated"))?;
        let value = self
            .buf
            .get(key_start + klen..key_start + klen + vlen)
            .ok_or(BTreeError::CorruptNode("record value truncated"))?;
        Ok((key, value))
    }

    /// Total bytes used by the node, i.e. the position just past its last record.
    pub fn num_bytes(&self) -> usize {
        self.used
    }

    /// Slot whose range covers `key`: the largest index `i >= 1` with
    /// `key(i) <= key`, or 0 when no such key exists.
    ///
    /// Key 0 is the node's inherited lower bound and is never compared.
    pub fn lookup_le(&self, key: &[u8]) -> Result<usize> {
        let mut lo = 1usize;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key(mid)? <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo.saturating_sub(1))
    }

    /// Raw bytes backing this view.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }
}

/// Owned builder for a new node image.
///
/// The buffer spans two pages so that a node which has just overflowed can be
/// materialised and handed to the splitter. Callers set the final key count
/// with [`NodeBuf::set_header`] before appending records in slot order.
#[derive(Clone, Debug)]
pub struct NodeBuf {
    buf: Vec<u8>,
}

impl NodeBuf {
    /// Creates a zeroed builder sized for `page_size`.
    pub fn new(page_size: usize) -> Self {
        Self {
            buf: vec![0u8; page_size * 2],
        }
    }

    /// Writes the node kind and key count.
    pub fn set_header(&mut self, kind: NodeKind, nkeys: u16) {
        self.buf[KIND_OFFSET..KIND_OFFSET + 2].copy_from_slice(&kind.as_u16().to_le_bytes());
        self.buf[NKEYS_OFFSET..NKEYS_OFFSET + 2].copy_from_slice(&nkeys.to_le_bytes());
    }

    fn len(&self) -> usize {
        u16::from_le_bytes([self.buf[NKEYS_OFFSET], self.buf[NKEYS_OFFSET + 1]]) as usize
    }

    /// Sets the child pointer at `idx`.
    pub fn set_pointer(&mut self, idx: usize, page: PageId) -> Result<()> {
        if idx >= self.len() {
            return Err(BTreeError::Invalid("pointer index out of range"));
        }
        write_bytes(&mut self.buf, pointer_pos(idx), &page.0.to_le_bytes())
    }

    /// Sets the stored offset for `idx`; offset 0 is implicit and ignored.
    pub fn set_offset(&mut self, idx: usize, value: u16) -> Result<()> {
        if idx == 0 {
            return Ok(());
        }
        if idx > self.len() {
            return Err(BTreeError::Invalid("offset index out of range"));
        }
        let pos = offset_pos(self.len(), idx);
        write_bytes(&mut self.buf, pos, &value.to_le_bytes())
    }

    fn offset(&self, idx: usize) -> Result<u16> {
        if idx == 0 {
            return Ok(0);
        }
        if idx > self.len() {
            return Err(BTreeError::Invalid("offset index out of range"));
        }
        read_u16(&self.buf, offset_pos(self.len(), idx))
    }

    /// Absolute byte position where record `idx` begins.
    pub fn kv_pos(&self, idx: usize) -> Result<usize> {
        Ok(records_start(self.len()) + self.offset(idx)? as usize)
    }

    /// Bytes used by the records appended so far plus all fixed regions.
    pub fn num_bytes(&self) -> Result<usize> {
        self.kv_pos(self.len())
    }

    /// Writes record `idx` and its pointer, then records where it ends.
    pub fn append_record(
        &mut self,
        idx: usize,
        pointer: PageId,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        self.set_pointer(idx, pointer)?;
        let klen =
            u16::try_from(key.len()).map_err(|_| BTreeError::Invalid("key longer than u16"))?;
        let vlen = u16::try_from(value.len())
            .map_err(|_| BTreeError::Invalid("value longer than u16"))?;
        let pos = self.kv_pos(idx)?;
        write_bytes(&mut self.buf, pos, &klen.to_le_bytes())?;
        write_bytes(&mut self.buf, pos + 2, &vlen.to_le_bytes())?;
        write_bytes(&mut self.buf, pos + RECORD_HEADER_LEN, key)?;
        write_bytes(&mut self.buf, pos + RECORD_HEADER_LEN + key.len(), value)?;
        let end = self.offset(idx)? as usize + RECORD_HEADER_LEN + key.len() + value.len();
        let end = u16::try_from(end).map_err(|_| BTreeError::Invalid("node buffer overflow"))?;
        self.set_offset(idx + 1, end)
    }

    /// Copies `count` entries of `src` starting at `src_idx` into slots
    /// starting at `dst_idx`.
    pub fn append_range(
        &mut self,
        src: &NodeRef<'_>,
        dst_idx: usize,
        src_idx: usize,
        count: usize,
    ) -> Result<()> {
        for i in 0..count {
            let (key, value) = src.record(src_idx + i)?;
            let pointer = src.pointer(src_idx + i).unwrap_or(PageId::NULL);
            self.append_record(dst_idx + i, pointer, key, value)?;
        }
        Ok(())
    }

    /// Validating view over the image built so far.
    pub fn as_node(&self) -> Result<NodeRef<'_>> {
        NodeRef::parse(&self.buf)
    }

    /// Finishes the node as exactly one page image.
    pub fn into_page(mut self, page_size: usize) -> Result<Vec<u8>> {
        if self.num_bytes()? > page_size {
            return Err(BTreeError::Invalid("node exceeds page size"));
        }
        self.buf.truncate(page_size);
        Ok(self.buf)
    }
}
