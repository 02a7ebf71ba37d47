use crate::types::page::{NODE_HEADER_LEN, OFFSET_LEN, POINTER_LEN};
use crate::types::{BTreeError, Result};

use super::node::{max_entry_len, NodeBuf, NodeRef};

/// Result of splitting one overflowing node.
#[derive(Debug)]
pub struct SplitNodes {
    /// First key of the right node; the parent files `right` under it.
    pub separator: Vec<u8>,
    /// Entries `[0, split_at)` of the original node.
    pub left: NodeBuf,
    /// Entries `[split_at, n)` of the original node.
    pub right: NodeBuf,
    /// Index of the first entry that moved to the right node.
    pub split_at: usize,
}

/// Splits `node` into two nodes that each fit in `page_size`.
///
/// Split points are tried in order of distance from the key-count midpoint
/// and the first one where both halves fit wins. Both nodes keep the kind of
/// the original, and the right node's first key doubles as the separator.
pub fn split_node(node: &NodeRef<'_>, page_size: usize) -> Result<SplitNodes> {
    let len = node.len();
    if len < 2 {
        return Err(BTreeError::Invalid(
            "cannot split node with fewer than 2 entries",
        ));
    }
    let total = node.offset(len)? as usize;
    let mid = len / 2;
    let mut candidates: Vec<usize> = (1..len).collect();
    candidates.sort_by_key(|idx| idx.abs_diff(mid));

    let mut split_at = None;
    for idx in candidates {
        let left_records = node.offset(idx)? as usize;
        let left_bytes = half_size(idx, left_records);
        let right_bytes = half_size(len - idx, total - left_records);
        if left_bytes <= page_size && right_bytes <= page_size {
            split_at = Some(idx);
            break;
        }
    }
    let split_at = split_at.ok_or(BTreeError::OversizedRecord {
        len: node.num_bytes(),
        max: max_entry_len(page_size),
    })?;

    let mut left = NodeBuf::new(page_size);
    left.set_header(node.kind(), split_at as u16);
    left.append_range(node, 0, 0, split_at)?;

    let right_len = len - split_at;
    let mut right = NodeBuf::new(page_size);
    right.set_header(node.kind(), right_len as u16);
    right.append_range(node, 0, split_at, right_len)?;

    let separator = node.key(split_at)?.to_vec();
    Ok(SplitNodes {
        separator,
        left,
        right,
        split_at,
    })
}

fn half_size(entries: usize, record_bytes: usize) -> usize {
    NODE_HEADER_LEN + entries * (POINTER_LEN + OFFSET_LEN) + record_bytes
}
