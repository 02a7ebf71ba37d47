use super::{BTree, MAX_DEPTH};
use crate::storage::btree::node::{NodeKind, NodeRef};
use crate::types::{BTreeError, PageId, Result};

/// Summary produced by [`BTree::verify`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Levels from the root to the leaves.
    pub depth: usize,
    /// Number of leaf pages reachable from the root.
    pub leaf_pages: usize,
    /// Number of internal pages reachable from the root.
    pub internal_pages: usize,
    /// Number of user records, excluding the sentinel.
    pub keys: usize,
}

struct Walk {
    report: VerifyReport,
    leaf_depth: Option<usize>,
}

impl BTree {
    /// Walks the whole tree and checks its structural invariants.
    ///
    /// Every page must parse and fit in one page, keys must be strictly
    /// ascending within a node and stay inside the range the parent assigned,
    /// the first key of each node must equal the parent's separator for it,
    /// and all leaves must sit at the same depth.
    pub fn verify(&self) -> Result<VerifyReport> {
        let _reader = self.begin_read();
        let root = self.root_page()?;
        let mut walk = Walk {
            report: VerifyReport::default(),
            leaf_depth: None,
        };
        self.verify_node(root, &[], None, 1, &mut walk)?;
        walk.report.depth = walk.leaf_depth.unwrap_or(0);
        Ok(walk.report)
    }

    fn verify_node(
        &self,
        id: PageId,
        lower: &[u8],
        upper: Option<&[u8]>,
        level: usize,
        walk: &mut Walk,
    ) -> Result<()> {
        if level > MAX_DEPTH {
            return Err(BTreeError::CorruptNode("tree deeper than supported"));
        }
        let page = self.load(id)?;
        let node = NodeRef::parse(&page)?;
        if node.is_empty() {
            return Err(BTreeError::CorruptNode("node without entries"));
        }
        if node.num_bytes() > self.page_size {
            return Err(BTreeError::CorruptNode("node larger than page"));
        }
        if node.key(0)? != lower {
            return Err(BTreeError::CorruptNode(
                "first key differs from parent separator",
            ));
        }
        for idx in 1..node.len() {
            if node.key(idx - 1)? >= node.key(idx)? {
                return Err(BTreeError::CorruptNode("keys not strictly ascending"));
            }
        }
        if let Some(upper) = upper {
            if node.key(node.len() - 1)? >= upper {
                return Err(BTreeError::CorruptNode("key beyond parent range"));
            }
        }

        match node.kind() {
            NodeKind::Leaf => {
                match walk.leaf_depth {
                    Some(depth) if depth != level => {
                        return Err(BTreeError::CorruptNode("leaves at different depths"));
                    }
                    Some(_) => {}
                    None => walk.leaf_depth = Some(level),
                }
                walk.report.leaf_pages += 1;
                walk.report.keys += node.len();
                if lower.is_empty() {
                    walk.report.keys -= 1;
                }
            }
            NodeKind::Internal => {
                walk.report.internal_pages += 1;
                for idx in 0..node.len() {
                    let child = node
                        .pointer(idx)
                        .ok_or(BTreeError::CorruptNode("internal slot without child"))?;
                    let child_upper = if idx + 1 < node.len() {
                        Some(node.key(idx + 1)?)
                    } else {
                        upper
                    };
                    self.verify_node(child, node.key(idx)?, child_upper, level + 1, walk)?;
                }
            }
        }
        Ok(())
    }
}
