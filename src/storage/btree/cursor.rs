use smallvec::SmallVec;

use crate::primitives::pager::PageRef;
use crate::types::{BTreeError, PageId, Result};

use super::node::{NodeRef, NodeShape};
use super::tree::{BTree, ReaderGuard, MAX_DEPTH};

/// One page on the cursor's root-to-leaf stack and the next slot to visit.
struct Frame {
    page: PageRef,
    shape: NodeShape,
    next: usize,
}

impl Frame {
    fn new(page: PageRef) -> Result<Self> {
        let shape = NodeRef::parse(&page)?.shape();
        Ok(Self {
            page,
            shape,
            next: 0,
        })
    }

    fn node(&self) -> NodeRef<'_> {
        NodeRef::with_shape(&self.page, self.shape)
    }
}

enum Step {
    Pop,
    Skip,
    Descend(PageId),
    Yield(Vec<u8>, Vec<u8>),
}

/// Ordered iterator over the user records of a [`BTree`].
///
/// The cursor reads the published root once when it is created and iterates
/// that snapshot. It stays registered as a reader until dropped, which keeps
/// replaced pages from being reclaimed while it can still reach them.
pub struct Cursor<'a> {
    tree: &'a BTree,
    stack: SmallVec<[Frame; 8]>,
    lower: Vec<u8>,
    done: bool,
    _reader: ReaderGuard<'a>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(tree: &'a BTree, start: &[u8]) -> Result<Self> {
        let reader = tree.begin_read();
        let mut stack: SmallVec<[Frame; 8]> = SmallVec::new();
        let mut current = tree.root_page()?;
        loop {
            if stack.len() >= MAX_DEPTH {
                return Err(BTreeError::CorruptNode("tree deeper than supported"));
            }
            let frame = Frame::new(tree.load(current)?)?;
            let (slot, child) = {
                let node = frame.node();
                let slot = node.lookup_le(start)?;
                let child = if node.is_leaf() {
                    None
                } else {
                    Some(
                        node.pointer(slot)
                            .ok_or(BTreeError::CorruptNode("internal slot without child"))?,
                    )
                };
                (slot, child)
            };
            match child {
                Some(child) => {
                    stack.push(Frame {
                        next: slot + 1,
                        ..frame
                    });
                    current = child;
                }
                None => {
                    stack.push(Frame { next: slot, ..frame });
                    break;
                }
            }
        }
        Ok(Self {
            tree,
            stack,
            lower: start.to_vec(),
            done: false,
            _reader: reader,
        })
    }

    fn step(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            let step = {
                let Some(frame) = self.stack.last_mut() else {
                    return Ok(None);
                };
                // Field borrow so `frame.next` stays mutable below.
                let node = NodeRef::with_shape(&frame.page, frame.shape);
                if frame.next >= node.len() {
                    Step::Pop
                } else {
                    let idx = frame.next;
                    frame.next += 1;
                    if node.is_leaf() {
                        let (key, value) = node.record(idx)?;
                        if key.is_empty() || key < self.lower.as_slice() {
                            Step::Skip
                        } else {
                            Step::Yield(key.to_vec(), value.to_vec())
                        }
                    } else {
                        Step::Descend(
                            node.pointer(idx)
                                .ok_or(BTreeError::CorruptNode("internal slot without child"))?,
                        )
                    }
                }
            };
            match step {
                Step::Pop => {
                    self.stack.pop();
                }
                Step::Skip => {}
                Step::Descend(child) => {
                    if self.stack.len() >= MAX_DEPTH {
                        return Err(BTreeError::CorruptNode("tree deeper than supported"));
                    }
                    let frame = Frame::new(self.tree.load(child)?)?;
                    self.stack.push(frame);
                }
                Step::Yield(key, value) => return Ok(Some((key, value))),
            }
        }
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
