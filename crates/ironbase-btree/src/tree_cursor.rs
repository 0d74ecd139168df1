//! Tree cursor: root-to-leaf descent and record-level changes.
//!
//! A search holds the index tree latch shared and descends with latch
//! coupling: an internal page is released as soon as the child it points
//! to is known, since the shared tree latch already excludes structure
//! modifications. The leaf is latched according to the requested mode.
//! `SearchPrev`/`ModifyPrev` additionally latch the left sibling of the
//! target leaf (through the parent's previous node pointer when both
//! children share a parent, through the leaf's own back link otherwise).
//!
//! Structure modifications (`ModifyTree`: removing an emptied page) hold
//! the tree latch exclusively, which makes them single-flight per index.

use std::sync::Arc;

use ironbase_buf::{Block, BufferPool, LatchLevel, Mtr, PageLatch, RedoOp};
use ironbase_error::{IronError, Result};
use ironbase_types::{page, rec, PageId, PageNo, RollPtr, TrxId};
use smallvec::SmallVec;
use tracing::debug;

use crate::index::{DTuple, Index, SearchMode};
use crate::page_cursor::{lower_bound, upper_bound, PageCursor};

/// Latching mode of a tree search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    /// Shared latch on the target leaf.
    SearchLeaf,
    /// Exclusive latch on the target leaf.
    ModifyLeaf,
    /// Shared latch on the target leaf and its left sibling.
    SearchPrev,
    /// Exclusive latch on the target leaf and its left sibling.
    ModifyPrev,
    /// Exclusive tree latch for structure modifications.
    ModifyTree,
}

impl LatchMode {
    /// The latch taken on leaf pages under this mode.
    #[must_use]
    pub fn leaf_latch(self) -> PageLatch {
        match self {
            Self::SearchLeaf | Self::SearchPrev => PageLatch::Shared,
            Self::ModifyLeaf | Self::ModifyPrev | Self::ModifyTree => PageLatch::Exclusive,
        }
    }

    /// Whether the left sibling of the target leaf is latched as well.
    #[must_use]
    pub fn latches_prev(self) -> bool {
        matches!(self, Self::SearchPrev | Self::ModifyPrev)
    }
}

/// Child page number carried in the last field of a node pointer record.
pub(crate) fn node_ptr_child(record: &[u8]) -> PageNo {
    let f = rec::field(record, rec::n_fields(record) - 1);
    PageNo(u32::from_be_bytes(f.try_into().expect("4-byte child pointer")))
}

/// Encode a node pointer record: the child's separator key fields plus a
/// trailing 4-byte child page number field.
pub(crate) fn encode_node_ptr(key_fields: &[&[u8]], child: PageNo) -> Vec<u8> {
    let child_bytes = child.0.to_be_bytes();
    let mut fields: Vec<&[u8]> = key_fields.to_vec();
    fields.push(&child_bytes);
    rec::encode(&fields, 0, TrxId(0), RollPtr::NULL)
}

enum Step {
    Leaf,
    Descend { child: PageNo, child_level: u16, left: Option<PageNo>, slot: u16 },
}

/// A cursor positioned by key within one index tree.
pub struct TreeCursor {
    index: Arc<Index>,
    pool: Arc<BufferPool>,
    page_cur: Option<PageCursor>,
    /// Left sibling of the leaf, latched by `*Prev` searches.
    left_block: Option<Arc<Block>>,
    /// `(page_no, slot)` per internal level of the last descent, root
    /// first. Consumed by structure modifications.
    path: SmallVec<[(PageNo, u16); 8]>,
}

impl TreeCursor {
    #[must_use]
    pub fn new(index: Arc<Index>, pool: Arc<BufferPool>) -> Self {
        Self { index, pool, page_cur: None, left_block: None, path: SmallVec::new() }
    }

    #[inline]
    #[must_use]
    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    #[inline]
    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// The page cursor of a positioned tree cursor.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not positioned.
    #[must_use]
    pub fn page_cursor(&self) -> &PageCursor {
        self.page_cur.as_ref().expect("tree cursor is not positioned")
    }

    pub fn page_cursor_mut(&mut self) -> &mut PageCursor {
        self.page_cur.as_mut().expect("tree cursor is not positioned")
    }

    #[must_use]
    pub fn is_positioned(&self) -> bool {
        self.page_cur.is_some()
    }

    /// The block under the cursor.
    #[must_use]
    pub fn block(&self) -> Arc<Block> {
        Arc::clone(self.page_cursor().block())
    }

    /// Left sibling latched by the last `*Prev` search, if any.
    #[must_use]
    pub fn left_block(&self) -> Option<&Arc<Block>> {
        self.left_block.as_ref()
    }

    pub(crate) fn set_page_cursor(&mut self, pc: PageCursor) {
        self.page_cur = Some(pc);
    }

    pub(crate) fn clear_position(&mut self) {
        self.page_cur = None;
        self.left_block = None;
        self.path.clear();
    }

    pub(crate) fn take_left_block(&mut self) -> Option<Arc<Block>> {
        self.left_block.take()
    }

    pub(crate) fn release_left_block(&mut self, mtr: &mut Mtr) {
        if let Some(lb) = self.left_block.take() {
            mtr.release_block(&lb);
        }
    }

    fn latch_index(&self, latch_mode: LatchMode, mtr: &mut Mtr) {
        if latch_mode == LatchMode::ModifyTree {
            mtr.x_lock(self.index.latch(), LatchLevel::IndexTree);
        } else {
            mtr.s_lock(self.index.latch(), LatchLevel::IndexTree);
        }
    }

    fn latch_root(&self, leaf_latch: PageLatch, mtr: &mut Mtr) -> Arc<Block> {
        let root_id = self.index.root_id();
        let block = self.pool.get(root_id, PageLatch::Shared, LatchLevel::TreeNode, mtr);
        if page::is_leaf(mtr.frame(&block)) && leaf_latch == PageLatch::Exclusive {
            // The root is the leaf and needs the stronger latch. The tree
            // latch keeps the page from disappearing across the re-latch.
            mtr.release_block(&block);
            return self.pool.get(root_id, PageLatch::Exclusive, LatchLevel::TreeNode, mtr);
        }
        block
    }

    /// Position the cursor on the leaf record selected by `tuple` and
    /// `mode`.
    pub fn search(
        &mut self,
        tuple: &DTuple,
        mode: SearchMode,
        latch_mode: LatchMode,
        mtr: &mut Mtr,
    ) -> Result<()> {
        assert!(mtr.is_active(), "tree search outside an active mtr");
        self.latch_index(latch_mode, mtr);
        self.clear_position();
        let space = self.index.space();
        let leaf_latch = latch_mode.leaf_latch();

        let mut page_no = self.index.root();
        let mut block = self.latch_root(leaf_latch, mtr);
        loop {
            let step = {
                let frame = mtr.frame(&block);
                let level = page::level(frame);
                if level == 0 {
                    Step::Leaf
                } else {
                    let n = page::n_recs(frame);
                    if n == 0 {
                        return Err(IronError::corruption(block.id(), "internal page with no records"));
                    }
                    let bound = match mode {
                        SearchMode::L => lower_bound(&self.index, tuple, frame),
                        _ => upper_bound(&self.index, tuple, frame),
                    };
                    let slot = bound.saturating_sub(1);
                    let child = node_ptr_child(page::rec(frame, slot));
                    let left = if latch_mode.latches_prev() && level == 1 && slot > 0 {
                        Some(node_ptr_child(page::rec(frame, slot - 1)))
                    } else {
                        None
                    };
                    Step::Descend { child, child_level: level - 1, left, slot }
                }
            };
            match step {
                Step::Leaf => {
                    if latch_mode.latches_prev() && self.left_block.is_none() {
                        let prev_no = page::prev(mtr.frame(&block));
                        if !prev_no.is_null() {
                            let lb = self.pool.get(
                                PageId::new(space, prev_no),
                                leaf_latch,
                                LatchLevel::TreeNode,
                                mtr,
                            );
                            self.left_block = Some(lb);
                        }
                    }
                    let pc = PageCursor::search(&self.index, tuple, mode, Arc::clone(&block), mtr);
                    self.page_cur = Some(pc);
                    return Ok(());
                }
                Step::Descend { child, child_level, left, slot } => {
                    self.path.push((page_no, slot));
                    mtr.release_block(&block);
                    if let Some(left_no) = left {
                        let lb = self.pool.get(
                            PageId::new(space, left_no),
                            leaf_latch,
                            LatchLevel::TreeNode,
                            mtr,
                        );
                        self.left_block = Some(lb);
                    }
                    let latch = if child_level == 0 { leaf_latch } else { PageLatch::Shared };
                    block = self.pool.get(PageId::new(space, child), latch, LatchLevel::TreeNode, mtr);
                    let actual = page::level(mtr.frame(&block));
                    if actual != child_level {
                        return Err(IronError::corruption(
                            block.id(),
                            format!("expected level {child_level}, found level {actual}"),
                        ));
                    }
                    page_no = child;
                }
            }
        }
    }

    /// Position the cursor at a tree edge: on the infimum of the leftmost
    /// leaf, or the supremum of the rightmost.
    pub fn open_at_side(&mut self, left_side: bool, latch_mode: LatchMode, mtr: &mut Mtr) -> Result<()> {
        assert!(mtr.is_active(), "tree open outside an active mtr");
        self.latch_index(latch_mode, mtr);
        self.clear_position();
        let space = self.index.space();
        let leaf_latch = latch_mode.leaf_latch();

        let mut page_no = self.index.root();
        let mut block = self.latch_root(leaf_latch, mtr);
        loop {
            let step = {
                let frame = mtr.frame(&block);
                let level = page::level(frame);
                if level == 0 {
                    Step::Leaf
                } else {
                    let n = page::n_recs(frame);
                    if n == 0 {
                        return Err(IronError::corruption(block.id(), "internal page with no records"));
                    }
                    let slot = if left_side { 0 } else { n - 1 };
                    let child = node_ptr_child(page::rec(frame, slot));
                    Step::Descend { child, child_level: level - 1, left: None, slot }
                }
            };
            match step {
                Step::Leaf => {
                    let pc = if left_side {
                        PageCursor::before_first(Arc::clone(&block))
                    } else {
                        PageCursor::after_last(Arc::clone(&block), mtr)
                    };
                    self.page_cur = Some(pc);
                    return Ok(());
                }
                Step::Descend { child, child_level, slot, .. } => {
                    self.path.push((page_no, slot));
                    mtr.release_block(&block);
                    let latch = if child_level == 0 { leaf_latch } else { PageLatch::Shared };
                    block = self.pool.get(PageId::new(space, child), latch, LatchLevel::TreeNode, mtr);
                    page_no = child;
                }
            }
        }
    }

    /// Insert a record after the current position (the cursor must sit on
    /// the greatest record not above the new one, or the infimum). On
    /// success the cursor is on the inserted record.
    ///
    /// # Errors
    ///
    /// `OutOfFileSpace` when the leaf cannot hold the record: the kernel
    /// performs no page splits, so a full leaf surfaces as exhausted
    /// space.
    pub fn insert(&mut self, rec_bytes: &[u8], mtr: &mut Mtr) -> Result<()> {
        let space = self.index.space();
        let pc = self.page_cur.as_mut().expect("insert on unpositioned cursor");
        let block = Arc::clone(pc.block());
        assert!(mtr.memo_contains_page_x(&block), "insert without exclusive leaf latch");
        let slot = pc.pos();
        mtr.with_frame_mut(&block, RedoOp::InsertRec, |f| page::insert_rec(f, slot, rec_bytes))
            .map_err(|_| IronError::OutOfFileSpace { space })?;
        pc.set_pos(slot + 1);
        Ok(())
    }

    /// Replace the record under the cursor.
    ///
    /// # Errors
    ///
    /// `OutOfFileSpace` when a grown record no longer fits on the leaf.
    pub fn update(&mut self, rec_bytes: &[u8], mtr: &mut Mtr) -> Result<()> {
        let space = self.index.space();
        let pc = self.page_cur.as_ref().expect("update on unpositioned cursor");
        let block = Arc::clone(pc.block());
        assert!(mtr.memo_contains_page_x(&block), "update without exclusive leaf latch");
        assert!(pc.is_user_rec(mtr), "update on a sentinel");
        let slot = pc.pos() - 1;
        mtr.with_frame_mut(&block, RedoOp::UpdateRec, |f| page::update_rec(f, slot, rec_bytes))
            .map_err(|_| IronError::OutOfFileSpace { space })?;
        Ok(())
    }

    /// Delete the record under the cursor if that leaves the page legal:
    /// a non-root leaf must keep at least one user record. Returns `false`
    /// when the delete requires a structure modification
    /// ([`TreeCursor::pessimistic_delete`] under [`LatchMode::ModifyTree`]).
    pub fn optimistic_delete(&mut self, mtr: &mut Mtr) -> bool {
        let pc = self.page_cur.as_ref().expect("delete on unpositioned cursor");
        let block = Arc::clone(pc.block());
        assert!(mtr.memo_contains_page_x(&block), "delete without exclusive leaf latch");
        assert!(pc.is_user_rec(mtr), "delete on a sentinel");
        let is_root = block.page_no() == self.index.root();
        if !is_root && pc.n_recs(mtr) == 1 {
            return false;
        }
        let slot = pc.pos() - 1;
        mtr.with_frame_mut(&block, RedoOp::DeleteRec, |f| page::delete_rec(f, slot));
        true
    }

    /// Delete the record under the cursor, removing the page from the
    /// tree if it becomes empty. Requires a preceding search under
    /// [`LatchMode::ModifyTree`]. The cursor is unpositioned afterward.
    pub fn pessimistic_delete(&mut self, mtr: &mut Mtr) -> Result<()> {
        assert!(
            mtr.holds_tree_latch_x(self.index.latch()),
            "pessimistic delete without the exclusive tree latch"
        );
        let pc = self.page_cur.as_ref().expect("delete on unpositioned cursor");
        let block = Arc::clone(pc.block());
        assert!(pc.is_user_rec(mtr), "delete on a sentinel");
        let slot = pc.pos() - 1;
        mtr.with_frame_mut(&block, RedoOp::DeleteRec, |f| page::delete_rec(f, slot));

        let emptied = page::n_recs(mtr.frame(&block)) == 0;
        if emptied && block.page_no() != self.index.root() {
            self.unlink_empty_page(&block, mtr)?;
        }
        self.clear_position();
        Ok(())
    }

    /// Unlink an emptied page from its sibling chain and drop its node
    /// pointer, collapsing emptied ancestors up to the root.
    fn unlink_empty_page(&mut self, block: &Arc<Block>, mtr: &mut Mtr) -> Result<()> {
        let space = self.index.space();
        let (prev_no, next_no) = {
            let frame = mtr.frame(block);
            (page::prev(frame), page::next(frame))
        };
        if !prev_no.is_null() {
            let pb = self.pool.get(PageId::new(space, prev_no), PageLatch::Exclusive, LatchLevel::TreeNode, mtr);
            mtr.with_frame_mut(&pb, RedoOp::SetLinks, |f| page::set_next(f, next_no));
        }
        if !next_no.is_null() {
            let nb = self.pool.get(PageId::new(space, next_no), PageLatch::Exclusive, LatchLevel::TreeNode, mtr);
            mtr.with_frame_mut(&nb, RedoOp::SetLinks, |f| page::set_prev(f, prev_no));
        }
        debug!(page = %block.id(), "unlinking emptied page");

        let mut victim_no = block.page_no();
        let path: SmallVec<[(PageNo, u16); 8]> = self.path.clone();
        for (parent_no, _) in path.iter().rev() {
            let parent_id = PageId::new(space, *parent_no);
            let pb = self.pool.get(parent_id, PageLatch::Exclusive, LatchLevel::TreeNode, mtr);
            let slot = {
                let frame = mtr.frame(&pb);
                (0..page::n_recs(frame))
                    .find(|&s| node_ptr_child(page::rec(frame, s)) == victim_no)
                    .ok_or_else(|| {
                        IronError::corruption(parent_id, format!("no node pointer for child {victim_no}"))
                    })?
            };
            mtr.with_frame_mut(&pb, RedoOp::DeleteRec, |f| page::delete_rec(f, slot));
            self.pool.discard_page(PageId::new(space, victim_no));

            if page::n_recs(mtr.frame(&pb)) > 0 {
                return Ok(());
            }
            if *parent_no == self.index.root() {
                // The whole tree emptied out: the root reverts to a
                // single empty leaf.
                mtr.with_frame_mut(&pb, RedoOp::InitPage, |f| page::init(f, 0));
                return Ok(());
            }
            victim_no = *parent_no;
        }
        Ok(())
    }
}
