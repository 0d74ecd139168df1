//! Persistent cursor: a tree cursor that survives mini-transaction
//! commit.
//!
//! Committing an mtr releases every page latch, so a plain tree cursor
//! dies with its mtr. The persistent cursor stores enough to come back:
//! a copy of the order prefix of an anchor record, where the cursor stood
//! relative to it, and the block's modify clock at store time. Restoring
//! under a fresh mtr first tries the cheap path: re-latch the remembered
//! block and compare clocks. Equality proves no record on the page was
//! added, removed, or moved, so the remembered position is still exact
//! and the key search is skipped. Any mismatch falls back to a search on
//! the stored prefix.
//!
//! Rollback, purge, and multi-record scans all iterate this way across
//! arbitrarily many mtrs.

use std::sync::{Arc, Weak};

use ironbase_buf::{Block, Mtr};
use ironbase_error::Result;
use ironbase_types::{page, TrxId};
use tracing::{debug, error};

use crate::index::{DTuple, SearchMode};
use crate::page_cursor::PageCursor;
use crate::tree_cursor::{LatchMode, TreeCursor};

/// Whether the cursor currently addresses a latched record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosState {
    /// Never opened, or closed.
    NotPositioned,
    /// Open and latched; the page cursor is valid.
    IsPositioned,
    /// Detached by an mtr commit; only the stored position is valid.
    WasPositioned,
}

/// Where the cursor stood relative to its stored anchor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelPos {
    /// On the anchor.
    On,
    /// Before the anchor (the cursor was on the infimum).
    Before,
    /// After the anchor (the cursor was on the supremum).
    After,
    /// Before the first record of an empty tree.
    BeforeFirstInTree,
    /// After the last record of an empty tree.
    AfterLastInTree,
}

/// Whether a position snapshot is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldStored {
    Stored,
    NotStored,
}

/// A persistent cursor over one index.
pub struct PersistentCursor {
    btr_cur: TreeCursor,
    pos_state: PosState,
    latch_mode: Option<LatchMode>,
    rel_pos: Option<RelPos>,
    old_stored: OldStored,
    /// Order-prefix copy of the anchor record; reused across stores.
    old_rec: Vec<u8>,
    old_n_fields: u16,
    /// Page position at store time. Valid for exactly as long as the
    /// modify clock matches, which is what optimistic restore checks.
    old_pos: u16,
    /// Weak: the stored handle must not keep an evicted block alive.
    /// Optimistic restore revalidates residency through the pool.
    block_when_stored: Option<Weak<Block>>,
    modify_clock: u64,
    search_mode: Option<SearchMode>,
    trx_if_known: Option<TrxId>,
}

impl PersistentCursor {
    #[must_use]
    pub fn new(
        index: Arc<crate::index::Index>,
        pool: Arc<ironbase_buf::BufferPool>,
    ) -> Self {
        Self {
            btr_cur: TreeCursor::new(index, pool),
            pos_state: PosState::NotPositioned,
            latch_mode: None,
            rel_pos: None,
            old_stored: OldStored::NotStored,
            old_rec: Vec::new(),
            old_n_fields: 0,
            old_pos: 0,
            block_when_stored: None,
            modify_clock: 0,
            search_mode: None,
            trx_if_known: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn pos_state(&self) -> PosState {
        self.pos_state
    }

    #[inline]
    #[must_use]
    pub fn latch_mode(&self) -> Option<LatchMode> {
        self.latch_mode
    }

    #[inline]
    #[must_use]
    pub fn rel_pos(&self) -> Option<RelPos> {
        self.rel_pos
    }

    #[inline]
    #[must_use]
    pub fn old_stored(&self) -> OldStored {
        self.old_stored
    }

    #[inline]
    #[must_use]
    pub fn search_mode(&self) -> Option<SearchMode> {
        self.search_mode
    }

    /// Record the owning transaction for diagnostics.
    pub fn set_trx(&mut self, trx_id: TrxId) {
        self.trx_if_known = Some(trx_id);
    }

    #[must_use]
    pub fn btr_cur(&self) -> &TreeCursor {
        &self.btr_cur
    }

    pub fn btr_cur_mut(&mut self) -> &mut TreeCursor {
        &mut self.btr_cur
    }

    /// The block under the cursor.
    #[must_use]
    pub fn block(&self) -> Arc<Block> {
        self.btr_cur.block()
    }

    /// The record under the cursor.
    #[must_use]
    pub fn rec<'a>(&self, mtr: &'a Mtr) -> &'a [u8] {
        self.btr_cur.page_cursor().rec(mtr)
    }

    #[must_use]
    pub fn is_on_user_rec(&self, mtr: &Mtr) -> bool {
        self.btr_cur.page_cursor().is_user_rec(mtr)
    }

    #[must_use]
    pub fn is_before_first_on_page(&self) -> bool {
        self.btr_cur.page_cursor().is_before_first()
    }

    #[must_use]
    pub fn is_after_last_on_page(&self, mtr: &Mtr) -> bool {
        self.btr_cur.page_cursor().is_after_last(mtr)
    }

    #[must_use]
    pub fn is_before_first_in_tree(&self, mtr: &Mtr) -> bool {
        self.is_before_first_on_page() && page::prev(mtr.frame(&self.block())).is_null()
    }

    #[must_use]
    pub fn is_after_last_in_tree(&self, mtr: &Mtr) -> bool {
        self.is_after_last_on_page(mtr) && page::next(mtr.frame(&self.block())).is_null()
    }

    /// Open the cursor positioned by `tuple` and `mode`.
    pub fn open(
        &mut self,
        tuple: &DTuple,
        mode: SearchMode,
        latch_mode: LatchMode,
        mtr: &mut Mtr,
    ) -> Result<()> {
        self.btr_cur.search(tuple, mode, latch_mode, mtr)?;
        self.pos_state = PosState::IsPositioned;
        self.latch_mode = Some(latch_mode);
        self.search_mode = Some(mode);
        self.old_stored = OldStored::NotStored;
        Ok(())
    }

    /// Open at a tree edge: before the first record or after the last.
    pub fn open_at_side(&mut self, left: bool, latch_mode: LatchMode, mtr: &mut Mtr) -> Result<()> {
        self.btr_cur.open_at_side(left, latch_mode, mtr)?;
        self.pos_state = PosState::IsPositioned;
        self.latch_mode = Some(latch_mode);
        self.old_stored = OldStored::NotStored;
        Ok(())
    }

    /// Open on the first user record satisfying `mode` (`GE`/`G` only);
    /// returns whether such a record exists.
    ///
    /// # Panics
    ///
    /// The `L`/`LE` case is not implemented and panics rather than
    /// degrading silently.
    pub fn open_on_user_rec(
        &mut self,
        tuple: &DTuple,
        mode: SearchMode,
        latch_mode: LatchMode,
        mtr: &mut Mtr,
    ) -> Result<bool> {
        match mode {
            SearchMode::GE | SearchMode::G => {
                self.open(tuple, mode, latch_mode, mtr)?;
                if self.is_after_last_on_page(mtr) && !self.is_after_last_in_tree(mtr) {
                    return self.move_to_next_user_rec(mtr);
                }
                Ok(self.is_on_user_rec(mtr))
            }
            SearchMode::L | SearchMode::LE => {
                panic!("open_on_user_rec is not implemented for descending modes")
            }
        }
    }

    /// Snapshot the current position so it can be restored after the mtr
    /// commits.
    ///
    /// On a non-empty page an anchor user record is chosen (the record
    /// itself, or its neighbor when the cursor sits on a sentinel), its
    /// order prefix copied, and the block's modify clock captured. On an
    /// empty page, legal only when the whole tree is one empty page, only
    /// a tree-edge flag is stored and no clock is captured.
    pub fn store_position(&mut self, mtr: &Mtr) {
        assert_eq!(self.pos_state, PosState::IsPositioned, "store on unpositioned cursor");
        assert!(self.latch_mode.is_some(), "store without latches");
        let block = self.btr_cur.block();
        assert!(
            mtr.memo_contains_page(&block),
            "store_position: leaf latch missing from mtr memo"
        );

        let index = Arc::clone(self.btr_cur.index());
        let pc = self.btr_cur.page_cursor();
        let frame = mtr.frame(&block);
        let n = page::n_recs(frame);

        if n == 0 {
            // Only the single page of an empty tree may have no records.
            assert!(
                page::prev(frame).is_null() && page::next(frame).is_null(),
                "empty page inside a non-empty tree"
            );
            self.rel_pos = Some(if pc.is_before_first() {
                RelPos::BeforeFirstInTree
            } else {
                RelPos::AfterLastInTree
            });
            self.old_stored = OldStored::Stored;
            return;
        }

        let (anchor_pos, rel) = if pc.pos() == n + 1 {
            (n, RelPos::After)
        } else if pc.pos() == 0 {
            (1, RelPos::Before)
        } else {
            (pc.pos(), RelPos::On)
        };
        let anchor = page::rec(frame, anchor_pos - 1);
        self.old_n_fields = index.copy_rec_order_prefix(anchor, &mut self.old_rec);
        self.rel_pos = Some(rel);
        self.old_pos = pc.pos();
        self.block_when_stored = Some(Arc::downgrade(&block));
        self.modify_clock = block.modify_clock();
        self.old_stored = OldStored::Stored;
    }

    /// Copy the stored position into another cursor over the same index.
    pub fn copy_stored_position(&self, target: &mut PersistentCursor) {
        target.old_rec.clear();
        target.old_rec.extend_from_slice(&self.old_rec);
        target.old_n_fields = self.old_n_fields;
        target.old_pos = self.old_pos;
        target.old_stored = self.old_stored;
        target.rel_pos = self.rel_pos;
        target.block_when_stored = self.block_when_stored.clone();
        target.modify_clock = self.modify_clock;
    }

    /// Re-acquire a position equivalent to the stored one under a fresh
    /// mtr.
    ///
    /// Returns `true` iff the position was stored on a user record and
    /// the cursor now addresses a record whose ordering fields equal the
    /// stored prefix. `false` is not an error: the exact record is gone
    /// and the cursor stands at the closest legal position.
    pub fn restore_position(&mut self, latch_mode: LatchMode, mtr: &mut Mtr) -> Result<bool> {
        assert!(mtr.is_active(), "restore outside an active mtr");
        if self.old_stored != OldStored::Stored
            || !matches!(self.pos_state, PosState::IsPositioned | PosState::WasPositioned)
        {
            error!(
                trx = ?self.trx_if_known,
                pos_state = ?self.pos_state,
                "restore of a cursor without a stored position"
            );
            panic!("restore of a cursor without a stored position");
        }
        let rel = self.rel_pos.expect("stored position carries rel_pos");

        if matches!(rel, RelPos::BeforeFirstInTree | RelPos::AfterLastInTree) {
            // Tree-edge positions never restore optimistically.
            self.btr_cur.open_at_side(rel == RelPos::BeforeFirstInTree, latch_mode, mtr)?;
            self.block_when_stored = Some(Arc::downgrade(&self.btr_cur.block()));
            self.pos_state = PosState::IsPositioned;
            self.latch_mode = Some(latch_mode);
            return Ok(false);
        }

        assert!(self.old_n_fields > 0 && !self.old_rec.is_empty(), "stored position lost its prefix");

        if matches!(latch_mode, LatchMode::SearchLeaf | LatchMode::ModifyLeaf) {
            if let Some(block) = self.block_when_stored.as_ref().and_then(Weak::upgrade) {
                let pool = Arc::clone(self.btr_cur.pool());
                if pool.optimistic_get(&block, self.modify_clock, latch_mode.leaf_latch(), mtr) {
                    // Clock match: no record on the page moved, the
                    // stored offset is still exact.
                    self.btr_cur.set_page_cursor(PageCursor::at(Arc::clone(&block), self.old_pos));
                    self.pos_state = PosState::IsPositioned;
                    self.latch_mode = Some(latch_mode);
                    if rel == RelPos::On {
                        #[cfg(debug_assertions)]
                        {
                            let index = Arc::clone(self.btr_cur.index());
                            let current = self.rec(mtr);
                            debug_assert_eq!(
                                index.cmp_rec_rec(&self.old_rec, current, self.old_n_fields),
                                std::cmp::Ordering::Equal,
                                "optimistic restore landed on a different record"
                            );
                        }
                        return Ok(true);
                    }
                    return Ok(false);
                }
            }
        }

        // Optimistic restoration failed or was not applicable: search on
        // the stored prefix. The caller's search mode is left untouched.
        debug!(rel = ?rel, "pessimistic cursor restore");
        let index = Arc::clone(self.btr_cur.index());
        let tuple = index.build_data_tuple(&self.old_rec, self.old_n_fields);
        let mode = match rel {
            RelPos::On => SearchMode::LE,
            RelPos::After => SearchMode::G,
            RelPos::Before => SearchMode::L,
            RelPos::BeforeFirstInTree | RelPos::AfterLastInTree => unreachable!(),
        };
        self.btr_cur.search(&tuple, mode, latch_mode, mtr)?;
        self.pos_state = PosState::IsPositioned;
        self.latch_mode = Some(latch_mode);

        if rel == RelPos::On
            && self.is_on_user_rec(mtr)
            && index.cmp_dtuple_rec(&tuple, self.rec(mtr)) == std::cmp::Ordering::Equal
        {
            // The record survived but may live on a different page after
            // structure changes: re-anchor the clock, keep the prefix.
            let block = self.btr_cur.block();
            self.block_when_stored = Some(Arc::downgrade(&block));
            self.modify_clock = block.modify_clock();
            return Ok(true);
        }

        // The exact record is gone; remember the landing instead.
        self.store_position(mtr);
        Ok(false)
    }

    /// Detach the cursor and commit its mtr: latches are released, the
    /// stored position (if any) remains usable for a later restore.
    pub fn commit_mtr(&mut self, mtr: &mut Mtr) {
        assert_eq!(self.pos_state, PosState::IsPositioned, "commit of unpositioned cursor");
        self.latch_mode = None;
        self.pos_state = PosState::WasPositioned;
        mtr.commit();
    }

    /// Release the leaf latch and buffer fix early, keeping the mtr
    /// running. Only legal when no change protected by the latch was made
    /// in this mtr.
    pub fn release_leaf(&mut self, mtr: &mut Mtr) {
        assert_eq!(self.pos_state, PosState::IsPositioned, "release on unpositioned cursor");
        assert!(self.latch_mode.is_some(), "release without latches");
        let block = self.btr_cur.block();
        mtr.release_block(&block);
        self.latch_mode = None;
        self.pos_state = PosState::WasPositioned;
    }

    /// Step to the next user record, crossing page boundaries. Returns
    /// `false` at the end of the index.
    pub fn move_to_next_user_rec(&mut self, mtr: &mut Mtr) -> Result<bool> {
        assert_eq!(self.pos_state, PosState::IsPositioned, "move on unpositioned cursor");
        self.old_stored = OldStored::NotStored;
        loop {
            if self.is_after_last_on_page(mtr) {
                if self.is_after_last_in_tree(mtr) {
                    return Ok(false);
                }
                self.move_to_next_page(mtr)?;
            }
            self.btr_cur.page_cursor_mut().move_next(mtr);
            if self.is_on_user_rec(mtr) {
                return Ok(true);
            }
        }
    }

    /// Hop from the supremum of the current leaf to the infimum of its
    /// right sibling, which must exist.
    pub fn move_to_next_page(&mut self, mtr: &mut Mtr) -> Result<()> {
        assert_eq!(self.pos_state, PosState::IsPositioned, "move on unpositioned cursor");
        let latch_mode = self.latch_mode.expect("move without latches");
        assert!(self.is_after_last_on_page(mtr), "next-page hop away from the supremum");
        self.old_stored = OldStored::NotStored;

        let block = self.btr_cur.block();
        let next_no = page::next(mtr.frame(&block));
        assert!(!next_no.is_null(), "next-page hop with no right sibling");

        let pool = Arc::clone(self.btr_cur.pool());
        let next_id = ironbase_types::PageId::new(self.btr_cur.index().space(), next_no);
        let next_block = pool.get(
            next_id,
            latch_mode.leaf_latch(),
            ironbase_buf::LatchLevel::TreeNode,
            mtr,
        );
        {
            let next_frame = mtr.frame(&next_block);
            if !page::is_leaf(next_frame) {
                return Err(ironbase_error::IronError::corruption(next_id, "right sibling is not a leaf"));
            }
            if page::prev(next_frame) != block.page_no() {
                return Err(ironbase_error::IronError::corruption(
                    next_id,
                    format!("broken sibling chain: prev is {}, expected {}", page::prev(next_frame), block.page_no()),
                ));
            }
        }
        next_block.set_check_at_flush(true);
        mtr.release_block(&block);
        self.btr_cur.set_page_cursor(PageCursor::before_first(next_block));
        Ok(())
    }

    /// Move to the previous position from the infimum of a leaf that has
    /// a left sibling. Crosses the mtr boundary: the current mtr is
    /// committed and restarted, and the position re-acquired with the
    /// left sibling latched during the descent.
    pub fn move_backward_from_page(&mut self, mtr: &mut Mtr) -> Result<()> {
        assert!(self.is_before_first_on_page(), "backward move away from the infimum");
        assert!(!self.is_before_first_in_tree(mtr), "backward move at the tree edge");
        let latch_mode = self.latch_mode.expect("move without latches");
        let prev_latch_mode = match latch_mode {
            LatchMode::SearchLeaf => LatchMode::SearchPrev,
            LatchMode::ModifyLeaf => LatchMode::ModifyPrev,
            _ => panic!("backward move requires a plain leaf latch mode"),
        };

        self.store_position(mtr);
        self.commit_mtr(mtr);
        mtr.start();
        self.restore_position(prev_latch_mode, mtr)?;

        let block = self.btr_cur.block();
        let prev_no = page::prev(mtr.frame(&block));

        if prev_no.is_null() {
            // The landing page became the leftmost; stay where we are.
        } else if self.is_before_first_on_page() {
            // Still on an infimum: swing onto the already-latched left
            // sibling.
            let prev_block = self
                .btr_cur
                .take_left_block()
                .expect("left sibling latched by the prev-mode descent");
            mtr.release_block(&block);
            let pc = PageCursor::after_last(prev_block, mtr);
            self.btr_cur.set_page_cursor(pc);
        } else {
            // Landed on a user record; the left sibling latch taken
            // during the descent is not needed.
            self.btr_cur.release_left_block(mtr);
        }

        self.latch_mode = Some(latch_mode);
        self.old_stored = OldStored::NotStored;
        Ok(())
    }

    /// Reset the cursor to its initial state, dropping the stored
    /// position.
    pub fn close(&mut self) {
        self.btr_cur.clear_position();
        self.pos_state = PosState::NotPositioned;
        self.latch_mode = None;
        self.rel_pos = None;
        self.old_stored = OldStored::NotStored;
        self.old_rec.clear();
        self.old_n_fields = 0;
        self.old_pos = 0;
        self.block_when_stored = None;
        self.modify_clock = 0;
        self.search_mode = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{bulk_load, SpaceAlloc};
    use crate::index::Index;
    use ironbase_buf::{BufferPool, BufferPoolConfig};
    use ironbase_types::{rec, IndexId, RollPtr, SpaceId};
    use proptest::prelude::*;

    fn setup(keys: &[u32], per_leaf: usize) -> (Arc<BufferPool>, Arc<Index>) {
        let pool = BufferPool::new(BufferPoolConfig::default());
        let alloc = SpaceAlloc::new(SpaceId(0), 10);
        let index = Index::new(IndexId(1), "pk", SpaceId(0), alloc.alloc().page_no, 2, 1);
        let records: Vec<Vec<u8>> = keys.iter().map(|k| record(*k)).collect();
        bulk_load(&pool, &alloc, &index, &records, per_leaf).unwrap();
        (pool, index)
    }

    fn record(key: u32) -> Vec<u8> {
        rec::encode(&[&key.to_be_bytes(), b"v"], 0, TrxId(1), RollPtr::NULL)
    }

    fn key(k: u32) -> DTuple {
        DTuple::from_slices(&[&k.to_be_bytes()])
    }

    fn cursor_key(cur: &PersistentCursor, mtr: &Mtr) -> u32 {
        u32::from_be_bytes(rec::field(cur.rec(mtr), 0).try_into().unwrap())
    }

    /// Scenario: store on a user record, no interference, optimistic
    /// restore succeeds without a tree search.
    #[test]
    fn optimistic_restore_hit() {
        let (pool, index) = setup(&[1, 2, 3], 10);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        pcur.open(&key(2), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert_eq!(cursor_key(&pcur, &mtr), 2);
        pcur.store_position(&mtr);
        pcur.commit_mtr(&mut mtr);
        assert_eq!(pcur.pos_state(), PosState::WasPositioned);

        let hits_before = pool.stats().optimistic_hits;
        mtr.start();
        assert!(pcur.restore_position(LatchMode::SearchLeaf, &mut mtr).unwrap());
        assert_eq!(cursor_key(&pcur, &mtr), 2);
        assert_eq!(pool.stats().optimistic_hits, hits_before + 1);
        mtr.commit();
    }

    /// Scenario: an insert on the leaf bumps the clock; restore falls
    /// back to a search and still finds the record.
    #[test]
    fn optimistic_miss_falls_back_to_search() {
        let (pool, index) = setup(&[1, 2, 3], 10);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        pcur.open(&key(2), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        pcur.store_position(&mtr);
        pcur.commit_mtr(&mut mtr);

        // Interfering insert between the mtrs.
        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        mtr.start();
        cur.search(&key(10), SearchMode::LE, LatchMode::ModifyLeaf, &mut mtr).unwrap();
        cur.insert(&record(10), &mut mtr).unwrap();
        mtr.commit();

        mtr.start();
        assert!(pcur.restore_position(LatchMode::SearchLeaf, &mut mtr).unwrap());
        assert_eq!(cursor_key(&pcur, &mtr), 2);
        assert!(pool.stats().optimistic_misses >= 1);
        mtr.commit();
    }

    /// Scenario: the stored record is deleted; restore reports `false`
    /// and lands on the predecessor, and a fresh store anchors there.
    #[test]
    fn restore_after_record_vanishes() {
        let (pool, index) = setup(&[1, 2, 3], 10);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        pcur.open(&key(2), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        pcur.store_position(&mtr);
        pcur.commit_mtr(&mut mtr);

        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        mtr.start();
        cur.search(&key(2), SearchMode::LE, LatchMode::ModifyLeaf, &mut mtr).unwrap();
        assert!(cur.optimistic_delete(&mut mtr));
        mtr.commit();

        mtr.start();
        assert!(!pcur.restore_position(LatchMode::SearchLeaf, &mut mtr).unwrap());
        assert_eq!(cursor_key(&pcur, &mtr), 1);
        // The landing was re-stored as the new anchor.
        assert_eq!(pcur.rel_pos(), Some(RelPos::On));
        assert_eq!(pcur.old_stored(), OldStored::Stored);
        mtr.commit();
    }

    #[test]
    fn empty_tree_stores_tree_edges() {
        let (pool, index) = setup(&[], 10);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        pcur.open(&key(5), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        // GE on an empty tree: the cursor is on the supremum.
        assert!(pcur.is_after_last_on_page(&mtr));
        pcur.store_position(&mtr);
        assert_eq!(pcur.rel_pos(), Some(RelPos::AfterLastInTree));
        pcur.commit_mtr(&mut mtr);

        mtr.start();
        assert!(!pcur.restore_position(LatchMode::SearchLeaf, &mut mtr).unwrap());
        assert!(pcur.is_after_last_on_page(&mtr));
        mtr.commit();

        // And the infimum side.
        mtr.start();
        pcur.open(&key(5), SearchMode::LE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert!(pcur.is_before_first_on_page());
        pcur.store_position(&mtr);
        assert_eq!(pcur.rel_pos(), Some(RelPos::BeforeFirstInTree));
        pcur.commit_mtr(&mut mtr);
        mtr.start();
        assert!(!pcur.restore_position(LatchMode::SearchLeaf, &mut mtr).unwrap());
        assert!(pcur.is_before_first_on_page());
        mtr.commit();
    }

    #[test]
    fn store_on_sentinels_anchors_neighbors() {
        let (pool, index) = setup(&[1, 2, 3], 10);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        // Supremum: anchor is the last record, rel AFTER.
        mtr.start();
        pcur.open(&key(9), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert!(pcur.is_after_last_on_page(&mtr));
        pcur.store_position(&mtr);
        assert_eq!(pcur.rel_pos(), Some(RelPos::After));
        pcur.commit_mtr(&mut mtr);
        // Infimum: anchor is the first record, rel BEFORE.
        mtr.start();
        pcur.open(&key(0), SearchMode::LE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert!(pcur.is_before_first_on_page());
        pcur.store_position(&mtr);
        assert_eq!(pcur.rel_pos(), Some(RelPos::Before));
        pcur.commit_mtr(&mut mtr);

        // Restoring the BEFORE position lands before record 1 (mode L).
        mtr.start();
        assert!(!pcur.restore_position(LatchMode::SearchLeaf, &mut mtr).unwrap());
        assert!(pcur.is_before_first_on_page());
        mtr.commit();
    }

    #[test]
    fn scan_crosses_pages_and_flags_flush_check() {
        let (pool, index) = setup(&[1, 2, 3, 4, 5, 6], 3);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        pcur.open(&key(1), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        let mut seen = vec![cursor_key(&pcur, &mtr)];
        while pcur.move_to_next_user_rec(&mut mtr).unwrap() {
            seen.push(cursor_key(&pcur, &mtr));
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
        // Only one leaf latch is held after the hops.
        assert_eq!(mtr.memo_len(), 2); // index latch + current leaf
        assert!(pcur.block().check_at_flush());
        mtr.commit();
    }

    /// Scenario: backward traversal across a leaf boundary.
    #[test]
    fn move_backward_lands_on_left_sibling() {
        let (pool, index) = setup(&[1, 2, 3, 4, 5, 6], 3);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        // Position on the infimum of the second leaf (keys 4..6).
        pcur.open(&key(4), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        let second_leaf = pcur.block().id();
        pcur.btr_cur_mut().page_cursor_mut().move_prev();
        assert!(pcur.is_before_first_on_page());

        pcur.move_backward_from_page(&mut mtr).unwrap();
        assert_eq!(cursor_key(&pcur, &mtr), 3);
        assert_eq!(pcur.latch_mode(), Some(LatchMode::SearchLeaf));
        assert_ne!(pcur.block().id(), second_leaf);
        // One leaf latch (plus the tree latch); the old leaf is free.
        assert_eq!(mtr.memo_len(), 2);
        mtr.commit();
    }

    #[test]
    fn next_page_then_backward_returns_to_same_page() {
        let (pool, index) = setup(&[1, 2, 3, 4, 5, 6], 3);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        pcur.open(&key(3), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        let first_leaf = pcur.block().id();
        pcur.btr_cur_mut().page_cursor_mut().move_next(&mut mtr);
        assert!(pcur.is_after_last_on_page(&mtr));
        pcur.move_to_next_page(&mut mtr).unwrap();
        assert!(pcur.is_before_first_on_page());
        pcur.move_backward_from_page(&mut mtr).unwrap();
        assert_eq!(pcur.block().id(), first_leaf);
        mtr.commit();
    }

    #[test]
    fn copy_stored_position_is_deep() {
        let (pool, index) = setup(&[1, 2, 3], 10);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        pcur.open(&key(2), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        pcur.store_position(&mtr);
        pcur.commit_mtr(&mut mtr);

        let mut other = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        pcur.copy_stored_position(&mut other);
        other.pos_state = PosState::WasPositioned;
        pcur.close();

        mtr.start();
        assert!(other.restore_position(LatchMode::SearchLeaf, &mut mtr).unwrap());
        assert_eq!(cursor_key(&other, &mtr), 2);
        mtr.commit();
    }

    #[test]
    fn release_leaf_detaches_cursor() {
        let (pool, index) = setup(&[1, 2, 3], 10);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        pcur.open(&key(2), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        pcur.store_position(&mtr);
        let block = pcur.block();
        pcur.release_leaf(&mut mtr);
        assert_eq!(pcur.pos_state(), PosState::WasPositioned);
        assert!(!mtr.memo_contains_page(&block));
        // The mtr is still active; the latch is really gone.
        assert_eq!(block.pin_count(), 0);
        mtr.commit();
    }

    #[test]
    #[should_panic(expected = "not implemented for descending modes")]
    fn open_on_user_rec_descending_fails_loudly() {
        let (pool, index) = setup(&[1, 2, 3], 10);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        let _ = pcur.open_on_user_rec(&key(2), SearchMode::LE, LatchMode::SearchLeaf, &mut mtr);
    }

    #[test]
    #[should_panic(expected = "without a stored position")]
    fn restore_without_store_panics() {
        let (pool, index) = setup(&[1], 10);
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        mtr.start();
        let _ = pcur.restore_position(LatchMode::SearchLeaf, &mut mtr);
    }

    proptest! {
        /// Store immediately followed by restore on an unmodified tree is
        /// the identity for every key in the tree.
        #[test]
        fn store_restore_identity(n in 1u32..40, per_leaf in 1usize..8) {
            let keys: Vec<u32> = (1..=n).collect();
            let (pool, index) = setup(&keys, per_leaf);
            let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(&pool));
            let mut mtr = Mtr::new();
            for k in keys {
                mtr.start();
                pcur.open(&key(k), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
                prop_assert_eq!(cursor_key(&pcur, &mtr), k);
                pcur.store_position(&mtr);
                pcur.commit_mtr(&mut mtr);

                mtr.start();
                prop_assert!(pcur.restore_position(LatchMode::SearchLeaf, &mut mtr).unwrap());
                prop_assert_eq!(cursor_key(&pcur, &mtr), k);
                mtr.commit();
            }
        }
    }
}
