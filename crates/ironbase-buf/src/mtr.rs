//! Mini-transactions.
//!
//! An [`Mtr`] is a scoped bundle of page latches and redo records. Latch
//! acquisitions append to the memo; commit releases every memo entry in
//! reverse acquisition order and hands the batched redo to a
//! [`RedoSink`]. Commit is infallible once the mtr is active: a sink that
//! cannot persist its batch must abort the process, because losing redo
//! after latches were dropped leaves the system undefined.
//!
//! Latches must be acquired in a fixed partial order (index tree latch
//! before page latches, top-down by tree level). Each acquisition carries
//! a [`LatchLevel`] tag; a push below the highest level already in the
//! memo is a programming error and fails fast in debug builds.

use std::sync::Arc;

use ironbase_types::{PageBuf, PageId};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use smallvec::SmallVec;
use tracing::trace;

use crate::block::Block;

pub(crate) type SharedGuard = ArcRwLockReadGuard<RawRwLock, PageBuf>;
pub(crate) type ExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, PageBuf>;
type TreeSharedGuard = ArcRwLockReadGuard<RawRwLock, ()>;
type TreeExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Kind of page latch requested from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLatch {
    Shared,
    Exclusive,
}

/// Latch-order tag. Acquisitions within one mtr must be non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LatchLevel {
    /// An index tree latch.
    IndexTree,
    /// A B-tree page.
    TreeNode,
    /// The transaction system header page.
    TrxSysHeader,
}

/// Logical description of one page mutation, batched per mtr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedoOp {
    InitPage,
    SetLinks,
    InsertRec,
    DeleteRec,
    UpdateRec,
    WriteBytes { offset: u16, len: u16 },
}

/// One redo entry: which page, what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedoRecord {
    pub page: PageId,
    pub op: RedoOp,
}

/// Seam to the external redo log.
///
/// `write_batch` has no error channel on purpose: a failed redo write is
/// fatal to the process and must be handled (by aborting) inside the
/// sink.
pub trait RedoSink: Send + Sync {
    fn write_batch(&self, batch: &[RedoRecord]);
}

/// Sink that drops redo on the floor; used where durability is supplied
/// elsewhere (tests, scratch pools).
#[derive(Debug, Default)]
pub struct DiscardRedo;

impl RedoSink for DiscardRedo {
    fn write_batch(&self, _batch: &[RedoRecord]) {}
}

enum MemoSlot {
    /// Pin only: the block is already latched by an earlier entry.
    BufFix { block: Arc<Block> },
    PageShared { block: Arc<Block>, guard: SharedGuard },
    PageExclusive { block: Arc<Block>, guard: ExclusiveGuard },
    TreeShared { lock: Arc<RwLock<()>>, _guard: TreeSharedGuard },
    TreeExclusive { lock: Arc<RwLock<()>>, _guard: TreeExclusiveGuard },
}

struct MemoEntry {
    level: Option<LatchLevel>,
    slot: MemoSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MtrState {
    Idle,
    Active,
}

/// A mini-transaction.
pub struct Mtr {
    state: MtrState,
    memo: SmallVec<[MemoEntry; 8]>,
    redo: Vec<RedoRecord>,
    sink: Option<Arc<dyn RedoSink>>,
}

impl Mtr {
    /// A new, not-yet-started mtr with no redo sink.
    #[must_use]
    pub fn new() -> Self {
        Self { state: MtrState::Idle, memo: SmallVec::new(), redo: Vec::new(), sink: None }
    }

    /// A new mtr whose commits feed `sink`.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn RedoSink>) -> Self {
        Self { state: MtrState::Idle, memo: SmallVec::new(), redo: Vec::new(), sink: Some(sink) }
    }

    /// Begin the mtr.
    ///
    /// # Panics
    ///
    /// Panics if already active (mtrs are not reentrant).
    pub fn start(&mut self) {
        assert_eq!(self.state, MtrState::Idle, "mtr started twice");
        self.state = MtrState::Active;
    }

    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == MtrState::Active
    }

    /// Commit: write the redo batch, then release all memo entries in
    /// reverse acquisition order. The mtr can be started again afterward.
    pub fn commit(&mut self) {
        assert!(self.is_active(), "commit of inactive mtr");
        if let Some(sink) = &self.sink {
            if !self.redo.is_empty() {
                sink.write_batch(&self.redo);
            }
        }
        trace!(latches = self.memo.len(), redo = self.redo.len(), "mtr commit");
        self.redo.clear();
        while let Some(entry) = self.memo.pop() {
            release_entry(entry);
        }
        self.state = MtrState::Idle;
    }

    /// Number of memo entries currently held.
    #[must_use]
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    fn max_level(&self) -> Option<LatchLevel> {
        self.memo.iter().filter_map(|e| e.level).max()
    }

    fn push(&mut self, level: Option<LatchLevel>, slot: MemoSlot) {
        assert!(self.is_active(), "latch acquired outside an active mtr");
        if let (Some(level), Some(held)) = (level, self.max_level()) {
            debug_assert!(
                level >= held,
                "latch order violation: acquiring {level:?} while holding {held:?}"
            );
        }
        self.memo.push(MemoEntry { level, slot });
    }

    pub(crate) fn push_buf_fix(&mut self, block: Arc<Block>) {
        block.pin();
        self.push(None, MemoSlot::BufFix { block });
    }

    pub(crate) fn push_page_shared(&mut self, level: LatchLevel, block: Arc<Block>, guard: SharedGuard) {
        self.push(Some(level), MemoSlot::PageShared { block, guard });
    }

    pub(crate) fn push_page_exclusive(&mut self, level: LatchLevel, block: Arc<Block>, guard: ExclusiveGuard) {
        self.push(Some(level), MemoSlot::PageExclusive { block, guard });
    }

    /// Take a shared latch on an index tree lock. A lock already held by
    /// this mtr (in either mode) is not re-acquired.
    pub fn s_lock(&mut self, lock: &Arc<RwLock<()>>, level: LatchLevel) {
        if self.holds_tree_latch(lock) {
            return;
        }
        let guard = lock.read_arc();
        self.push(Some(level), MemoSlot::TreeShared { lock: Arc::clone(lock), _guard: guard });
    }

    /// Take an exclusive latch on an index tree lock.
    ///
    /// # Panics
    ///
    /// Panics if this mtr already holds the lock in shared mode: latch
    /// upgrades inside one mtr would self-deadlock and are caller bugs.
    pub fn x_lock(&mut self, lock: &Arc<RwLock<()>>, level: LatchLevel) {
        for e in &self.memo {
            match &e.slot {
                MemoSlot::TreeExclusive { lock: held, .. } if Arc::ptr_eq(held, lock) => return,
                MemoSlot::TreeShared { lock: held, .. } if Arc::ptr_eq(held, lock) => {
                    panic!("latch upgrade within one mtr")
                }
                _ => {}
            }
        }
        let guard = lock.write_arc();
        self.push(Some(level), MemoSlot::TreeExclusive { lock: Arc::clone(lock), _guard: guard });
    }

    /// Whether this mtr holds the given tree lock exclusively.
    #[must_use]
    pub fn holds_tree_latch_x(&self, lock: &Arc<RwLock<()>>) -> bool {
        self.memo.iter().any(|e| match &e.slot {
            MemoSlot::TreeExclusive { lock: held, .. } => Arc::ptr_eq(held, lock),
            _ => false,
        })
    }

    /// Whether this mtr holds the given tree lock in any mode.
    #[must_use]
    pub fn holds_tree_latch(&self, lock: &Arc<RwLock<()>>) -> bool {
        self.memo.iter().any(|e| match &e.slot {
            MemoSlot::TreeShared { lock: held, .. } | MemoSlot::TreeExclusive { lock: held, .. } => {
                Arc::ptr_eq(held, lock)
            }
            _ => false,
        })
    }

    /// Whether this mtr holds at least a shared latch on `block`.
    #[must_use]
    pub fn memo_contains_page(&self, block: &Block) -> bool {
        self.memo.iter().any(|e| match &e.slot {
            MemoSlot::PageShared { block: b, .. } | MemoSlot::PageExclusive { block: b, .. } => {
                std::ptr::eq(Arc::as_ptr(b), block as *const Block)
            }
            _ => false,
        })
    }

    /// Whether this mtr holds the exclusive latch on `block`.
    #[must_use]
    pub fn memo_contains_page_x(&self, block: &Block) -> bool {
        self.memo.iter().any(|e| match &e.slot {
            MemoSlot::PageExclusive { block: b, .. } => {
                std::ptr::eq(Arc::as_ptr(b), block as *const Block)
            }
            _ => false,
        })
    }

    /// The block with page id `id` latched by this mtr, if any, with the
    /// latch kind held.
    pub(crate) fn latched_block(&self, id: PageId) -> Option<(Arc<Block>, PageLatch)> {
        for e in &self.memo {
            match &e.slot {
                MemoSlot::PageShared { block, .. } if block.id() == id => {
                    return Some((Arc::clone(block), PageLatch::Shared));
                }
                MemoSlot::PageExclusive { block, .. } if block.id() == id => {
                    return Some((Arc::clone(block), PageLatch::Exclusive));
                }
                _ => {}
            }
        }
        None
    }

    /// Borrow the frame of a block latched by this mtr.
    ///
    /// # Panics
    ///
    /// Panics if the block is not latched here (caller bug).
    #[must_use]
    pub fn frame(&self, block: &Block) -> &[u8] {
        for e in &self.memo {
            match &e.slot {
                MemoSlot::PageShared { block: b, guard }
                    if std::ptr::eq(Arc::as_ptr(b), block as *const Block) =>
                {
                    return guard.as_bytes();
                }
                MemoSlot::PageExclusive { block: b, guard }
                    if std::ptr::eq(Arc::as_ptr(b), block as *const Block) =>
                {
                    return guard.as_bytes();
                }
                _ => {}
            }
        }
        panic!("block {} is not latched in this mtr", block.id());
    }

    /// Mutate the frame of an x-latched block. Bumps the block's modify
    /// clock and appends one redo record describing the change.
    ///
    /// # Panics
    ///
    /// Panics if the block is not x-latched here (caller bug).
    pub fn with_frame_mut<R>(
        &mut self,
        block: &Block,
        op: RedoOp,
        f: impl FnOnce(&mut PageBuf) -> R,
    ) -> R {
        assert!(self.is_active(), "page write outside an active mtr");
        let idx = self
            .memo
            .iter()
            .position(|e| match &e.slot {
                MemoSlot::PageExclusive { block: b, .. } => {
                    std::ptr::eq(Arc::as_ptr(b), block as *const Block)
                }
                _ => false,
            })
            .unwrap_or_else(|| panic!("block {} is not x-latched in this mtr", block.id()));
        let MemoSlot::PageExclusive { guard, .. } = &mut self.memo[idx].slot else {
            unreachable!()
        };
        let r = f(&mut *guard);
        block.bump_modify_clock();
        self.redo.push(RedoRecord { page: block.id(), op });
        r
    }

    /// Release every memo entry referring to `block` ahead of commit.
    /// The rest of the memo keeps its order.
    pub fn release_block(&mut self, block: &Block) {
        assert!(self.is_active(), "release on inactive mtr");
        let mut i = 0;
        let mut released = false;
        while i < self.memo.len() {
            let matches = match &self.memo[i].slot {
                MemoSlot::BufFix { block: b }
                | MemoSlot::PageShared { block: b, .. }
                | MemoSlot::PageExclusive { block: b, .. } => {
                    std::ptr::eq(Arc::as_ptr(b), block as *const Block)
                }
                _ => false,
            };
            if matches {
                let entry = self.memo.remove(i);
                release_entry(entry);
                released = true;
            } else {
                i += 1;
            }
        }
        assert!(released, "release of block {} absent from mtr memo", block.id());
    }
}

impl Default for Mtr {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mtr {
    fn drop(&mut self) {
        // Dropping an active mtr releases its latches without flushing
        // redo; only acceptable on unwind paths.
        while let Some(entry) = self.memo.pop() {
            release_entry(entry);
        }
    }
}

fn release_entry(entry: MemoEntry) {
    match entry.slot {
        MemoSlot::BufFix { block } => block.unpin(),
        MemoSlot::PageShared { block, guard } => {
            drop(guard);
            block.unpin();
        }
        MemoSlot::PageExclusive { block, guard } => {
            drop(guard);
            block.unpin();
        }
        MemoSlot::TreeShared { .. } | MemoSlot::TreeExclusive { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironbase_types::{PageNo, SYS_SPACE};
    use parking_lot::Mutex;

    fn block(no: u32) -> Arc<Block> {
        Block::new(PageId::new(SYS_SPACE, PageNo(no)), PageBuf::zeroed(4096))
    }

    fn latch_shared(mtr: &mut Mtr, b: &Arc<Block>) {
        b.pin();
        let guard = b.latch().read_arc();
        mtr.push_page_shared(LatchLevel::TreeNode, Arc::clone(b), guard);
    }

    fn latch_exclusive(mtr: &mut Mtr, b: &Arc<Block>) {
        b.pin();
        let guard = b.latch().write_arc();
        mtr.push_page_exclusive(LatchLevel::TreeNode, Arc::clone(b), guard);
    }

    #[test]
    fn commit_releases_everything() {
        let a = block(1);
        let b = block(2);
        let mut mtr = Mtr::new();
        mtr.start();
        latch_exclusive(&mut mtr, &a);
        latch_shared(&mut mtr, &b);
        assert_eq!(mtr.memo_len(), 2);
        assert!(mtr.memo_contains_page_x(&a));
        assert!(mtr.memo_contains_page(&b));
        mtr.commit();
        assert_eq!(mtr.memo_len(), 0);
        assert_eq!(a.pin_count(), 0);
        assert_eq!(b.pin_count(), 0);
        // Both latches are free again.
        assert!(a.latch().try_write().is_some());
        assert!(b.latch().try_write().is_some());
    }

    #[test]
    fn mtr_restarts_after_commit() {
        let a = block(1);
        let mut mtr = Mtr::new();
        mtr.start();
        latch_shared(&mut mtr, &a);
        mtr.commit();
        mtr.start();
        latch_shared(&mut mtr, &a);
        mtr.commit();
    }

    #[test]
    #[should_panic(expected = "started twice")]
    fn double_start_panics() {
        let mut mtr = Mtr::new();
        mtr.start();
        mtr.start();
    }

    #[test]
    fn write_bumps_clock_and_logs_redo() {
        struct Capture(Mutex<Vec<RedoRecord>>);
        impl RedoSink for Capture {
            fn write_batch(&self, batch: &[RedoRecord]) {
                self.0.lock().extend_from_slice(batch);
            }
        }

        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        let a = block(1);
        let mut mtr = Mtr::with_sink(Arc::clone(&sink) as Arc<dyn RedoSink>);
        mtr.start();
        latch_exclusive(&mut mtr, &a);
        mtr.with_frame_mut(&a, RedoOp::WriteBytes { offset: 0, len: 4 }, |frame| {
            frame.as_bytes_mut()[..4].copy_from_slice(&7u32.to_be_bytes());
        });
        assert_eq!(a.modify_clock(), 1);
        mtr.commit();
        let batch = sink.0.lock();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].page, a.id());
    }

    #[test]
    fn release_block_keeps_rest_of_memo() {
        let a = block(1);
        let b = block(2);
        let mut mtr = Mtr::new();
        mtr.start();
        latch_shared(&mut mtr, &a);
        latch_shared(&mut mtr, &b);
        mtr.release_block(&a);
        assert_eq!(mtr.memo_len(), 1);
        assert!(!mtr.memo_contains_page(&a));
        assert!(mtr.memo_contains_page(&b));
        assert_eq!(a.pin_count(), 0);
        mtr.commit();
    }

    #[test]
    #[should_panic(expected = "not latched in this mtr")]
    fn frame_without_latch_panics() {
        let a = block(1);
        let mut mtr = Mtr::new();
        mtr.start();
        let _ = mtr.frame(&a);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "latch order violation")]
    fn descending_level_fails_fast() {
        let a = block(1);
        let tree = Arc::new(RwLock::new(()));
        let mut mtr = Mtr::new();
        mtr.start();
        latch_shared(&mut mtr, &a);
        // Tree latches order before page latches; this push is backwards.
        mtr.s_lock(&tree, LatchLevel::IndexTree);
    }

    #[test]
    fn tree_latch_not_reacquired() {
        let tree = Arc::new(RwLock::new(()));
        let mut mtr = Mtr::new();
        mtr.start();
        mtr.s_lock(&tree, LatchLevel::IndexTree);
        mtr.s_lock(&tree, LatchLevel::IndexTree);
        assert_eq!(mtr.memo_len(), 1);
        assert!(mtr.holds_tree_latch(&tree));
        mtr.commit();
        assert!(tree.try_write().is_some());
    }

    #[test]
    #[should_panic(expected = "latch upgrade")]
    fn tree_latch_upgrade_panics() {
        let tree = Arc::new(RwLock::new(()));
        let mut mtr = Mtr::new();
        mtr.start();
        mtr.s_lock(&tree, LatchLevel::IndexTree);
        mtr.x_lock(&tree, LatchLevel::IndexTree);
    }
}
