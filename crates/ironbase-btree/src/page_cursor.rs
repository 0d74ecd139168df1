//! Cursor over the records of a single page.
//!
//! Positions are `0` for the infimum, `1..=n_recs` for user records in
//! key order, and `n_recs + 1` for the supremum. The sentinels are
//! synthetic; only user positions dereference to record bytes.

use std::cmp::Ordering;
use std::sync::Arc;

use ironbase_buf::{Block, Mtr};
use ironbase_types::page;

use crate::index::{DTuple, Index, SearchMode};

/// A position on one latched page.
#[derive(Debug, Clone)]
pub struct PageCursor {
    block: Arc<Block>,
    pos: u16,
}

impl PageCursor {
    /// Cursor on the infimum of `block`.
    #[must_use]
    pub fn before_first(block: Arc<Block>) -> Self {
        Self { block, pos: 0 }
    }

    /// Cursor on the supremum of `block`.
    #[must_use]
    pub fn after_last(block: Arc<Block>, mtr: &Mtr) -> Self {
        let n = page::n_recs(mtr.frame(&block));
        Self { block, pos: n + 1 }
    }

    /// Cursor at an explicit position.
    #[must_use]
    pub fn at(block: Arc<Block>, pos: u16) -> Self {
        Self { block, pos }
    }

    /// Position the cursor on `block` according to `mode`.
    #[must_use]
    pub fn search(
        index: &Index,
        tuple: &DTuple,
        mode: SearchMode,
        block: Arc<Block>,
        mtr: &Mtr,
    ) -> Self {
        let frame = mtr.frame(&block);
        let pos = match mode {
            SearchMode::L => lower_bound(index, tuple, frame),
            SearchMode::LE => upper_bound(index, tuple, frame),
            SearchMode::GE => lower_bound(index, tuple, frame) + 1,
            SearchMode::G => upper_bound(index, tuple, frame) + 1,
        };
        Self { block, pos }
    }

    #[inline]
    #[must_use]
    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }

    #[inline]
    #[must_use]
    pub fn pos(&self) -> u16 {
        self.pos
    }

    pub(crate) fn set_pos(&mut self, pos: u16) {
        self.pos = pos;
    }

    #[must_use]
    pub fn n_recs(&self, mtr: &Mtr) -> u16 {
        page::n_recs(mtr.frame(&self.block))
    }

    #[inline]
    #[must_use]
    pub fn is_before_first(&self) -> bool {
        self.pos == 0
    }

    #[must_use]
    pub fn is_after_last(&self, mtr: &Mtr) -> bool {
        self.pos == self.n_recs(mtr) + 1
    }

    #[must_use]
    pub fn is_user_rec(&self, mtr: &Mtr) -> bool {
        self.pos >= 1 && self.pos <= self.n_recs(mtr)
    }

    /// The record under the cursor.
    ///
    /// # Panics
    ///
    /// Panics when positioned on a sentinel (caller bug).
    #[must_use]
    pub fn rec<'a>(&self, mtr: &'a Mtr) -> &'a [u8] {
        assert!(self.pos >= 1, "record access on infimum");
        let frame = mtr.frame(&self.block);
        assert!(self.pos <= page::n_recs(frame), "record access on supremum");
        page::rec(frame, self.pos - 1)
    }

    /// Step toward the supremum.
    ///
    /// # Panics
    ///
    /// Panics when already on the supremum.
    pub fn move_next(&mut self, mtr: &Mtr) {
        assert!(!self.is_after_last(mtr), "move_next past supremum");
        self.pos += 1;
    }

    /// Step toward the infimum.
    ///
    /// # Panics
    ///
    /// Panics when already on the infimum.
    pub fn move_prev(&mut self) {
        assert!(self.pos > 0, "move_prev past infimum");
        self.pos -= 1;
    }
}

/// Number of records strictly less than `tuple` (also: the cursor
/// position of the greatest such record, with 0 meaning the infimum).
pub(crate) fn lower_bound(index: &Index, tuple: &DTuple, frame: &[u8]) -> u16 {
    bound(index, tuple, frame, |ord| ord == Ordering::Greater)
}

/// Number of records less than or equal to `tuple`.
pub(crate) fn upper_bound(index: &Index, tuple: &DTuple, frame: &[u8]) -> u16 {
    bound(index, tuple, frame, |ord| ord != Ordering::Less)
}

/// Binary search: the number of leading records for which
/// `keep(cmp(tuple, rec))` holds. `keep` must be monotone over the sorted
/// slot order.
fn bound(index: &Index, tuple: &DTuple, frame: &[u8], keep: impl Fn(Ordering) -> bool) -> u16 {
    let mut lo = 0u16;
    let mut hi = page::n_recs(frame);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let record = page::rec(frame, mid);
        if keep(index.cmp_dtuple_rec(tuple, record)) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironbase_buf::{BufferPool, BufferPoolConfig, LatchLevel, PageLatch, RedoOp};
    use ironbase_types::{rec, IndexId, PageId, PageNo, RollPtr, SpaceId, TrxId};

    fn fixture(keys: &[&[u8]]) -> (Arc<BufferPool>, Arc<Block>, Mtr, Arc<Index>) {
        let pool = BufferPool::new(BufferPoolConfig::default());
        let index = Index::new(IndexId(1), "pk", SpaceId(0), PageNo(10), 1, 1);
        let mut mtr = Mtr::new();
        mtr.start();
        let block = pool.create_page(PageId::new(SpaceId(0), PageNo(10)), LatchLevel::TreeNode, &mut mtr);
        mtr.with_frame_mut(&block, RedoOp::InitPage, |f| page::init(f, 0));
        for (i, k) in keys.iter().enumerate() {
            let r = rec::encode(&[k], 0, TrxId(1), RollPtr::NULL);
            mtr.with_frame_mut(&block, RedoOp::InsertRec, |f| {
                page::insert_rec(f, i as u16, &r).unwrap();
            });
        }
        mtr.commit();
        let mut mtr = Mtr::new();
        mtr.start();
        let block = pool.get(block.id(), PageLatch::Shared, LatchLevel::TreeNode, &mut mtr);
        (pool, block, mtr, index)
    }

    fn key(k: &[u8]) -> DTuple {
        DTuple::from_slices(&[k])
    }

    #[test]
    fn search_modes_on_present_key() {
        let (_pool, block, mtr, index) = fixture(&[b"b", b"d", b"f"]);
        let cur = PageCursor::search(&index, &key(b"d"), SearchMode::LE, Arc::clone(&block), &mtr);
        assert_eq!(rec::field(cur.rec(&mtr), 0), b"d");
        let cur = PageCursor::search(&index, &key(b"d"), SearchMode::GE, Arc::clone(&block), &mtr);
        assert_eq!(rec::field(cur.rec(&mtr), 0), b"d");
        let cur = PageCursor::search(&index, &key(b"d"), SearchMode::L, Arc::clone(&block), &mtr);
        assert_eq!(rec::field(cur.rec(&mtr), 0), b"b");
        let cur = PageCursor::search(&index, &key(b"d"), SearchMode::G, Arc::clone(&block), &mtr);
        assert_eq!(rec::field(cur.rec(&mtr), 0), b"f");
    }

    #[test]
    fn search_modes_on_absent_key() {
        let (_pool, block, mtr, index) = fixture(&[b"b", b"d", b"f"]);
        for mode in [SearchMode::LE, SearchMode::L] {
            let cur = PageCursor::search(&index, &key(b"c"), mode, Arc::clone(&block), &mtr);
            assert_eq!(rec::field(cur.rec(&mtr), 0), b"b");
        }
        for mode in [SearchMode::GE, SearchMode::G] {
            let cur = PageCursor::search(&index, &key(b"c"), mode, Arc::clone(&block), &mtr);
            assert_eq!(rec::field(cur.rec(&mtr), 0), b"d");
        }
    }

    #[test]
    fn search_lands_on_sentinels_at_the_edges() {
        let (_pool, block, mtr, index) = fixture(&[b"b", b"d"]);
        let cur = PageCursor::search(&index, &key(b"a"), SearchMode::LE, Arc::clone(&block), &mtr);
        assert!(cur.is_before_first());
        let cur = PageCursor::search(&index, &key(b"z"), SearchMode::GE, Arc::clone(&block), &mtr);
        assert!(cur.is_after_last(&mtr));
    }

    #[test]
    fn walk_the_page() {
        let (_pool, block, mtr, index) = fixture(&[b"a", b"b", b"c"]);
        let _ = index;
        let mut cur = PageCursor::before_first(Arc::clone(&block));
        let mut seen = Vec::new();
        loop {
            cur.move_next(&mtr);
            if cur.is_after_last(&mtr) {
                break;
            }
            seen.push(rec::field(cur.rec(&mtr), 0).to_vec());
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        cur.move_prev();
        assert_eq!(rec::field(cur.rec(&mtr), 0), b"c");
    }

    #[test]
    fn empty_page_sentinels_are_adjacent() {
        let (_pool, block, mtr, _index) = fixture(&[]);
        let cur = PageCursor::before_first(Arc::clone(&block));
        assert!(cur.is_before_first());
        let cur = PageCursor::after_last(block, &mtr);
        assert_eq!(cur.pos(), 1);
    }
}
