//! Bulk index build.
//!
//! Loads a sorted run of records into a fresh tree: leaves are filled
//! left to right and chained, then the root is written as a single
//! internal level of node pointers (or as the lone leaf when everything
//! fits on one page). The build holds the exclusive tree latch for its
//! whole duration.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ironbase_buf::{Block, BufferPool, LatchLevel, Mtr, PageLatch, RedoOp};
use ironbase_error::{IronError, Result};
use ironbase_types::{page, rec, PageId, PageNo, SpaceId};
use tracing::info;

use crate::index::Index;
use crate::tree_cursor::encode_node_ptr;

/// Hands out fresh page numbers for one tablespace; the stand-in for the
/// external space allocator.
#[derive(Debug)]
pub struct SpaceAlloc {
    space: SpaceId,
    next: AtomicU32,
}

impl SpaceAlloc {
    #[must_use]
    pub fn new(space: SpaceId, first_page: u32) -> Self {
        Self { space, next: AtomicU32::new(first_page) }
    }

    #[inline]
    #[must_use]
    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// Allocate the next page id.
    #[must_use]
    pub fn alloc(&self) -> PageId {
        let no = self.next.fetch_add(1, Ordering::Relaxed);
        assert!(no != ironbase_types::FIL_NULL, "tablespace page numbers exhausted");
        PageId::new(self.space, PageNo(no))
    }
}

fn get_or_create(pool: &BufferPool, id: PageId, mtr: &mut Mtr) -> Arc<Block> {
    if pool.contains(id) || pool.space().contains(id) {
        pool.get(id, PageLatch::Exclusive, LatchLevel::TreeNode, mtr)
    } else {
        pool.create_page(id, LatchLevel::TreeNode, mtr)
    }
}

/// Build the tree of `index` from `records`, which must be encoded
/// records sorted ascending on the order prefix. At most `recs_per_leaf`
/// records are placed per leaf.
///
/// # Errors
///
/// `OutOfFileSpace` when a leaf cannot hold its share of records or the
/// node pointers do not fit the root (the build writes a single internal
/// level).
pub fn bulk_load(
    pool: &Arc<BufferPool>,
    alloc: &SpaceAlloc,
    index: &Arc<Index>,
    records: &[Vec<u8>],
    recs_per_leaf: usize,
) -> Result<()> {
    assert!(recs_per_leaf >= 1, "at least one record per leaf");
    let space = index.space();
    assert_eq!(space, alloc.space(), "allocator and index tablespaces differ");
    debug_assert!(
        records.windows(2).all(|w| {
            index.cmp_rec_rec(&w[0], &w[1], index.n_uniq()) == std::cmp::Ordering::Less
        }),
        "bulk load input must be sorted and duplicate-free"
    );

    let mut mtr = Mtr::new();
    mtr.start();
    mtr.x_lock(index.latch(), LatchLevel::IndexTree);

    let root = get_or_create(pool, index.root_id(), &mut mtr);

    if records.len() <= recs_per_leaf {
        // Single-page tree: the root is the leaf.
        mtr.with_frame_mut(&root, RedoOp::InitPage, |f| page::init(f, 0));
        fill_leaf(&root, records, &mut mtr, space)?;
        mtr.commit();
        info!(index = index.name(), n_records = records.len(), leaves = 1, "bulk load complete");
        return Ok(());
    }

    let mut separators: Vec<(Vec<Vec<u8>>, PageNo)> = Vec::new();
    let mut prev_leaf: Option<Arc<Block>> = None;
    for chunk in records.chunks(recs_per_leaf) {
        let leaf = pool.create_page(alloc.alloc(), LatchLevel::TreeNode, &mut mtr);
        mtr.with_frame_mut(&leaf, RedoOp::InitPage, |f| page::init(f, 0));
        fill_leaf(&leaf, chunk, &mut mtr, space)?;
        if let Some(prev) = &prev_leaf {
            let prev_no = prev.page_no();
            let leaf_no = leaf.page_no();
            mtr.with_frame_mut(prev, RedoOp::SetLinks, |f| page::set_next(f, leaf_no));
            mtr.with_frame_mut(&leaf, RedoOp::SetLinks, |f| page::set_prev(f, prev_no));
        }
        let sep: Vec<Vec<u8>> =
            (0..index.n_uniq() as usize).map(|i| rec::field(&chunk[0], i).to_vec()).collect();
        separators.push((sep, leaf.page_no()));
        prev_leaf = Some(leaf);
    }

    mtr.with_frame_mut(&root, RedoOp::InitPage, |f| page::init(f, 1));
    for (slot, (sep, child)) in separators.iter().enumerate() {
        let fields: Vec<&[u8]> = sep.iter().map(Vec::as_slice).collect();
        let ptr = encode_node_ptr(&fields, *child);
        mtr.with_frame_mut(&root, RedoOp::InsertRec, |f| page::insert_rec(f, slot as u16, &ptr))
            .map_err(|_| IronError::OutOfFileSpace { space })?;
    }
    mtr.commit();
    info!(
        index = index.name(),
        n_records = records.len(),
        leaves = separators.len(),
        "bulk load complete"
    );
    Ok(())
}

fn fill_leaf(leaf: &Arc<Block>, records: &[Vec<u8>], mtr: &mut Mtr, space: SpaceId) -> Result<()> {
    for (slot, record) in records.iter().enumerate() {
        mtr.with_frame_mut(leaf, RedoOp::InsertRec, |f| page::insert_rec(f, slot as u16, record))
            .map_err(|_| IronError::OutOfFileSpace { space })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{DTuple, SearchMode};
    use crate::tree_cursor::{LatchMode, TreeCursor};
    use ironbase_buf::BufferPoolConfig;
    use ironbase_types::{IndexId, RollPtr, TrxId};

    fn setup() -> (Arc<BufferPool>, SpaceAlloc, Arc<Index>) {
        let pool = BufferPool::new(BufferPoolConfig::default());
        let alloc = SpaceAlloc::new(SpaceId(0), 10);
        let index = Index::new(IndexId(1), "pk", SpaceId(0), alloc.alloc().page_no, 2, 1);
        (pool, alloc, index)
    }

    fn record(key: u32) -> Vec<u8> {
        rec::encode(&[&key.to_be_bytes(), b"payload"], 0, TrxId(1), RollPtr::NULL)
    }

    fn key(key: u32) -> DTuple {
        DTuple::from_slices(&[&key.to_be_bytes()])
    }

    fn load(n: u32, per_leaf: usize) -> (Arc<BufferPool>, SpaceAlloc, Arc<Index>) {
        let (pool, alloc, index) = setup();
        let records: Vec<Vec<u8>> = (1..=n).map(record).collect();
        bulk_load(&pool, &alloc, &index, &records, per_leaf).unwrap();
        (pool, alloc, index)
    }

    fn found_key(cur: &TreeCursor, mtr: &Mtr) -> u32 {
        let record = cur.page_cursor().rec(mtr);
        u32::from_be_bytes(rec::field(record, 0).try_into().unwrap())
    }

    #[test]
    fn single_leaf_tree_search() {
        let (pool, _alloc, index) = load(3, 10);
        let mut mtr = Mtr::new();
        mtr.start();
        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        cur.search(&key(2), SearchMode::LE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert_eq!(found_key(&cur, &mtr), 2);
        assert_eq!(cur.block().page_no(), index.root());
        mtr.commit();
    }

    #[test]
    fn multi_leaf_tree_search_descends() {
        let (pool, _alloc, index) = load(9, 3);
        let mut mtr = Mtr::new();
        mtr.start();
        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        for k in 1..=9 {
            cur.search(&key(k), SearchMode::LE, LatchMode::SearchLeaf, &mut mtr).unwrap();
            assert_eq!(found_key(&cur, &mtr), k);
            mtr.commit();
            mtr.start();
        }
        // The leaf is not the root in a nine-record, three-per-leaf tree.
        cur.search(&key(5), SearchMode::LE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert_ne!(cur.block().page_no(), index.root());
        mtr.commit();
    }

    #[test]
    fn cross_leaf_boundary_modes() {
        let (pool, _alloc, index) = load(6, 3);
        let mut mtr = Mtr::new();
        mtr.start();
        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        // Key 4 opens the second leaf; L must land on key 3 in the first.
        cur.search(&key(4), SearchMode::L, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert_eq!(found_key(&cur, &mtr), 3);
        mtr.commit();
        mtr.start();
        cur.search(&key(4), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert_eq!(found_key(&cur, &mtr), 4);
        mtr.commit();
    }

    #[test]
    fn open_at_side_reaches_edges() {
        let (pool, _alloc, index) = load(9, 3);
        let mut mtr = Mtr::new();
        mtr.start();
        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        cur.open_at_side(true, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert!(cur.page_cursor().is_before_first());
        let mut pc = cur.page_cursor().clone();
        pc.move_next(&mtr);
        assert_eq!(u32::from_be_bytes(rec::field(pc.rec(&mtr), 0).try_into().unwrap()), 1);
        mtr.commit();

        mtr.start();
        cur.open_at_side(false, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert!(cur.page_cursor().is_after_last(&mtr));
        let mut pc = cur.page_cursor().clone();
        pc.move_prev();
        assert_eq!(u32::from_be_bytes(rec::field(pc.rec(&mtr), 0).try_into().unwrap()), 9);
        mtr.commit();
    }

    #[test]
    fn search_prev_latches_left_sibling() {
        let (pool, _alloc, index) = load(6, 3);
        let mut mtr = Mtr::new();
        mtr.start();
        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        cur.search(&key(4), SearchMode::GE, LatchMode::SearchPrev, &mut mtr).unwrap();
        assert_eq!(found_key(&cur, &mtr), 4);
        let left = cur.left_block().expect("left sibling latched");
        assert!(mtr.memo_contains_page(left));
        // The left sibling really is the leaf holding keys 1..=3.
        assert_eq!(page::next(mtr.frame(left)), cur.block().page_no());
        mtr.commit();
    }

    #[test]
    fn insert_lands_in_key_order() {
        let (pool, _alloc, index) = load(5, 10);
        let mut mtr = Mtr::new();
        mtr.start();
        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        // Insert key 0 at the front: LE search lands on the infimum.
        cur.search(&key(0), SearchMode::LE, LatchMode::ModifyLeaf, &mut mtr).unwrap();
        assert!(cur.page_cursor().is_before_first());
        cur.insert(&record(0), &mut mtr).unwrap();
        assert_eq!(found_key(&cur, &mtr), 0);
        mtr.commit();

        mtr.start();
        cur.search(&key(0), SearchMode::GE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert_eq!(found_key(&cur, &mtr), 0);
        assert_eq!(cur.page_cursor().n_recs(&mtr), 6);
        mtr.commit();
    }

    #[test]
    fn optimistic_delete_refuses_to_empty_a_leaf() {
        let (pool, _alloc, index) = load(4, 2);
        let mut mtr = Mtr::new();
        mtr.start();
        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        cur.search(&key(3), SearchMode::LE, LatchMode::ModifyLeaf, &mut mtr).unwrap();
        assert!(cur.optimistic_delete(&mut mtr));
        // Key 4 is now alone on its leaf.
        mtr.commit();
        mtr.start();
        cur.search(&key(4), SearchMode::LE, LatchMode::ModifyLeaf, &mut mtr).unwrap();
        assert!(!cur.optimistic_delete(&mut mtr));
        mtr.commit();
    }

    #[test]
    fn pessimistic_delete_unlinks_emptied_leaf() {
        let (pool, _alloc, index) = load(4, 2);
        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();

        // Find the second leaf before surgery.
        mtr.start();
        cur.search(&key(3), SearchMode::LE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        let second_leaf = cur.block().id();
        mtr.commit();

        for k in [3u32, 4] {
            mtr.start();
            cur.search(&key(k), SearchMode::LE, LatchMode::ModifyTree, &mut mtr).unwrap();
            cur.pessimistic_delete(&mut mtr).unwrap();
            mtr.commit();
        }
        assert!(!pool.space().contains(second_leaf));

        // Remaining keys are intact and the first leaf has no right link.
        mtr.start();
        cur.search(&key(2), SearchMode::LE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        assert_eq!(found_key(&cur, &mtr), 2);
        assert!(page::next(mtr.frame(&cur.block())).is_null());
        mtr.commit();
    }

    #[test]
    fn deleting_everything_collapses_to_empty_root_leaf() {
        let (pool, _alloc, index) = load(4, 2);
        let mut cur = TreeCursor::new(Arc::clone(&index), Arc::clone(&pool));
        let mut mtr = Mtr::new();
        for k in 1..=4u32 {
            mtr.start();
            cur.search(&key(k), SearchMode::LE, LatchMode::ModifyTree, &mut mtr).unwrap();
            cur.pessimistic_delete(&mut mtr).unwrap();
            mtr.commit();
        }
        mtr.start();
        cur.search(&key(1), SearchMode::LE, LatchMode::SearchLeaf, &mut mtr).unwrap();
        let block = cur.block();
        assert_eq!(block.page_no(), index.root());
        assert!(page::is_leaf(mtr.frame(&block)));
        assert_eq!(page::n_recs(mtr.frame(&block)), 0);
        assert!(cur.page_cursor().is_before_first());
        mtr.commit();
    }
}
