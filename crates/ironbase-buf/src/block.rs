//! A buffered page frame.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ironbase_types::{PageBuf, PageId, PageNo, SpaceId};
use parking_lot::{Mutex, RwLock};

/// The page latch: a read/write lock guarding the frame bytes. Owned
/// guards (via `arc_lock`) live in the mini-transaction memo.
pub(crate) type FrameLatch = Arc<RwLock<PageBuf>>;

#[derive(Debug)]
pub(crate) struct BlockMeta {
    pub pin_count: u32,
    /// Cleared when the block is evicted; an optimistic get that loses the
    /// race to eviction sees this and falls back to a full lookup.
    pub in_pool: bool,
    /// When the page first entered the pool; the basis of the old-to-young
    /// promotion threshold.
    pub first_access: Instant,
}

/// A buffered page frame with its latch, pin count, and modify clock.
#[derive(Debug)]
pub struct Block {
    id: PageId,
    latch: FrameLatch,
    meta: Mutex<BlockMeta>,
    /// Bumped on every structural or record change made under the
    /// exclusive latch. Equality between a stored and a current value
    /// certifies that no record on the page moved in between.
    modify_clock: AtomicU64,
    /// Requests a structural sanity check when the frame is next flushed.
    check_at_flush: AtomicBool,
}

impl Block {
    pub(crate) fn new(id: PageId, frame: PageBuf) -> Arc<Self> {
        Arc::new(Self {
            id,
            latch: Arc::new(RwLock::new(frame)),
            meta: Mutex::new(BlockMeta {
                pin_count: 0,
                in_pool: true,
                first_access: Instant::now(),
            }),
            modify_clock: AtomicU64::new(0),
            check_at_flush: AtomicBool::new(false),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn space(&self) -> SpaceId {
        self.id.space
    }

    #[inline]
    #[must_use]
    pub fn page_no(&self) -> PageNo {
        self.id.page_no
    }

    /// Current modify clock. Only meaningful while the caller holds at
    /// least a shared latch on the frame.
    #[inline]
    #[must_use]
    pub fn modify_clock(&self) -> u64 {
        self.modify_clock.load(Ordering::Acquire)
    }

    pub(crate) fn bump_modify_clock(&self) {
        self.modify_clock.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    #[must_use]
    pub fn check_at_flush(&self) -> bool {
        self.check_at_flush.load(Ordering::Relaxed)
    }

    pub fn set_check_at_flush(&self, v: bool) {
        self.check_at_flush.store(v, Ordering::Relaxed);
    }

    /// Current pin count (buffer fixes).
    #[must_use]
    pub fn pin_count(&self) -> u32 {
        self.meta.lock().pin_count
    }

    pub(crate) fn pin(&self) {
        self.meta.lock().pin_count += 1;
    }

    pub(crate) fn unpin(&self) {
        let mut meta = self.meta.lock();
        assert!(meta.pin_count > 0, "unpin of unpinned block {}", self.id);
        meta.pin_count -= 1;
    }

    pub(crate) fn latch(&self) -> &FrameLatch {
        &self.latch
    }

    pub(crate) fn meta(&self) -> &Mutex<BlockMeta> {
        &self.meta
    }

    /// Whether the block still belongs to a pool (not evicted).
    #[must_use]
    pub fn in_pool(&self) -> bool {
        self.meta.lock().in_pool
    }
}
