//! The transaction system.
//!
//! One shared structure behind the kernel mutex: the id counter, the
//! active transaction list (sorted by id, biggest first), and the
//! rollback segment map. The header page at `(0, TRX_SYS_PAGE_NO)`
//! persists the id ceiling and the 256 rseg slots.
//!
//! Id allocation follows the write-margin protocol: whenever the counter
//! is about to hand out a value divisible by
//! [`TRX_SYS_TRX_ID_WRITE_MARGIN`], the next ceiling is flushed to the
//! header first. On startup the stored ceiling, rounded up by the margin
//! plus one margin of slack, seeds the counter, so ids never repeat
//! across restarts without per-id I/O.

use std::sync::Arc;

use ironbase_buf::{BufferPool, LatchLevel, Mtr, PageLatch, RedoOp};
use ironbase_mem::{Arena, ArenaRef};
use ironbase_types::{PageId, PageNo, RollPtr, SpaceId, TrxId, UndoNo, FIL_NULL, SYS_SPACE};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::trx::{Trx, TrxState};
use crate::undo::Rseg;

/// Page number of the transaction system header in the system
/// tablespace.
pub const TRX_SYS_PAGE_NO: PageNo = PageNo(5);

/// Number of rollback segment slots in the header.
pub const TRX_SYS_N_RSEGS: usize = 256;

/// The id ceiling is flushed whenever the counter crosses a multiple of
/// this margin (a power of two).
pub const TRX_SYS_TRX_ID_WRITE_MARGIN: u64 = 256;

/// Slot 0 is the system rollback segment, created with the tablespace.
pub const SYSTEM_RSEG_ID: u8 = 0;

/// Header page of the system rollback segment.
const SYSTEM_RSEG_PAGE_NO: PageNo = PageNo(6);

/// Header layout offsets.
const TRX_ID_STORE: usize = 0;
const FSEG_HEADER_SIZE: usize = 10;
const TRX_SYS_RSEGS: usize = 8 + FSEG_HEADER_SIZE;
const RSEG_SLOT_SIZE: usize = 8;

struct TrxSysInner {
    max_trx_id: u64,
    /// Active and prepared transactions, sorted on id, biggest first.
    trx_list: Vec<Arc<Trx>>,
    rsegs: Vec<Option<Arc<Rseg>>>,
    /// Round-robin cursor for assigning rsegs to transactions.
    latest_rseg: usize,
    /// Length of the committed-undo history across rsegs.
    rseg_history_len: usize,
}

/// The transaction system.
pub struct TrxSys {
    pool: Arc<BufferPool>,
    kernel: Mutex<TrxSysInner>,
    /// Blocks dictionary operations (DROP/CREATE) against rows whose
    /// undo is in flight. Ordered before the kernel mutex.
    dict_operation_lock: Arc<RwLock<()>>,
}

impl TrxSys {
    /// Create a fresh transaction system: format the header page, seed
    /// the id ceiling with one write margin, and install the system
    /// rollback segment in slot 0.
    #[must_use]
    pub fn create(pool: Arc<BufferPool>) -> Arc<Self> {
        let mut mtr = Mtr::new();
        mtr.start();
        let header = pool.create_page(
            PageId::new(SYS_SPACE, TRX_SYS_PAGE_NO),
            LatchLevel::TrxSysHeader,
            &mut mtr,
        );
        mtr.with_frame_mut(&header, RedoOp::InitPage, |f| {
            f.as_bytes_mut().fill(0);
            f.as_bytes_mut()[TRX_ID_STORE..TRX_ID_STORE + 8]
                .copy_from_slice(&TRX_SYS_TRX_ID_WRITE_MARGIN.to_be_bytes());
            for slot in 0..TRX_SYS_N_RSEGS {
                let off = TRX_SYS_RSEGS + slot * RSEG_SLOT_SIZE + 4;
                f.as_bytes_mut()[off..off + 4].copy_from_slice(&FIL_NULL.to_be_bytes());
            }
        });
        write_rseg_slot(&mut mtr, &header, SYSTEM_RSEG_ID as usize, SYS_SPACE, SYSTEM_RSEG_PAGE_NO);
        mtr.commit();

        let mut rsegs: Vec<Option<Arc<Rseg>>> = vec![None; TRX_SYS_N_RSEGS];
        rsegs[SYSTEM_RSEG_ID as usize] =
            Some(Rseg::new(SYSTEM_RSEG_ID, PageId::new(SYS_SPACE, SYSTEM_RSEG_PAGE_NO)));
        info!(ceiling = TRX_SYS_TRX_ID_WRITE_MARGIN, "transaction system created");
        Arc::new(Self {
            pool,
            kernel: Mutex::new(TrxSysInner {
                max_trx_id: TRX_SYS_TRX_ID_WRITE_MARGIN,
                trx_list: Vec::new(),
                rsegs,
                latest_rseg: 0,
                rseg_history_len: 0,
            }),
            dict_operation_lock: Arc::new(RwLock::new(())),
        })
    }

    /// Open an existing transaction system from its header page.
    ///
    /// The counter resumes at the stored ceiling rounded up by the write
    /// margin plus one margin of slack, strictly above any id handed out
    /// before the restart. Rollback segment objects are rebuilt from the
    /// occupied slots; their in-memory record streams start empty.
    #[must_use]
    pub fn open(pool: Arc<BufferPool>) -> Arc<Self> {
        let mut mtr = Mtr::new();
        mtr.start();
        let header = pool.get(
            PageId::new(SYS_SPACE, TRX_SYS_PAGE_NO),
            PageLatch::Shared,
            LatchLevel::TrxSysHeader,
            &mut mtr,
        );
        let frame = mtr.frame(&header);
        let stored = u64::from_be_bytes(frame[TRX_ID_STORE..TRX_ID_STORE + 8].try_into().expect("8-byte ceiling"));
        let max_trx_id =
            stored.next_multiple_of(TRX_SYS_TRX_ID_WRITE_MARGIN) + TRX_SYS_TRX_ID_WRITE_MARGIN;

        let mut rsegs: Vec<Option<Arc<Rseg>>> = vec![None; TRX_SYS_N_RSEGS];
        for (slot, entry) in rsegs.iter_mut().enumerate() {
            let (space, page_no) = read_rseg_slot(frame, slot);
            if !page_no.is_null() {
                *entry = Some(Rseg::new(
                    u8::try_from(slot).expect("rseg id fits in u8"),
                    PageId::new(space, page_no),
                ));
            }
        }
        mtr.commit();
        info!(stored, max_trx_id, "transaction system opened");
        Arc::new(Self {
            pool,
            kernel: Mutex::new(TrxSysInner {
                max_trx_id,
                trx_list: Vec::new(),
                rsegs,
                latest_rseg: 0,
                rseg_history_len: 0,
            }),
            dict_operation_lock: Arc::new(RwLock::new(())),
        })
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// The dictionary operation lock.
    #[must_use]
    pub fn dict_operation_lock(&self) -> &Arc<RwLock<()>> {
        &self.dict_operation_lock
    }

    /// Allocate a new transaction id.
    #[must_use]
    pub fn get_new_trx_id(&self) -> TrxId {
        let mut inner = self.kernel.lock();
        self.get_new_trx_id_locked(&mut inner)
    }

    fn get_new_trx_id_locked(&self, inner: &mut TrxSysInner) -> TrxId {
        // The counter starts divisible by the margin, so the first call
        // after any start flushes the new ceiling before handing out an
        // id: ids can never repeat across restarts.
        if inner.max_trx_id % TRX_SYS_TRX_ID_WRITE_MARGIN == 0 {
            self.flush_max_trx_id(inner);
        }
        let id = inner.max_trx_id;
        inner.max_trx_id += 1;
        TrxId(id)
    }

    /// Write the next id ceiling to the header page.
    fn flush_max_trx_id(&self, inner: &mut TrxSysInner) {
        let ceiling = inner.max_trx_id + TRX_SYS_TRX_ID_WRITE_MARGIN;
        let mut mtr = Mtr::new();
        mtr.start();
        let header = pool_header(&self.pool, PageLatch::Exclusive, &mut mtr);
        mtr.with_frame_mut(&header, RedoOp::WriteBytes { offset: TRX_ID_STORE as u16, len: 8 }, |f| {
            f.as_bytes_mut()[TRX_ID_STORE..TRX_ID_STORE + 8].copy_from_slice(&ceiling.to_be_bytes());
        });
        mtr.commit();
        info!(ceiling, "flushed max trx id ceiling");
    }

    /// Smallest id that could still belong to an active transaction.
    #[must_use]
    pub fn min_trx_id(&self) -> TrxId {
        let inner = self.kernel.lock();
        min_trx_id_locked(&inner)
    }

    #[must_use]
    pub fn max_trx_id(&self) -> TrxId {
        TrxId(self.kernel.lock().max_trx_id)
    }

    /// Whether a transaction with the given id is active (or prepared).
    ///
    /// Ids at or above the counter report `true`: such an id on a page
    /// is corruption, and callers diagnosing it want the conservative
    /// answer.
    #[must_use]
    pub fn is_active(&self, trx_id: TrxId) -> bool {
        let inner = self.kernel.lock();
        if trx_id < min_trx_id_locked(&inner) {
            return false;
        }
        if trx_id.0 >= inner.max_trx_id {
            return true;
        }
        inner
            .trx_list
            .iter()
            .find(|t| t.id() == trx_id)
            .is_some_and(|t| matches!(t.state(), TrxState::Active | TrxState::Prepared))
    }

    /// Start a transaction: assign an id and a rollback segment
    /// (round-robin over the occupied slots) and link it into the active
    /// list.
    #[must_use]
    pub fn begin(&self) -> Arc<Trx> {
        let mut inner = self.kernel.lock();
        let id = self.get_new_trx_id_locked(&mut inner);

        let occupied: Vec<usize> =
            (0..TRX_SYS_N_RSEGS).filter(|i| inner.rsegs[*i].is_some()).collect();
        assert!(!occupied.is_empty(), "no rollback segments installed");
        let pick = occupied[inner.latest_rseg % occupied.len()];
        inner.latest_rseg = inner.latest_rseg.wrapping_add(1);

        let trx = Trx::new(id, u8::try_from(pick).expect("rseg id fits in u8"));
        // Ids ascend, so the newest transaction belongs at the front.
        inner.trx_list.insert(0, Arc::clone(&trx));
        debug!(trx_id = %id, rseg = pick, "transaction started");
        trx
    }

    /// Commit in memory: assign the commit number, mark the state, and
    /// unlink from the active list. Undo records the transaction leaves
    /// behind become history for purge to reclaim.
    pub fn commit_in_memory(&self, trx: &Arc<Trx>) {
        let history = self.pending_undo_count(trx);
        let mut inner = self.kernel.lock();
        let no = self.get_new_trx_id_locked(&mut inner);
        trx.set_no(no);
        trx.set_state(TrxState::CommittedInMemory);
        inner.trx_list.retain(|t| t.id() != trx.id());
        inner.rseg_history_len += history;
        debug!(trx_id = %trx.id(), no = %no, history, "transaction committed in memory");
    }

    /// Whether the transaction is on the active list.
    #[must_use]
    pub fn in_trx_list(&self, trx: &Trx) -> bool {
        self.kernel.lock().trx_list.iter().any(|t| t.id() == trx.id())
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.kernel.lock().trx_list.len()
    }

    /// The rollback segment in the given slot.
    #[must_use]
    pub fn rseg(&self, id: u8) -> Option<Arc<Rseg>> {
        self.kernel.lock().rsegs[id as usize].clone()
    }

    #[must_use]
    pub fn rseg_history_len(&self) -> usize {
        self.kernel.lock().rseg_history_len
    }

    /// Scan the header for the first unused rollback segment slot.
    /// Slot 0 always holds the system rseg, so it is never reported.
    #[must_use]
    pub fn frseg_find_free(&self, mtr: &mut Mtr) -> Option<usize> {
        let header = pool_header(&self.pool, PageLatch::Exclusive, mtr);
        let frame = mtr.frame(&header);
        (0..TRX_SYS_N_RSEGS).find(|slot| read_rseg_slot(frame, *slot).1.is_null())
    }

    /// Install a new rollback segment: claim a free header slot, persist
    /// `(space, page_no)` there, and register the in-memory object.
    /// Returns the slot id, or `None` if every slot is occupied.
    pub fn create_rseg(&self, space: SpaceId, page_no: PageNo) -> Option<u8> {
        let mut mtr = Mtr::new();
        mtr.start();
        let Some(slot) = self.frseg_find_free(&mut mtr) else {
            mtr.commit();
            return None;
        };
        let header = pool_header(&self.pool, PageLatch::Exclusive, &mut mtr);
        write_rseg_slot(&mut mtr, &header, slot, space, page_no);
        mtr.commit();

        let id = u8::try_from(slot).expect("rseg id fits in u8");
        let rseg = Rseg::new(id, PageId::new(space, page_no));
        self.kernel.lock().rsegs[slot] = Some(rseg);
        info!(slot, "rollback segment installed");
        Some(id)
    }

    /// Read slot `i` of the header: `(space, page_no)`.
    #[must_use]
    pub fn frseg_get(&self, slot: usize, mtr: &mut Mtr) -> (SpaceId, PageNo) {
        let header = pool_header(&self.pool, PageLatch::Shared, mtr);
        read_rseg_slot(mtr.frame(&header), slot)
    }

    // ----------------------------------------------------------------
    // Undo log interface
    // ----------------------------------------------------------------

    /// Log an undo record for `trx`, returning the roll pointer to stamp
    /// into the record header. `undo_no` comes from
    /// [`Trx::assign_undo_no`](crate::trx::Trx) and must match the number
    /// encoded in `data`.
    pub fn append_undo_rec(&self, trx: &Trx, undo_no: UndoNo, is_insert: bool, data: Vec<u8>) -> RollPtr {
        let rseg = self.rseg(trx.rseg_id()).expect("transaction's rseg is installed");
        let roll_ptr = rseg.push(trx.id(), undo_no, is_insert, data);
        trx.push_undo_rec(roll_ptr);
        roll_ptr
    }

    /// Pop the newest unconsumed undo record of `trx` with
    /// `undo_no >= limit`, copying it into `arena`.
    pub fn pop_top_undo_rec(
        &self,
        trx: &Trx,
        limit: UndoNo,
        arena: &mut Arena,
    ) -> Option<(ArenaRef, RollPtr)> {
        // All of a transaction's records live in the rseg assigned at its
        // start; resolve it once, outside the roll-list lock.
        let rseg = self.rseg(trx.rseg_id()).expect("transaction's rseg is installed");
        loop {
            let popped = trx.pop_undo_rec_if(|rp| {
                assert_eq!(rp.rseg_id(), rseg.id(), "roll list crossed rollback segments");
                let (owner, undo_no, consumed) =
                    rseg.slot_info(rp.rec_no()).expect("roll pointer names a logged record");
                assert_eq!(owner, trx.id(), "roll list crossed transactions");
                // Records claimed by a previous-version fetch pop and
                // drop; live ones pop only within the roll limit.
                consumed || undo_no >= limit
            })?;
            match rseg.claim(popped.rec_no(), arena) {
                Some(aref) => return Some((aref, popped)),
                None => continue,
            }
        }
    }

    /// Fetch the undo record at `roll_ptr` into `arena` without claiming
    /// it (version reads).
    #[must_use]
    pub fn get_undo_rec_low(&self, roll_ptr: RollPtr, arena: &mut Arena) -> Option<ArenaRef> {
        let rseg = self.rseg(roll_ptr.rseg_id())?;
        rseg.read(roll_ptr.rec_no(), arena)
    }

    /// Claim the undo record at `roll_ptr` for application (the
    /// previous-version path of rollback). Returns `None` if it was
    /// already applied.
    pub fn claim_undo_rec(&self, roll_ptr: RollPtr, arena: &mut Arena) -> Option<ArenaRef> {
        let rseg = self.rseg(roll_ptr.rseg_id())?;
        rseg.claim(roll_ptr.rec_no(), arena)
    }

    /// Whether the record at `roll_ptr` still awaits application for
    /// `trx` within the current roll limit.
    #[must_use]
    pub fn undo_rec_pending(&self, roll_ptr: RollPtr, trx: &Trx, limit: UndoNo) -> bool {
        let Some(rseg) = self.rseg(roll_ptr.rseg_id()) else {
            return false;
        };
        match rseg.slot_info(roll_ptr.rec_no()) {
            Some((owner, undo_no, consumed)) => owner == trx.id() && !consumed && undo_no >= limit,
            None => false,
        }
    }

    /// Unconsumed undo records remaining for `trx`.
    #[must_use]
    pub fn pending_undo_count(&self, trx: &Trx) -> usize {
        let rseg = self.rseg(trx.rseg_id()).expect("transaction's rseg is installed");
        let mut n = 0;
        for rec_no in 0..u32::try_from(rseg.len()).expect("rseg length fits in u32") {
            if let Some((owner, _, consumed)) = rseg.slot_info(rec_no) {
                if owner == trx.id() && !consumed {
                    n += 1;
                }
            }
        }
        n
    }
}

fn min_trx_id_locked(inner: &TrxSysInner) -> TrxId {
    inner.trx_list.last().map_or(TrxId(inner.max_trx_id), |t| t.id())
}

fn pool_header(pool: &Arc<BufferPool>, latch: PageLatch, mtr: &mut Mtr) -> Arc<ironbase_buf::Block> {
    pool.get(PageId::new(SYS_SPACE, TRX_SYS_PAGE_NO), latch, LatchLevel::TrxSysHeader, mtr)
}

fn read_rseg_slot(frame: &[u8], slot: usize) -> (SpaceId, PageNo) {
    assert!(slot < TRX_SYS_N_RSEGS, "rseg slot {slot} out of range");
    let off = TRX_SYS_RSEGS + slot * RSEG_SLOT_SIZE;
    let space = u32::from_be_bytes(frame[off..off + 4].try_into().expect("4-byte space id"));
    let page = u32::from_be_bytes(frame[off + 4..off + 8].try_into().expect("4-byte page no"));
    (SpaceId(space), PageNo(page))
}

fn write_rseg_slot(
    mtr: &mut Mtr,
    header: &Arc<ironbase_buf::Block>,
    slot: usize,
    space: SpaceId,
    page_no: PageNo,
) {
    assert!(slot < TRX_SYS_N_RSEGS, "rseg slot {slot} out of range");
    let off = TRX_SYS_RSEGS + slot * RSEG_SLOT_SIZE;
    mtr.with_frame_mut(
        header,
        RedoOp::WriteBytes { offset: off as u16, len: RSEG_SLOT_SIZE as u16 },
        |f| {
            f.as_bytes_mut()[off..off + 4].copy_from_slice(&space.0.to_be_bytes());
            f.as_bytes_mut()[off + 4..off + 8].copy_from_slice(&page_no.0.to_be_bytes());
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironbase_buf::BufferPoolConfig;

    fn fresh_sys() -> Arc<TrxSys> {
        TrxSys::create(BufferPool::new(BufferPoolConfig::default()))
    }

    #[test]
    fn ids_are_consecutive() {
        let sys = fresh_sys();
        let a = sys.get_new_trx_id();
        let b = sys.get_new_trx_id();
        assert_eq!(b.0, a.0 + 1);
        assert_eq!(a, TrxId(TRX_SYS_TRX_ID_WRITE_MARGIN));
    }

    /// The ceiling is flushed exactly at the margin crossings, with the
    /// pre-increment value plus one margin.
    #[test]
    fn ceiling_flush_at_write_margin() {
        let sys = fresh_sys();
        let mut mtr = Mtr::new();
        mtr.start();
        let header = pool_header(sys.pool(), PageLatch::Shared, &mut mtr);
        let clock_start = header.modify_clock();
        mtr.commit();

        let ids: Vec<u64> = (0..257).map(|_| sys.get_new_trx_id().0).collect();
        assert_eq!(ids[0], 256);
        assert_eq!(ids[256], 512);

        // Two flushes: at id 256 and at id 512.
        assert_eq!(header.modify_clock(), clock_start + 2);
        let mut mtr = Mtr::new();
        mtr.start();
        let header = pool_header(sys.pool(), PageLatch::Shared, &mut mtr);
        let frame = mtr.frame(&header);
        let stored = u64::from_be_bytes(frame[..8].try_into().unwrap());
        assert_eq!(stored, 512 + 256);
        mtr.commit();
    }

    #[test]
    fn restart_resumes_above_stored_ceiling() {
        let space = {
            let pool = BufferPool::new(BufferPoolConfig::default());
            let sys = TrxSys::create(Arc::clone(&pool));
            // Burn a handful of ids past the first flush.
            for _ in 0..10 {
                let _ = sys.get_new_trx_id();
            }
            pool.flush_all();
            pool.space().clone()
        };
        let pool = BufferPool::with_space(BufferPoolConfig::default(), space);
        let sys = TrxSys::open(pool);
        // Stored ceiling was 512; the counter resumes one margin above.
        let next = sys.get_new_trx_id();
        assert_eq!(next, TrxId(768));
        assert!(next.0 >= 256 + 10 + TRX_SYS_TRX_ID_WRITE_MARGIN);
    }

    #[test]
    fn active_list_and_is_active() {
        let sys = fresh_sys();
        let t1 = sys.begin();
        let t2 = sys.begin();
        assert!(sys.is_active(t1.id()));
        assert!(sys.is_active(t2.id()));
        assert_eq!(sys.active_count(), 2);
        assert_eq!(sys.min_trx_id(), t1.id());

        sys.commit_in_memory(&t1);
        assert!(!sys.is_active(t1.id()));
        assert!(!sys.in_trx_list(&t1));
        assert_eq!(t1.state(), TrxState::CommittedInMemory);
        assert!(t1.no().unwrap() > t2.id());

        // Below the minimum: definitively inactive.
        assert!(!sys.is_active(TrxId(1)));
        // At or above the counter: conservatively active (diagnostics).
        assert!(sys.is_active(sys.max_trx_id()));
        sys.commit_in_memory(&t2);
        assert_eq!(sys.active_count(), 0);
    }

    #[test]
    fn system_rseg_slot_is_never_free() {
        let sys = fresh_sys();
        let mut mtr = Mtr::new();
        mtr.start();
        let free = sys.frseg_find_free(&mut mtr).unwrap();
        assert_ne!(free, SYSTEM_RSEG_ID as usize);
        assert_eq!(free, 1);
        let (space, page) = sys.frseg_get(0, &mut mtr);
        assert_eq!(space, SYS_SPACE);
        assert_eq!(page, SYSTEM_RSEG_PAGE_NO);
        mtr.commit();
    }

    #[test]
    fn create_rseg_claims_next_slot() {
        let sys = fresh_sys();
        let id = sys.create_rseg(SYS_SPACE, PageNo(99)).unwrap();
        assert_eq!(id, 1);
        assert!(sys.rseg(1).is_some());

        let mut mtr = Mtr::new();
        mtr.start();
        assert_eq!(sys.frseg_find_free(&mut mtr), Some(2));
        assert_eq!(sys.frseg_get(1, &mut mtr), (SYS_SPACE, PageNo(99)));
        mtr.commit();

        // Round-robin rseg assignment now alternates over both slots.
        let t1 = sys.begin();
        let t2 = sys.begin();
        assert_ne!(t1.rseg_id(), t2.rseg_id());
    }

    #[test]
    fn undo_pop_honors_roll_limit_and_consumed() {
        let sys = fresh_sys();
        let trx = sys.begin();
        let ptrs: Vec<RollPtr> = (0..3)
            .map(|_| {
                let undo_no = trx.assign_undo_no();
                let img = crate::undo::encode_insert(undo_no, ironbase_types::TableId(1), &[b"k"]);
                sys.append_undo_rec(&trx, undo_no, true, img)
            })
            .collect();
        assert_eq!(sys.pending_undo_count(&trx), 3);

        let mut arena = Arena::new();
        // Partial rollback to undo_no 2: only the last record pops.
        let (aref, rp) = sys.pop_top_undo_rec(&trx, UndoNo(2), &mut arena).unwrap();
        assert_eq!(rp, ptrs[2]);
        assert_eq!(crate::undo::undo_rec_undo_no(arena.slice(aref)), UndoNo(2));
        assert!(sys.pop_top_undo_rec(&trx, UndoNo(2), &mut arena).is_none());

        // Claim the middle record through its roll pointer, then pop to
        // zero: only the first record remains.
        assert!(sys.claim_undo_rec(ptrs[1], &mut arena).is_some());
        let (_, rp) = sys.pop_top_undo_rec(&trx, UndoNo(0), &mut arena).unwrap();
        assert_eq!(rp, ptrs[0]);
        assert!(sys.pop_top_undo_rec(&trx, UndoNo(0), &mut arena).is_none());
        assert_eq!(sys.pending_undo_count(&trx), 0);
    }
}
