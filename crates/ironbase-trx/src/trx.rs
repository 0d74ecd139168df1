//! The transaction object.

use ironbase_types::{RollPtr, TrxId, UndoNo};
use parking_lot::Mutex;

use ironbase_error::ErrorCode;

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxState {
    Active,
    Prepared,
    /// Removed from the active list; durable commit is the log's
    /// business.
    CommittedInMemory,
}

/// Which mode the transaction holds the dictionary operation lock in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictLockMode {
    None,
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct TrxInner {
    state: TrxState,
    /// Commit number, assigned at commit time.
    no: Option<TrxId>,
    /// Rollback stops when the next undo number would drop below this.
    roll_limit: UndoNo,
    /// Next undo number to hand out.
    next_undo_no: UndoNo,
    /// Roll pointers of this transaction's undo records, push order
    /// (ascending undo number). Rollback pops from the back.
    undo_stack: Vec<RollPtr>,
    /// Rollback segment assigned at start.
    rseg_id: u8,
    dict_lock_mode: DictLockMode,
    error_state: Option<ErrorCode>,
}

/// A transaction. Shared across threads behind `Arc`; the mutable state
/// sits behind its own mutex, while list membership is guarded by the
/// transaction system's kernel mutex.
#[derive(Debug)]
pub struct Trx {
    id: TrxId,
    inner: Mutex<TrxInner>,
}

impl Trx {
    pub(crate) fn new(id: TrxId, rseg_id: u8) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            id,
            inner: Mutex::new(TrxInner {
                state: TrxState::Active,
                no: None,
                roll_limit: UndoNo(0),
                next_undo_no: UndoNo(0),
                undo_stack: Vec::new(),
                rseg_id,
                dict_lock_mode: DictLockMode::None,
                error_state: None,
            }),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> TrxId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> TrxState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: TrxState) {
        self.inner.lock().state = state;
    }

    /// Commit number, once committed.
    #[must_use]
    pub fn no(&self) -> Option<TrxId> {
        self.inner.lock().no
    }

    pub(crate) fn set_no(&self, no: TrxId) {
        self.inner.lock().no = Some(no);
    }

    #[must_use]
    pub fn roll_limit(&self) -> UndoNo {
        self.inner.lock().roll_limit
    }

    pub(crate) fn set_roll_limit(&self, limit: UndoNo) {
        self.inner.lock().roll_limit = limit;
    }

    #[must_use]
    pub fn dict_lock_mode(&self) -> DictLockMode {
        self.inner.lock().dict_lock_mode
    }

    pub(crate) fn set_dict_lock_mode(&self, mode: DictLockMode) {
        self.inner.lock().dict_lock_mode = mode;
    }

    #[must_use]
    pub fn error_state(&self) -> Option<ErrorCode> {
        self.inner.lock().error_state
    }

    pub(crate) fn set_error_state(&self, code: Option<ErrorCode>) {
        self.inner.lock().error_state = code;
    }

    #[inline]
    #[must_use]
    pub fn rseg_id(&self) -> u8 {
        self.inner.lock().rseg_id
    }

    /// The undo number the next logged record will carry; equals the
    /// count of undo records ever logged by this transaction.
    #[must_use]
    pub fn undo_no(&self) -> UndoNo {
        self.inner.lock().next_undo_no
    }

    pub(crate) fn set_next_undo_no(&self, n: UndoNo) {
        self.inner.lock().next_undo_no = n;
    }

    pub(crate) fn assign_undo_no(&self) -> UndoNo {
        let mut inner = self.inner.lock();
        let n = inner.next_undo_no;
        inner.next_undo_no = UndoNo(n.0 + 1);
        n
    }

    pub(crate) fn push_undo_rec(&self, roll_ptr: RollPtr) {
        self.inner.lock().undo_stack.push(roll_ptr);
    }

    pub(crate) fn pop_undo_rec_if(&self, pred: impl Fn(RollPtr) -> bool) -> Option<RollPtr> {
        let mut inner = self.inner.lock();
        match inner.undo_stack.last() {
            Some(&top) if pred(top) => {
                inner.undo_stack.pop();
                Some(top)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn undo_stack_len(&self) -> usize {
        self.inner.lock().undo_stack.len()
    }
}
