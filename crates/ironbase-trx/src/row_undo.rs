//! The row-undo node: reverses one logical row operation per step.
//!
//! ```text
//!  FetchNext ──pop undo rec──► Insert | Modify ──applied──► FetchNext
//!                                                      └──► PrevVers
//!  PrevVers ──fetch at new_roll_ptr──► Insert | Modify
//! ```
//!
//! Each step pops (or fetches) exactly one undo record, locates the row
//! through a persistent cursor, reverses the change, and clears its
//! arena. A record whose row is gone or whose roll pointer no longer
//! matches was already handled by someone else (purge, or an earlier
//! pass); the record is dropped and the iteration continues, which is
//! the missing-history case, not an error.
//!
//! The dictionary operation lock is held shared across each step unless
//! the transaction already holds it, so no concurrent DDL can drop the
//! table out from under the row being reversed.

use std::sync::Arc;

use ironbase_btree::{DTuple, LatchMode, PersistentCursor};
use ironbase_buf::Mtr;
use ironbase_error::Result;
use ironbase_mem::{Arena, ArenaRef};
use ironbase_types::{rec, RollPtr, UndoNo};
use tracing::{debug, trace};

use crate::dict::{Table, TableResolver};
use crate::sys::TrxSys;
use crate::trx::{DictLockMode, Trx};
use crate::undo::{self, UndoKind};

/// State of the undo node between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoState {
    /// Pop the next undo record off the transaction's roll list.
    FetchNext,
    /// Reversing an insert: remove the row.
    Insert,
    /// Reversing a modify: restore the before-image.
    Modify,
    /// The restored version was written by this same transaction; undo
    /// it next, at `new_roll_ptr`, before popping anything else.
    PrevVers,
}

/// Outcome of one [`UndoNode::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoStep {
    /// One record was retired (or dropped as missing history); call
    /// again.
    Continue,
    /// Nothing left within the roll limit; control returns to the
    /// caller.
    RolledBack,
}

/// Driver state for undoing one transaction's row operations.
pub struct UndoNode {
    state: UndoState,
    sys: Arc<TrxSys>,
    trx: Arc<Trx>,
    resolver: Arc<dyn TableResolver>,
    /// Per-iteration arena; undo record images live here and the whole
    /// thing is reset between records.
    heap: Arena,
    undo_rec: Option<ArenaRef>,
    roll_ptr: RollPtr,
    undo_no: UndoNo,
    table: Option<Arc<Table>>,
    pcur: Option<PersistentCursor>,
    new_roll_ptr: RollPtr,
}

impl UndoNode {
    #[must_use]
    pub fn new(sys: Arc<TrxSys>, trx: Arc<Trx>, resolver: Arc<dyn TableResolver>) -> Self {
        Self {
            state: UndoState::FetchNext,
            sys,
            trx,
            resolver,
            heap: Arena::new(),
            undo_rec: None,
            roll_ptr: RollPtr::NULL,
            undo_no: UndoNo(0),
            table: None,
            pcur: None,
            new_roll_ptr: RollPtr::NULL,
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> UndoState {
        self.state
    }

    #[must_use]
    pub fn trx(&self) -> &Arc<Trx> {
        &self.trx
    }

    /// Table of the row currently being reversed, if resolved.
    #[must_use]
    pub fn table(&self) -> Option<&Arc<Table>> {
        self.table.as_ref()
    }

    /// Fetch and reverse one undo record.
    pub fn step(&mut self) -> Result<UndoStep> {
        match self.state {
            UndoState::FetchNext => {
                let limit = self.trx.roll_limit();
                let Some((aref, roll_ptr)) =
                    self.sys.pop_top_undo_rec(&self.trx, limit, &mut self.heap)
                else {
                    return Ok(UndoStep::RolledBack);
                };
                self.begin_record(aref, roll_ptr);
            }
            UndoState::PrevVers => {
                let roll_ptr = self.new_roll_ptr;
                let aref = self
                    .sys
                    .claim_undo_rec(roll_ptr, &mut self.heap)
                    .expect("previous-version undo record still pending");
                self.begin_record(aref, roll_ptr);
            }
            UndoState::Insert | UndoState::Modify => {
                unreachable!("dispatch states do not persist between steps")
            }
        }
        trace!(
            trx_id = %self.trx.id(),
            undo_no = %self.undo_no,
            state = ?self.state,
            "undoing row operation"
        );

        // Block DROP/CREATE against the row's table for the duration of
        // this record, unless the transaction already holds the lock.
        let locked_here = self.trx.dict_lock_mode() == DictLockMode::None;
        let dict_lock = Arc::clone(self.sys.dict_operation_lock());
        let dict_guard = if locked_here {
            self.trx.set_dict_lock_mode(DictLockMode::Shared);
            Some(dict_lock.read_arc())
        } else {
            None
        };

        let outcome = match self.state {
            UndoState::Insert => self.undo_insert(),
            UndoState::Modify => self.undo_modify(),
            _ => unreachable!(),
        };

        drop(dict_guard);
        if locked_here {
            self.trx.set_dict_lock_mode(DictLockMode::None);
        }

        // Per-record cleanup happens regardless of the outcome.
        if let Some(pcur) = &mut self.pcur {
            pcur.close();
        }
        self.pcur = None;
        self.undo_rec = None;
        self.table = None;
        self.heap.reset();

        outcome?;
        Ok(UndoStep::Continue)
    }

    fn begin_record(&mut self, aref: ArenaRef, roll_ptr: RollPtr) {
        self.undo_no = undo::undo_rec_undo_no(self.heap.slice(aref));
        self.undo_rec = Some(aref);
        self.roll_ptr = roll_ptr;
        self.state = if roll_ptr.is_insert() { UndoState::Insert } else { UndoState::Modify };
    }

    /// Open a cursor on the clustered index record named by the undo
    /// record's row reference.
    ///
    /// Returns `false` when the record is gone or its roll pointer no
    /// longer matches: this version was purged or superseded, and a
    /// later actor owns the reversal. The roll-list reservation was
    /// already released when the record was claimed, before the page
    /// latch drops here. On success the position is stored and the mtr
    /// committed; the caller re-latches through the stored position.
    fn search_clust_to_pcur(&mut self, table: &Arc<Table>, ref_tuple: &DTuple) -> Result<bool> {
        let index = Arc::clone(table.clust_index());
        let mut mtr = Mtr::new();
        mtr.start();
        let mut pcur = PersistentCursor::new(Arc::clone(&index), Arc::clone(self.sys.pool()));
        pcur.set_trx(self.trx.id());
        pcur.open(ref_tuple, ironbase_btree::SearchMode::LE, LatchMode::ModifyLeaf, &mut mtr)?;

        let found = pcur.is_on_user_rec(&mtr)
            && index.cmp_dtuple_rec(ref_tuple, pcur.rec(&mtr)) == std::cmp::Ordering::Equal;
        let ret = if !found || rec::roll_ptr(pcur.rec(&mtr)) != self.roll_ptr {
            debug!(
                trx_id = %self.trx.id(),
                undo_no = %self.undo_no,
                "missing history: row version already handled, dropping undo record"
            );
            false
        } else {
            pcur.store_position(&mtr);
            true
        };
        pcur.commit_mtr(&mut mtr);
        self.pcur = Some(pcur);
        Ok(ret)
    }

    /// Reverse an insert: find the row and remove it from the clustered
    /// index.
    fn undo_insert(&mut self) -> Result<()> {
        let aref = self.undo_rec.expect("record fetched before dispatch");
        let (table_id, ref_tuple) = {
            let view = undo::parse(self.heap.slice(aref));
            let UndoKind::Insert { ref_fields } = view.kind else {
                unreachable!("insert roll pointer with a modify record")
            };
            (view.table_id, DTuple::from_slices(&ref_fields))
        };
        let table = self
            .resolver
            .table_by_id(table_id)
            .expect("table pinned by the dictionary operation lock");
        self.table = Some(Arc::clone(&table));

        self.state = UndoState::FetchNext;
        if !self.search_clust_to_pcur(&table, &ref_tuple)? {
            return Ok(());
        }

        let pcur = self.pcur.as_mut().expect("cursor stored by the clustered search");
        let mut mtr = Mtr::new();
        mtr.start();
        if !pcur.restore_position(LatchMode::ModifyLeaf, &mut mtr)? {
            // The row disappeared across the mtr boundary.
            pcur.commit_mtr(&mut mtr);
            return Ok(());
        }
        if pcur.btr_cur_mut().optimistic_delete(&mut mtr) {
            pcur.commit_mtr(&mut mtr);
            return Ok(());
        }

        // The delete would empty the leaf: redo it as a structure
        // modification under the exclusive tree latch.
        pcur.commit_mtr(&mut mtr);
        mtr.start();
        if pcur.restore_position(LatchMode::ModifyTree, &mut mtr)? {
            pcur.btr_cur_mut().pessimistic_delete(&mut mtr)?;
        }
        mtr.commit();
        Ok(())
    }

    /// Reverse a modify: restore the before-image of the fields, the
    /// delete-mark state, and the old `(trx_id, roll_ptr)` header pair.
    fn undo_modify(&mut self) -> Result<()> {
        let aref = self.undo_rec.expect("record fetched before dispatch");
        let (table_id, ref_tuple, old_trx_id, old_roll_ptr, old_info_bits, update) = {
            let view = undo::parse(self.heap.slice(aref));
            let UndoKind::Modify { ref_fields, old_trx_id, old_roll_ptr, old_info_bits, update } =
                view.kind
            else {
                unreachable!("modify roll pointer with an insert record")
            };
            let owned: Vec<(u16, Vec<u8>)> =
                update.into_iter().map(|(no, v)| (no, v.to_vec())).collect();
            (
                view.table_id,
                DTuple::from_slices(&ref_fields),
                old_trx_id,
                old_roll_ptr,
                old_info_bits,
                owned,
            )
        };
        let table = self
            .resolver
            .table_by_id(table_id)
            .expect("table pinned by the dictionary operation lock");
        self.table = Some(Arc::clone(&table));

        self.state = UndoState::FetchNext;
        if !self.search_clust_to_pcur(&table, &ref_tuple)? {
            return Ok(());
        }

        let pcur = self.pcur.as_mut().expect("cursor stored by the clustered search");
        let mut mtr = Mtr::new();
        mtr.start();
        if !pcur.restore_position(LatchMode::ModifyLeaf, &mut mtr)? {
            pcur.commit_mtr(&mut mtr);
            return Ok(());
        }

        let old_rec: Vec<u8> = pcur.rec(&mtr).to_vec();
        let mut fields = rec::fields_owned(&old_rec);
        for (field_no, old_value) in &update {
            fields[*field_no as usize] = old_value.clone();
        }
        let field_slices: Vec<&[u8]> = fields.iter().map(Vec::as_slice).collect();
        let restored = rec::encode(&field_slices, old_info_bits, old_trx_id, old_roll_ptr);
        pcur.btr_cur_mut().update(&restored, &mut mtr)?;
        pcur.commit_mtr(&mut mtr);

        // If the version just restored was also written by this
        // transaction and still awaits reversal, undo it next against
        // the same clustered record.
        if !old_roll_ptr.is_null()
            && self.sys.undo_rec_pending(old_roll_ptr, &self.trx, self.trx.roll_limit())
        {
            self.new_roll_ptr = old_roll_ptr;
            self.state = UndoState::PrevVers;
        }
        Ok(())
    }
}
