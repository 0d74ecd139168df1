//! Rollback drivers.
//!
//! A rollback worker drives one [`UndoNode`] to completion
//! synchronously. There is no cancellation: rollback runs until the roll
//! list is drained or a fatal error terminates the process. A
//! half-reversed row with its undo record already consumed is undefined
//! state, and rollback runs on arbitrary worker threads, so fatal errors
//! abort the whole process rather than unwinding one thread out from
//! under it.

use std::sync::Arc;

use ironbase_error::IronError;
use ironbase_types::UndoNo;
use tracing::{error, info};

use crate::dict::TableResolver;
use crate::row_undo::{UndoNode, UndoStep};
use crate::sys::TrxSys;
use crate::trx::Trx;

fn run_to_completion(node: &mut UndoNode) {
    loop {
        match node.step() {
            Ok(UndoStep::Continue) => {}
            Ok(UndoStep::RolledBack) => return,
            Err(e) => {
                node.trx().set_error_state(Some(e.code()));
                error!(trx_id = %node.trx().id(), error = %e, "fatal error in rollback");
                if matches!(e, IronError::OutOfFileSpace { .. }) {
                    error!(
                        "error {} means out of tablespace; consider growing the tablespace",
                        e.code() as i32
                    );
                }
                if e.is_fatal() {
                    std::process::abort();
                }
                // Non-fatal kinds never reach the driver; a step either
                // absorbs them or the classification is wrong.
                panic!("rollback cannot continue: {e}");
            }
        }
    }
}

/// Roll the whole transaction back and commit it in memory: afterward it
/// is no longer on the active list and every row change is reversed.
pub fn rollback(sys: &Arc<TrxSys>, trx: &Arc<Trx>, resolver: &Arc<dyn TableResolver>) {
    trx.set_roll_limit(UndoNo(0));
    let mut node = UndoNode::new(Arc::clone(sys), Arc::clone(trx), Arc::clone(resolver));
    run_to_completion(&mut node);
    sys.commit_in_memory(trx);
    info!(trx_id = %trx.id(), "transaction rolled back");
}

/// Partial rollback: reverse every change with `undo_no >= limit`
/// (savepoint semantics). The transaction stays active and its undo
/// numbering resumes at `limit`.
pub fn rollback_to(sys: &Arc<TrxSys>, trx: &Arc<Trx>, limit: UndoNo, resolver: &Arc<dyn TableResolver>) {
    trx.set_roll_limit(limit);
    let mut node = UndoNode::new(Arc::clone(sys), Arc::clone(trx), Arc::clone(resolver));
    run_to_completion(&mut node);
    trx.set_roll_limit(UndoNo(0));
    trx.set_next_undo_no(limit);
    info!(trx_id = %trx.id(), limit = %limit, "partial rollback complete");
}
