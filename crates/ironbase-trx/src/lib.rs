//! Transaction system and undo-driven rollback.
//!
//! [`TrxSys`] owns the id space, the active transaction list, and the
//! rollback segment slots persisted in the transaction system header
//! page. Forward row operations ([`row`]) log undo records as they go;
//! [`UndoNode`] pops them back off and reverses them one at a time
//! through a persistent cursor, surviving any number of
//! mini-transaction boundaries.

pub mod dict;
pub mod roll;
pub mod row;
pub mod row_undo;
pub mod sys;
pub mod trx;
pub mod undo;

pub use dict::{Table, TableResolver};
pub use roll::{rollback, rollback_to};
pub use row_undo::{UndoNode, UndoStep};
pub use sys::{TrxSys, SYSTEM_RSEG_ID, TRX_SYS_N_RSEGS, TRX_SYS_PAGE_NO, TRX_SYS_TRX_ID_WRITE_MARGIN};
pub use trx::{DictLockMode, Trx, TrxState};
