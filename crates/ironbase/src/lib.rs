//! ironbase: a transactional B-tree storage kernel.
//!
//! The kernel couples two subsystems around a latched B+tree:
//!
//! - the **persistent cursor** ([`PersistentCursor`]), whose position
//!   survives mini-transaction commit through a stored order prefix and
//!   a modify-clock certificate, and
//! - the **undo engine** ([`UndoNode`]), which reverses row operations
//!   through that cursor, one undo record per step.
//!
//! [`Engine`] wires the pieces together for embedders: a buffer pool, a
//! transaction system, and a minimal table dictionary.

mod engine;

pub use engine::Engine;

pub use ironbase_btree::{
    bulk_load, DTuple, Index, LatchMode, OldStored, PageCursor, PersistentCursor, PosState,
    RelPos, SearchMode, SpaceAlloc, TreeCursor,
};
pub use ironbase_buf::{
    Block, BufferPool, BufferPoolConfig, DiscardRedo, FreeBlockStatus, LatchLevel, Mtr, PageLatch,
    RedoOp, RedoRecord, RedoSink,
};
pub use ironbase_error::{ErrorCode, IronError, Result};
pub use ironbase_mem::{Arena, ArenaRef, HashTable};
pub use ironbase_trx::{
    rollback, rollback_to, DictLockMode, Table, TableResolver, Trx, TrxState, TrxSys, UndoNode,
    UndoStep, SYSTEM_RSEG_ID, TRX_SYS_N_RSEGS, TRX_SYS_PAGE_NO, TRX_SYS_TRX_ID_WRITE_MARGIN,
};
pub use ironbase_types::{
    page, rec, IndexId, PageBuf, PageId, PageNo, PageSize, RollPtr, SpaceId, TableId, TrxId,
    UndoNo, FIL_NULL, SYS_SPACE,
};
