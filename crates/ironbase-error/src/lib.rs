use ironbase_types::{PageId, SpaceId, TrxId};
use thiserror::Error;

/// Primary error type for ironbase kernel operations.
///
/// The taxonomy is deliberately small. Recoverable conditions are variants
/// here; caller bugs (wrong cursor state, a latch missing from a
/// mini-transaction memo, an out-of-range slot index) are assertion
/// failures that panic and must not be caught.
#[derive(Error, Debug)]
pub enum IronError {
    /// The tablespace has no room left. Fatal during rollback: an undo
    /// operation that cannot allocate leaves the system in an undefined
    /// state.
    #[error("out of file space in tablespace {space}")]
    OutOfFileSpace { space: SpaceId },

    /// An invariant was violated on a page read back from the pool.
    #[error("corruption on page {page}: {detail}")]
    Corruption { page: PageId, detail: String },

    /// A conflicting lock is held; the lock manager will resume the
    /// requester. Never raised by the kernel core itself.
    #[error("lock wait")]
    LockWait,

    /// The requested row version has already been purged or superseded.
    /// Routine during rollback and version reads: the caller drops the
    /// undo entry and continues.
    #[error("missing history for roll pointer of transaction {trx_id}")]
    MissingHistory { trx_id: TrxId },

    /// A row with the same ordering fields already exists in the
    /// clustered index.
    #[error("duplicate key in index '{index}'")]
    DuplicateKey { index: String },

    /// The searched-for row is not present.
    #[error("record not found in index '{index}'")]
    RecordNotFound { index: String },
}

/// Classic numeric engine codes, kept for diagnostics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 10,
    Error = 11,
    OutOfMemory = 12,
    OutOfFileSpace = 13,
    LockWait = 14,
    Deadlock = 15,
    DuplicateKey = 16,
    RecordNotFound = 17,
    MissingHistory = 38,
    Corruption = 39,
}

impl IronError {
    /// Map to the numeric engine code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::OutOfFileSpace { .. } => ErrorCode::OutOfFileSpace,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::LockWait => ErrorCode::LockWait,
            Self::MissingHistory { .. } => ErrorCode::MissingHistory,
            Self::DuplicateKey { .. } => ErrorCode::DuplicateKey,
            Self::RecordNotFound { .. } => ErrorCode::RecordNotFound,
        }
    }

    /// Whether the process cannot continue once this error surfaces from
    /// the rollback path.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfFileSpace { .. } | Self::Corruption { .. })
    }

    /// Whether a retry may succeed without intervention.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::LockWait)
    }

    /// Create a corruption error.
    pub fn corruption(page: PageId, detail: impl Into<String>) -> Self {
        Self::Corruption { page, detail: detail.into() }
    }
}

/// Result type alias using [`IronError`].
pub type Result<T> = std::result::Result<T, IronError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ironbase_types::{PageNo, SYS_SPACE};

    #[test]
    fn display_messages() {
        let err = IronError::OutOfFileSpace { space: SYS_SPACE };
        assert_eq!(err.to_string(), "out of file space in tablespace 0");

        let err = IronError::corruption(PageId::new(SYS_SPACE, PageNo(5)), "bad sibling link");
        assert_eq!(err.to_string(), "corruption on page 0:5: bad sibling link");

        let err = IronError::MissingHistory { trx_id: TrxId(9) };
        assert_eq!(err.to_string(), "missing history for roll pointer of transaction 9");
    }

    #[test]
    fn code_mapping() {
        assert_eq!(IronError::OutOfFileSpace { space: SYS_SPACE }.code(), ErrorCode::OutOfFileSpace);
        assert_eq!(ErrorCode::OutOfFileSpace as i32, 13);
        assert_eq!(IronError::LockWait.code() as i32, 14);
        assert_eq!(IronError::MissingHistory { trx_id: TrxId(1) }.code() as i32, 38);
        assert_eq!(ErrorCode::Success as i32, 10);
    }

    #[test]
    fn fatal_and_transient_split() {
        assert!(IronError::OutOfFileSpace { space: SYS_SPACE }.is_fatal());
        assert!(IronError::corruption(PageId::new(SYS_SPACE, PageNo(1)), "x").is_fatal());
        assert!(!IronError::LockWait.is_fatal());
        assert!(IronError::LockWait.is_transient());
        assert!(!IronError::MissingHistory { trx_id: TrxId(2) }.is_fatal());
    }
}
