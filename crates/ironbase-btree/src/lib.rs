//! B-tree cursors.
//!
//! Three layers, innermost first:
//!
//! - [`PageCursor`]: a position within one page, including the synthetic
//!   infimum and supremum sentinels.
//! - [`TreeCursor`]: locates a record by key by descending from the root,
//!   and applies record-level changes at its position.
//! - [`PersistentCursor`]: a tree cursor whose position survives
//!   mini-transaction commit through a stored order prefix plus a modify
//!   clock certificate.
//!
//! The index descriptor ([`Index`]) owns the comparator surface: order
//! prefix copy, data tuple construction, and tuple/record comparison.

pub mod bulk;
pub mod index;
pub mod page_cursor;
pub mod pcur;
pub mod tree_cursor;

pub use bulk::{bulk_load, SpaceAlloc};
pub use index::{DTuple, Index, SearchMode};
pub use page_cursor::PageCursor;
pub use pcur::{OldStored, PersistentCursor, PosState, RelPos};
pub use tree_cursor::{LatchMode, TreeCursor};
