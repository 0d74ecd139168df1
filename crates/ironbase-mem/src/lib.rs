//! Memory utilities for the kernel: bump arenas with bulk reset, and the
//! chained hash index built on per-stripe bounded arenas.

pub mod arena;
pub mod hash;

pub use arena::{Arena, ArenaRef};
pub use hash::HashTable;
