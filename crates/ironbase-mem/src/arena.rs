//! Bump arena with bulk reset.
//!
//! The arena hands out [`ArenaRef`] handles instead of borrows, so the
//! owner can keep allocating while handles are outstanding. `reset`
//! invalidates every handle at once; each handle carries the generation it
//! was allocated under and resolving a stale one panics (a handle that
//! outlives its arena's reset is a caller bug, not data corruption).

/// Handle to a byte range inside an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRef {
    off: u32,
    len: u32,
    generation: u32,
}

impl ArenaRef {
    /// Length of the referenced range.
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.len as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// A byte arena supporting bulk reset between work iterations.
///
/// Unbounded by default; [`Arena::with_limit`] caps the total allocation,
/// in which case [`Arena::try_alloc`] reports exhaustion instead of
/// growing (the hash-index stripes rely on this).
#[derive(Debug)]
pub struct Arena {
    buf: Vec<u8>,
    limit: Option<usize>,
    generation: u32,
}

impl Arena {
    /// An unbounded arena.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new(), limit: None, generation: 0 }
    }

    /// An arena that rejects allocations past `limit` total bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { buf: Vec::new(), limit: Some(limit), generation: 0 }
    }

    /// Copy `data` into the arena.
    ///
    /// Returns `None` if a limit is set and would be exceeded; the arena
    /// is left unchanged in that case.
    pub fn try_alloc(&mut self, data: &[u8]) -> Option<ArenaRef> {
        if let Some(limit) = self.limit {
            if self.buf.len() + data.len() > limit {
                return None;
            }
        }
        let off = u32::try_from(self.buf.len()).expect("arena offset fits in u32");
        let len = u32::try_from(data.len()).expect("arena allocation fits in u32");
        self.buf.extend_from_slice(data);
        Some(ArenaRef { off, len, generation: self.generation })
    }

    /// Copy `data` into the arena.
    ///
    /// # Panics
    ///
    /// Panics if a limit is set and exceeded; use [`Arena::try_alloc`] on
    /// bounded arenas.
    pub fn alloc(&mut self, data: &[u8]) -> ArenaRef {
        self.try_alloc(data).expect("arena limit exceeded")
    }

    /// Resolve a handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle predates the last [`Arena::reset`].
    #[must_use]
    pub fn slice(&self, r: ArenaRef) -> &[u8] {
        assert_eq!(
            r.generation, self.generation,
            "arena handle used after reset (handle gen {}, arena gen {})",
            r.generation, self.generation
        );
        &self.buf[r.off as usize..(r.off + r.len) as usize]
    }

    /// Discard all allocations and invalidate outstanding handles.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Bytes currently allocated.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.buf.len()
    }

    /// Configured limit, if any.
    #[inline]
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}
