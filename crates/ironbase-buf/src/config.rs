//! Buffer pool configuration.

use ironbase_types::PageSize;
use tracing::warn;

/// Denominator of the old-sublist ratio.
pub const OLD_RATIO_DIV: u16 = 1024;

/// Minimum old-sublist ratio (in 1024ths).
pub const OLD_RATIO_MIN: u16 = 51;

/// Buffer pool sizing and replacement tuning.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Number of resident page frames.
    pub n_frames: usize,
    /// Page size; every frame is this large.
    pub page_size: PageSize,
    /// Fraction of the LRU list reserved for the old sublist, in 1024ths.
    /// Clamped to `[51, 1024]`.
    pub old_ratio: u16,
    /// A page is promoted from old to young only when re-accessed at
    /// least this many milliseconds after it first entered the pool.
    pub old_threshold_ms: u64,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            n_frames: 256,
            page_size: PageSize::DEFAULT,
            old_ratio: 3 * OLD_RATIO_DIV / 8,
            old_threshold_ms: 1000,
        }
    }
}

impl BufferPoolConfig {
    /// Clamp out-of-range fields into their legal domains.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let clamped = self.old_ratio.clamp(OLD_RATIO_MIN, OLD_RATIO_DIV);
        if clamped != self.old_ratio {
            warn!(requested = self.old_ratio, clamped, "old_ratio out of range, clamped");
            self.old_ratio = clamped;
        }
        assert!(self.n_frames >= 2, "buffer pool needs at least two frames");
        self
    }
}
