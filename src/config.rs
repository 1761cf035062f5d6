//! Tunables of [`ExplicitMalloc`](crate::ExplicitMalloc).

use crate::header::DSIZE;

/// Default number of bytes the heap grows by when no free block fits.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Heap configuration, fixed when the allocator is created.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    chunk_size: usize,
}

impl HeapConfig {
    pub const DEFAULT: HeapConfig = HeapConfig {
        chunk_size: CHUNK_SIZE,
    };

    /// Sets the minimum growth request. It is rounded up to a multiple of
    /// [`DSIZE`](crate::header::DSIZE) and is never below one double word.
    pub const fn with_chunk_size(self, chunk_size: usize) -> HeapConfig {
        let chunk_size = match chunk_size {
            0 => DSIZE,
            n if n > usize::MAX - DSIZE => usize::MAX - usize::MAX % DSIZE,
            n => (n + DSIZE - 1) / DSIZE * DSIZE,
        };
        HeapConfig { chunk_size }
    }

    #[inline]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig::DEFAULT
    }
}
