//! Placement policy: request adjustment, first-fit search and splitting.
//!
//! The search is first fit over the freelist in LIFO order. It trades
//! fragmentation for a short, predictable scan: it stops at the first block
//! that is large enough instead of looking for the tightest one.

use super::{ExplicitMalloc, MIN_BLOCK_SIZE};
use crate::block::Block;
use crate::error::AllocatorError;
use crate::growers::Grower;
use crate::header::DSIZE;
use crate::util::round_up;

use tracing::{debug, instrument, Level};

/// Turns a payload size into the size of the block that will hold it.
///
/// Requests of at most [`DSIZE`] bytes get a [`MIN_BLOCK_SIZE`] block; larger
/// ones get room for a header and a footer, rounded up to a multiple of [`DSIZE`].
pub(super) fn adjust_size(size: usize) -> Result<usize, AllocatorError> {
    if size <= DSIZE {
        return Ok(MIN_BLOCK_SIZE);
    }
    // Sizes of blocks should not exceed isize::MAX.
    // https://doc.rust-lang.org/std/ptr/index.html#allocated-object
    match size.checked_add(DSIZE).and_then(|s| round_up(s, DSIZE)) {
        Some(asize) if asize <= isize::MAX as usize => Ok(asize),
        _ => Err(AllocatorError::RequestTooLarge { requested: size }),
    }
}

impl<G: Grower> ExplicitMalloc<G> {
    /// Returns the first free block, in freelist order, of at least `asize` bytes.
    ///
    /// # Safety
    /// The heap must be initialized and consistent.
    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG))]
    pub(super) unsafe fn find_fit(&self, asize: usize) -> Option<Block> {
        for node in self.freelist.iter() {
            let block = Block::from_node(node);
            let size = block.size();
            if size >= asize {
                return Some(block);
            }
            debug!(?block, size, "Free block is too small. Continuing...");
        }
        None
    }

    /// Marks the free block `block` allocated for a request of `asize` bytes.
    ///
    /// The block leaves the freelist. If what is left after `asize` bytes is
    /// large enough to be a block on its own it is split off and inserted as
    /// a new free block, otherwise the whole block is handed out.
    ///
    /// # Safety
    /// `block` must be a free block of at least `asize` bytes which is in the
    /// freelist, and `asize` must come from [`adjust_size`].
    #[instrument(level = "debug", skip(self))]
    pub(super) unsafe fn place(&mut self, block: Block, asize: usize) {
        let csize = block.size();
        debug_assert!(!block.is_allocated(), "Block should be free.");
        debug_assert!(csize >= asize);

        self.freelist.remove(block.node());

        let remainder_size = csize - asize;
        if remainder_size >= MIN_BLOCK_SIZE {
            block.write(asize, true);
            let remainder = block.next();
            remainder.write(remainder_size, false);
            self.freelist.insert(remainder.node());
            debug!(?remainder, remainder_size, "Split off a free block.");
        } else {
            block.set_allocated(true);
            debug!(size = csize, "Remainder too small to split, granting whole block.");
        }
    }
}
