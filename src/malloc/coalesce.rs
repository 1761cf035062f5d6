//! Boundary-tag coalescing.

use super::ExplicitMalloc;
use crate::block::Block;
use crate::growers::Grower;

use tracing::{debug, instrument};

impl<G: Grower> ExplicitMalloc<G> {
    /// Merges the free block `block` with its free physical neighbours and
    /// inserts the result into the freelist. Returns the merged block, which
    /// starts at the previous neighbour if that one was free.
    ///
    /// The previous neighbour's allocation status is read from its footer, the
    /// word right before `block`'s header. The prologue and epilogue are always
    /// allocated, so neither lookup can leave the arena.
    ///
    /// # Safety
    /// `block` must be marked free in both its header and footer and must not
    /// be in the freelist.
    #[instrument(level = "debug", skip(self))]
    pub(super) unsafe fn coalesce(&mut self, block: Block) -> Block {
        debug_assert!(!block.is_allocated());
        debug_assert_eq!(block.header(), block.footer());

        let prev_allocated = block.prev_footer().is_allocated();
        let next = block.next();
        let next_allocated = next.is_allocated();
        let mut size = block.size();

        let merged = match (prev_allocated, next_allocated) {
            (true, true) => {
                debug!("Both neighbours are allocated, nothing to merge.");
                block
            }
            (true, false) => {
                self.freelist.remove(next.node());
                size += next.size();
                block.write(size, false);
                debug!(?next, size, "Merged with the next block.");
                block
            }
            (false, true) => {
                let prev = block.prev();
                self.freelist.remove(prev.node());
                size += prev.size();
                prev.write(size, false);
                debug!(?prev, size, "Merged with the previous block.");
                prev
            }
            (false, false) => {
                let prev = block.prev();
                self.freelist.remove(prev.node());
                self.freelist.remove(next.node());
                size += prev.size() + next.size();
                prev.write(size, false);
                debug!(?prev, ?next, size, "Merged with both neighbours.");
                prev
            }
        };

        self.freelist.insert(merged.node());
        merged
    }
}
