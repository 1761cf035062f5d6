//! A singlethreaded explicit free list allocator.
//!
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Arena layout
// After `init` the arena starts with a padding word followed by the prologue
// (a header/footer pair with no payload) and the epilogue header:
//
//     base: [ pad | prologue hdr | prologue ftr | epilogue hdr ] <- break
//
// Every growth turns the old epilogue into the header of the new block and
// writes a fresh epilogue in the last word of the new region, so the arena
// always reads `prologue, block, block, ..., epilogue` and both walks stop at
// a permanently allocated block.
//
// ## Request adjustment
// Payload sizes are turned into block sizes by `place::adjust_size`: header
// and footer are added and the total is rounded to a multiple of `DSIZE`,
// never below `MIN_BLOCK_SIZE` so that any block can later hold a freelist node.

use crate::block::Block;
use crate::config::HeapConfig;
use crate::error::AllocatorError;
use crate::freelist::{Freelist, NODE_SIZE};
use crate::growers::{Grower, ARENA_ALIGN};
use crate::header::{Header, DSIZE, WORD_SIZE};
use crate::util::round_up;

use core::fmt::{self, Debug};
use core::ptr::{copy_nonoverlapping, null_mut, NonNull};

use static_assertions::const_assert;
use tracing::{debug, error, instrument, Level};

mod coalesce;
mod place;

/// The smallest block: header, footer and the two words of a freelist node.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

const_assert!(MIN_BLOCK_SIZE >= 2 * WORD_SIZE + NODE_SIZE);
const_assert!(MIN_BLOCK_SIZE % DSIZE == 0);
const_assert!(ARENA_ALIGN % DSIZE == 0);

/// Size of the initial `[pad, prologue header, prologue footer, epilogue]` region.
const SENTINELS_SIZE: usize = 4 * WORD_SIZE;

/// A singlethreaded memory allocator over the arena of a [`Grower`].
///
/// All state lives in the value itself, so any number of independent heaps
/// can exist side by side. Every operation takes `&mut self`; sharing a heap
/// between threads requires an external lock.
pub struct ExplicitMalloc<G: Grower> {
    freelist: Freelist,
    prologue: Option<Block>,
    heap_end: *mut u8,
    config: HeapConfig,
    grower: G,
}

impl<G: Grower> Debug for ExplicitMalloc<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplicitMalloc")
            .field("freelist", &self.freelist)
            .field("prologue", &self.prologue)
            .field("heap_end", &self.heap_end)
            .field("config", &self.config)
            .finish()
    }
}

impl<G: Grower> ExplicitMalloc<G> {
    /// Creates an allocator instance with the specified grower and the default
    /// [`HeapConfig`]. The heap is initialized on the first allocation, or
    /// explicitly by [`init`](ExplicitMalloc::init).
    ///
    /// # Safety
    /// Callers must make sure that the provided grower will be the only object
    /// managing it's underlying buffer for the lifetime of the returned allocator.
    pub const unsafe fn with_grower(grower: G) -> Self {
        Self::with_config(grower, HeapConfig::DEFAULT)
    }

    /// Like [`with_grower`](ExplicitMalloc::with_grower) with a custom configuration.
    ///
    /// # Safety
    /// See [`with_grower`](ExplicitMalloc::with_grower).
    pub const unsafe fn with_config(grower: G, config: HeapConfig) -> Self {
        ExplicitMalloc {
            freelist: Freelist::new(),
            prologue: None,
            heap_end: null_mut(),
            config,
            grower,
        }
    }

    /// Resets the arena to the prologue and epilogue alone, then grows it by
    /// one chunk which becomes the first free block.
    ///
    /// Every pointer handed out before is invalidated.
    #[instrument(level = "info", skip(self), err(level = Level::ERROR))]
    pub fn init(&mut self) -> Result<(), AllocatorError> {
        unsafe {
            self.grower.reset();
            self.freelist.clear();
            self.prologue = None;

            let base = self.grower.extend(SENTINELS_SIZE)?.as_ptr();
            debug_assert_eq!(base as usize % ARENA_ALIGN, 0, "Arena base should be aligned.");

            base.cast::<Header>().write(Header::default());
            let prologue = Block::from_payload(NonNull::new_unchecked(base.add(2 * WORD_SIZE)));
            prologue.write(DSIZE, true);
            prologue.next().write_header(Header::new(0, true));

            self.prologue = Some(prologue);
            self.heap_end = base.add(SENTINELS_SIZE);
            debug!(?base, "Sentinels placed.");

            self.extend_heap(self.config.chunk_size())?;
        }
        Ok(())
    }

    /// Allocates a block with room for at least `size` bytes and returns its payload.
    ///
    /// Returns `None` if `size` is zero or if the arena can not grow enough.
    /// The payload is [`DSIZE`]-aligned.
    ///
    /// [`DSIZE`]: crate::header::DSIZE
    #[instrument(level = "info", skip(self), ret(level = Level::INFO))]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        match unsafe { self.__alloc(size) } {
            Ok(block) => Some(block.payload()),
            Err(err) => {
                error!(%err, "Allocation failed.");
                None
            }
        }
    }

    /// Releases the block whose payload is `ptr`. Null pointers are ignored.
    ///
    /// Debug builds assert that the block is marked allocated, which catches
    /// most double frees. Release builds do not check anything.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer returned by [`allocate`](ExplicitMalloc::allocate)
    /// or [`reallocate`](ExplicitMalloc::reallocate) on this heap that has not been
    /// freed since, and the heap must not have been re-initialized in between.
    #[instrument(level = "info", skip(self))]
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };
        debug_assert!(self.prologue.is_some(), "Freeing into an uninitialized heap.");
        debug_assert_eq!(
            ptr as usize % DSIZE,
            0,
            "All payloads should have double word alignment."
        );

        let block = Block::from_payload(payload);
        debug_assert!(
            block.is_allocated(),
            "Double free or invalid pointer, block header reads {:?}.",
            block.header()
        );

        block.set_allocated(false);
        self.coalesce(block);
    }

    /// Resizes the allocation at `ptr` to `size` bytes.
    ///
    /// * A null `ptr` behaves as [`allocate(size)`](ExplicitMalloc::allocate).
    /// * A zero `size` behaves as [`free(ptr)`](ExplicitMalloc::free) and returns `None`.
    /// * Otherwise a new block is allocated, the first `min(capacity, size)` bytes
    ///   are copied over and the old block is freed. If the allocation fails
    ///   `None` is returned and the old block is left untouched.
    ///
    /// # Safety
    /// The same requirements as for [`free`](ExplicitMalloc::free) apply to `ptr`.
    #[instrument(level = "info", skip(self), ret(level = Level::INFO))]
    pub unsafe fn reallocate(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        let Some(old_payload) = NonNull::new(ptr) else {
            return self.allocate(size);
        };
        if size == 0 {
            self.free(ptr);
            return None;
        }

        let old_block = Block::from_payload(old_payload);
        debug_assert!(old_block.is_allocated(), "Objects should be preceded by allocated headers.");
        let capacity = old_block.capacity();
        debug!(capacity, "Read old block capacity.");

        let new_payload = self.allocate(size)?;
        copy_nonoverlapping(old_payload.as_ptr(), new_payload.as_ptr(), capacity.min(size));
        self.free(ptr);
        Some(new_payload)
    }

    /// Returns the grower backing the heap.
    #[inline]
    pub fn grower(&self) -> &G {
        &self.grower
    }

    #[inline]
    pub fn config(&self) -> HeapConfig {
        self.config
    }

    /// Returns whether the prologue and epilogue are in place.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.prologue.is_some()
    }

    #[inline]
    pub(crate) fn prologue(&self) -> Option<Block> {
        self.prologue
    }

    /// Returns the current break, the byte right after the epilogue header.
    #[inline]
    pub(crate) fn heap_end(&self) -> *mut u8 {
        self.heap_end
    }

    #[inline]
    pub(crate) fn freelist(&self) -> &Freelist {
        &self.freelist
    }

    #[cfg(test)]
    pub(crate) fn freelist_mut(&mut self) -> &mut Freelist {
        &mut self.freelist
    }
}

impl<G: Grower> ExplicitMalloc<G> {
    #[instrument(level = "debug", skip(self), err(level = Level::DEBUG))]
    unsafe fn __alloc(&mut self, size: usize) -> Result<Block, AllocatorError> {
        let asize = place::adjust_size(size)?;
        debug!(asize, "Request adjusted.");

        if self.prologue.is_none() {
            debug!("Heap isn't initialized yet, initializing.");
            self.init()?;
        }

        let block = match self.find_fit(asize) {
            Some(block) => {
                debug!(?block, "Found free block to accomodate request.");
                block
            }
            None => {
                debug!("Couldn't find free block to accomodate request, requesting heap growth.");
                self.extend_heap(asize.max(self.config.chunk_size()))?
            }
        };

        self.place(block, asize);
        Ok(block)
    }

    /// Grows the arena by `size` bytes, rounded up to an even number of words,
    /// and turns the new space into a free block. The block is coalesced with a
    /// free block at the old end of the arena and returned.
    ///
    /// # Safety
    /// The heap must be initialized.
    #[instrument(level = "debug", skip(self), err(level = Level::ERROR))]
    unsafe fn extend_heap(&mut self, size: usize) -> Result<Block, AllocatorError> {
        debug_assert!(self.prologue.is_some());

        let size = round_up(size, DSIZE)
            .ok_or(AllocatorError::RequestTooLarge { requested: size })?
            .max(MIN_BLOCK_SIZE);

        let payload = self.grower.extend(size)?;
        debug_assert_eq!(
            payload.as_ptr(),
            self.heap_end,
            "Grower should extend the arena contiguously."
        );

        // The new header overwrites the old epilogue.
        let block = Block::from_payload(payload);
        block.write(size, false);
        block.next().write_header(Header::new(0, true));
        self.heap_end = payload.as_ptr().add(size);
        debug!(?block, size, "Heap growth successful.");

        Ok(self.coalesce(block))
    }
}

#[cfg(test)]
mod tests;
