//! A single-threaded explicit free list allocator with boundary-tag coalescing.
//!
//! The allocator manages one contiguous arena that only ever grows at its end
//! and services allocate, free and reallocate requests against it. It keeps
//! every piece of bookkeeping inside the arena itself: there are no side
//! tables, only the headers and footers of the blocks and the links threaded
//! through the free ones.
//!
//! # Usage
//! ```
//! use explicit_malloc::ExplicitMalloc;
//! use explicit_malloc::growers::ArenaGrower;
//!
//! let mut heap = unsafe { ExplicitMalloc::with_grower(ArenaGrower::new(1 << 16)) };
//! heap.init().unwrap();
//!
//! let p = heap.allocate(100).unwrap();
//! unsafe {
//!     p.as_ptr().write_bytes(7, 100);
//!     let q = heap.reallocate(p.as_ptr(), 200).unwrap();
//!     assert_eq!(*q.as_ptr().add(99), 7);
//!     heap.free(q.as_ptr());
//! }
//! assert!(heap.check(false).is_consistent());
//! ```
//!
//! # Mode of operation
//! - When an allocation is requested the size is adjusted to a block size and
//!   the freelist is searched for the first block that is large enough. The
//!   search is greedy, meaning that the chosen block is always the first one
//!   found and might not be the best fit; in exchange the search stops early.
//! - If the chosen block is larger than needed and the excess can form a block
//!   of its own, the block is split and the excess goes back to the freelist.
//! - If no block is found a request is dispatched to the allocator's underlying
//!   [grower](#growers) to extend the arena by at least one chunk.
//! - On deallocation the block is marked free and merged with its physical
//!   neighbours if they are free too, then the result is pushed to the front of
//!   the freelist. As a consequence no two adjacent blocks are ever free.
//!
//! Bellow is a list of the abstractions used by the allocator for operating on the heap:
//!
//! ## Blocks
//! The arena is divided into blocks. Each block starts with a [header](#boundary-tags),
//! ends with a footer holding the same word, and carries the payload in between.
//! A block is occupied if its payload was handed out and free otherwise.
//! The arena is bounded by two sentinel blocks that are always occupied: the
//! prologue at the start and the zero-sized epilogue at the end.
//!
//! ## Boundary tags
//! A [`Header`] packs the size of the block with an allocated flag in the
//! lowest bit. Because the footer duplicates the header, the block right before
//! any block can be found by reading one word backwards, which is what makes
//! merging with the preceding neighbour *O*(1).
//!
//! ## Freelist
//! The freelist is a doubly-linked list embedded in the payloads of free blocks.
//! Insertion and removal are *O*(1) and insertion is LIFO.
//!
//! ## Growers
//! A grower is the allocator's arena growth provider. [`ExplicitMalloc`] is
//! generic over its grower, so anything that implements [`Grower`] (anything
//! that acts as a contiguous buffer which can grow) can back a heap.
//! [`BrkGrower`] extends the process data segment, [`ArenaGrower`] owns a
//! fixed-size buffer.
//!
//! # Threads
//! The allocator is single threaded: all operations take `&mut self` and the
//! heap is neither [`Send`] nor [`Sync`]. Wrap it in a lock of your own to share it.
//!
//! # Logging
//! Every operation emits [`tracing`] spans and events. Nothing is printed
//! unless the application installs a subscriber.
//!
//! [`Header`]: header::Header
//! [`Grower`]: growers::Grower
//! [`BrkGrower`]: growers::BrkGrower
//! [`ArenaGrower`]: growers::ArenaGrower

pub use crate::checker::{CheckReport, Violation};
pub use crate::config::{HeapConfig, CHUNK_SIZE};
pub use crate::error::{AllocatorError, OutOfAddressSpace};
pub use crate::malloc::{ExplicitMalloc, MIN_BLOCK_SIZE};

mod block;
mod checker;
mod config;
mod error;
mod freelist;
pub mod growers;
pub mod header;
mod malloc;
mod util;
