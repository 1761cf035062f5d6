//! Address arithmetic over blocks laid out in the arena.
//!
//! A block is addressed by its payload pointer, which is what the allocator
//! hands out to its users. The header sits in the word right before the
//! payload and the footer in the last word of the block:
//!
//! ```text
//!          header   payload (free blocks: prev, next, ...)   footer
//!        +--------+-----------------------------------------+--------+
//!  ...   | size|a |                                         | size|a |  ...
//!        +--------+-----------------------------------------+--------+
//!                 ^ payload                                  ^ payload + size - DSIZE
//! ```

use core::ptr::NonNull;

use crate::freelist::Node;
use crate::header::{Header, DSIZE, WORD_SIZE};

/// A handle to a block in the arena, identified by its payload pointer.
///
/// None of the methods check anything: on a corrupted arena they read and
/// write garbage. Use the [consistency checker](crate::ExplicitMalloc::check)
/// to find out whether the arena is well formed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Block(NonNull<u8>);

impl Block {
    #[inline(always)]
    pub const fn from_payload(payload: NonNull<u8>) -> Block {
        Block(payload)
    }

    /// # Safety
    /// `node` must sit at the payload of a free block.
    #[inline(always)]
    pub unsafe fn from_node(node: NonNull<Node>) -> Block {
        Block(node.cast())
    }

    #[inline(always)]
    pub const fn payload(self) -> NonNull<u8> {
        self.0
    }

    #[inline(always)]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Returns the block's payload viewed as a freelist node.
    #[inline(always)]
    pub fn node(self) -> *mut Node {
        self.0.as_ptr().cast()
    }

    /// Returns the address of the block header.
    ///
    /// # Safety
    /// The block must be inside the arena.
    #[inline(always)]
    pub unsafe fn header_of(self) -> *mut Header {
        self.0.as_ptr().sub(WORD_SIZE).cast()
    }

    /// Returns the address of the block footer, computed from the current header.
    ///
    /// # Safety
    /// The block header must be valid.
    #[inline(always)]
    pub unsafe fn footer_of(self) -> *mut Header {
        self.0.as_ptr().add(self.size()).sub(DSIZE).cast()
    }

    #[inline(always)]
    pub unsafe fn header(self) -> Header {
        self.header_of().read()
    }

    #[inline(always)]
    pub unsafe fn footer(self) -> Header {
        self.footer_of().read()
    }

    #[inline(always)]
    pub unsafe fn size(self) -> usize {
        self.header().size()
    }

    #[inline(always)]
    pub unsafe fn is_allocated(self) -> bool {
        self.header().is_allocated()
    }

    /// Returns how many payload bytes the block can hold.
    #[inline(always)]
    pub unsafe fn capacity(self) -> usize {
        self.size() - DSIZE
    }

    /// Writes matching header and footer words for a block of `size` bytes.
    ///
    /// # Safety
    /// `[header, header + size)` must be arena memory owned by this block.
    #[inline]
    pub unsafe fn write(self, size: usize, allocated: bool) {
        self.write_tags(Header::new(size, allocated));
    }

    /// Writes `tag` to the header, then to the footer it implies.
    ///
    /// # Safety
    /// See [`write`](Block::write).
    #[inline]
    pub unsafe fn write_tags(self, tag: Header) {
        self.header_of().write(tag);
        self.footer_of().write(tag);
    }

    /// Flips the allocated flag in both tags, keeping the size.
    ///
    /// # Safety
    /// The block's header must be intact.
    #[inline]
    pub unsafe fn set_allocated(self, allocated: bool) {
        self.write_tags(self.header().with_allocated(allocated));
    }

    /// Writes only the header. Used for the zero-sized epilogue, which has no footer.
    #[inline(always)]
    pub unsafe fn write_header(self, tag: Header) {
        self.header_of().write(tag);
    }

    /// Returns the footer of the physically preceding block.
    ///
    /// # Safety
    /// The block must not be the prologue.
    #[inline(always)]
    pub unsafe fn prev_footer(self) -> Header {
        self.0.as_ptr().sub(DSIZE).cast::<Header>().read()
    }

    /// Returns the physically next block.
    ///
    /// # Safety
    /// The block must not be the epilogue.
    #[inline(always)]
    pub unsafe fn next(self) -> Block {
        Block(NonNull::new_unchecked(self.0.as_ptr().add(self.size())))
    }

    /// Returns the physically preceding block, found through its footer.
    ///
    /// # Safety
    /// The block must not be the prologue.
    #[inline(always)]
    pub unsafe fn prev(self) -> Block {
        Block(NonNull::new_unchecked(
            self.0.as_ptr().sub(self.prev_footer().size()),
        ))
    }
}
