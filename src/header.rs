//! Defines the [`Header`] word and the size constants derived from it.

use core::fmt;
use core::mem::{align_of, size_of};

use static_assertions::const_assert;

/// Size of a single header or footer word.
pub const WORD_SIZE: usize = size_of::<Header>();
pub const WORD_ALIGN: usize = align_of::<Header>();

/// Size of two words. This is the alignment unit for payloads and block sizes.
pub const DSIZE: usize = 2 * WORD_SIZE;

const ALLOCATED_BIT: usize = 1;
const SIZE_MASK: usize = !0x7;

const_assert!(WORD_SIZE == WORD_ALIGN);
// The low three bits of every size must be free for tagging.
const_assert!(DSIZE % 8 == 0);

/// A boundary tag: the size of a whole block (header, payload and footer)
/// together with its allocation status.
///
/// # Layout
/// Block sizes are always multiples of [`DSIZE`] and therefore of 8, which
/// leaves the three least significant bits of the word unused. Bit 0 stores
/// the allocated flag, bits 1 and 2 are always zero and the remaining bits hold
/// the size.
///
/// ```text
///  usize::BITS-1                  3   2   1   0
/// +--------------------------------+---+---+---+
/// |             size               | 0 | 0 | a |
/// +--------------------------------+---+---+---+
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Header(usize);

impl Header {
    /// Packs `size` and `allocated` into a header.
    ///
    /// `size` should be a multiple of 8; its low bits are dropped otherwise.
    #[inline(always)]
    pub const fn new(size: usize, allocated: bool) -> Header {
        debug_assert!(size & !SIZE_MASK == 0, "size should be a multiple of 8.");
        Header((size & SIZE_MASK) | allocated as usize)
    }

    /// Returns the encoded word.
    #[inline(always)]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Returns the size of the whole block.
    #[inline(always)]
    pub const fn size(self) -> usize {
        self.0 & SIZE_MASK
    }

    #[inline(always)]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED_BIT != 0
    }

    /// Returns a copy of the header with the allocated flag set to `allocated`.
    #[inline(always)]
    pub const fn with_allocated(self, allocated: bool) -> Header {
        Header((self.0 & !ALLOCATED_BIT) | allocated as usize)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("size", &self.size())
            .field("allocated", &self.is_allocated())
            .finish()
    }
}
