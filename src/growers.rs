//! [`Grower`] trait and structures that implement it.
//!
//! A grower is the arena growth provider: the only way the allocator obtains
//! memory. Swapping the grower changes where the heap lives without touching
//! the allocator.

use crate::error::OutOfAddressSpace;
use crate::header::DSIZE;
use crate::util::{checked_add, find_aligned};

use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

use libc::{brk, sbrk};
use tracing::{error, warn};

/// Alignment of the base address every grower hands out.
pub const ARENA_ALIGN: usize = DSIZE;

/// A trait for types that act as a contiguous buffer that can only grow at its end.
///
/// # Safety
/// * The region returned by [`extend`](Grower::extend) must start exactly where
///   the previous one ended, must be zero-filled and must stay valid until the
///   next [`reset`](Grower::reset) or until the grower is dropped.
/// * The first region after creation or after a reset must be
///   [`ARENA_ALIGN`]-aligned.
/// * Copying, cloning, or moving the grower must not invalidate any pointers to
///   the buffer managed by the grower.
pub unsafe trait Grower {
    /// Appends `size` bytes to the buffer and returns the address of the first
    /// new byte, or `Err(OutOfAddressSpace)` if the buffer can not grow that much.
    ///
    /// `extend(0)` never grows the buffer; it returns the current end.
    ///
    /// # Safety
    /// Callers must be the only users of the buffer.
    unsafe fn extend(&mut self, size: usize) -> Result<NonNull<u8>, OutOfAddressSpace>;

    /// Shrinks the buffer back to empty, invalidating every region handed out so far.
    ///
    /// # Safety
    /// Nothing may reference the buffer's contents any more.
    unsafe fn reset(&mut self);
}

/// A grower that uses [`libc::sbrk`] to operate
/// on the end of the process's data segment.
///
/// The data segment is shared with everything else in the process that calls
/// `brk`/`sbrk`. If the break moves under the grower's feet the arena would no
/// longer be contiguous, so further growth is refused.
#[derive(Debug, Default)]
pub struct BrkGrower {
    heap_start: Option<NonNull<u8>>,
    heap_end: Option<NonNull<u8>>,
}

impl BrkGrower {
    #[inline(always)]
    pub const fn new() -> Self {
        BrkGrower {
            heap_start: None,
            heap_end: None,
        }
    }

    /// Tries to initialize the grower by calling `sbrk(0)` to get the initial
    /// heap end and padding it to [`ARENA_ALIGN`].
    unsafe fn try_init(&mut self) -> Result<NonNull<u8>, OutOfAddressSpace> {
        let current: *mut u8 = sbrk(0).cast();
        if current as isize == -1 {
            error!("Calling sbrk(0) failed.");
            return Err(OutOfAddressSpace);
        }
        let aligned = find_aligned(current, ARENA_ALIGN).ok_or(OutOfAddressSpace)? as *mut u8;
        let padding = aligned as usize - current as usize;
        if padding > 0 && sbrk(padding as libc::intptr_t) as isize == -1 {
            return Err(OutOfAddressSpace);
        }
        let start = NonNull::new(aligned).ok_or(OutOfAddressSpace)?;
        self.heap_start = Some(start);
        self.heap_end = Some(start);
        Ok(start)
    }
}

unsafe impl Grower for BrkGrower {
    unsafe fn extend(&mut self, size: usize) -> Result<NonNull<u8>, OutOfAddressSpace> {
        let heap_end = match self.heap_end {
            Some(end) => end,
            None => self.try_init()?,
        };
        if size == 0 {
            return Ok(heap_end);
        }
        let increment = libc::intptr_t::try_from(size).map_err(|_| OutOfAddressSpace)?;
        let new_heap_end = checked_add(heap_end.as_ptr(), size).ok_or(OutOfAddressSpace)? as *mut u8;

        let old_break: *mut u8 = sbrk(increment).cast();
        if old_break as isize == -1 {
            return Err(OutOfAddressSpace);
        }
        if old_break != heap_end.as_ptr() {
            error!(
                expected = ?heap_end.as_ptr(),
                found = ?old_break,
                "Program break was moved by someone else, the arena can not stay contiguous."
            );
            if sbrk(0).cast::<u8>() == old_break.wrapping_add(size) {
                sbrk(-increment);
            }
            return Err(OutOfAddressSpace);
        }

        old_break.write_bytes(0, size);
        self.heap_end = NonNull::new(new_heap_end);
        Ok(heap_end)
    }

    unsafe fn reset(&mut self) {
        let (Some(start), Some(end)) = (self.heap_start, self.heap_end) else {
            return;
        };
        if sbrk(0).cast::<u8>() == end.as_ptr() && brk(start.as_ptr().cast()) == 0 {
            self.heap_end = Some(start);
            return;
        }
        warn!("Couldn't rewind the program break, starting a new arena at the current break.");
        self.heap_start = None;
        self.heap_end = None;
    }
}

/// A grower that hands out a fixed-capacity buffer which it owns.
///
/// Every instance is independent, which makes it the grower of choice for
/// running several heaps side by side, or for testing.
#[derive(Debug)]
pub struct ArenaGrower {
    buf: NonNull<u8>,
    layout: Layout,
    len: usize,
}

impl ArenaGrower {
    /// Creates a grower over a new zeroed buffer of `capacity` bytes.
    ///
    /// # Panics
    /// Panics if `capacity` exceeds `isize::MAX` once aligned.
    pub fn new(capacity: usize) -> Self {
        let layout = Layout::from_size_align(capacity.max(ARENA_ALIGN), ARENA_ALIGN)
            .expect("arena capacity should fit in isize::MAX");
        let buf = match NonNull::new(unsafe { alloc_zeroed(layout) }) {
            Some(buf) => buf,
            None => handle_alloc_error(layout),
        };
        ArenaGrower {
            buf,
            layout,
            len: 0,
        }
    }

    /// Returns the first byte of the buffer.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.buf
    }

    /// Returns how many bytes have been handed out since the last reset.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }
}

unsafe impl Grower for ArenaGrower {
    unsafe fn extend(&mut self, size: usize) -> Result<NonNull<u8>, OutOfAddressSpace> {
        let heap_end = self.buf.as_ptr().add(self.len);
        if size == 0 {
            return Ok(NonNull::new_unchecked(heap_end));
        }
        match self.len.checked_add(size) {
            Some(new_len) if new_len <= self.capacity() => {
                heap_end.write_bytes(0, size);
                self.len = new_len;
                Ok(NonNull::new_unchecked(heap_end))
            }
            _ => Err(OutOfAddressSpace),
        }
    }

    unsafe fn reset(&mut self) {
        self.len = 0;
    }
}

impl Drop for ArenaGrower {
    fn drop(&mut self) {
        unsafe { dealloc(self.buf.as_ptr(), self.layout) };
    }
}

unsafe impl<T: Grower + ?Sized> Grower for &mut T {
    unsafe fn extend(&mut self, size: usize) -> Result<NonNull<u8>, OutOfAddressSpace> {
        (**self).extend(size)
    }

    unsafe fn reset(&mut self) {
        (**self).reset()
    }
}
