//! Defines the [`Freelist`] struct and associated constants and functions.

use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ptr::{null_mut, NonNull};

use crate::header::{DSIZE, WORD_SIZE};
use crate::util::raw_ptr;

use static_assertions::const_assert;

pub const NODE_SIZE: usize = size_of::<Node>();
pub const NODE_ALIGN: usize = align_of::<Node>();

// A node fills the first two words of a free payload.
const_assert!(NODE_SIZE == 2 * WORD_SIZE);
const_assert!(NODE_ALIGN <= DSIZE);

/// The links embedded at the start of every free block's payload.
///
/// The back link lives at payload offset 0 and the forward link right after it.
#[repr(C)]
pub struct Node {
    pub prev: *mut Node,
    pub next: *mut Node,
}

/// A LIFO doubly-linked list threaded through the payloads of free blocks.
///
/// The list owns no memory, it only strings together nodes that live inside
/// the arena. Null pointers mark both ends.
#[derive(Debug)]
pub struct Freelist {
    head: *mut Node,
}

impl Freelist {
    /// Creates an empty Freelist.
    #[inline]
    pub const fn new() -> Self {
        Freelist { head: null_mut() }
    }

    /// Creates a node at the location pointed by `p` and makes it the new head.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// `p` must point to the payload of a free block that is not in the list yet.
    /// Whatever the payload held before is overwritten.
    pub unsafe fn insert(&mut self, p: *mut Node) {
        debug_assert!(!p.is_null());
        debug_assert_eq!(p as usize % NODE_ALIGN, 0);

        p.write(Node {
            prev: null_mut(),
            next: self.head,
        });
        if !self.head.is_null() {
            (*self.head).prev = p;
        }
        self.head = p;
    }

    /// Removes `node` from the list.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// `node` must be part of the list.
    pub unsafe fn remove(&mut self, node: *mut Node) {
        let prev = (*node).prev;
        let next = (*node).next;
        match prev.is_null() {
            true => self.head = next,
            false => (*prev).next = next,
        }
        if !next.is_null() {
            (*next).prev = prev;
        }
    }

    /// Returns the head of the list or `None` if the list is empty.
    /// This operation has a time complexity of *O*(1).
    #[inline]
    pub fn head(&self) -> Option<NonNull<Node>> {
        NonNull::new(self.head)
    }

    /// Forgets every node without touching them.
    #[inline]
    pub fn clear(&mut self) {
        self.head = null_mut();
    }

    /// Returns an iterator over the nodes, head to tail.
    ///
    /// # Safety
    /// Every node reachable from the head must stay valid and unmodified while
    /// the iterator is alive.
    #[inline]
    pub unsafe fn iter(&self) -> Iter<'_> {
        Iter {
            next: raw_ptr(self.head()),
            _list: PhantomData,
        }
    }
}

pub struct Iter<'a> {
    next: *mut Node,
    _list: PhantomData<&'a Freelist>,
}

impl Iterator for Iter<'_> {
    type Item = NonNull<Node>;

    fn next(&mut self) -> Option<NonNull<Node>> {
        let node = NonNull::new(self.next)?;
        self.next = unsafe { (*node.as_ptr()).next };
        Some(node)
    }
}
