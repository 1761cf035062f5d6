//! Error types shared by the allocator and its growers.

use thiserror::Error;

/// Returned by a [`Grower`](crate::growers::Grower) that can not extend its
/// buffer any further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no address space left to grow the arena")]
pub struct OutOfAddressSpace;

/// Errors from allocator operations.
///
/// [`allocate`](crate::ExplicitMalloc::allocate) and
/// [`reallocate`](crate::ExplicitMalloc::reallocate) report these as `None`;
/// [`init`](crate::ExplicitMalloc::init) returns them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocatorError {
    /// The grower could not provide more memory.
    #[error("arena growth failed: {0}")]
    OutOfAddressSpace(#[from] OutOfAddressSpace),

    /// The request can not be represented as a block size.
    #[error("a block for {requested} payload bytes would exceed isize::MAX")]
    RequestTooLarge {
        /// The payload size that was asked for.
        requested: usize,
    },
}
