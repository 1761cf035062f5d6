//! Heap consistency checker.
//!
//! A debugging aid that walks the arena from the prologue to the epilogue and
//! the freelist from head to tail, and reports every broken invariant it
//! finds. It never repairs anything and is never called by the allocator itself.

use core::ptr::NonNull;
use std::collections::BTreeSet;

use crate::block::Block;
use crate::growers::Grower;
use crate::header::{Header, DSIZE};
use crate::malloc::{ExplicitMalloc, MIN_BLOCK_SIZE};

use thiserror::Error;
use tracing::{error, info, instrument};

/// A broken heap invariant. Addresses are payload addresses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("prologue at {addr:#x} reads {header:?} / {footer:?}")]
    BadPrologue {
        addr: usize,
        header: Header,
        footer: Header,
    },

    #[error("epilogue at {addr:#x} reads {header:?}, the break is at {heap_end:#x}")]
    BadEpilogue {
        addr: usize,
        header: Header,
        heap_end: usize,
    },

    #[error("block at {addr:#x} is not double word aligned")]
    Misaligned { addr: usize },

    #[error("block at {addr:#x} has invalid size {size}")]
    BadSize { addr: usize, size: usize },

    #[error("block at {addr:#x} of size {size} runs past the break at {heap_end:#x}")]
    OutOfBounds {
        addr: usize,
        size: usize,
        heap_end: usize,
    },

    #[error("free block at {addr:#x} has header {header:?} but footer {footer:?}")]
    TagMismatch {
        addr: usize,
        header: Header,
        footer: Header,
    },

    #[error("free blocks at {addr:#x} and {next:#x} are adjacent")]
    AdjacentFree { addr: usize, next: usize },

    #[error("free block at {addr:#x} is missing from the freelist")]
    NotInFreelist { addr: usize },

    #[error("freelist node at {addr:#x} is not a free block of the arena")]
    NotFree { addr: usize },

    #[error("freelist node at {addr:#x} is reachable twice")]
    DuplicateInFreelist { addr: usize },

    #[error("freelist node at {addr:#x} has a back link to {found:#x} instead of {expected:#x}")]
    BrokenLink {
        addr: usize,
        expected: usize,
        found: usize,
    },
}

/// What a [check](ExplicitMalloc::check) found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Blocks between the prologue and the epilogue.
    pub blocks: usize,
    pub free_blocks: usize,
    /// Bytes in free blocks, headers and footers included.
    pub free_bytes: usize,
    /// Bytes in allocated blocks, headers and footers included.
    pub allocated_bytes: usize,
    /// Length of the freelist.
    pub freelist_len: usize,
    pub violations: Vec<Violation>,
}

impl CheckReport {
    /// Returns whether no violation was found.
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

impl<G: Grower> ExplicitMalloc<G> {
    /// Walks the whole heap and reports every broken invariant.
    ///
    /// With `verbose` every block and freelist node is logged at `INFO`.
    /// Violations are always logged at `ERROR`. An uninitialized heap yields
    /// an empty report.
    #[instrument(level = "info", skip(self))]
    pub fn check(&self, verbose: bool) -> CheckReport {
        let mut report = CheckReport::default();
        let Some(prologue) = self.prologue() else {
            return report;
        };

        unsafe {
            if let Some(free_in_arena) = self.check_blocks(prologue, verbose, &mut report) {
                self.check_freelist(&free_in_arena, verbose, &mut report);
            }
        }

        for violation in &report.violations {
            error!(%violation, "Heap inconsistency.");
        }
        if verbose {
            info!(
                blocks = report.blocks,
                free_blocks = report.free_blocks,
                free_bytes = report.free_bytes,
                allocated_bytes = report.allocated_bytes,
                "Check finished."
            );
        }
        report
    }

    /// Walks the arena and returns the payload addresses of its free blocks,
    /// or `None` if the prologue is broken and the walk could not start.
    unsafe fn check_blocks(
        &self,
        prologue: Block,
        verbose: bool,
        report: &mut CheckReport,
    ) -> Option<BTreeSet<usize>> {
        let heap_end = self.heap_end() as usize;
        let mut free_in_arena = BTreeSet::new();

        let (header, footer) = (prologue.header(), prologue.footer());
        if header != Header::new(DSIZE, true) || footer != header {
            report.violations.push(Violation::BadPrologue {
                addr: prologue.addr(),
                header,
                footer,
            });
            return None;
        }

        let mut block = prologue.next();
        let mut prev_free: Option<usize> = None;
        loop {
            let header = block.header();
            let addr = block.addr();
            let size = header.size();

            if size == 0 {
                if !header.is_allocated() || addr != heap_end {
                    report.violations.push(Violation::BadEpilogue {
                        addr,
                        header,
                        heap_end,
                    });
                }
                break;
            }

            if verbose {
                info!(
                    addr = ?block.payload(),
                    size,
                    allocated = header.is_allocated(),
                    "Block."
                );
            }

            if addr % DSIZE != 0 {
                report.violations.push(Violation::Misaligned { addr });
            }
            if size % DSIZE != 0 || size < MIN_BLOCK_SIZE {
                report.violations.push(Violation::BadSize { addr, size });
            }
            if addr.checked_add(size).map_or(true, |end| end > heap_end) {
                report.violations.push(Violation::OutOfBounds {
                    addr,
                    size,
                    heap_end,
                });
                break;
            }

            report.blocks += 1;
            if header.is_allocated() {
                report.allocated_bytes += size;
                prev_free = None;
            } else {
                let footer = block.footer();
                if footer != header {
                    report.violations.push(Violation::TagMismatch {
                        addr,
                        header,
                        footer,
                    });
                }
                if let Some(prev) = prev_free {
                    report
                        .violations
                        .push(Violation::AdjacentFree { addr: prev, next: addr });
                }
                report.free_blocks += 1;
                report.free_bytes += size;
                free_in_arena.insert(addr);
                prev_free = Some(addr);
            }

            block = block.next();
        }

        Some(free_in_arena)
    }

    unsafe fn check_freelist(
        &self,
        free_in_arena: &BTreeSet<usize>,
        verbose: bool,
        report: &mut CheckReport,
    ) {
        let mut seen = BTreeSet::new();
        let mut expected_prev = 0_usize;

        // Walked by hand: a node is only read once it is known to be a free block.
        let mut next = self.freelist().head();
        while let Some(node) = next {
            let addr = node.as_ptr() as usize;
            if !seen.insert(addr) {
                // A cycle, walking on would never end.
                report
                    .violations
                    .push(Violation::DuplicateInFreelist { addr });
                break;
            }
            if verbose {
                info!(addr = ?node, "Freelist node.");
            }

            report.freelist_len += 1;
            if !free_in_arena.contains(&addr) {
                report.violations.push(Violation::NotFree { addr });
                // Its links can not be trusted.
                break;
            }

            let found = (*node.as_ptr()).prev as usize;
            if found != expected_prev {
                report.violations.push(Violation::BrokenLink {
                    addr,
                    expected: expected_prev,
                    found,
                });
            }
            expected_prev = addr;
            next = NonNull::new((*node.as_ptr()).next);
        }

        for &addr in free_in_arena.difference(&seen) {
            report.violations.push(Violation::NotInFreelist { addr });
        }
    }
}
