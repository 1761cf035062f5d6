use crate::block::Block;
use crate::config::CHUNK_SIZE;
use crate::growers::ArenaGrower;
use crate::header::{Header, DSIZE, WORD_SIZE};

use self::format::{RecordEntryLayer, SimpleFormatter};

use super::*;

use std::sync::Once;

use tracing_subscriber::fmt::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};


/// Installs the test subscriber once. Set e.g.
/// `RUST_LOG=explicit_malloc=debug` to follow what the allocator does.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let subscriber = Registry::default()
            .with(EnvFilter::from_default_env())
            .with(RecordEntryLayer::default())
            .with(
                Layer::new()
                    .event_format(SimpleFormatter)
                    .with_test_writer(),
            );
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Forwards to another grower and records the size of every growth request.
struct CountingGrower<G> {
    inner: G,
    requests: Vec<usize>,
}

unsafe impl<G: Grower> Grower for CountingGrower<G> {
    unsafe fn extend(&mut self, size: usize) -> Result<NonNull<u8>, crate::OutOfAddressSpace> {
        if size > 0 {
            self.requests.push(size);
        }
        self.inner.extend(size)
    }

    unsafe fn reset(&mut self) {
        self.inner.reset()
    }
}

type TestHeap = ExplicitMalloc<CountingGrower<ArenaGrower>>;

fn heap_with(capacity: usize, config: HeapConfig) -> TestHeap {
    init_tracing();
    let grower = CountingGrower {
        inner: ArenaGrower::new(capacity),
        requests: vec![],
    };
    unsafe { ExplicitMalloc::with_config(grower, config) }
}

fn heap(capacity: usize) -> TestHeap {
    let mut heap = heap_with(capacity, HeapConfig::DEFAULT);
    heap.init().unwrap();
    heap
}

fn growths(heap: &TestHeap) -> usize {
    heap.grower().requests.len()
}

fn block_size(p: NonNull<u8>) -> usize {
    unsafe { Block::from_payload(p).size() }
}

fn assert_consistent(heap: &TestHeap) -> crate::CheckReport {
    let report = heap.check(false);
    assert!(report.is_consistent(), "{:#?}", report.violations);
    assert_eq!(report.free_blocks, report.freelist_len);
    report
}

#[test]
fn test_init() {
    let heap = heap(64 * 1024);
    assert!(heap.is_initialized());

    let report = assert_consistent(&heap);
    assert_eq!(report.blocks, 1);
    assert_eq!(report.free_bytes, CHUNK_SIZE);
    assert_eq!(heap.grower().requests, vec![4 * WORD_SIZE, CHUNK_SIZE]);
    assert_eq!(heap.grower().inner.len(), 4 * WORD_SIZE + CHUNK_SIZE);

    let prologue = heap.prologue().unwrap();
    unsafe {
        assert_eq!(prologue.header(), Header::new(DSIZE, true));
        assert_eq!(prologue.footer(), Header::new(DSIZE, true));
        let epilogue: *const Header = heap.heap_end().sub(WORD_SIZE).cast();
        assert_eq!(*epilogue, Header::new(0, true));
    }
}

#[test]
fn test_first_fit_reuse() {
    let mut heap = heap(64 * 1024);

    let a = heap.allocate(8).unwrap();
    let b = heap.allocate(16).unwrap();
    let c = heap.allocate(32).unwrap();
    let before = growths(&heap);

    unsafe { heap.free(b.as_ptr()) };
    assert_consistent(&heap);

    let d = heap.allocate(16).unwrap();
    let b_start = b.as_ptr() as usize;
    assert!((b_start..b_start + block_size(b)).contains(&(d.as_ptr() as usize)));
    assert_eq!(d, b);
    assert_eq!(growths(&heap), before, "Reuse should not grow the heap.");

    assert_ne!(a, c);
    assert_consistent(&heap);
}

#[test]
fn test_large_request_grows_once() {
    let mut heap = heap(64 * 1024);
    let before = growths(&heap);

    let size = CHUNK_SIZE * 2;
    let asize = place::adjust_size(size).unwrap();
    let p = heap.allocate(size).unwrap();

    assert_eq!(growths(&heap), before + 1);
    assert!(*heap.grower().requests.last().unwrap() >= asize);
    assert_eq!(block_size(p), asize);

    // The grown block merged with the initial chunk; what's left is one free block.
    let report = assert_consistent(&heap);
    assert_eq!(report.free_blocks, 1);
    assert_eq!(report.free_bytes, CHUNK_SIZE);
    assert!(report.free_bytes >= MIN_BLOCK_SIZE);

    let remainder = unsafe { Block::from_node(heap.freelist().head().unwrap()) };
    unsafe {
        assert_eq!(remainder, Block::from_payload(p).next());
        assert!((*remainder.node()).prev.is_null());
        assert!((*remainder.node()).next.is_null());
    }
}

#[test]
fn test_coalesce_with_next() {
    let mut heap = heap(64 * 1024);

    let a = heap.allocate(8).unwrap();
    let b = heap.allocate(8).unwrap();
    let _fence = heap.allocate(8).unwrap();
    assert_eq!(unsafe { Block::from_payload(a).next().payload() }, b);

    unsafe {
        heap.free(b.as_ptr());
        heap.free(a.as_ptr());
    }

    let report = assert_consistent(&heap);
    assert_eq!(report.free_blocks, 2);
    let merged = Block::from_payload(a);
    unsafe {
        assert!(!merged.is_allocated());
        assert_eq!(merged.size(), 2 * MIN_BLOCK_SIZE);
        assert_eq!(merged.footer(), merged.header());
    }
}

#[test]
fn test_coalesce_with_prev() {
    let mut heap = heap(64 * 1024);

    let a = heap.allocate(8).unwrap();
    let b = heap.allocate(8).unwrap();
    let _fence = heap.allocate(8).unwrap();

    unsafe {
        heap.free(a.as_ptr());
        heap.free(b.as_ptr());
    }

    let report = assert_consistent(&heap);
    assert_eq!(report.free_blocks, 2);
    let merged = Block::from_payload(a);
    unsafe {
        assert_eq!(merged.size(), 2 * MIN_BLOCK_SIZE);
        assert_eq!(
            heap.freelist().head().unwrap().as_ptr().cast::<u8>(),
            a.as_ptr(),
            "The merged block should take the address of the previous block."
        );
    }
}

#[test]
fn test_coalesce_both() {
    let mut heap = heap(64 * 1024);

    let a = heap.allocate(8).unwrap();
    let b = heap.allocate(24).unwrap();
    let c = heap.allocate(8).unwrap();
    let _fence = heap.allocate(8).unwrap();
    let sizes = block_size(a) + block_size(b) + block_size(c);

    unsafe {
        heap.free(a.as_ptr());
        heap.free(c.as_ptr());
        assert_eq!(assert_consistent(&heap).free_blocks, 3);
        heap.free(b.as_ptr());
    }

    let report = assert_consistent(&heap);
    assert_eq!(report.free_blocks, 2);
    assert_eq!(report.freelist_len, 2);
    assert_eq!(block_size(a), sizes);
}

#[test]
fn test_coalesce_into_tail() {
    let mut heap = heap(64 * 1024);
    let free_before = assert_consistent(&heap).free_bytes;

    let a = heap.allocate(100).unwrap();
    let b = heap.allocate(200).unwrap();
    unsafe {
        heap.free(a.as_ptr());
        heap.free(b.as_ptr());
    }

    let report = assert_consistent(&heap);
    assert_eq!(report.free_blocks, 1);
    assert_eq!(report.free_bytes, free_before);
}

#[test]
fn test_round_trip() {
    let mut heap = heap(64 * 1024);

    for n in [1, 8, 17, 100, 1000, 4000] {
        let free_before = assert_consistent(&heap).free_bytes;
        let p = heap.allocate(n).unwrap();
        unsafe { heap.free(p.as_ptr()) };
        assert_eq!(assert_consistent(&heap).free_bytes, free_before);

        let before = growths(&heap);
        for m in [1, n / 2, n] {
            if m == 0 {
                continue;
            }
            let q = heap.allocate(m).unwrap();
            assert_eq!(growths(&heap), before, "allocate({m}) after allocate({n}) grew the heap.");
            unsafe { heap.free(q.as_ptr()) };
        }
    }
}

#[test]
fn test_split() {
    let mut heap = heap(64 * 1024);

    let p = heap.allocate(100).unwrap();
    let asize = place::adjust_size(100).unwrap();
    assert_eq!(block_size(p), asize);

    let report = assert_consistent(&heap);
    assert_eq!(report.free_bytes, CHUNK_SIZE - asize);
    assert_eq!(report.allocated_bytes, asize);
}

#[test]
fn test_no_split_for_small_remainder() {
    let mut heap = heap(64 * 1024);

    // A block of MIN_BLOCK_SIZE + DSIZE bytes.
    let a = heap.allocate(2 * DSIZE).unwrap();
    assert_eq!(block_size(a), MIN_BLOCK_SIZE + DSIZE);
    let _fence = heap.allocate(8).unwrap();
    unsafe { heap.free(a.as_ptr()) };

    // Splitting would leave DSIZE bytes, less than a block.
    let b = heap.allocate(8).unwrap();
    assert_eq!(b, a);
    assert_eq!(block_size(b), MIN_BLOCK_SIZE + DSIZE);
    assert_consistent(&heap);
}

#[test]
fn test_lifo_reuse() {
    let mut heap = heap(64 * 1024);

    let a = heap.allocate(64).unwrap();
    let _f1 = heap.allocate(8).unwrap();
    let b = heap.allocate(64).unwrap();
    let _f2 = heap.allocate(8).unwrap();

    unsafe {
        heap.free(a.as_ptr());
        heap.free(b.as_ptr());
    }
    assert_eq!(heap.allocate(64).unwrap(), b);
    assert_eq!(heap.allocate(64).unwrap(), a);
    assert_consistent(&heap);
}

#[test]
fn test_alignment() {
    let mut heap = heap(256 * 1024);
    let mut ptrs = vec![];
    for size in 1..300 {
        let p = heap.allocate(size).unwrap();
        assert_eq!(p.as_ptr() as usize % DSIZE, 0);
        assert!(unsafe { Block::from_payload(p).capacity() } >= size);
        ptrs.push(p);
    }
    for p in ptrs.into_iter().step_by(2) {
        unsafe { heap.free(p.as_ptr()) };
    }
    assert_consistent(&heap);
}

#[test]
fn test_zero_size() {
    let mut heap = heap(64 * 1024);
    let before = heap.check(false);
    assert!(heap.allocate(0).is_none());
    assert_eq!(heap.check(false), before);
    assert_eq!(growths(&heap), 2);
}

#[test]
fn test_free_null() {
    let mut heap = heap(64 * 1024);
    let before = heap.check(false);
    unsafe { heap.free(core::ptr::null_mut()) };
    assert_eq!(heap.check(false), before);
}

#[test]
fn test_lazy_init() {
    let mut heap = heap_with(64 * 1024, HeapConfig::DEFAULT);
    assert!(!heap.is_initialized());

    let p = heap.allocate(10).unwrap();
    assert!(heap.is_initialized());
    assert_eq!(block_size(p), MIN_BLOCK_SIZE);
    assert_consistent(&heap);
}

#[test]
fn test_reinit() {
    let mut heap = heap(64 * 1024);
    for _ in 0..10 {
        heap.allocate(1000).unwrap();
    }
    assert!(heap.grower().inner.len() > 4 * WORD_SIZE + CHUNK_SIZE);

    heap.init().unwrap();
    let report = assert_consistent(&heap);
    assert_eq!(report.blocks, 1);
    assert_eq!(report.free_bytes, CHUNK_SIZE);
    assert_eq!(heap.grower().inner.len(), 4 * WORD_SIZE + CHUNK_SIZE);
}

#[test]
fn test_out_of_space() {
    let mut heap = heap(4 * WORD_SIZE + CHUNK_SIZE);
    let before = assert_consistent(&heap);

    assert!(heap.allocate(CHUNK_SIZE).is_none());
    assert_eq!(assert_consistent(&heap), before, "A failed allocation should not touch the heap.");

    let p = heap.allocate(CHUNK_SIZE - DSIZE).unwrap();
    assert_eq!(block_size(p), CHUNK_SIZE);
    assert!(heap.allocate(1).is_none());
    unsafe { heap.free(p.as_ptr()) };
    assert_eq!(assert_consistent(&heap), before);
}

#[test]
fn test_request_too_large() {
    let mut heap = heap(64 * 1024);
    assert!(heap.allocate(usize::MAX).is_none());
    assert!(heap.allocate(isize::MAX as usize).is_none());
    assert_consistent(&heap);
}

#[test]
fn test_init_failure() {
    let mut heap = heap_with(0, HeapConfig::DEFAULT);
    assert_eq!(
        heap.init(),
        Err(AllocatorError::OutOfAddressSpace(crate::OutOfAddressSpace))
    );

    // Room for the sentinels but not for the first chunk.
    let mut heap = heap_with(4 * WORD_SIZE, HeapConfig::DEFAULT);
    assert!(heap.init().is_err());
    assert!(heap.allocate(8).is_none());
    assert_consistent(&heap);
}

#[test]
fn test_chunk_size() {
    let mut heap = heap_with(64 * 1024, HeapConfig::DEFAULT.with_chunk_size(256));
    heap.init().unwrap();
    assert_eq!(heap.config().chunk_size(), 256);
    assert_eq!(assert_consistent(&heap).free_bytes, 256);

    // 256 bytes fit four 64 byte blocks; the fifth needs another chunk.
    let ptrs: Vec<_> = (0..5).map(|_| heap.allocate(64 - DSIZE).unwrap()).collect();
    assert_eq!(heap.grower().requests, vec![4 * WORD_SIZE, 256, 256]);
    for p in ptrs {
        unsafe { heap.free(p.as_ptr()) };
    }
    let report = assert_consistent(&heap);
    assert_eq!(report.free_blocks, 1);
    assert_eq!(report.free_bytes, 512);
}

#[test]
fn test_reallocate_grow() {
    let mut heap = heap(64 * 1024);

    let p = heap.allocate(100).unwrap();
    let capacity = unsafe { Block::from_payload(p).capacity() };
    unsafe {
        for i in 0..capacity {
            *p.as_ptr().add(i) = i as u8;
        }
        let q = heap.reallocate(p.as_ptr(), 1000).unwrap();
        for i in 0..capacity {
            assert_eq!(*q.as_ptr().add(i), i as u8);
        }
        assert!(Block::from_payload(q).capacity() >= 1000);
        heap.free(q.as_ptr());
    }
    let report = assert_consistent(&heap);
    assert_eq!(report.allocated_bytes, 0);
}

#[test]
fn test_reallocate_shrink() {
    let mut heap = heap(64 * 1024);

    let p = heap.allocate(500).unwrap();
    unsafe {
        p.as_ptr().write_bytes(0x5A, 500);
        let q = heap.reallocate(p.as_ptr(), 20).unwrap();
        assert!((0..20).all(|i| *q.as_ptr().add(i) == 0x5A));
        assert_eq!(block_size(q), place::adjust_size(20).unwrap());
    }
    assert_consistent(&heap);
}

#[test]
fn test_reallocate_null_and_zero() {
    let mut heap = heap(64 * 1024);

    let p = unsafe { heap.reallocate(core::ptr::null_mut(), 40) }.unwrap();
    assert_eq!(block_size(p), place::adjust_size(40).unwrap());
    assert_eq!(assert_consistent(&heap).allocated_bytes, block_size(p));

    assert!(unsafe { heap.reallocate(p.as_ptr(), 0) }.is_none());
    let report = assert_consistent(&heap);
    assert_eq!(report.allocated_bytes, 0);
    assert_eq!(report.free_blocks, 1);
}

#[test]
fn test_reallocate_failure_keeps_block() {
    let mut heap = heap(4 * WORD_SIZE + CHUNK_SIZE);

    let p = heap.allocate(64).unwrap();
    unsafe { p.as_ptr().write_bytes(0xC3, 64) };
    let before = assert_consistent(&heap);

    assert!(unsafe { heap.reallocate(p.as_ptr(), CHUNK_SIZE) }.is_none());
    assert_eq!(assert_consistent(&heap), before);
    unsafe {
        assert!(Block::from_payload(p).is_allocated());
        assert!((0..64).all(|i| *p.as_ptr().add(i) == 0xC3));
        heap.free(p.as_ptr());
    }
    assert_eq!(assert_consistent(&heap).allocated_bytes, 0);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "Double free")]
fn test_double_free() {
    let mut heap = heap(64 * 1024);
    let a = heap.allocate(8).unwrap();
    let _fence = heap.allocate(8).unwrap();
    unsafe {
        heap.free(a.as_ptr());
        heap.free(a.as_ptr());
    }
}

#[test]
fn test_independent_heaps() {
    let mut first = heap(64 * 1024);
    let mut second = heap(64 * 1024);

    let a = first.allocate(128).unwrap();
    let b = second.allocate(128).unwrap();
    assert_ne!(a, b);
    unsafe {
        a.as_ptr().write_bytes(1, 128);
        b.as_ptr().write_bytes(2, 128);
        first.free(a.as_ptr());
    }
    assert_eq!(unsafe { *b.as_ptr() }, 2);
    assert_eq!(assert_consistent(&first).allocated_bytes, 0);
    assert_eq!(assert_consistent(&second).allocated_bytes, block_size(b));
}

#[test]
fn test_verbose_check() {
    let mut heap = heap(64 * 1024);
    let _a = heap.allocate(8).unwrap();
    let b = heap.allocate(8).unwrap();
    let _c = heap.allocate(8).unwrap();
    unsafe { heap.free(b.as_ptr()) };
    let report = heap.check(true);
    assert!(report.is_consistent());
    assert_eq!(report.blocks, 4);
    assert_eq!(report.free_blocks, 2);
}
