//! # Memory Pool Allocator
//!
//! Grain-indexed bitmap allocator over a pre-reserved byte arena. The arena
//! is cut into grains of `2^grain_order` bytes and the grains are grouped
//! into blocks of [`GRAINS_PER_BLOCK`]. Each block keeps:
//!
//! - an occupancy bitmap (one bit per grain),
//! - an allocation-start bitmap, so `free` can recover an allocation's
//!   length from its address alone,
//! - a cached summary: first free grain, longest free run, free grain count.
//!
//! ```text
//!   arena ─┬─ block 0 ─┬─ grain 0 ... grain 255 ──┐
//!          │           └─ used / starts / summary │
//!          ├─ block 1 ...                         │ an allocation never
//!          └─ block N-1 (may be partial)          │ crosses a block edge
//! ```
//!
//! `malloc` walks the block summaries (O(blocks)) for the first block whose
//! longest free run fits the request, then does one bounded scan of that
//! block's bitmap. Both `malloc` and `free` update the summary from the run
//! they touch; only cutting into a longest run rescans for the next one.
//! `free_bytes` only reads the summaries. Worst-case latency
//! is therefore bounded by `MAX_POOL_BLOCKS + GRAINS_PER_BLOCK` steps.
//!
//! Fragmentation is tolerated: runs are never merged across blocks and the
//! pool is never compacted.

use core::marker::PhantomData;
use core::ptr::NonNull;

use heapless::Vec;

use crate::config::{GRAINS_PER_BLOCK, MAX_POOL_BLOCKS};
use crate::error::{KernelError, KernelResult};

/// Smallest supported grain order (4-byte grains).
pub const MIN_GRAIN_ORDER: u8 = 2;

/// Largest supported grain order (4 KiB grains).
pub const MAX_GRAIN_ORDER: u8 = 12;

const WORDS_PER_BLOCK: usize = GRAINS_PER_BLOCK / 32;

// ---------------------------------------------------------------------------
// Block bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Block {
    used: [u32; WORDS_PER_BLOCK],
    starts: [u32; WORDS_PER_BLOCK],
    /// Grains that exist in this block (only the last block can be short).
    grains: u16,
    /// First free grain, `grains` when the block is full.
    first_free: u16,
    /// Longest run of free grains.
    max_free: u16,
    /// Number of free grains.
    free: u16,
}

impl Block {
    fn new(grains: u16) -> Self {
        Self {
            used: [0; WORDS_PER_BLOCK],
            starts: [0; WORDS_PER_BLOCK],
            grains,
            first_free: 0,
            max_free: grains,
            free: grains,
        }
    }

    #[inline]
    fn bit(map: &[u32; WORDS_PER_BLOCK], grain: u16) -> bool {
        map[grain as usize / 32] & (1 << (grain % 32)) != 0
    }

    #[inline]
    fn put(map: &mut [u32; WORDS_PER_BLOCK], grain: u16, value: bool) {
        let mask = 1 << (grain % 32);
        if value {
            map[grain as usize / 32] |= mask;
        } else {
            map[grain as usize / 32] &= !mask;
        }
    }

    #[inline]
    fn is_used(&self, grain: u16) -> bool {
        Self::bit(&self.used, grain)
    }

    #[inline]
    fn is_start(&self, grain: u16) -> bool {
        Self::bit(&self.starts, grain)
    }

    /// First-fit search for `count` contiguous free grains.
    fn find_run(&self, count: u16) -> Option<u16> {
        let mut run_start = self.first_free;
        let mut run_len = 0;
        for grain in self.first_free..self.grains {
            if self.is_used(grain) {
                run_len = 0;
                run_start = grain + 1;
            } else {
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            }
        }
        None
    }

    /// Length in grains of the allocation starting at `start`.
    fn allocation_len(&self, start: u16) -> u16 {
        let mut len = 1;
        while start + len < self.grains
            && self.is_used(start + len)
            && !self.is_start(start + len)
        {
            len += 1;
        }
        len
    }

    fn mark(&mut self, start: u16, count: u16, used: bool) {
        for grain in start..start + count {
            Self::put(&mut self.used, grain, used);
        }
        Self::put(&mut self.starts, start, used);
    }

    /// Length of the free run that contains the free grains
    /// `start..start + count`.
    fn run_around(&self, start: u16, count: u16) -> u16 {
        let mut lo = start;
        while lo > 0 && !self.is_used(lo - 1) {
            lo -= 1;
        }
        let mut hi = start + count;
        while hi < self.grains && !self.is_used(hi) {
            hi += 1;
        }
        hi - lo
    }

    /// Mark `start..start + count` allocated and update the summary.
    fn allocate(&mut self, start: u16, count: u16) {
        let run = self.run_around(start, count);
        self.mark(start, count, true);
        self.free -= count;
        if start == self.first_free {
            let mut next = start + count;
            while next < self.grains && self.is_used(next) {
                next += 1;
            }
            self.first_free = next;
        }
        // Only cutting a longest run can shorten the longest run.
        if run == self.max_free {
            self.rescan_max_free();
        }
    }

    /// Clear `start..start + count` and update the summary.
    fn release(&mut self, start: u16, count: u16) {
        self.mark(start, count, false);
        self.free += count;
        self.first_free = self.first_free.min(start);
        self.max_free = self.max_free.max(self.run_around(start, count));
    }

    fn rescan_max_free(&mut self) {
        let mut max_free = 0;
        let mut run = 0;
        for grain in self.first_free..self.grains {
            if self.is_used(grain) {
                run = 0;
            } else {
                run += 1;
                max_free = max_free.max(run);
            }
        }
        self.max_free = max_free;
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// A bounded memory pool carved from a caller-provided arena.
///
/// The pool borrows the arena for its whole lifetime; pointers returned by
/// [`Pool::malloc`] stay valid until passed back to [`Pool::free`]. Using a
/// pointer after freeing it, or freeing it twice, is a caller error (a
/// second free of the same pointer is detected and rejected as long as the
/// grain has not been reallocated in between).
pub struct Pool<'a> {
    base: NonNull<u8>,
    /// Usable bytes, a whole number of grains.
    size: usize,
    grain_order: u8,
    blocks: Vec<Block, MAX_POOL_BLOCKS>,
    _arena: PhantomData<&'a mut [u8]>,
}

// SAFETY: the pool has exclusive access to its arena (it holds the unique
// borrow), so moving it to another context moves that exclusive access.
unsafe impl Send for Pool<'_> {}

impl<'a> Pool<'a> {
    /// Partition `arena` into grains of `2^grain_order` bytes.
    ///
    /// The start of the arena is aligned up to the grain size and any tail
    /// shorter than a grain is left unused.
    ///
    /// # Errors
    /// - [`KernelError::Range`] if the grain order is outside
    ///   `MIN_GRAIN_ORDER..=MAX_GRAIN_ORDER` or the arena needs more than
    ///   `MAX_POOL_BLOCKS` blocks.
    /// - [`KernelError::Invalid`] if the arena cannot hold a single grain.
    pub fn request(arena: &'a mut [u8], grain_order: u8) -> KernelResult<Self> {
        if !(MIN_GRAIN_ORDER..=MAX_GRAIN_ORDER).contains(&grain_order) {
            return Err(KernelError::Range);
        }
        let grain = 1usize << grain_order;
        let skip = arena.as_ptr().align_offset(grain);
        if skip >= arena.len() {
            return Err(KernelError::Invalid);
        }
        let grains = (arena.len() - skip) / grain;
        if grains == 0 {
            return Err(KernelError::Invalid);
        }
        let block_count = grains.div_ceil(GRAINS_PER_BLOCK);
        if block_count > MAX_POOL_BLOCKS {
            return Err(KernelError::Range);
        }

        let mut blocks = Vec::new();
        for index in 0..block_count {
            let in_block = (grains - index * GRAINS_PER_BLOCK).min(GRAINS_PER_BLOCK);
            blocks
                .push(Block::new(in_block as u16))
                .map_err(|_| KernelError::Range)?;
        }

        let base = arena[skip..].as_mut_ptr();
        log::debug!(
            "pool: {} grains of {} bytes in {} blocks",
            grains,
            grain,
            block_count
        );

        Ok(Self {
            // SAFETY: derived from a non-empty slice, so it is non-null.
            base: unsafe { NonNull::new_unchecked(base) },
            size: grains * grain,
            grain_order,
            blocks,
            _arena: PhantomData,
        })
    }

    /// Usable size of the pool in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Allocation granularity in bytes.
    #[inline]
    pub fn grain_size(&self) -> usize {
        1 << self.grain_order
    }

    /// Allocate `size` bytes, rounded up to a whole number of grains.
    ///
    /// Returns `None` for zero-sized requests, requests larger than one
    /// block, or when no block has a long enough free run.
    pub fn malloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let count = size.div_ceil(self.grain_size());
        if count > GRAINS_PER_BLOCK {
            return None;
        }
        let count = count as u16;

        for (index, block) in self.blocks.iter_mut().enumerate() {
            if block.max_free < count {
                continue;
            }
            if let Some(start) = block.find_run(count) {
                block.allocate(start, count);
                let offset = (index * GRAINS_PER_BLOCK + start as usize) << self.grain_order;
                // SAFETY: `offset` addresses a grain inside the arena, so the
                // resulting pointer is in bounds and non-null.
                return Some(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) });
            }
        }
        None
    }

    /// Return an allocation to the pool.
    ///
    /// # Errors
    /// [`KernelError::Invalid`] if `ptr` is outside the arena, not
    /// grain-aligned, or not the start of a live allocation.
    pub fn free(&mut self, ptr: NonNull<u8>) -> KernelResult<()> {
        let (block, start) = self.locate(ptr)?;
        let block = &mut self.blocks[block];
        if !block.is_start(start) {
            return Err(KernelError::Invalid);
        }
        let len = block.allocation_len(start);
        block.release(start, len);
        Ok(())
    }

    /// Bytes occupied by the allocation starting at `ptr`.
    pub fn allocation_size(&self, ptr: NonNull<u8>) -> KernelResult<usize> {
        let (block, start) = self.locate(ptr)?;
        let block = &self.blocks[block];
        if !block.is_start(start) {
            return Err(KernelError::Invalid);
        }
        Ok((block.allocation_len(start) as usize) << self.grain_order)
    }

    /// Total free bytes across all blocks.
    pub fn free_bytes(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| block.free as usize)
            .sum::<usize>()
            << self.grain_order
    }

    /// Size in bytes of the largest single allocation that would succeed.
    pub fn largest_free(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| block.max_free as usize)
            .max()
            .unwrap_or(0)
            << self.grain_order
    }

    /// Whether `ptr` points into this pool's arena.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= base && addr < base + self.size
    }

    /// Map a pointer to its (block, grain-within-block) position.
    fn locate(&self, ptr: NonNull<u8>) -> KernelResult<(usize, u16)> {
        if !self.contains(ptr) {
            return Err(KernelError::Invalid);
        }
        let offset = ptr.as_ptr() as usize - self.base.as_ptr() as usize;
        if offset & (self.grain_size() - 1) != 0 {
            return Err(KernelError::Invalid);
        }
        let grain = offset >> self.grain_order;
        Ok((grain / GRAINS_PER_BLOCK, (grain % GRAINS_PER_BLOCK) as u16))
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(16))]
    struct Arena<const N: usize>([u8; N]);

    impl<const N: usize> Arena<N> {
        fn new() -> Self {
            Arena([0; N])
        }
    }

    #[test]
    fn test_malloc_rounds_to_grains() {
        let mut arena = Arena::<10240>::new();
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        assert_eq!(pool.size(), 10240);
        assert_eq!(pool.free_bytes(), 10240);

        let p = pool.malloc(200).expect("allocation should succeed");
        assert_eq!(pool.free_bytes(), 10240 - 208);
        assert_eq!(pool.allocation_size(p).unwrap(), 208);

        pool.free(p).unwrap();
        assert_eq!(pool.free_bytes(), 10240);
    }

    #[test]
    fn test_interleaved_round_trip() {
        let mut arena = Arena::<8192>::new();
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        let before = pool.free_bytes();

        let a = pool.malloc(100).unwrap();
        let b = pool.malloc(17).unwrap();
        let c = pool.malloc(1000).unwrap();
        pool.free(b).unwrap();
        let d = pool.malloc(16).unwrap();
        pool.free(a).unwrap();
        let e = pool.malloc(33).unwrap();
        pool.free(c).unwrap();
        pool.free(d).unwrap();
        pool.free(e).unwrap();

        assert_eq!(pool.free_bytes(), before);
        assert_eq!(pool.largest_free(), GRAINS_PER_BLOCK * 16);
    }

    #[test]
    fn test_adjacent_allocations_free_independently() {
        let mut arena = Arena::<4096>::new();
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        let a = pool.malloc(32).unwrap();
        let b = pool.malloc(32).unwrap();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 32);

        pool.free(a).unwrap();
        assert_eq!(pool.allocation_size(b).unwrap(), 32);
        assert_eq!(pool.free_bytes(), 4096 - 32);

        // The freed run is reused first.
        let c = pool.malloc(16).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_partial_last_block() {
        // 640 grains: two full blocks and one block of 128 grains.
        let mut arena = Arena::<10240>::new();
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        let block_bytes = GRAINS_PER_BLOCK * 16;
        assert_eq!(pool.largest_free(), block_bytes);

        assert!(pool.malloc(block_bytes).is_some());
        assert!(pool.malloc(block_bytes).is_some());
        assert!(pool.malloc(block_bytes).is_none());
        assert!(pool.malloc(2048).is_some());
        assert_eq!(pool.free_bytes(), 0);
        assert!(pool.malloc(1).is_none());
    }

    #[test]
    fn test_no_cross_block_allocation() {
        let mut arena = Arena::<8192>::new();
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        assert!(pool.malloc(GRAINS_PER_BLOCK * 16 + 1).is_none());
        assert!(pool.malloc(0).is_none());

        // Leave 2 KiB free at the end of block 0 and 2 KiB at the start of
        // block 1: 4 KiB free in total, but not contiguous within a block.
        let _a = pool.malloc(2048).unwrap();
        let b = pool.malloc(2048).unwrap();
        let c = pool.malloc(2048).unwrap();
        let _d = pool.malloc(2048).unwrap();
        pool.free(b).unwrap();
        pool.free(c).unwrap();
        assert_eq!(pool.free_bytes(), 4096);
        assert!(pool.malloc(4096).is_none());
        assert!(pool.malloc(2048).is_some());
    }

    #[test]
    fn test_free_rejects_bad_pointers() {
        let mut arena = Arena::<1024>::new();
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        let p = pool.malloc(64).unwrap();

        let misaligned = NonNull::new(unsafe { p.as_ptr().add(1) }).unwrap();
        assert_eq!(pool.free(misaligned), Err(KernelError::Invalid));

        let interior = NonNull::new(unsafe { p.as_ptr().add(16) }).unwrap();
        assert_eq!(pool.free(interior), Err(KernelError::Invalid));

        let mut other = [0u8; 16];
        let foreign = NonNull::new(other.as_mut_ptr()).unwrap();
        assert_eq!(pool.free(foreign), Err(KernelError::Invalid));

        pool.free(p).unwrap();
        assert_eq!(pool.free(p), Err(KernelError::Invalid));
        assert_eq!(pool.free_bytes(), 1024);
    }

    #[test]
    fn test_request_validation() {
        let mut arena = Arena::<64>::new();
        assert!(matches!(Pool::request(&mut arena.0, 1), Err(KernelError::Range)));
        assert!(matches!(Pool::request(&mut arena.0, 13), Err(KernelError::Range)));
        assert!(matches!(Pool::request(&mut arena.0, 7), Err(KernelError::Invalid)));

        let mut tiny = Arena::<8>::new();
        assert!(matches!(Pool::request(&mut tiny.0, 4), Err(KernelError::Invalid)));
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let mut arena = Arena::<1024>::new();
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        let mut held = [None; 64];
        for slot in held.iter_mut() {
            *slot = pool.malloc(16);
            assert!(slot.is_some());
        }
        assert!(pool.malloc(16).is_none());
        for p in held.iter().flatten() {
            pool.free(*p).unwrap();
        }
        assert_eq!(pool.free_bytes(), 1024);
        assert_eq!(pool.largest_free(), 1024);
    }

    /// Summary rebuilt from the bitmap: (first free, longest run, free).
    fn scanned_summary(block: &Block) -> (u16, u16, u16) {
        let (mut first, mut longest, mut run, mut free) = (block.grains, 0, 0, 0);
        for grain in 0..block.grains {
            if block.is_used(grain) {
                run = 0;
            } else {
                first = first.min(grain);
                run += 1;
                free += 1;
                longest = longest.max(run);
            }
        }
        (first, longest, free)
    }

    #[test]
    fn test_cached_summary_tracks_bitmap() {
        let mut arena = Arena::<4096>::new();
        let mut pool = Pool::request(&mut arena.0, 4).unwrap();
        fn check(pool: &Pool<'_>) {
            let block = &pool.blocks[0];
            assert_eq!(
                (block.first_free, block.max_free, block.free),
                scanned_summary(block)
            );
        }

        let a = pool.malloc(64).unwrap();
        let b = pool.malloc(16).unwrap();
        let c = pool.malloc(512).unwrap();
        let d = pool.malloc(48).unwrap();
        check(&pool);
        pool.free(b).unwrap();
        check(&pool);
        pool.free(c).unwrap();
        check(&pool);
        let e = pool.malloc(8).unwrap();
        check(&pool);
        pool.free(a).unwrap();
        check(&pool);
        // Merges with the free runs on both sides.
        pool.free(e).unwrap();
        check(&pool);
        let f = pool.malloc(37 * 16).unwrap();
        let g = pool.malloc(216 * 16).unwrap();
        check(&pool);
        assert_eq!(pool.blocks[0].first_free, pool.blocks[0].grains);
        pool.free(d).unwrap();
        pool.free(f).unwrap();
        pool.free(g).unwrap();
        check(&pool);
        assert_eq!(pool.largest_free(), 4096);
    }
}
