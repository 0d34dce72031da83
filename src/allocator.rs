//! The allocator core: composes the block layer, the two-level index, and
//! the pool registry into the public `allocate`/`deallocate`/`owns` surface.
use core::ptr::NonNull;

use crate::{
    block::{round_up_to_granularity, BlockHdr, FreeBlockHdr, UsedBlockHdr, GRANULARITY, USED_HDR_SIZE},
    error::AllocError,
    index::TwoLevelIndex,
    int::BinInteger,
    pool::{PoolRegistry, PoolSource},
};

/// A TLSF allocator managing up to `MAX_POOLS` backing regions, each
/// `pool_size` bytes, acquired lazily from a [`PoolSource`].
///
/// `FL_COUNT`/`SL_COUNT` are the first-/second-level class counts;
/// `FLBitmap`/`SLBitmap` are the unsigned integer types backing their
/// respective bitmaps (see [`crate::int::BinInteger`]). The default sizing
/// named in the design document (`FL_COUNT=8, SL_COUNT=4`) fits in
/// `Allocator<S, u8, u8, 8, 4, 10>`.
#[derive(Debug)]
pub struct Allocator<
    Source: PoolSource,
    FLBitmap: BinInteger,
    SLBitmap: BinInteger,
    const FL_COUNT: usize,
    const SL_COUNT: usize,
    const MAX_POOLS: usize,
> {
    source: Source,
    pool_size: usize,
    index: TwoLevelIndex<FLBitmap, SLBitmap, FL_COUNT, SL_COUNT>,
    pools: PoolRegistry<MAX_POOLS>,
}

impl<
        Source: PoolSource,
        FLBitmap: BinInteger,
        SLBitmap: BinInteger,
        const FL_COUNT: usize,
        const SL_COUNT: usize,
        const MAX_POOLS: usize,
    > Allocator<Source, FLBitmap, SLBitmap, FL_COUNT, SL_COUNT, MAX_POOLS>
{
    /// Construct an allocator with no pools yet acquired. `pool_size` is
    /// the design document's `POOL_SIZE`: the fixed size of every pool
    /// lazily requested from `source`.
    ///
    /// # Panics
    ///
    /// Panics if `pool_size` is not a nonzero multiple of [`GRANULARITY`],
    /// or if it is too large to be represented by this index's top class.
    pub fn new(source: Source, pool_size: usize) -> Self {
        assert!(pool_size >= GRANULARITY, "pool_size must be >= GRANULARITY");
        assert_eq!(pool_size % GRANULARITY, 0, "pool_size must be a multiple of GRANULARITY");
        if let Some(max) = TwoLevelIndex::<FLBitmap, SLBitmap, FL_COUNT, SL_COUNT>::MAX_POOL_SIZE {
            assert!(pool_size <= max, "pool_size exceeds what this index can represent");
        }
        Self {
            source,
            pool_size,
            index: TwoLevelIndex::INIT,
            pools: PoolRegistry::INIT,
        }
    }

    /// The number of pools currently acquired from the source.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// True iff `ptr` lies within a pool managed by this allocator.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.pools.owns(ptr.as_ptr() as usize)
    }

    /// Allocate `n` payload bytes.
    ///
    /// `n == 0` succeeds, returning a valid pointer to a minimum-size
    /// (`GRANULARITY`-byte) block — this crate's documented resolution of
    /// the zero-size-request open question.
    ///
    /// # Time Complexity
    ///
    /// Constant, except for the rare case where a new pool must be
    /// acquired from the source (bounded by the source's own complexity).
    pub fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        let s = required_block_size(n).ok_or(AllocError::OutOfMemory)?;

        if let Some(ptr) = self.try_allocate(s) {
            log::trace!("allocate({}) = {:?}", n, ptr);
            return Ok(ptr);
        }

        self.grow_pool()?;

        let ptr = self.try_allocate(s).ok_or(AllocError::OutOfMemory)?;
        log::trace!("allocate({}) = {:?} (after pool growth)", n, ptr);
        Ok(ptr)
    }

    /// Release a block previously returned by [`Self::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by a prior call to `allocate` on this
    /// same allocator, and must not have already been deallocated.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        log::trace!("deallocate({:?})", ptr);

        let mut block =
            NonNull::new_unchecked((ptr.as_ptr() as usize - USED_HDR_SIZE) as *mut BlockHdr);
        let mut size = block.as_ref().size();
        debug_assert!(!block.as_ref().is_free(), "double free detected");

        let block_addr = block.as_ptr() as usize;

        // This tracks whichever block ends up physically following the
        // coalesced result, so its `phys_prev` can be fixed up exactly once.
        let new_next_phys_block = if let Some(next) = self.phys_next(block_addr, size) {
            if next.as_ref().is_free() {
                let next_size = next.as_ref().size();
                let after_next = self.phys_next(next.as_ptr() as usize, next_size);
                self.index.unlink(next.cast(), next_size);
                size += next_size;
                after_next
            } else {
                Some(next)
            }
        } else {
            None
        };

        if let Some(prev) = block.as_ref().phys_prev {
            if prev.as_ref().is_free() {
                let prev_size = prev.as_ref().size();
                self.index.unlink(prev.cast(), prev_size);
                size += prev_size;
                block = prev;
            }
        }

        block.as_mut().set_size_free(size);
        self.index.link(block.cast::<FreeBlockHdr>(), size);

        if let Some(mut next) = new_next_phys_block {
            next.as_mut().phys_prev = Some(block);
        }
    }

    /// Try to satisfy a request of `s` bytes (header included) from the
    /// existing free lists, without touching the pool source.
    fn try_allocate(&mut self, s: usize) -> Option<NonNull<u8>> {
        let (fl, sl) = self.index.search_suitable(s)?;
        // Safety: `search_suitable` only returns a class with a non-empty head.
        let block = unsafe { self.index.pop_head(fl, sl) };
        Some(unsafe { self.split_and_use(block, s) })
    }

    /// Turn a free block (already unlinked) into a used block of size `s`,
    /// splitting off the residue as a new free block if it is large enough
    /// to stand on its own.
    ///
    /// # Safety
    ///
    /// `block` must be a free block of size `>= s` owned by this
    /// allocator, and must not be linked into any free list.
    unsafe fn split_and_use(&mut self, block: NonNull<FreeBlockHdr>, s: usize) -> NonNull<u8> {
        let block_addr = block.as_ptr() as usize;
        let full_size = block.as_ref().common.size();
        debug_assert!(full_size >= s);
        let residue = full_size - s;

        let final_size = if residue >= GRANULARITY {
            // Split: carve the tail off as a new free block.
            let new_free_addr = block_addr + s;
            let mut new_free = NonNull::new_unchecked(new_free_addr as *mut FreeBlockHdr);

            if let Some(mut next) = self.phys_next(block_addr, full_size) {
                next.as_mut().phys_prev = Some(new_free.cast());
            }

            new_free.as_mut().common.phys_prev = Some(block.cast());
            new_free.as_mut().common.set_size_free(residue);
            self.index.link(new_free, residue);

            s
        } else {
            // Residue too small to stand alone; it becomes internal
            // fragmentation inside the used block.
            full_size
        };

        let mut used = block.cast::<UsedBlockHdr>();
        used.as_mut().common.set_size_used(final_size);
        NonNull::new_unchecked((block_addr + USED_HDR_SIZE) as *mut u8)
    }

    /// The block physically following the one at `block_addr..block_addr +
    /// block_size`, if it lies within the same pool (an O(P) bounds check
    /// against the pool registry, per the design document).
    fn phys_next(&self, block_addr: usize, block_size: usize) -> Option<NonNull<BlockHdr>> {
        let pool = self.pools.find(block_addr)?;
        let next_addr = block_addr + block_size;
        if next_addr < pool.end {
            // Safety: `next_addr` is strictly within a pool we manage, so
            // it addresses a valid block header.
            Some(unsafe { NonNull::new_unchecked(next_addr as *mut BlockHdr) })
        } else {
            None
        }
    }

    /// Acquire a new pool from the source and insert it as one maximal
    /// free block, per §4.6.
    fn grow_pool(&mut self) -> Result<(), AllocError> {
        let region = self
            .source
            .acquire_pool(self.pool_size)
            .ok_or(AllocError::OutOfMemory)?;

        // Defensively align the region to `GRANULARITY`, in case the
        // source did not already guarantee it.
        let raw_start = region.as_ptr() as *mut u8 as usize;
        let raw_len = unsafe { &*(region.as_ptr() as *const [core::mem::MaybeUninit<u8>]) }.len();
        let start = (raw_start + GRANULARITY - 1) & !(GRANULARITY - 1);
        let end = (raw_start + raw_len) & !(GRANULARITY - 1);

        if end <= start || end - start < GRANULARITY {
            return Err(AllocError::OutOfMemory);
        }

        self.pools
            .register(start, end)
            .map_err(|()| AllocError::TooManyPools)?;

        let mut block = unsafe { NonNull::new_unchecked(start as *mut FreeBlockHdr) };
        unsafe {
            block.as_mut().common.phys_prev = None;
            block.as_mut().common.set_size_free(end - start);
            self.index.link(block, end - start);
        }

        log::debug!("acquired pool #{}: [{:#x}, {:#x})", self.pools.len(), start, end);
        Ok(())
    }
}

/// `s = max(GRANULARITY, round_up(n + header_size, GRANULARITY))`, per §4.4.
#[inline]
fn required_block_size(n: usize) -> Option<usize> {
    let raw = n.checked_add(USED_HDR_SIZE)?;
    let s = round_up_to_granularity(raw)?;
    Some(s.max(GRANULARITY))
}
