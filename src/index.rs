//! The two-level segregated size index: first- and second-level bitmaps
//! plus the per-class free-list heads.
use core::{hint::unreachable_unchecked, mem, ptr::NonNull};

use crate::{
    block::{FreeBlockHdr, GRANULARITY, GRANULARITY_LOG2},
    int::BinInteger,
};

const USIZE_BITS: u32 = mem::size_of::<usize>() as u32 * 8;

#[cfg_attr(doc, svgbobdoc::transform)]
/// The first- and second-level free-list bitmaps and list heads.
///
/// `FL_COUNT`/`SL_COUNT` are the design document's `FL_COUNT`/`SL_COUNT`;
/// `SL_COUNT` must be a power of two. `FLBitmap`/`SLBitmap` must carry at
/// least `FL_COUNT`/`SL_COUNT` bits respectively.
///
/// # Layout Overview
///
/// <center>
/// ```svgbob
///   First level
///                                                                       FL_COUNT = 8
///                               ,-----+-----+-----+-----+-----+-----+-----+-----,
///         fl_bitmap: FLBitmap = |  0  |  0  |  0  |  1  |  0  |  0  |  0  |  0  |
///                               +-----+-----+-----+-----+-----+-----+-----+-----+
///                      min size | 2¹¹ | 2¹⁰ |  2⁹ |  2⁸ |  2⁷ |  2⁶ |  2⁵ |  2⁴ |
///                               '-----+-----+-----+--+--+-----+-----+-----+-----'
///                                                    |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Second Level                                     |
///                                                    v                      SL_COUNT = 4
///                                  ,-----+-----+-----+-----,
///          "sl_bitmap[4]: SLBitmap"= | 0 |  1  |  0  |  0  |
///                                  +-----+-----+-----+-----+
///               min size 2⁸(1+n/4) |  3  |  2  |  1  |  0  |
///                                  +-----+-----+-----+-----+
///                       heads[4] |     |  O  |     |     |
///                                  '-----+--|--+-----+-----'
///                                          |
///                                          |  size = 416..448
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Free blocks                            |
///               ,----------------------------'
///               | ,---+---+-------,    ,---+---+-------,
///               '-+>O | O-+-------+----+>O |   |       |
///                 +---+---'       |    +---+---'       |
///                 |               |    |               |
///                 '---------------'    '---------------'
///                     416 bytes            432 bytes
/// ```
/// </center>
#[derive(Debug)]
pub(crate) struct TwoLevelIndex<FLBitmap, SLBitmap, const FL_COUNT: usize, const SL_COUNT: usize> {
    fl_bitmap: FLBitmap,
    sl_bitmap: [SLBitmap; FL_COUNT],
    heads: [[Option<NonNull<FreeBlockHdr>>; SL_COUNT]; FL_COUNT],
}

impl<FLBitmap: BinInteger, SLBitmap: BinInteger, const FL_COUNT: usize, const SL_COUNT: usize>
    TwoLevelIndex<FLBitmap, SLBitmap, FL_COUNT, SL_COUNT>
{
    pub const INIT: Self = {
        if FL_COUNT == 0 {
            panic!("FL_COUNT must not be zero");
        }
        if SL_COUNT == 0 || !SL_COUNT.is_power_of_two() {
            panic!("SL_COUNT must be a nonzero power of two");
        }
        if (FLBitmap::BITS as usize) < FL_COUNT {
            panic!("FLBitmap does not carry FL_COUNT bits");
        }
        if (SLBitmap::BITS as usize) < SL_COUNT {
            panic!("SLBitmap does not carry SL_COUNT bits");
        }
        Self {
            fl_bitmap: FLBitmap::ZERO,
            sl_bitmap: [SLBitmap::ZERO; FL_COUNT],
            heads: [[None; SL_COUNT]; FL_COUNT],
        }
    };

    /// `SL_COUNT.log2()`.
    const SLI: u32 = SL_COUNT.trailing_zeros();

    /// The largest block size representable by this index's top class,
    /// or `None` if the class count exceeds what `usize` can address.
    pub const MAX_POOL_SIZE: Option<usize> = {
        let shift = GRANULARITY_LOG2 + FL_COUNT as u32;
        if shift < USIZE_BITS {
            Some((1 << shift) - GRANULARITY)
        } else if shift == USIZE_BITS {
            Some(0usize.wrapping_sub(GRANULARITY))
        } else {
            None
        }
    };

    /// The class that a free block of the given size is inserted into
    /// (rounds down to the class boundary). `size` must be a nonzero
    /// multiple of [`GRANULARITY`].
    #[inline]
    pub fn map_floor(size: usize) -> Option<(usize, usize)> {
        debug_assert!(size >= GRANULARITY);
        debug_assert_eq!(size % GRANULARITY, 0);
        let fl = USIZE_BITS - GRANULARITY_LOG2 - 1 - size.leading_zeros();

        let sl = if GRANULARITY_LOG2 < Self::SLI && fl < Self::SLI - GRANULARITY_LOG2 {
            size << ((Self::SLI - GRANULARITY_LOG2) - fl)
        } else {
            size >> (fl + GRANULARITY_LOG2 - Self::SLI)
        };

        if fl as usize >= FL_COUNT {
            return None;
        }
        Some((fl as usize, sl as usize & (SL_COUNT - 1)))
    }

    /// The smallest class every member of which is guaranteed to be `>=
    /// size` (rounds up). `size` must be a nonzero multiple of
    /// [`GRANULARITY`].
    #[inline]
    pub fn map_ceil(size: usize) -> Option<(usize, usize)> {
        debug_assert!(size >= GRANULARITY);
        debug_assert_eq!(size % GRANULARITY, 0);
        let mut fl = USIZE_BITS - GRANULARITY_LOG2 - 1 - size.leading_zeros();

        let sl = if GRANULARITY_LOG2 < Self::SLI && fl < Self::SLI - GRANULARITY_LOG2 {
            size << ((Self::SLI - GRANULARITY_LOG2) - fl)
        } else {
            let shift = fl + GRANULARITY_LOG2 - Self::SLI;
            let mut sl = size >> shift;
            // round up
            sl += (sl << shift != size) as usize;
            // carry into the next first-level class if `sl` overflowed
            fl += (sl >> (Self::SLI + 1)) as u32;
            sl
        };

        if fl as usize >= FL_COUNT {
            return None;
        }
        Some((fl as usize, sl as usize & (SL_COUNT - 1)))
    }

    /// Insert a free block into the class matching its current size.
    ///
    /// # Safety
    ///
    /// `block` must be owned by this index and not already linked into any
    /// free list. `size` must equal `block`'s size and have a
    /// corresponding class.
    #[inline]
    pub unsafe fn link(&mut self, mut block: NonNull<FreeBlockHdr>, size: usize) {
        let (fl, sl) = Self::map_floor(size).unwrap_or_else(|| unreachable_unchecked());
        let head = &mut self.heads[fl][sl];
        let old_head = mem::replace(head, Some(block));
        block.as_mut().free_next = old_head;
        block.as_mut().free_prev = None;
        if let Some(mut old_head) = old_head {
            old_head.as_mut().free_prev = Some(block);
        }

        self.fl_bitmap.set_bit(fl as u32);
        self.sl_bitmap[fl].set_bit(sl as u32);
    }

    /// Remove a free block from the class matching its current size.
    ///
    /// # Safety
    ///
    /// `block` must currently be linked into this index's free list for
    /// class `size`.
    pub unsafe fn unlink(&mut self, mut block: NonNull<FreeBlockHdr>, size: usize) {
        let next = block.as_ref().free_next;
        let prev = block.as_ref().free_prev;

        if let Some(mut next) = next {
            next.as_mut().free_prev = prev;
        }

        if let Some(mut prev) = prev {
            prev.as_mut().free_next = next;
        } else {
            let (fl, sl) = Self::map_floor(size).unwrap_or_else(|| unreachable_unchecked());
            debug_assert_eq!(self.heads[fl][sl], Some(block));
            self.heads[fl][sl] = next;

            if next.is_none() {
                self.sl_bitmap[fl].clear_bit(sl as u32);
                if self.sl_bitmap[fl] == SLBitmap::ZERO {
                    self.fl_bitmap.clear_bit(fl as u32);
                }
            }
        }
    }

    /// Unlink the head of class `(fl, sl)` without touching its
    /// `free_prev` (the caller already knows it is `None`, as true of
    /// every list head). Returns the unlinked block.
    ///
    /// # Safety
    ///
    /// `self.heads[fl][sl]` must be `Some`.
    pub unsafe fn pop_head(&mut self, fl: usize, sl: usize) -> NonNull<FreeBlockHdr> {
        let block = self.heads[fl][sl].unwrap_or_else(|| unreachable_unchecked());
        let next = block.as_ref().free_next;
        if let Some(mut next) = next {
            next.as_mut().free_prev = None;
        }
        self.heads[fl][sl] = next;
        if next.is_none() {
            self.sl_bitmap[fl].clear_bit(sl as u32);
            if self.sl_bitmap[fl] == SLBitmap::ZERO {
                self.fl_bitmap.clear_bit(fl as u32);
            }
        }
        block
    }

    /// Find a non-empty free-list class suitable for an allocation of at
    /// least `min_size` bytes, per the §4.3 search policy: round up to the
    /// exact class via `map_ceil`, then advance within `fl` via the
    /// second-level bitmap, then across first-level classes.
    #[inline]
    pub fn search_suitable(&self, min_size: usize) -> Option<(usize, usize)> {
        let (fl, sl) = Self::map_ceil(min_size)?;

        let sl2 = self.sl_bitmap[fl].bit_scan_forward(sl as u32) as usize;
        if sl2 < SL_COUNT {
            debug_assert!(self.sl_bitmap[fl].get_bit(sl2 as u32));
            return Some((fl, sl2));
        }

        let fl2 = self.fl_bitmap.bit_scan_forward(fl as u32 + 1) as usize;
        if fl2 < FL_COUNT {
            debug_assert!(self.fl_bitmap.get_bit(fl2 as u32));
            let sl3 = self.sl_bitmap[fl2].trailing_zeros() as usize;
            debug_assert!(sl3 < SL_COUNT);
            Some((fl2, sl3))
        } else {
            None
        }
    }

    #[inline]
    pub fn head(&self, fl: usize, sl: usize) -> Option<NonNull<FreeBlockHdr>> {
        self.heads[fl][sl]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHdr;

    /// `FL_COUNT=8, SL_COUNT=4`, matching the design document's default
    /// sizing for classes small enough that `u8` bitmaps suffice.
    type Idx = TwoLevelIndex<u8, u8, 8, 4>;

    fn dummy_block() -> NonNull<FreeBlockHdr> {
        let boxed = std::boxed::Box::new(FreeBlockHdr {
            common: BlockHdr { size: 0, phys_prev: None },
            free_next: None,
            free_prev: None,
        });
        NonNull::new(std::boxed::Box::into_raw(boxed)).unwrap()
    }

    #[test]
    fn map_floor_exact_hits() {
        assert_eq!(Idx::map_floor(32), Some((0, 0)));
        assert_eq!(Idx::map_floor(64), Some((1, 0)));
        assert_eq!(Idx::map_floor(96), Some((1, 2)));
        assert_eq!(Idx::map_floor(128), Some((2, 0)));
        assert_eq!(Idx::map_floor(160), Some((2, 1)));
    }

    #[test]
    fn map_ceil_matches_floor_on_exact_class_boundaries() {
        // 256 lands exactly on its second-level class's lower boundary, so
        // rounding up changes nothing.
        assert_eq!(Idx::map_floor(256), Some((3, 0)));
        assert_eq!(Idx::map_ceil(256), Some((3, 0)));
    }

    #[test]
    fn map_ceil_rounds_up_to_the_next_class() {
        // 288 falls strictly inside class (3, 0)'s range; map_floor
        // truncates down to it, but map_ceil must round up to the next
        // second-level class so that every block it returns actually
        // satisfies a request for 288 bytes.
        assert_eq!(Idx::map_floor(288), Some((3, 0)));
        assert_eq!(Idx::map_ceil(288), Some((3, 1)));
    }

    #[test]
    fn map_floor_respects_fl_count() {
        let max = Idx::MAX_POOL_SIZE.unwrap();
        assert!(Idx::map_floor(max).is_some());
        assert_eq!(Idx::map_floor(max + GRANULARITY), None);
    }

    #[test]
    fn search_suitable_scans_within_first_level_before_crossing_classes() {
        let mut idx = Idx::INIT;

        // Undersized for a 288-byte request, even though it's in the class
        // `map_ceil(288)` would otherwise point at.
        let small = dummy_block();
        unsafe { idx.link(small, 256) };

        // Big enough, and in the same first-level class as the request.
        let same_fl = dummy_block();
        unsafe { idx.link(same_fl, 320) };

        assert_eq!(idx.search_suitable(288), Some((3, 1)));

        unsafe { idx.unlink(same_fl, 320) };

        // With the same-class candidate gone, the search must cross into
        // the next non-empty first-level class rather than settle for the
        // undersized block still sitting in (3, 0).
        let higher_fl = dummy_block();
        unsafe { idx.link(higher_fl, 512) };

        assert_eq!(idx.search_suitable(288), Some((4, 0)));

        unsafe { idx.unlink(higher_fl, 512) };
        unsafe { idx.unlink(small, 256) };
        unsafe {
            drop(std::boxed::Box::from_raw(small.as_ptr()));
            drop(std::boxed::Box::from_raw(same_fl.as_ptr()));
            drop(std::boxed::Box::from_raw(higher_fl.as_ptr()));
        }
    }

    #[test]
    fn search_suitable_is_none_when_no_class_qualifies() {
        let idx = Idx::INIT;
        assert_eq!(idx.search_suitable(GRANULARITY), None);
    }
}
