// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Splits the accepted low region into the relocated mailbox, the output
//! list area and the heap.
//!
//! The low region comes from the VMM's list, so it may cover pages the
//! firmware is still using. Those are passed in as reserved ranges and the
//! pool is cut from the largest gap between them.

use linked_list_allocator::{Heap, LockedHeap};
use log::{debug, error, info};

use crate::error::BootError;
use crate::mem::{LowRegion, SIZE_4K, align_down, align_up};
use crate::mp::MAILBOX_SIZE;

/// Pages reserved for the rebuilt handoff list.
pub const HOB_AREA_PAGES: u64 = 16;

/// Smallest heap worth bringing up.
pub const MIN_HEAP_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwarePool {
    /// Pages the secondary units move to before handoff.
    pub mailbox: LowRegion,
    pub hob_area: LowRegion,
    pub heap: LowRegion,
}

fn overlaps(start: u64, end: u64, (base, length): (u64, u64)) -> bool {
    length != 0 && start < base.saturating_add(length) && base < end
}

/// Largest page-aligned stretch of `low` that touches none of `reserved`.
fn largest_gap(low: LowRegion, reserved: &[(u64, u64)]) -> LowRegion {
    let mut best = LowRegion::default();
    let starts = core::iter::once(low.start).chain(
        reserved
            .iter()
            .filter_map(|&(base, length)| align_up(base.saturating_add(length), SIZE_4K)),
    );
    for start in starts {
        if start < low.start || start >= low.end() {
            continue;
        }
        if reserved.iter().any(|&r| overlaps(start, start + 1, r)) {
            continue;
        }
        let end = reserved
            .iter()
            .filter(|r| r.1 != 0 && r.0 > start)
            .map(|r| align_down(r.0, SIZE_4K))
            .fold(low.end(), u64::min);
        if end - start > best.length {
            best = LowRegion {
                start,
                length: end - start,
            };
        }
    }
    best
}

impl FirmwarePool {
    /// Carves the pool out of `low`, which the processor guarantees to be
    /// page aligned, while staying clear of every `(base, length)` range in
    /// `reserved`.
    pub fn carve(
        low: LowRegion,
        hob_pages: u64,
        reserved: &[(u64, u64)],
    ) -> Result<Self, BootError> {
        let fixed = MAILBOX_SIZE as u64 + hob_pages * SIZE_4K;
        let needed = fixed + MIN_HEAP_SIZE;
        if low.length < needed {
            error!(
                "[pool] low region [{:#x}, +{:#x}) cannot hold {} list pages and a heap",
                low.start, low.length, hob_pages
            );
            return Err(BootError::PoolTooSmall {
                start: low.start,
                length: low.length,
            });
        }

        let gap = largest_gap(low, reserved);
        debug!("[pool] largest free gap [{:#x}, +{:#x})", gap.start, gap.length);
        if gap.length < needed {
            error!(
                "[pool] firmware ranges leave at most {:#x} free bytes in [{:#x}, +{:#x})",
                gap.length, low.start, low.length
            );
            return Err(BootError::PoolReserved {
                start: low.start,
                length: low.length,
            });
        }

        let pool = FirmwarePool {
            mailbox: LowRegion {
                start: gap.start,
                length: MAILBOX_SIZE as u64,
            },
            hob_area: LowRegion {
                start: gap.start + MAILBOX_SIZE as u64,
                length: hob_pages * SIZE_4K,
            },
            heap: LowRegion {
                start: gap.start + fixed,
                length: gap.length - fixed,
            },
        };
        info!(
            "[pool] mailbox {:#x}, list area {:#x}, heap [{:#x}, +{:#x})",
            pool.mailbox.start, pool.hob_area.start, pool.heap.start, pool.heap.length
        );
        Ok(pool)
    }
}

/// Hands `region` to `heap`.
///
/// # Safety
/// `region` must be accepted, identity mapped, unused by anything else, and
/// `heap` must still be empty.
pub unsafe fn init_heap(heap: &LockedHeap, region: LowRegion) {
    unsafe { init_raw(&mut heap.lock(), region) }
}

unsafe fn init_raw(heap: &mut Heap, region: LowRegion) {
    unsafe { heap.init(region.start as *mut u8, region.length as usize) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::alloc::Layout;

    const MAILBOX: (u64, u64) = (0x80_0000, MAILBOX_SIZE as u64);
    const INPUT_LIST: (u64, u64) = (0x80_9000, 0x2000);

    fn clear_of(pool: &FirmwarePool, reserved: &[(u64, u64)]) -> bool {
        [pool.mailbox, pool.hob_area, pool.heap]
            .iter()
            .all(|p| !reserved.iter().any(|&r| overlaps(p.start, p.end(), r)))
    }

    #[test]
    fn carve_lays_out_mailbox_list_area_and_heap() {
        let low = LowRegion {
            start: 0x1000,
            length: 0x1F_F000,
        };
        let pool = FirmwarePool::carve(low, HOB_AREA_PAGES, &[]).unwrap();
        assert_eq!(pool.mailbox.start, 0x1000);
        assert_eq!(pool.mailbox.length, MAILBOX_SIZE as u64);
        assert_eq!(pool.hob_area.start, 0x3000);
        assert_eq!(pool.hob_area.length, 0x1_0000);
        assert_eq!(pool.heap.start, 0x1_3000);
        assert_eq!(pool.heap.end(), low.end());
    }

    #[test]
    fn region_over_the_boot_pages_avoids_them() {
        let low = LowRegion {
            start: 0x80_0000,
            length: 0x8000_0000,
        };
        let reserved = [MAILBOX, INPUT_LIST];
        let pool = FirmwarePool::carve(low, HOB_AREA_PAGES, &reserved).unwrap();
        assert!(clear_of(&pool, &reserved));
        // The gap after the input list is the largest one.
        assert_eq!(pool.mailbox.start, 0x80_B000);
        assert_eq!(pool.heap.end(), low.end());
        assert_eq!(pool.mailbox.start % SIZE_4K, 0);
    }

    #[test]
    fn unaligned_reservations_round_outwards() {
        let low = LowRegion {
            start: 0x10_0000,
            length: 0x40_0000,
        };
        let reserved = [(0x10_0000, 0x800), (0x28_0010, 0x10)];
        let pool = FirmwarePool::carve(low, HOB_AREA_PAGES, &reserved).unwrap();
        assert!(clear_of(&pool, &reserved));
        assert_eq!(pool.mailbox.start, 0x28_1000);
        assert_eq!(pool.heap.end(), low.end());
    }

    #[test]
    fn small_region_is_refused() {
        let low = LowRegion {
            start: 0x1000,
            length: HOB_AREA_PAGES * SIZE_4K,
        };
        assert_eq!(
            FirmwarePool::carve(low, HOB_AREA_PAGES, &[]),
            Err(BootError::PoolTooSmall {
                start: 0x1000,
                length: HOB_AREA_PAGES * SIZE_4K
            })
        );
    }

    #[test]
    fn fragmented_region_is_refused() {
        let low = LowRegion {
            start: 0x80_0000,
            length: 0x4_0000,
        };
        let reserved = [MAILBOX, (0x82_0000, 0x1000)];
        assert_eq!(
            FirmwarePool::carve(low, HOB_AREA_PAGES, &reserved),
            Err(BootError::PoolReserved {
                start: 0x80_0000,
                length: 0x4_0000
            })
        );
    }

    #[test]
    fn heap_serves_from_the_region() {
        let mut backing = vec![0u64; 0x2000];
        let start = backing.as_mut_ptr() as u64;
        let region = LowRegion {
            start,
            length: (backing.len() * 8) as u64,
        };
        let mut heap = Heap::empty();
        unsafe { init_raw(&mut heap, region) };
        let p = heap
            .allocate_first_fit(Layout::from_size_align(256, 16).unwrap())
            .unwrap();
        let addr = p.as_ptr() as u64;
        assert!(addr >= region.start && addr + 256 <= region.end());
        assert_eq!(heap.size(), region.length as usize);
        unsafe { heap.deallocate(p, Layout::from_size_align(256, 16).unwrap()) };
    }
}
