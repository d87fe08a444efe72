// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
pub mod accept;
pub mod partition;

use x86_64::structures::paging::{PageSize, Size2MiB, Size4KiB};

pub const SIZE_4K: u64 = Size4KiB::SIZE;
pub const SIZE_2M: u64 = Size2MiB::SIZE;
pub const SIZE_4G: u64 = 0x1_0000_0000;

/// Granularity of one accept call, encoded as the TDX page level.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLevel {
    Size4K = 0,
    Size2M = 1,
}

impl PageLevel {
    pub const fn bytes(self) -> u64 {
        match self {
            PageLevel::Size4K => SIZE_4K,
            PageLevel::Size2M => SIZE_2M,
        }
    }

    pub const fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(PageLevel::Size4K),
            1 => Some(PageLevel::Size2M),
            _ => None,
        }
    }
}

/// A contiguous physical range tagged with the page size used to accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedRange {
    pub start: u64,
    pub length: u64,
    pub level: PageLevel,
}

impl AcceptedRange {
    pub const fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// The largest accepted system-memory region that lies wholly below 4 GiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LowRegion {
    pub start: u64,
    pub length: u64,
}

impl LowRegion {
    pub const fn end(&self) -> u64 {
        self.start + self.length
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

#[inline]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Rounds `x` up to `a`, or `None` when that would pass `u64::MAX`.
#[inline]
pub const fn align_up(x: u64, a: u64) -> Option<u64> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}

#[inline]
pub const fn is_aligned(x: u64, a: u64) -> bool {
    x & (a - 1) == 0
}
