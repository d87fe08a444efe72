// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Head/bulk/tail split of a physical range for mixed 4 KiB / 2 MiB acceptance.
//!
//! ```text
//!   start ─┬──────────────┐  head: up to the next 2 MiB boundary, 4 KiB pages
//!          ├──────────────┤  <- 2 MiB aligned
//!          │     bulk     │  multiple of 2 MiB, accepted in parallel
//!          ├──────────────┤
//!   end  ──┴──────────────┘  tail: < 2 MiB, 4 KiB pages
//! ```

use super::{AcceptedRange, PageLevel, SIZE_2M, align_down, is_aligned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Partition {
    pub head: Option<AcceptedRange>,
    pub bulk: Option<AcceptedRange>,
    pub tail: Option<AcceptedRange>,
}

impl Partition {
    /// Sub-ranges in the order they are driven: bulk, head, tail.
    pub fn rounds(&self) -> impl Iterator<Item = AcceptedRange> {
        [self.bulk, self.head, self.tail].into_iter().flatten()
    }

    fn single(start: u64, length: u64) -> Self {
        Partition {
            bulk: Some(AcceptedRange {
                start,
                length,
                level: PageLevel::Size4K,
            }),
            ..Default::default()
        }
    }
}

fn small(start: u64, length: u64) -> Option<AcceptedRange> {
    (length != 0).then_some(AcceptedRange {
        start,
        length,
        level: PageLevel::Size4K,
    })
}

/// Splits `[start, end)` according to `policy`.
///
/// An empty or inverted input yields an empty partition.
pub fn partition(start: u64, end: u64, policy: PageLevel) -> Partition {
    if end <= start {
        return Partition::default();
    }
    let total = end - start;

    if policy == PageLevel::Size4K || total <= SIZE_2M {
        return Partition::single(start, total);
    }

    if is_aligned(start, SIZE_2M) {
        let bulk_len = align_down(total, SIZE_2M);
        return Partition {
            head: None,
            bulk: Some(AcceptedRange {
                start,
                length: bulk_len,
                level: PageLevel::Size2M,
            }),
            tail: small(start + bulk_len, total - bulk_len),
        };
    }

    // total > 2 MiB, so the boundary lies strictly inside the range.
    let head_len = SIZE_2M - (start & (SIZE_2M - 1));
    let rest = total - head_len;
    if rest < SIZE_2M {
        return Partition::single(start, total);
    }

    let bulk_start = start + head_len;
    let bulk_len = align_down(rest, SIZE_2M);
    Partition {
        head: small(start, head_len),
        bulk: Some(AcceptedRange {
            start: bulk_start,
            length: bulk_len,
            level: PageLevel::Size2M,
        }),
        tail: small(bulk_start + bulk_len, rest - bulk_len),
    }
}
