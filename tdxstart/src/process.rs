// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Budgeted acceptance over a validated list.

use log::{debug, error, info};

use crate::context::BootContext;
use crate::error::BootError;
use crate::hob::{HobList, Record};
use crate::mem::accept::{AcceptPrimitive, accept_range};
use crate::mem::{LowRegion, SIZE_4G, SIZE_4K};

/// Running totals of one processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootAccumulator {
    pub accepted: u64,
    pub budget: u64,
    /// Largest accepted region wholly below 4 GiB, with a non-zero base.
    pub low_region: LowRegion,
}

impl BootAccumulator {
    pub fn new(budget: u64) -> Self {
        BootAccumulator {
            accepted: 0,
            budget,
            low_region: LowRegion::default(),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.budget.saturating_sub(self.accepted)
    }

    pub fn exhausted(&self) -> bool {
        self.accepted >= self.budget
    }

    fn track_low(&mut self, start: u64, length: u64) {
        if start + length <= SIZE_4G && length > self.low_region.length {
            self.low_region = LowRegion { start, length };
        }
    }
}

/// Moves a zero base up one page; later stages treat address 0 as null.
fn skip_zero_page(low: LowRegion) -> LowRegion {
    if low.start != 0 {
        return low;
    }
    LowRegion {
        start: SIZE_4K,
        length: low.length.saturating_sub(SIZE_4K),
    }
}

/// Accepts memory descriptors in list order until `budget` bytes are in.
///
/// The last descriptor touched may be accepted only in part. Fails if any
/// acceptance round fails or if nothing below 4 GiB was accepted.
pub fn process_hob_list<A: AcceptPrimitive>(
    ctx: &BootContext<'_, A>,
    list: &HobList<'_>,
    budget: u64,
) -> Result<BootAccumulator, BootError> {
    let mut acc = BootAccumulator::new(budget);
    info!("[process] acceptance budget {:#x}", budget);

    for rec in list.records() {
        if acc.exhausted() {
            break;
        }
        let Record::Resource(res) = rec else {
            continue;
        };
        if !res.is_memory() || res.resource_length == 0 {
            continue;
        }

        let start = res.physical_start;
        let length = res.resource_length.min(acc.remaining());
        let end = start + length;
        debug!(
            "[process] {:?} [{:#x}, {:#x}) of {:#x}",
            res.kind(),
            start,
            end,
            res.resource_length
        );

        if let Err(e) = accept_range(ctx, start, end) {
            error!("[process] accept [{start:#x}, {end:#x}) failed: {e}");
            return Err(e.into());
        }
        acc.accepted += length;
        acc.track_low(start, length);
    }

    acc.low_region = skip_zero_page(acc.low_region);
    if acc.low_region.is_empty() {
        error!("[process] no accepted memory below 4 GiB");
        return Err(BootError::NoLowRegion);
    }
    info!(
        "[process] accepted {:#x} bytes, low region [{:#x}, +{:#x})",
        acc.accepted, acc.low_region.start, acc.low_region.length
    );
    Ok(acc)
}
