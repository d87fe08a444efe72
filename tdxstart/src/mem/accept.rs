// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Parallel page acceptance.
//!
//! Each round accepts one sub-range from [`partition`]. Unit `i` owns the
//! chunks starting at `start + i * chunk` and then every `n * chunk` after
//! that, so no work queue is needed. Failures are counted per unit and only
//! looked at once the round has drained.

use log::{debug, error, trace, warn};

use super::partition::partition;
use super::{AcceptedRange, PageLevel, SIZE_4K};
use crate::context::BootContext;
use crate::error::{AcceptError, RangeError};
use crate::mp::{
    ARG_COUNT, ApExit, Command, Mailbox, Target, ap_run_loop, rendezvous_end, rendezvous_start,
    send_command,
};

/// The privileged "accept this page" operation.
pub trait AcceptPrimitive: Sync {
    fn accept(&self, gpa: u64, level: PageLevel) -> Result<(), AcceptError>;
}

/// One unit's view of an AcceptPages command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptJob {
    pub start: u64,
    pub end: u64,
    pub level: PageLevel,
    /// How many units share the range; 1 for bootstrap-only rounds.
    pub participants: u32,
}

impl AcceptJob {
    pub fn encode(&self) -> [u64; ARG_COUNT] {
        [
            self.start,
            self.end,
            self.level as u64,
            u64::from(self.participants),
        ]
    }

    pub fn decode(args: [u64; ARG_COUNT]) -> Option<Self> {
        Some(AcceptJob {
            start: args[0],
            end: args[1],
            level: PageLevel::from_raw(args[2])?,
            participants: u32::try_from(args[3]).ok().filter(|&p| p != 0)?,
        })
    }
}

fn accept_one(acceptor: &impl AcceptPrimitive, mb: &Mailbox, unit: u32, gpa: u64, level: PageLevel) {
    match acceptor.accept(gpa, level) {
        Ok(()) => {}
        Err(AcceptError::AlreadyAccepted) => {
            trace!("[accept] {gpa:#x} already accepted");
            mb.bump_duplicate(unit);
        }
        Err(AcceptError::SizeMismatch) if level == PageLevel::Size2M => {
            // Mapped as 4 KiB pages on the host side; take them one by one.
            trace!("[accept] {gpa:#x} falls back to 4K");
            let mut page = gpa;
            while page < gpa + level.bytes() {
                accept_one(acceptor, mb, unit, page, PageLevel::Size4K);
                page += SIZE_4K;
            }
        }
        Err(e) => {
            warn!("[accept] unit {unit} page {gpa:#x} {level:?}: {e}");
            mb.bump_error(unit);
        }
    }
}

/// Accepts this unit's share of `job`.
pub fn accept_worker<A: AcceptPrimitive>(ctx: &BootContext<'_, A>, unit: u32, job: AcceptJob) {
    if unit >= job.participants {
        return;
    }
    let chunk = ctx.config.chunk_size;
    let page = job.level.bytes();
    let stride = chunk.saturating_mul(u64::from(job.participants));

    let mut at = job.start.saturating_add(chunk.saturating_mul(u64::from(unit)));
    while at < job.end {
        let len = chunk.min(job.end - at);
        let pages = len / page;
        for i in 0..pages {
            accept_one(ctx.acceptor, ctx.mailbox, unit, at + i * page, job.level);
        }
        ctx.mailbox.add_tally(unit, u32::try_from(pages).unwrap_or(u32::MAX));
        at = match at.checked_add(stride) {
            Some(next) => next,
            None => break,
        };
    }
}

fn run_round<A: AcceptPrimitive>(
    ctx: &BootContext<'_, A>,
    range: AcceptedRange,
    parallel: bool,
) -> Result<(), RangeError> {
    let n = ctx.num_units();
    let (target, participants) = if parallel {
        (Target::Broadcast, n)
    } else {
        (Target::Unit(0), 1)
    };
    let job = AcceptJob {
        start: range.start,
        end: range.end(),
        level: range.level,
        participants,
    };

    let mb = ctx.mailbox;
    mb.reset_counters(n);
    rendezvous_start(mb, n);
    send_command(mb, Command::AcceptPages, target, 0, job.encode());
    accept_worker(ctx, 0, job);
    rendezvous_end(mb);

    let totals = mb.totals(n);
    debug!(
        "[accept] [{:#x}, {:#x}) {:?} x{}: pages={} dup={} err={}",
        job.start, job.end, job.level, participants, totals.pages, totals.duplicates, totals.errors
    );
    if totals.errors != 0 {
        error!(
            "[accept] round over [{:#x}, {:#x}) failed on {} page(s)",
            job.start, job.end, totals.errors
        );
        return Err(RangeError {
            start: job.start,
            end: job.end,
            errors: totals.errors,
        });
    }
    Ok(())
}

/// Accepts `[start, end)` using every unit for the bulk and the bootstrap
/// unit alone for the unaligned edges.
///
/// Returns the number of bytes covered. Stops at the first round that
/// recorded an error; nothing is retried.
pub fn accept_range<A: AcceptPrimitive>(
    ctx: &BootContext<'_, A>,
    start: u64,
    end: u64,
) -> Result<u64, RangeError> {
    let parts = partition(start, end, ctx.config.accept_page_size);
    debug!(
        "[accept] [{start:#x}, {end:#x}) head={:x?} bulk={:x?} tail={:x?}",
        parts.head, parts.bulk, parts.tail
    );
    let mut covered = 0;
    for range in parts.rounds() {
        let parallel = Some(range) == parts.bulk;
        run_round(ctx, range, parallel)?;
        covered += range.length;
    }
    Ok(covered)
}

/// Secondary-unit entry: serve AcceptPages rounds until told to leave.
pub fn ap_main<A: AcceptPrimitive>(ctx: &BootContext<'_, A>, unit: u32) -> ApExit {
    ap_run_loop(ctx.mailbox, unit, |raw, args| {
        match (Command::from_raw(raw), AcceptJob::decode(args)) {
            (Some(Command::AcceptPages), Some(job)) => accept_worker(ctx, unit, job),
            _ => {
                warn!("[mp] unit {unit} ignoring command {raw:#x} args={args:x?}");
                ctx.mailbox.bump_error(unit);
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{BudgetPolicy, PlatformConfig};
    use crate::mem::SIZE_2M;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::thread;

    const MIB: u64 = 1 << 20;

    /// Simulated TDX module: tracks accepted 4K frames, can refuse 2M pages
    /// or fail specific addresses.
    #[derive(Default)]
    pub(crate) struct FakeTdx {
        pub accepted: Mutex<HashMap<u64, u32>>,
        pub calls: Mutex<Vec<(u64, PageLevel)>>,
        pub split_2m: bool,
        pub broken: Vec<u64>,
    }

    impl FakeTdx {
        pub fn accepted_bytes(&self) -> u64 {
            self.accepted.lock().unwrap().len() as u64 * SIZE_4K
        }

        pub fn is_accepted(&self, gpa: u64) -> bool {
            self.accepted.lock().unwrap().contains_key(&(gpa & !(SIZE_4K - 1)))
        }

        pub fn max_accepts_per_frame(&self) -> u32 {
            self.accepted.lock().unwrap().values().copied().max().unwrap_or(0)
        }
    }

    impl AcceptPrimitive for FakeTdx {
        fn accept(&self, gpa: u64, level: PageLevel) -> Result<(), AcceptError> {
            self.calls.lock().unwrap().push((gpa, level));
            assert_eq!(gpa % level.bytes(), 0, "unaligned accept {gpa:#x}");
            if self.broken.contains(&gpa) {
                return Err(AcceptError::Device(0xC000_0100));
            }
            if level == PageLevel::Size2M && self.split_2m {
                return Err(AcceptError::SizeMismatch);
            }
            let mut map = self.accepted.lock().unwrap();
            if map.contains_key(&gpa) {
                return Err(AcceptError::AlreadyAccepted);
            }
            let mut frame = gpa;
            while frame < gpa + level.bytes() {
                *map.entry(frame).or_default() += 1;
                frame += SIZE_4K;
            }
            Ok(())
        }
    }

    pub(crate) fn config(n: u32) -> PlatformConfig {
        PlatformConfig::new(n, PageLevel::Size2M, 4 * MIB, BudgetPolicy::AcceptAll).unwrap()
    }

    /// Runs `f` on the bootstrap unit with `n - 1` simulated secondaries
    /// serving the mailbox, then puts them to sleep.
    pub(crate) fn with_units<R>(
        n: u32,
        tdx: &FakeTdx,
        f: impl FnOnce(&BootContext<'_, FakeTdx>) -> R,
    ) -> R {
        let mb = Box::new(Mailbox::new());
        let ctx = BootContext::new(&mb, config(n), tdx);
        thread::scope(|s| {
            for unit in 1..n {
                let ctx = &ctx;
                s.spawn(move || assert_eq!(ap_main(ctx, unit), ApExit::Sleep));
            }
            let r = f(&ctx);
            rendezvous_start(ctx.mailbox, n);
            send_command(ctx.mailbox, Command::Sleep, Target::Broadcast, 0, [0; ARG_COUNT]);
            rendezvous_end(ctx.mailbox);
            r
        })
    }

    #[test]
    fn job_args_round_trip_and_reject_garbage() {
        let job = AcceptJob {
            start: 0x20_0000,
            end: 0x80_0000,
            level: PageLevel::Size2M,
            participants: 4,
        };
        assert_eq!(AcceptJob::decode(job.encode()), Some(job));
        assert_eq!(AcceptJob::decode([0, 0, 7, 1]), None);
        assert_eq!(AcceptJob::decode([0, 0, 0, 0]), None);
    }

    #[test]
    fn bulk_is_spread_across_units() {
        let tdx = FakeTdx::default();
        let start = 0x4000_0000;
        let end = start + 64 * MIB;
        with_units(4, &tdx, |ctx| {
            assert_eq!(accept_range(ctx, start, end), Ok(64 * MIB));
            // 16 chunks of 4 MiB over 4 units: every unit did 4 chunks of 2 pages.
            for unit in 0..4 {
                assert_eq!(ctx.mailbox.tally(unit), 8);
            }
        });
        assert_eq!(tdx.accepted_bytes(), 64 * MIB);
        assert_eq!(tdx.max_accepts_per_frame(), 1);
        assert!(tdx
            .calls
            .lock()
            .unwrap()
            .iter()
            .all(|&(_, level)| level == PageLevel::Size2M));
    }

    #[test]
    fn unaligned_range_covers_head_and_tail_on_bootstrap_unit() {
        let tdx = FakeTdx::default();
        let start = 0x1000;
        let end = 10 * MIB + 0x3000;
        with_units(3, &tdx, |ctx| {
            assert_eq!(accept_range(ctx, start, end), Ok(end - start));
            // The last round was the tail, which only unit 0 worked on.
            assert_eq!(ctx.mailbox.tally(1), 0);
            assert_eq!(ctx.mailbox.tally(0), 3);
        });
        assert_eq!(tdx.accepted_bytes(), end - start);
        assert!(!tdx.is_accepted(0));
        assert!(tdx.is_accepted(0x1000));
        assert!(tdx.is_accepted(end - SIZE_4K));
        assert!(!tdx.is_accepted(end));
        assert_eq!(tdx.max_accepts_per_frame(), 1);
    }

    #[test]
    fn size_mismatch_falls_back_to_small_pages() {
        let tdx = FakeTdx {
            split_2m: true,
            ..Default::default()
        };
        with_units(2, &tdx, |ctx| {
            assert_eq!(accept_range(ctx, SIZE_2M, 5 * SIZE_2M), Ok(4 * SIZE_2M));
            assert_eq!(ctx.mailbox.totals(2).errors, 0);
        });
        assert_eq!(tdx.accepted_bytes(), 4 * SIZE_2M);
    }

    #[test]
    fn duplicates_are_counted_but_not_errors() {
        let tdx = FakeTdx::default();
        with_units(2, &tdx, |ctx| {
            assert!(accept_range(ctx, 0x10_0000, 0x10_1000).is_ok());
            assert!(accept_range(ctx, 0x10_0000, 0x10_1000).is_ok());
            assert_eq!(ctx.mailbox.error(0), 0);
            assert_eq!(ctx.mailbox.duplicate(0), 1);
        });
        assert_eq!(tdx.max_accepts_per_frame(), 1);
    }

    #[test]
    fn device_errors_fail_the_round_after_it_completes() {
        let bad = 0x4000_0000 + 6 * MIB;
        let tdx = FakeTdx {
            broken: vec![bad],
            ..Default::default()
        };
        let start = 0x4000_0000;
        let end = start + 32 * MIB;
        let r = with_units(4, &tdx, |ctx| accept_range(ctx, start, end));
        assert_eq!(
            r,
            Err(RangeError {
                start,
                end,
                errors: 1
            })
        );
        // Every other page of the round still went through.
        assert_eq!(tdx.accepted_bytes(), 32 * MIB - SIZE_2M);
        assert!(!tdx.is_accepted(bad));
    }
}
