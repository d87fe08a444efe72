// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! The shared control page used to drive secondary units.
//!
//! Only the counters are written concurrently; command, target, vector and
//! arguments are written by the bootstrap unit before a round is released
//! and read by the others after it.

use core::mem::{offset_of, size_of};
use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

pub const MAX_UNITS: usize = 256;
pub const ARG_COUNT: usize = 4;

pub const MAILBOX_SIZE: usize = 0x2000;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Noop = 0,
    Wakeup = 1,
    Sleep = 2,
    AcceptPages = 3,
}

impl Command {
    pub const fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Command::Noop),
            1 => Some(Command::Wakeup),
            2 => Some(Command::Sleep),
            3 => Some(Command::AcceptPages),
            _ => None,
        }
    }
}

/// Who should execute a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Broadcast,
    Unit(u32),
}

pub const TARGET_INVALID: u32 = 0xFFFF_FFFF;
pub const TARGET_BROADCAST: u32 = 0xFFFF_FFFE;

impl Target {
    pub const fn raw(self) -> u32 {
        match self {
            Target::Broadcast => TARGET_BROADCAST,
            Target::Unit(i) => i,
        }
    }

    pub const fn includes(raw: u32, unit: u32) -> bool {
        raw == TARGET_BROADCAST || raw == unit
    }
}

#[repr(C, align(4096))]
pub struct Mailbox {
    command: AtomicU16,
    _rsvd: u16,
    target: AtomicU32,
    wake_vector: AtomicU64,
    _os: [u8; 2032],
    args: [AtomicU64; ARG_COUNT],
    _pad0: [u8; 0xE0],
    arrival: AtomicU64,
    _pad1: [u8; 0xF8],
    exit: AtomicU64,
    tallies: [AtomicU32; MAX_UNITS],
    errors: [AtomicU32; MAX_UNITS],
    duplicates: [AtomicU32; MAX_UNITS],
}

const _: () = assert!(size_of::<Mailbox>() == MAILBOX_SIZE);
const _: () = assert!(offset_of!(Mailbox, args) == 0x800);
const _: () = assert!(offset_of!(Mailbox, arrival) == 0x900);
const _: () = assert!(offset_of!(Mailbox, exit) == 0xA00);

impl Mailbox {
    pub const fn new() -> Self {
        Mailbox {
            command: AtomicU16::new(Command::Noop as u16),
            _rsvd: 0,
            target: AtomicU32::new(TARGET_INVALID),
            wake_vector: AtomicU64::new(0),
            _os: [0; 2032],
            args: [const { AtomicU64::new(0) }; ARG_COUNT],
            _pad0: [0; 0xE0],
            arrival: AtomicU64::new(0),
            _pad1: [0; 0xF8],
            exit: AtomicU64::new(0),
            tallies: [const { AtomicU32::new(0) }; MAX_UNITS],
            errors: [const { AtomicU32::new(0) }; MAX_UNITS],
            duplicates: [const { AtomicU32::new(0) }; MAX_UNITS],
        }
    }

    /// Views the mailbox page the platform reserved at `base`.
    ///
    /// # Safety
    /// `base` must be the identity-mapped, accepted, page-aligned mailbox
    /// page, zeroed by the platform and live for the rest of boot.
    pub unsafe fn from_address(base: u64) -> &'static Mailbox {
        unsafe { &*(base as *const Mailbox) }
    }

    /// Writes a fresh mailbox over the pages at `base` and views it.
    ///
    /// # Safety
    /// `base` must be identity mapped, accepted, page aligned, cover
    /// [`MAILBOX_SIZE`] bytes that nothing else references, and stay live
    /// for the rest of boot.
    pub unsafe fn init_at(base: u64) -> &'static Mailbox {
        let slot = base as *mut Mailbox;
        unsafe {
            slot.write(Mailbox::new());
            &*slot
        }
    }

    /* ---- command block (bootstrap unit writes) ---- */

    pub fn command(&self) -> u16 {
        self.command.load(Ordering::Acquire)
    }

    pub(crate) fn publish_command(&self, command: Command) {
        self.command.store(command as u16, Ordering::Release);
    }

    pub fn target(&self) -> u32 {
        self.target.load(Ordering::Relaxed)
    }

    pub(crate) fn set_target(&self, target: Target) {
        self.target.store(target.raw(), Ordering::Relaxed);
    }

    pub fn wake_vector(&self) -> u64 {
        self.wake_vector.load(Ordering::Relaxed)
    }

    pub(crate) fn set_wake_vector(&self, vector: u64) {
        self.wake_vector.store(vector, Ordering::Relaxed);
    }

    pub fn args(&self) -> [u64; ARG_COUNT] {
        core::array::from_fn(|i| self.args[i].load(Ordering::Relaxed))
    }

    pub(crate) fn set_args(&self, args: [u64; ARG_COUNT]) {
        for (slot, v) in self.args.iter().zip(args) {
            slot.store(v, Ordering::Relaxed);
        }
    }

    /* ---- barrier counters ---- */

    pub(crate) fn arrival(&self) -> &AtomicU64 {
        &self.arrival
    }

    pub(crate) fn exit(&self) -> &AtomicU64 {
        &self.exit
    }

    pub fn arrival_count(&self) -> u64 {
        self.arrival.load(Ordering::Acquire)
    }

    pub fn exit_count(&self) -> u64 {
        self.exit.load(Ordering::Acquire)
    }

    /* ---- per-unit counters, each written only by its owner ---- */

    pub fn add_tally(&self, unit: u32, pages: u32) {
        self.tallies[unit as usize].fetch_add(pages, Ordering::Relaxed);
    }

    pub fn bump_error(&self, unit: u32) {
        self.errors[unit as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_duplicate(&self, unit: u32) {
        self.duplicates[unit as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn tally(&self, unit: u32) -> u32 {
        self.tallies[unit as usize].load(Ordering::Relaxed)
    }

    pub fn error(&self, unit: u32) -> u32 {
        self.errors[unit as usize].load(Ordering::Relaxed)
    }

    pub fn duplicate(&self, unit: u32) -> u32 {
        self.duplicates[unit as usize].load(Ordering::Relaxed)
    }

    /// Clears the counters of the first `num_units` units. Only valid while
    /// every secondary unit is parked.
    pub(crate) fn reset_counters(&self, num_units: u32) {
        let n = num_units as usize;
        for c in self.tallies[..n]
            .iter()
            .chain(&self.errors[..n])
            .chain(&self.duplicates[..n])
        {
            c.store(0, Ordering::Relaxed);
        }
    }

    pub fn totals(&self, num_units: u32) -> RoundTotals {
        let mut t = RoundTotals::default();
        for unit in 0..num_units {
            t.pages += u64::from(self.tally(unit));
            t.errors += u64::from(self.error(unit));
            t.duplicates += u64::from(self.duplicate(unit));
        }
        t
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Sums of the per-unit counters after a round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundTotals {
    pub pages: u64,
    pub errors: u64,
    pub duplicates: u64,
}
