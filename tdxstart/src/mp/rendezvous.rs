// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Two-phase gather/release barrier on the mailbox counters.
//!
//! One round, seen from the bootstrap unit:
//!
//! ```text
//! rendezvous_start   wait arrival == n-1, exit = n, arrival += 1
//! send_command       target/vector/args, then command (release)
//! ... own share of the work ...
//! rendezvous_end     wait exit == 1, command = Noop, arrival = 0, exit -= 1
//! ```
//!
//! There are no timeouts. The unit count comes from a trusted source, so a
//! unit that never arrives is a platform fault and boot hangs here.

use core::hint::spin_loop;
use core::sync::atomic::Ordering;

use log::{trace, warn};

use super::mailbox::{ARG_COUNT, Command, Mailbox, Target};

#[inline(always)]
fn spin_until(mut done: impl FnMut() -> bool) {
    while !done() {
        spin_loop();
    }
}

/// Gathers every secondary unit, then releases them. Bootstrap unit only.
pub fn rendezvous_start(mailbox: &Mailbox, num_units: u32) {
    let others = u64::from(num_units.saturating_sub(1));
    spin_until(|| mailbox.arrival().load(Ordering::Acquire) == others);
    mailbox
        .exit()
        .store(u64::from(num_units), Ordering::Release);
    mailbox.arrival().fetch_add(1, Ordering::AcqRel);
}

/// Publishes one command for the current round. Must sit between
/// [`rendezvous_start`] and [`rendezvous_end`].
pub fn send_command(
    mailbox: &Mailbox,
    command: Command,
    target: Target,
    wake_vector: u64,
    args: [u64; ARG_COUNT],
) {
    trace!("[mp] send {:?} -> {:?} args={:x?}", command, target, args);
    mailbox.set_target(target);
    mailbox.set_wake_vector(wake_vector);
    mailbox.set_args(args);
    mailbox.publish_command(command);
}

/// Waits until every secondary unit has finished the round, then re-arms the
/// mailbox for the next one. Bootstrap unit only.
pub fn rendezvous_end(mailbox: &Mailbox) {
    spin_until(|| mailbox.exit().load(Ordering::Acquire) == 1);
    mailbox.publish_command(Command::Noop);
    mailbox.arrival().store(0, Ordering::Relaxed);
    mailbox.exit().fetch_sub(1, Ordering::AcqRel);
}

/// Why a secondary unit left its run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApExit {
    /// Jump to `vector` with `arg` (the relocated mailbox).
    Wakeup { vector: u64, arg: u64 },
    /// Park for good.
    Sleep,
}

/// Secondary unit run loop.
///
/// `dispatch` runs every targeted command other than Wakeup and Sleep; it
/// gets the raw command word so unknown commands can be reported.
pub fn ap_run_loop(
    mailbox: &Mailbox,
    unit: u32,
    mut dispatch: impl FnMut(u16, [u64; ARG_COUNT]),
) -> ApExit {
    loop {
        // The previous round is closed once its exit count drains to zero.
        spin_until(|| mailbox.exit().load(Ordering::Acquire) == 0);
        mailbox.arrival().fetch_add(1, Ordering::AcqRel);

        let mut raw = Command::Noop as u16;
        spin_until(|| {
            raw = mailbox.command();
            raw != Command::Noop as u16
        });

        let mut leave = None;
        if Target::includes(mailbox.target(), unit) {
            let args = mailbox.args();
            match Command::from_raw(raw) {
                Some(Command::Wakeup) => {
                    leave = Some(ApExit::Wakeup {
                        vector: mailbox.wake_vector(),
                        arg: args[0],
                    })
                }
                Some(Command::Sleep) => leave = Some(ApExit::Sleep),
                _ => dispatch(raw, args),
            }
        }

        mailbox.exit().fetch_sub(1, Ordering::AcqRel);
        if let Some(exit) = leave {
            return exit;
        }
    }
}

/// Moves every secondary unit off `from`.
///
/// Each unit leaves its run loop through Wakeup and enters `vector` with
/// `to`, the base of an initialised mailbox, as its argument. `from` is left
/// idle once this returns. Bootstrap unit only.
pub fn relocate_units(from: &Mailbox, num_units: u32, vector: u64, to: u64) {
    rendezvous_start(from, num_units);
    send_command(from, Command::Wakeup, Target::Broadcast, vector, [to, 0, 0, 0]);
    rendezvous_end(from);
}

/// Run loop on a relocated mailbox, where only Wakeup and Sleep are served.
pub fn parked_loop(mailbox: &Mailbox, unit: u32) -> ApExit {
    ap_run_loop(mailbox, unit, |raw, _| {
        warn!("[mp] parked unit {unit} ignoring command {raw:#x}");
        mailbox.bump_error(unit);
    })
}
