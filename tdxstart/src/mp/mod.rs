// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
pub mod mailbox;
pub mod rendezvous;

pub use mailbox::{ARG_COUNT, Command, MAILBOX_SIZE, MAX_UNITS, Mailbox, RoundTotals, Target};
pub use rendezvous::{
    ApExit, ap_run_loop, parked_loop, relocate_units, rendezvous_end, rendezvous_start,
    send_command,
};
