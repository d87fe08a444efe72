// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use crate::config::PlatformConfig;
use crate::mem::accept::AcceptPrimitive;
use crate::mp::Mailbox;

/// Everything the boot flow shares between units, built once at entry.
pub struct BootContext<'a, A: AcceptPrimitive> {
    pub mailbox: &'a Mailbox,
    pub config: PlatformConfig,
    pub acceptor: &'a A,
}

impl<'a, A: AcceptPrimitive> BootContext<'a, A> {
    pub fn new(mailbox: &'a Mailbox, config: PlatformConfig, acceptor: &'a A) -> Self {
        BootContext {
            mailbox,
            config,
            acceptor,
        }
    }

    #[inline]
    pub fn num_units(&self) -> u32 {
        self.config.num_units
    }
}
