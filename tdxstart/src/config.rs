// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Platform policy knobs and the trusted configuration channel.

use crate::error::ConfigError;
use crate::mem::{PageLevel, SIZE_2M, SIZE_4K, align_up, is_aligned};
use crate::mp::MAX_UNITS;

pub const DEFAULT_CHUNK_SIZE: u64 = 32 << 20;
/// Largest chunk; its 4 KiB page count must fit a unit's 32-bit tally.
pub const MAX_CHUNK_SIZE: u64 = 1 << 30;

/// How much memory the processor accepts before leaving the rest to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetPolicy {
    AcceptAll,
    /// Accept this many MiB plus whatever the preloaded payloads need.
    Partial { mib: u64 },
}

/// Scalars the host passes through a trusted side channel.
pub trait ConfigChannel {
    fn kernel_size(&mut self) -> Result<u32, ConfigError>;
    fn kernel_setup_size(&mut self) -> Result<u32, ConfigError>;
    fn command_line_size(&mut self) -> Result<u32, ConfigError>;
    fn initrd_size(&mut self) -> Result<u32, ConfigError>;
}

/// A channel with no payloads, for platforms that boot from disk.
pub struct NoPayload;

impl ConfigChannel for NoPayload {
    fn kernel_size(&mut self) -> Result<u32, ConfigError> {
        Ok(0)
    }
    fn kernel_setup_size(&mut self) -> Result<u32, ConfigError> {
        Ok(0)
    }
    fn command_line_size(&mut self) -> Result<u32, ConfigError> {
        Ok(0)
    }
    fn initrd_size(&mut self) -> Result<u32, ConfigError> {
        Ok(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformConfig {
    pub num_units: u32,
    pub accept_page_size: PageLevel,
    pub chunk_size: u64,
    pub budget: BudgetPolicy,
}

impl PlatformConfig {
    pub fn new(
        num_units: u32,
        accept_page_size: PageLevel,
        chunk_size: u64,
        budget: BudgetPolicy,
    ) -> Result<Self, ConfigError> {
        if num_units == 0 || num_units as usize > MAX_UNITS {
            return Err(ConfigError::UnitCount(num_units));
        }
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE || !is_aligned(chunk_size, SIZE_2M) {
            return Err(ConfigError::ChunkSize(chunk_size));
        }
        Ok(PlatformConfig {
            num_units,
            accept_page_size,
            chunk_size,
            budget,
        })
    }

    /// 2 MiB acceptance, default chunk, accept everything.
    pub fn with_units(num_units: u32) -> Result<Self, ConfigError> {
        Self::new(
            num_units,
            PageLevel::Size2M,
            DEFAULT_CHUNK_SIZE,
            BudgetPolicy::AcceptAll,
        )
    }

    /// Bytes of memory to accept, computed once per boot.
    ///
    /// Partial budgets add the payload sizes and round up to a page; any
    /// overflow saturates to "everything".
    pub fn acceptance_budget(&self, channel: &mut impl ConfigChannel) -> Result<u64, ConfigError> {
        let mib = match self.budget {
            BudgetPolicy::AcceptAll => return Ok(u64::MAX),
            BudgetPolicy::Partial { mib: 0 } => return Ok(u64::MAX),
            BudgetPolicy::Partial { mib } => mib,
        };
        let mut budget = mib.checked_shl(20).filter(|b| b >> 20 == mib).unwrap_or(u64::MAX);
        for size in [
            channel.kernel_size()?,
            channel.kernel_setup_size()?,
            channel.command_line_size()?,
            channel.initrd_size()?,
        ] {
            budget = budget.saturating_add(u64::from(size));
        }
        Ok(align_up(budget, SIZE_4K).unwrap_or(u64::MAX))
    }
}

/// Where the platform put things before the first instruction ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformLayout {
    pub mailbox_base: u64,
    pub hob_base: u64,
    /// Upper bound on the input list; nothing past it is read.
    pub hob_region_size: u64,
}

impl PlatformLayout {
    pub fn new(mailbox_base: u64, hob_base: u64, hob_region_size: u64) -> Result<Self, ConfigError> {
        if mailbox_base == 0 || !is_aligned(mailbox_base, SIZE_4K) {
            return Err(ConfigError::MailboxBase(mailbox_base));
        }
        Ok(PlatformLayout {
            mailbox_base,
            hob_base,
            hob_region_size,
        })
    }
}
