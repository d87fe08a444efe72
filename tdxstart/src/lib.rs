// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Early boot core for TDX guests: checks the VMM's handoff list, accepts
//! private memory on every unit, and rebuilds the list for the next stage.
#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod context;
pub mod error;
pub mod fv;
pub mod hob;
pub mod measure;
pub mod mem;
pub mod mp;
pub mod pool;
pub mod process;
pub mod transfer;

pub use config::{BudgetPolicy, ConfigChannel, PlatformConfig, PlatformLayout};
pub use context::BootContext;
pub use error::BootError;
pub use mem::LowRegion;
pub use process::{BootAccumulator, process_hob_list};
pub use transfer::{FirmwareRecords, append_firmware_records, transfer_hob_list};
