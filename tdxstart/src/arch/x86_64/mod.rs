// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
pub mod fw_cfg;
pub mod serial;
pub mod tdcall;

pub use fw_cfg::{FwCfg, TdVmcallPort};
pub use tdcall::{TdInfo, TdxAcceptor, td_info};
