// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
#[cfg(target_arch = "x86_64")]
pub mod x86_64;
