// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! TDCALL leaves used during early boot.

use core::arch::asm;

use crate::error::AcceptError;
use crate::mem::PageLevel;
use crate::mem::accept::AcceptPrimitive;

pub const TDG_VP_VMCALL: u64 = 0;
pub const TDG_VP_INFO: u64 = 1;
pub const TDG_MEM_PAGE_ACCEPT: u64 = 6;

const STATUS_PAGE_ALREADY_ACCEPTED: u64 = 0x0000_0B0A;
const STATUS_PAGE_SIZE_MISMATCH: u64 = 0xC000_0B0B;

const VMCALL_INSTRUCTION_IO: u64 = 30;
/// Expose r10 through r15 to the VMM.
const VMCALL_REG_MASK: u64 = 0xFC00;

#[derive(Debug, Clone, Copy, Default)]
struct TdcallRegs {
    rax: u64,
    rcx: u64,
    rdx: u64,
    r8: u64,
    r9: u64,
    r10: u64,
    r11: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

/// Issues `tdcall` with every argument register in and out.
fn tdcall(mut regs: TdcallRegs) -> TdcallRegs {
    // SAFETY: the leaves used here take no memory operands; the TDX module
    // validates everything else.
    unsafe {
        asm!(
            "tdcall",
            inout("rax") regs.rax,
            inout("rcx") regs.rcx,
            inout("rdx") regs.rdx,
            inout("r8") regs.r8,
            inout("r9") regs.r9,
            inout("r10") regs.r10,
            inout("r11") regs.r11,
            inout("r12") regs.r12,
            inout("r13") regs.r13,
            inout("r14") regs.r14,
            inout("r15") regs.r15,
            options(nostack),
        );
    }
    regs
}

/// Trusted facts about this TD from TDG.VP.INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TdInfo {
    pub gpaw: u8,
    pub num_units: u32,
    pub unit_index: u32,
}

pub fn td_info() -> TdInfo {
    let out = tdcall(TdcallRegs {
        rax: TDG_VP_INFO,
        ..Default::default()
    });
    TdInfo {
        gpaw: (out.rcx & 0x3f) as u8,
        num_units: out.r8 as u32,
        unit_index: out.r9 as u32,
    }
}

fn io(port: u16, size: u64, write: bool, value: u64) -> Option<u64> {
    let out = tdcall(TdcallRegs {
        rax: TDG_VP_VMCALL,
        rcx: VMCALL_REG_MASK,
        r10: 0,
        r11: VMCALL_INSTRUCTION_IO,
        r12: size,
        r13: u64::from(write),
        r14: u64::from(port),
        r15: value,
        ..Default::default()
    });
    (out.rax == 0 && out.r10 == 0).then_some(out.r11)
}

/// Port write through the VMM; plain `out` faults inside a TD.
pub fn io_write8(port: u16, value: u8) {
    let _ = io(port, 1, true, u64::from(value));
}

pub fn io_read8(port: u16) -> Option<u8> {
    io(port, 1, false, 0).map(|v| v as u8)
}

pub fn io_write16(port: u16, value: u16) -> Option<()> {
    io(port, 2, true, u64::from(value)).map(|_| ())
}

/// TDG.MEM.PAGE.ACCEPT.
pub struct TdxAcceptor;

impl AcceptPrimitive for TdxAcceptor {
    fn accept(&self, gpa: u64, level: PageLevel) -> Result<(), AcceptError> {
        let out = tdcall(TdcallRegs {
            rax: TDG_MEM_PAGE_ACCEPT,
            rcx: gpa | level as u64,
            ..Default::default()
        });
        match out.rax >> 32 {
            0 => Ok(()),
            STATUS_PAGE_ALREADY_ACCEPTED => Err(AcceptError::AlreadyAccepted),
            STATUS_PAGE_SIZE_MISMATCH => Err(AcceptError::SizeMismatch),
            _ => Err(AcceptError::Device(out.rax)),
        }
    }
}
