// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! QEMU fw_cfg over legacy port I/O.
//!
//! Selecting an item is a 16-bit write to the selector port; its contents
//! then stream out of the data port one byte per read.

use log::{debug, warn};

use super::tdcall::{io_read8, io_write16};
use crate::config::ConfigChannel;
use crate::error::ConfigError;

pub const FW_CFG_PORT_SELECTOR: u16 = 0x510;
pub const FW_CFG_PORT_DATA: u16 = 0x511;

const FW_CFG_SIGNATURE: [u8; 4] = *b"QEMU";

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwCfgItem {
    Signature = 0x00,
    KernelSize = 0x08,
    InitrdSize = 0x0b,
    CommandLineSize = 0x14,
    KernelSetupSize = 0x17,
}

/// Port access underneath [`FwCfg`]. `None` means the access did not reach
/// the device.
pub trait IoPort {
    fn write16(&mut self, port: u16, value: u16) -> Option<()>;
    fn read8(&mut self, port: u16) -> Option<u8>;
}

/// Port I/O forwarded to the VMM through TDG.VP.VMCALL.
pub struct TdVmcallPort;

impl IoPort for TdVmcallPort {
    fn write16(&mut self, port: u16, value: u16) -> Option<()> {
        io_write16(port, value)
    }

    fn read8(&mut self, port: u16) -> Option<u8> {
        io_read8(port)
    }
}

pub struct FwCfg<P> {
    io: P,
}

impl<P: IoPort> FwCfg<P> {
    pub const fn new(io: P) -> Self {
        FwCfg { io }
    }

    fn read_bytes<const N: usize>(
        &mut self,
        item: FwCfgItem,
        what: &'static str,
    ) -> Result<[u8; N], ConfigError> {
        self.io
            .write16(FW_CFG_PORT_SELECTOR, item as u16)
            .ok_or(ConfigError::Channel(what))?;
        let mut bytes = [0u8; N];
        for b in &mut bytes {
            *b = self
                .io
                .read8(FW_CFG_PORT_DATA)
                .ok_or(ConfigError::Channel(what))?;
        }
        Ok(bytes)
    }

    /// Little-endian 32-bit value of `item`.
    pub fn read_u32(&mut self, item: FwCfgItem, what: &'static str) -> Result<u32, ConfigError> {
        let value = u32::from_le_bytes(self.read_bytes(item, what)?);
        debug!("[fw_cfg] {what} = {value:#x}");
        Ok(value)
    }

    /// True when the selector answers with the QEMU signature.
    pub fn is_present(&mut self) -> bool {
        match self.read_bytes::<4>(FwCfgItem::Signature, "signature") {
            Ok(sig) if sig == FW_CFG_SIGNATURE => true,
            Ok(sig) => {
                warn!("[fw_cfg] unexpected signature {sig:x?}");
                false
            }
            Err(e) => {
                warn!("[fw_cfg] {e}");
                false
            }
        }
    }
}

impl<P: IoPort> ConfigChannel for FwCfg<P> {
    fn kernel_size(&mut self) -> Result<u32, ConfigError> {
        self.read_u32(FwCfgItem::KernelSize, "kernel size")
    }

    fn kernel_setup_size(&mut self) -> Result<u32, ConfigError> {
        self.read_u32(FwCfgItem::KernelSetupSize, "kernel setup size")
    }

    fn command_line_size(&mut self) -> Result<u32, ConfigError> {
        self.read_u32(FwCfgItem::CommandLineSize, "command line size")
    }

    fn initrd_size(&mut self) -> Result<u32, ConfigError> {
        self.read_u32(FwCfgItem::InitrdSize, "initrd size")
    }
}
