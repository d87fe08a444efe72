// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Handoff block (HOB) records in the UEFI PI layout.
//!
//! All records start with [`HobHeader`]; `length` covers the header.

pub mod builder;
pub mod cursor;
pub mod validate;

use bitflags::bitflags;
use core::fmt;
use core::mem::size_of;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub use builder::HobBuilder;
pub use cursor::{HobCursor, RawRecord, Record};
pub use validate::{HobList, MAX_RECORDS, RawRecords, Records, validate};

/* ---- record kinds ---- */

pub const HOB_TYPE_HANDOFF: u16 = 0x0001;
pub const HOB_TYPE_MEMORY_ALLOCATION: u16 = 0x0002;
pub const HOB_TYPE_RESOURCE_DESCRIPTOR: u16 = 0x0003;
pub const HOB_TYPE_GUID_EXTENSION: u16 = 0x0004;
pub const HOB_TYPE_FV: u16 = 0x0005;
pub const HOB_TYPE_CPU: u16 = 0x0006;
pub const HOB_TYPE_MEMORY_POOL: u16 = 0x0007;
pub const HOB_TYPE_FV2: u16 = 0x0009;
pub const HOB_TYPE_UEFI_CAPSULE: u16 = 0x000B;
pub const HOB_TYPE_FV3: u16 = 0x000C;
pub const HOB_TYPE_UNUSED: u16 = 0xFFFE;
pub const HOB_TYPE_END_OF_HOB_LIST: u16 = 0xFFFF;

pub const HANDOFF_VERSION: u32 = 0x0009;

/// A GUID in its on-disk mixed-endian byte order.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Guid([u8; 16]);

impl Guid {
    pub const fn from_fields(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> Self {
        let a = d1.to_le_bytes();
        let b = d2.to_le_bytes();
        let c = d3.to_le_bytes();
        Guid([
            a[0], a[1], a[2], a[3], b[0], b[1], c[0], c[1], d4[0], d4[1], d4[2], d4[3], d4[4],
            d4[5], d4[6], d4[7],
        ])
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Guid(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15]
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HobHeader {
    pub kind: u16,
    pub length: u16,
    pub reserved: u32,
}

impl HobHeader {
    pub const SIZE: usize = 8;

    pub const fn new(kind: u16, length: usize) -> Self {
        HobHeader {
            kind,
            length: length as u16,
            reserved: 0,
        }
    }
}

/// PHIT: the first record of every list.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HandoffInfoTable {
    pub header: HobHeader,
    pub version: u32,
    pub boot_mode: u32,
    pub memory_top: u64,
    pub memory_bottom: u64,
    pub free_memory_top: u64,
    pub free_memory_bottom: u64,
    pub end_of_hob_list: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MemoryAllocation {
    pub header: HobHeader,
    pub name: Guid,
    pub memory_base_address: u64,
    pub memory_length: u64,
    pub memory_type: u32,
    pub reserved: [u8; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ResourceDescription {
    pub header: HobHeader,
    pub owner: Guid,
    pub resource_type: u32,
    pub resource_attribute: u32,
    pub physical_start: u64,
    pub resource_length: u64,
}

impl ResourceDescription {
    pub fn kind(&self) -> Option<ResourceType> {
        ResourceType::from_raw(self.resource_type)
    }

    pub fn attributes(&self) -> ResourceAttributes {
        ResourceAttributes::from_bits_retain(self.resource_attribute)
    }

    /// True for descriptors that name RAM the guest has to accept.
    pub fn is_memory(&self) -> bool {
        matches!(
            self.kind(),
            Some(ResourceType::SystemMemory | ResourceType::Unaccepted)
        )
    }
}

/// Firmware volume, v1.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FirmwareVolume {
    pub header: HobHeader,
    pub base_address: u64,
    pub length: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FirmwareVolume2 {
    pub header: HobHeader,
    pub base_address: u64,
    pub length: u64,
    pub fv_name: Guid,
    pub file_name: Guid,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FirmwareVolume3 {
    pub header: HobHeader,
    pub base_address: u64,
    pub length: u64,
    pub authentication_status: u32,
    pub extracted_fv: u8,
    pub reserved: [u8; 3],
    pub fv_name: Guid,
    pub file_name: Guid,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Cpu {
    pub header: HobHeader,
    pub size_of_memory_space: u8,
    pub size_of_io_space: u8,
    pub reserved: [u8; 6],
}

/// Fixed part of a GUID extension; opaque payload follows.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct GuidExtension {
    pub header: HobHeader,
    pub name: Guid,
}

const _: () = {
    assert!(size_of::<HobHeader>() == 8);
    assert!(size_of::<HandoffInfoTable>() == 56);
    assert!(size_of::<MemoryAllocation>() == 48);
    assert!(size_of::<ResourceDescription>() == 48);
    assert!(size_of::<GuidExtension>() == 24);
    assert!(size_of::<FirmwareVolume>() == 24);
    assert!(size_of::<Cpu>() == 16);
    assert!(size_of::<FirmwareVolume2>() == 56);
    assert!(size_of::<FirmwareVolume3>() == 64);
};

/// Exact size of a fixed-size record kind, `None` for variable or unknown.
pub const fn fixed_size(kind: u16) -> Option<usize> {
    Some(match kind {
        HOB_TYPE_HANDOFF => size_of::<HandoffInfoTable>(),
        HOB_TYPE_MEMORY_ALLOCATION => size_of::<MemoryAllocation>(),
        HOB_TYPE_RESOURCE_DESCRIPTOR => size_of::<ResourceDescription>(),
        HOB_TYPE_FV => size_of::<FirmwareVolume>(),
        HOB_TYPE_CPU => size_of::<Cpu>(),
        HOB_TYPE_FV2 => size_of::<FirmwareVolume2>(),
        HOB_TYPE_FV3 => size_of::<FirmwareVolume3>(),
        HOB_TYPE_END_OF_HOB_LIST => HobHeader::SIZE,
        _ => return None,
    })
}

/* ---- boot modes ---- */

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    FullConfiguration = 0x00,
    MinimalConfiguration = 0x01,
    AssumingNoConfigurationChanges = 0x02,
    FullConfigurationPlusDiagnostics = 0x03,
    DefaultSettings = 0x04,
    S4Resume = 0x05,
    S5Resume = 0x06,
    MfgModeSettings = 0x07,
    S2Resume = 0x10,
    S3Resume = 0x11,
    FlashUpdate = 0x12,
    RecoveryMode = 0x20,
}

impl BootMode {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x00 => BootMode::FullConfiguration,
            0x01 => BootMode::MinimalConfiguration,
            0x02 => BootMode::AssumingNoConfigurationChanges,
            0x03 => BootMode::FullConfigurationPlusDiagnostics,
            0x04 => BootMode::DefaultSettings,
            0x05 => BootMode::S4Resume,
            0x06 => BootMode::S5Resume,
            0x07 => BootMode::MfgModeSettings,
            0x10 => BootMode::S2Resume,
            0x11 => BootMode::S3Resume,
            0x12 => BootMode::FlashUpdate,
            0x20 => BootMode::RecoveryMode,
            _ => return None,
        })
    }
}

/* ---- resource descriptors ---- */

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    SystemMemory = 0,
    MemoryMappedIo = 1,
    Io = 2,
    FirmwareDevice = 3,
    MemoryMappedIoPort = 4,
    MemoryReserved = 5,
    IoReserved = 6,
    Unaccepted = 7,
}

/// One past the last known resource type.
pub const RESOURCE_TYPE_MAX: u32 = 8;

impl ResourceType {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => ResourceType::SystemMemory,
            1 => ResourceType::MemoryMappedIo,
            2 => ResourceType::Io,
            3 => ResourceType::FirmwareDevice,
            4 => ResourceType::MemoryMappedIoPort,
            5 => ResourceType::MemoryReserved,
            6 => ResourceType::IoReserved,
            7 => ResourceType::Unaccepted,
            _ => return None,
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceAttributes: u32 {
        const PRESENT                 = 0x0000_0001;
        const INITIALIZED             = 0x0000_0002;
        const TESTED                  = 0x0000_0004;
        const SINGLE_BIT_ECC          = 0x0000_0008;
        const MULTIPLE_BIT_ECC        = 0x0000_0010;
        const ECC_RESERVED_1          = 0x0000_0020;
        const ECC_RESERVED_2          = 0x0000_0040;
        const READ_PROTECTED          = 0x0000_0080;
        const WRITE_PROTECTED         = 0x0000_0100;
        const EXECUTION_PROTECTED     = 0x0000_0200;
        const UNCACHEABLE             = 0x0000_0400;
        const WRITE_COMBINEABLE       = 0x0000_0800;
        const WRITE_THROUGH_CACHEABLE = 0x0000_1000;
        const WRITE_BACK_CACHEABLE    = 0x0000_2000;
        const IO_16_BIT               = 0x0000_4000;
        const IO_32_BIT               = 0x0000_8000;
        const IO_64_BIT               = 0x0001_0000;
        const UNCACHED_EXPORTED       = 0x0002_0000;
        const READ_ONLY_PROTECTED     = 0x0004_0000;
        const READ_ONLY_PROTECTABLE   = 0x0008_0000;
        const READ_PROTECTABLE        = 0x0010_0000;
        const WRITE_PROTECTABLE       = 0x0020_0000;
        const EXECUTION_PROTECTABLE   = 0x0040_0000;
        const PERSISTENT              = 0x0080_0000;
        const PERSISTABLE             = 0x0100_0000;
        const MORE_RELIABLE           = 0x0200_0000;
        const ENCRYPTED               = 0x0400_0000;
    }
}

/* ---- memory allocation types (EFI_MEMORY_TYPE) ---- */

pub const MEMORY_TYPE_BOOT_SERVICES_DATA: u32 = 4;
pub const MEMORY_TYPE_ACPI_MEMORY_NVS: u32 = 10;
