// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use thiserror::Error;

/// Structural problems found while walking an untrusted handoff list.
///
/// Every variant carries the byte offset of the offending record so the
/// halt message can point at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HobError {
    #[error("record header at {offset:#x} runs past the end of the list")]
    Truncated { offset: usize },
    #[error("record at {offset:#x} has zero length")]
    ZeroLength { offset: usize },
    #[error("record at {offset:#x} has a non-zero reserved header field")]
    ReservedNonZero { offset: usize },
    #[error("record at {offset:#x} (kind {kind:#06x}) is {length} bytes, expected {expected}")]
    BadLength {
        offset: usize,
        kind: u16,
        length: u16,
        expected: u16,
    },
    #[error("handoff header at {offset:#x} has unknown boot mode {mode:#x}")]
    BadBootMode { offset: usize, mode: u32 },
    #[error("record at {offset:#x} carries unaligned address {value:#x}")]
    Misaligned { offset: usize, value: u64 },
    #[error("resource descriptor at {offset:#x} has unknown type {resource_type:#x}")]
    BadResourceType { offset: usize, resource_type: u32 },
    #[error("resource descriptor at {offset:#x} has unknown attribute bits {bits:#x}")]
    BadResourceAttributes { offset: usize, bits: u32 },
    #[error("resource descriptor at {offset:#x} wraps: {start:#x} + {length:#x}")]
    RangeOverflow { offset: usize, start: u64, length: u64 },
    #[error("cpu record at {offset:#x} has non-zero reserved bytes")]
    CpuReservedNonZero { offset: usize },
    #[error("record at {offset:#x} has unsupported kind {kind:#06x}")]
    UnknownKind { offset: usize, kind: u16 },
    #[error("list ended at {offset:#x} without an end-of-list record")]
    MissingEnd { offset: usize },
    #[error("list has more than {limit} records")]
    TooManyRecords { limit: usize },
}

/// Outcome of one privileged page-accept call that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcceptError {
    /// Benign: the page was already in the accepted state.
    #[error("page already accepted")]
    AlreadyAccepted,
    /// The page is mapped at a different level than requested.
    #[error("page size mismatch")]
    SizeMismatch,
    #[error("accept failed with status {0:#x}")]
    Device(u64),
}

/// Aggregate failure of one acceptance round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("accepting [{start:#x}, {end:#x}) failed on {errors} page(s)")]
pub struct RangeError {
    pub start: u64,
    pub end: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("output list buffer is full ({needed} bytes needed, {left} left)")]
    OutOfSpace { needed: usize, left: usize },
    #[error("guid record payload of {0} bytes does not fit a record")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unit count {0} is outside the supported range")]
    UnitCount(u32),
    #[error("chunk size {0:#x} is not a multiple of 2 MiB between 2 MiB and 1 GiB")]
    ChunkSize(u64),
    #[error("mailbox base {0:#x} is not page aligned")]
    MailboxBase(u64),
    #[error("configuration channel read of {0} failed")]
    Channel(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MeasureError {
    #[error("volume at {base:#x} has no _FVH signature")]
    BadSignature { base: u64 },
    #[error("volume at {base:#x} has header length {length:#x} out of range")]
    BadHeaderLength { base: u64, length: u16 },
    #[error("volume at {base:#x} has checksum {found:#06x}, expected {expected:#06x}")]
    BadChecksum { base: u64, found: u16, expected: u16 },
    #[error("event data does not fit {0} bytes")]
    EventTooLarge(usize),
    #[error("measurement log is full")]
    LogFull,
    #[error("measurement sink rejected the event")]
    Sink,
}

/// Everything that can stop the early boot flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BootError {
    #[error(transparent)]
    Hob(#[from] HobError),
    #[error(transparent)]
    Accept(#[from] RangeError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Measure(#[from] MeasureError),
    #[error("no system memory region below 4 GiB was accepted")]
    NoLowRegion,
    #[error("low region [{start:#x}, +{length:#x}) is too small for the firmware pool")]
    PoolTooSmall { start: u64, length: u64 },
    #[error("firmware ranges leave no room for the pool in [{start:#x}, +{length:#x})")]
    PoolReserved { start: u64, length: u64 },
}
