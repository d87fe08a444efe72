// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Append-only writer for the list handed to the next stage.

use core::mem::offset_of;
use zerocopy::{Immutable, IntoBytes};

use super::*;
use crate::error::BuildError;

/// Records are 8-byte aligned in a list.
const RECORD_ALIGN: usize = 8;

/// Writes records into a caller-provided buffer. The buffer starts with a
/// PHIT describing the free space; [`HobBuilder::finish`] seals it with the
/// end marker and returns the written bytes.
pub struct HobBuilder<'a> {
    buf: &'a mut [u8],
    base: u64,
    len: usize,
    records: usize,
}

impl<'a> HobBuilder<'a> {
    /// `base` is the physical address `buf` lives at; the PHIT fields are
    /// expressed in that address space.
    pub fn new(buf: &'a mut [u8], base: u64, boot_mode: BootMode) -> Result<Self, BuildError> {
        let mut b = HobBuilder {
            buf,
            base,
            len: 0,
            records: 0,
        };
        let top = base + b.buf.len() as u64;
        let phit = HandoffInfoTable {
            header: HobHeader::new(HOB_TYPE_HANDOFF, size_of::<HandoffInfoTable>()),
            version: HANDOFF_VERSION,
            boot_mode: boot_mode as u32,
            memory_top: top,
            memory_bottom: base,
            free_memory_top: top & !0xfff,
            free_memory_bottom: 0,
            end_of_hob_list: 0,
        };
        b.push(&phit)?;
        Ok(b)
    }

    /// Bytes written so far, end marker excluded.
    pub fn written(&self) -> usize {
        self.len
    }

    /// Records written so far, the PHIT included.
    pub fn records(&self) -> usize {
        self.records
    }

    fn reserve(&mut self, size: usize) -> Result<&mut [u8], BuildError> {
        // Keep room for the end marker so finish() cannot fail on space.
        let left = self.buf.len().saturating_sub(self.len + HobHeader::SIZE);
        if size > left {
            return Err(BuildError::OutOfSpace { needed: size, left });
        }
        let at = self.len;
        self.len += size;
        self.records += 1;
        let slot = &mut self.buf[at..at + size];
        slot.fill(0);
        Ok(slot)
    }

    /// Appends a fixed-size record as is; its header must already be set.
    pub fn push<T: IntoBytes + Immutable>(&mut self, record: &T) -> Result<(), BuildError> {
        let bytes = record.as_bytes();
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Copies a validated input record through unchanged, length included.
    pub fn copy_raw(&mut self, bytes: &[u8]) -> Result<(), BuildError> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn resource(
        &mut self,
        owner: Guid,
        kind: ResourceType,
        attributes: ResourceAttributes,
        start: u64,
        length: u64,
    ) -> Result<(), BuildError> {
        self.push(&ResourceDescription {
            header: HobHeader::new(
                HOB_TYPE_RESOURCE_DESCRIPTOR,
                size_of::<ResourceDescription>(),
            ),
            owner,
            resource_type: kind as u32,
            resource_attribute: attributes.bits(),
            physical_start: start,
            resource_length: length,
        })
    }

    pub fn memory_allocation(
        &mut self,
        base: u64,
        length: u64,
        memory_type: u32,
    ) -> Result<(), BuildError> {
        self.push(&MemoryAllocation {
            header: HobHeader::new(HOB_TYPE_MEMORY_ALLOCATION, size_of::<MemoryAllocation>()),
            name: Guid::default(),
            memory_base_address: base,
            memory_length: length,
            memory_type,
            reserved: [0; 4],
        })
    }

    pub fn cpu(&mut self, memory_space_bits: u8, io_space_bits: u8) -> Result<(), BuildError> {
        self.push(&Cpu {
            header: HobHeader::new(HOB_TYPE_CPU, size_of::<Cpu>()),
            size_of_memory_space: memory_space_bits,
            size_of_io_space: io_space_bits,
            reserved: [0; 6],
        })
    }

    pub fn firmware_volume(&mut self, base: u64, length: u64) -> Result<(), BuildError> {
        self.push(&FirmwareVolume {
            header: HobHeader::new(HOB_TYPE_FV, size_of::<FirmwareVolume>()),
            base_address: base,
            length,
        })
    }

    /// Appends a GUID extension with `data` as payload, padded to 8 bytes.
    pub fn guid(&mut self, name: Guid, data: &[u8]) -> Result<(), BuildError> {
        let size = size_of::<GuidExtension>() + data.len();
        let padded = size.next_multiple_of(RECORD_ALIGN);
        let length = u16::try_from(padded).map_err(|_| BuildError::PayloadTooLarge(data.len()))?;
        let ext = GuidExtension {
            header: HobHeader::new(HOB_TYPE_GUID_EXTENSION, length as usize),
            name,
        };
        let slot = self.reserve(padded)?;
        slot[..size_of::<GuidExtension>()].copy_from_slice(ext.as_bytes());
        slot[size_of::<GuidExtension>()..size].copy_from_slice(data);
        Ok(())
    }

    /// Seals the list and patches the PHIT's end/free pointers.
    pub fn finish(self) -> &'a [u8] {
        let HobBuilder { buf, base, len: end, .. } = self;
        buf[end..end + HobHeader::SIZE]
            .copy_from_slice(HobHeader::new(HOB_TYPE_END_OF_HOB_LIST, HobHeader::SIZE).as_bytes());
        let total = end + HobHeader::SIZE;

        let end_addr = base + end as u64;
        let free_bottom = base + total as u64;
        let at = offset_of!(HandoffInfoTable, end_of_hob_list);
        buf[at..at + 8].copy_from_slice(&end_addr.to_le_bytes());
        let at = offset_of!(HandoffInfoTable, free_memory_bottom);
        buf[at..at + 8].copy_from_slice(&free_bottom.to_le_bytes());
        let buf: &'a [u8] = buf;
        &buf[..total]
    }
}
