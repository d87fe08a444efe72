// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Single-pass structural validation of the VMM-supplied list.
//!
//! The list is hostile input. Nothing downstream touches it until this pass
//! has walked every record up to the end marker; the only way to get a
//! [`HobList`] is through [`validate`].

use log::{debug, error};

use super::*;
use crate::error::HobError;
use crate::mem::{SIZE_4K, is_aligned};

/// Upper bound on records in one list.
pub const MAX_RECORDS: usize = 4096;

/// A list that passed [`validate`]. Borrowed bytes end with the end marker.
#[derive(Debug, Clone, Copy)]
pub struct HobList<'a> {
    buf: &'a [u8],
    end_offset: usize,
}

impl<'a> HobList<'a> {
    /// The validated bytes, end marker included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    /// Offset of the end marker, which is also the measured length.
    pub fn end_offset(&self) -> usize {
        self.end_offset
    }

    pub fn records(&self) -> Records<'a> {
        Records {
            cursor: HobCursor::new(self.buf),
        }
    }

    /// Undecoded records, end marker excluded. Used to copy records through.
    pub fn raw_records(&self) -> RawRecords<'a> {
        RawRecords {
            cursor: HobCursor::new(&self.buf[..self.end_offset]),
        }
    }
}

pub struct RawRecords<'a> {
    cursor: HobCursor<'a>,
}

impl<'a> Iterator for RawRecords<'a> {
    type Item = RawRecord<'a>;

    fn next(&mut self) -> Option<RawRecord<'a>> {
        if self.cursor.is_at_end() {
            return None;
        }
        self.cursor.next_record().ok()
    }
}

/// Iterates the typed records of a validated list, end marker excluded.
pub struct Records<'a> {
    cursor: HobCursor<'a>,
}

impl<'a> Iterator for Records<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Record<'a>> {
        // Validation already proved every step below succeeds.
        let rec = self.cursor.next_record().ok()?.decode().ok()?;
        match rec {
            Record::End => None,
            rec => Some(rec),
        }
    }
}

fn expect_len(rec: &RawRecord<'_>) -> Result<(), HobError> {
    match fixed_size(rec.header.kind) {
        Some(expected) if usize::from(rec.header.length) != expected => Err(HobError::BadLength {
            offset: rec.offset,
            kind: rec.header.kind,
            length: rec.header.length,
            expected: expected as u16,
        }),
        _ => Ok(()),
    }
}

fn check_handoff(offset: usize, phit: &HandoffInfoTable) -> Result<(), HobError> {
    if BootMode::from_raw(phit.boot_mode).is_none() {
        return Err(HobError::BadBootMode {
            offset,
            mode: phit.boot_mode,
        });
    }
    if !is_aligned(phit.free_memory_top, SIZE_4K) {
        return Err(HobError::Misaligned {
            offset,
            value: phit.free_memory_top,
        });
    }
    Ok(())
}

fn check_resource(offset: usize, res: &ResourceDescription) -> Result<(), HobError> {
    if res.resource_type >= RESOURCE_TYPE_MAX {
        return Err(HobError::BadResourceType {
            offset,
            resource_type: res.resource_type,
        });
    }
    if ResourceAttributes::from_bits(res.resource_attribute).is_none() {
        return Err(HobError::BadResourceAttributes {
            offset,
            bits: res.resource_attribute,
        });
    }
    if res
        .physical_start
        .checked_add(res.resource_length)
        .is_none()
    {
        return Err(HobError::RangeOverflow {
            offset,
            start: res.physical_start,
            length: res.resource_length,
        });
    }
    if res.is_memory() {
        for value in [res.physical_start, res.resource_length] {
            if !is_aligned(value, SIZE_4K) {
                return Err(HobError::Misaligned { offset, value });
            }
        }
    }
    Ok(())
}

fn check_record(rec: &RawRecord<'_>) -> Result<bool, HobError> {
    if rec.header.reserved != 0 {
        return Err(HobError::ReservedNonZero { offset: rec.offset });
    }
    match rec.header.kind {
        HOB_TYPE_HANDOFF
        | HOB_TYPE_MEMORY_ALLOCATION
        | HOB_TYPE_RESOURCE_DESCRIPTOR
        | HOB_TYPE_FV
        | HOB_TYPE_FV2
        | HOB_TYPE_FV3
        | HOB_TYPE_CPU
        | HOB_TYPE_END_OF_HOB_LIST => expect_len(rec)?,
        HOB_TYPE_GUID_EXTENSION => {}
        kind => {
            return Err(HobError::UnknownKind {
                offset: rec.offset,
                kind,
            });
        }
    }

    match rec.decode()? {
        Record::Handoff(phit) => check_handoff(rec.offset, &phit)?,
        Record::Resource(res) => check_resource(rec.offset, &res)?,
        Record::Cpu(cpu) => {
            if cpu.reserved != [0; 6] {
                return Err(HobError::CpuReservedNonZero { offset: rec.offset });
            }
        }
        Record::End => return Ok(true),
        Record::MemoryAllocation(_)
        | Record::Guid { .. }
        | Record::Fv(_)
        | Record::Fv2(_)
        | Record::Fv3(_) => {}
    }
    Ok(false)
}

fn walk(buf: &[u8]) -> Result<usize, HobError> {
    let mut cursor = HobCursor::new(buf);
    for _ in 0..MAX_RECORDS {
        if cursor.is_at_end() {
            return Err(HobError::MissingEnd {
                offset: cursor.offset(),
            });
        }
        let rec = cursor.next_record()?;
        debug!(
            "[hob] {:#06x} kind={:#06x} len={}",
            rec.offset, rec.header.kind, rec.header.length
        );
        if check_record(&rec)? {
            return Ok(rec.offset);
        }
    }
    Err(HobError::TooManyRecords { limit: MAX_RECORDS })
}

/// Walks `buf` once and accepts it only if every record up to and including
/// the end marker is well formed.
pub fn validate(buf: &[u8]) -> Result<HobList<'_>, HobError> {
    match walk(buf) {
        Ok(end_offset) => {
            debug!("[hob] list ok, {} bytes", end_offset + HobHeader::SIZE);
            Ok(HobList {
                buf: &buf[..end_offset + HobHeader::SIZE],
                end_offset,
            })
        }
        Err(e) => {
            error!("[hob] rejected: {e}");
            Err(e)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    /// Hand-assembled input lists.
    #[derive(Default)]
    pub(crate) struct ListBytes(pub Vec<u8>);

    impl ListBytes {
        pub fn phit(mut self, boot_mode: u32, free_memory_top: u64) -> Self {
            let phit = HandoffInfoTable {
                header: HobHeader::new(HOB_TYPE_HANDOFF, size_of::<HandoffInfoTable>()),
                version: HANDOFF_VERSION,
                boot_mode,
                memory_top: 0,
                memory_bottom: 0,
                free_memory_top,
                free_memory_bottom: 0,
                end_of_hob_list: 0,
            };
            self.0.extend_from_slice(phit.as_bytes());
            self
        }

        pub fn resource(mut self, kind: u32, attr: u32, start: u64, len: u64) -> Self {
            let res = ResourceDescription {
                header: HobHeader::new(HOB_TYPE_RESOURCE_DESCRIPTOR, size_of::<ResourceDescription>()),
                owner: Guid::default(),
                resource_type: kind,
                resource_attribute: attr,
                physical_start: start,
                resource_length: len,
            };
            self.0.extend_from_slice(res.as_bytes());
            self
        }

        pub fn memory(self, start: u64, len: u64) -> Self {
            self.resource(ResourceType::SystemMemory as u32, 0, start, len)
        }

        pub fn raw(mut self, bytes: &[u8]) -> Self {
            self.0.extend_from_slice(bytes);
            self
        }

        pub fn end(mut self) -> Self {
            self.0
                .extend_from_slice(HobHeader::new(HOB_TYPE_END_OF_HOB_LIST, 8).as_bytes());
            self
        }
    }

    fn good() -> ListBytes {
        ListBytes::default()
            .phit(BootMode::FullConfiguration as u32, 0x10_0000)
            .memory(0, 0x20_0000)
    }

    #[test]
    fn accepts_well_formed_list() {
        let cpu = Cpu {
            header: HobHeader::new(HOB_TYPE_CPU, 16),
            size_of_memory_space: 52,
            size_of_io_space: 16,
            reserved: [0; 6],
        };
        let fv = FirmwareVolume {
            header: HobHeader::new(HOB_TYPE_FV, 24),
            base_address: 0xFF00_0000,
            length: 0x10_0000,
        };
        let ext = GuidExtension {
            header: HobHeader::new(HOB_TYPE_GUID_EXTENSION, 32),
            name: Guid::from_fields(9, 9, 9, [9; 8]),
        };
        let list = good()
            .resource(ResourceType::MemoryMappedIo as u32, 0x1, 0xFEC0_0000, 0x1000)
            .raw(cpu.as_bytes())
            .raw(fv.as_bytes())
            .raw(ext.as_bytes())
            .raw(&[7; 8])
            .end()
            .raw(&[0xff; 40]);
        let v = validate(&list.0).unwrap();
        assert_eq!(v.end_offset(), 56 + 48 + 48 + 16 + 24 + 32);
        assert_eq!(v.as_bytes().len(), v.end_offset() + 8);
        assert_eq!(v.records().count(), 6);
        let kinds: Vec<u16> = v.raw_records().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            [
                HOB_TYPE_HANDOFF,
                HOB_TYPE_RESOURCE_DESCRIPTOR,
                HOB_TYPE_RESOURCE_DESCRIPTOR,
                HOB_TYPE_CPU,
                HOB_TYPE_FV,
                HOB_TYPE_GUID_EXTENSION
            ]
        );
    }

    #[test]
    fn rejects_reserved_header_bits() {
        let mut list = good().end();
        list.0[56 + 4] = 1;
        assert_eq!(
            validate(&list.0).err(),
            Some(HobError::ReservedNonZero { offset: 56 })
        );
    }

    #[test]
    fn rejects_resource_type_out_of_range() {
        let list = good().resource(RESOURCE_TYPE_MAX, 0, 0x1000, 0x1000).end();
        assert!(matches!(
            validate(&list.0),
            Err(HobError::BadResourceType { resource_type: 8, .. })
        ));
    }

    #[test]
    fn rejects_unknown_attribute_bits() {
        let list = good().resource(0, 0x1000_0000, 0x1000, 0x1000).end();
        assert!(matches!(
            validate(&list.0),
            Err(HobError::BadResourceAttributes { .. })
        ));
    }

    #[test]
    fn rejects_length_mismatch() {
        // A CPU record claiming 24 bytes.
        let mut cpu = [0u8; 24];
        cpu[..8].copy_from_slice(HobHeader::new(HOB_TYPE_CPU, 24).as_bytes());
        let list = good().raw(&cpu).end();
        assert!(matches!(
            validate(&list.0),
            Err(HobError::BadLength { kind: HOB_TYPE_CPU, expected: 16, .. })
        ));

        let mut phit = good().end();
        phit.0[2] = 48;
        assert!(matches!(validate(&phit.0), Err(HobError::BadLength { .. })));
    }

    #[test]
    fn rejects_bad_handoff_fields() {
        let list = ListBytes::default().phit(0x08, 0x10_0000).end();
        assert_eq!(
            validate(&list.0).err(),
            Some(HobError::BadBootMode { offset: 0, mode: 8 })
        );
        let list = ListBytes::default().phit(0x20, 0x10_0800).end();
        assert!(matches!(validate(&list.0), Err(HobError::Misaligned { .. })));
    }

    #[test]
    fn rejects_dirty_cpu_reserved_bytes() {
        let cpu = Cpu {
            header: HobHeader::new(HOB_TYPE_CPU, 16),
            size_of_memory_space: 48,
            size_of_io_space: 16,
            reserved: [0, 0, 0, 1, 0, 0],
        };
        let list = good().raw(cpu.as_bytes()).end();
        assert!(matches!(
            validate(&list.0),
            Err(HobError::CpuReservedNonZero { .. })
        ));
    }

    #[test]
    fn rejects_unknown_kinds() {
        for kind in [HOB_TYPE_MEMORY_POOL, HOB_TYPE_UEFI_CAPSULE, HOB_TYPE_UNUSED, 0x0042] {
            let list = good().raw(HobHeader::new(kind, 8).as_bytes()).end();
            assert_eq!(
                validate(&list.0).err(),
                Some(HobError::UnknownKind { offset: 104, kind })
            );
        }
    }

    #[test]
    fn rejects_unterminated_and_wrapping_lists() {
        assert_eq!(
            validate(&good().0).err(),
            Some(HobError::MissingEnd { offset: 104 })
        );
        assert!(matches!(validate(&[]), Err(HobError::MissingEnd { offset: 0 })));

        let wraps = good().memory(u64::MAX & !0xfff, 0x2000).end();
        assert!(matches!(validate(&wraps.0), Err(HobError::RangeOverflow { .. })));

        let odd = good().memory(0x1000, 0x1800).end();
        assert!(matches!(
            validate(&odd.0),
            Err(HobError::Misaligned { value: 0x1800, .. })
        ));
    }

    #[test]
    fn record_bound_is_enforced() {
        let mut list = ListBytes::default();
        for _ in 0..MAX_RECORDS {
            list = list.raw(
                FirmwareVolume {
                    header: HobHeader::new(HOB_TYPE_FV, 24),
                    base_address: 0,
                    length: 0,
                }
                .as_bytes(),
            );
        }
        let list = list.end();
        assert_eq!(
            validate(&list.0).err(),
            Some(HobError::TooManyRecords { limit: MAX_RECORDS })
        );
    }
}
