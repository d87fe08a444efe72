// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Rebuilds the handoff list for the next stage.
//!
//! The walk mirrors [`process_hob_list`](crate::process::process_hob_list):
//! memory descriptors are charged against the same budget in the same order,
//! so the split point lands exactly where acceptance stopped.

use log::{debug, info, trace};

use crate::error::{BootError, HobError};
use crate::hob::{
    HOB_TYPE_GUID_EXTENSION, HOB_TYPE_MEMORY_ALLOCATION, HobBuilder, HobList,
    MEMORY_TYPE_ACPI_MEMORY_NVS, Record, ResourceAttributes, ResourceDescription, ResourceType,
};
use crate::mem::SIZE_4G;

/// I/O space width reported for every TD.
pub const IO_SPACE_BITS: u8 = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub accepted_records: usize,
    pub unaccepted_records: usize,
    pub copied_records: usize,
}

/// Records the firmware owns and appends after the transferred ones.
#[derive(Debug, Clone, Copy)]
pub struct FirmwareRecords<'a> {
    pub gpaw: u8,
    /// `(base, length)` of each firmware volume.
    pub volumes: &'a [(u64, u64)],
    /// `(base, length)` of the mailbox pages.
    pub mailbox: (u64, u64),
}

fn accepted_attributes(start: u64, length: u64, attrs: ResourceAttributes) -> ResourceAttributes {
    let mut attrs = attrs | ResourceAttributes::TESTED;
    if start + length <= SIZE_4G {
        attrs |= ResourceAttributes::ENCRYPTED;
    }
    attrs
}

fn unaccepted_attributes(attrs: ResourceAttributes) -> ResourceAttributes {
    attrs - (ResourceAttributes::TESTED | ResourceAttributes::ENCRYPTED)
}

/// Emits one memory descriptor, split at the budget if it straddles it.
/// Returns the bytes charged against the budget.
fn transfer_memory(
    res: &ResourceDescription,
    accepted: u64,
    budget: u64,
    out: &mut HobBuilder<'_>,
    summary: &mut TransferSummary,
) -> Result<u64, BootError> {
    let start = res.physical_start;
    let length = res.resource_length;
    let attrs =
        res.attributes() | ResourceAttributes::PRESENT | ResourceAttributes::INITIALIZED;

    if accepted >= budget {
        trace!("[transfer] [{start:#x}, +{length:#x}) left unaccepted");
        out.resource(
            res.owner,
            ResourceType::Unaccepted,
            unaccepted_attributes(attrs),
            start,
            length,
        )?;
        summary.unaccepted_records += 1;
        return Ok(0);
    }

    let room = budget - accepted;
    if length <= room {
        out.resource(
            res.owner,
            ResourceType::SystemMemory,
            accepted_attributes(start, length, attrs),
            start,
            length,
        )?;
        summary.accepted_records += 1;
        return Ok(length);
    }

    debug!(
        "[transfer] splitting [{:#x}, +{:#x}) at {:#x}",
        start,
        length,
        start + room
    );
    out.resource(
        res.owner,
        ResourceType::SystemMemory,
        accepted_attributes(start, room, attrs),
        start,
        room,
    )?;
    out.resource(
        res.owner,
        ResourceType::Unaccepted,
        unaccepted_attributes(attrs),
        start + room,
        length - room,
    )?;
    summary.accepted_records += 1;
    summary.unaccepted_records += 1;
    Ok(room)
}

/// Copies `list` into `out`, recording which memory was accepted.
///
/// Handoff, CPU and firmware volume records are dropped; the builder has
/// already written its own handoff header and the firmware supplies the rest
/// through [`append_firmware_records`].
pub fn transfer_hob_list(
    list: &HobList<'_>,
    budget: u64,
    out: &mut HobBuilder<'_>,
) -> Result<TransferSummary, BootError> {
    let mut summary = TransferSummary::default();
    let mut accepted = 0u64;

    for raw in list.raw_records() {
        match raw.kind() {
            HOB_TYPE_MEMORY_ALLOCATION | HOB_TYPE_GUID_EXTENSION => {
                out.copy_raw(raw.bytes)?;
                summary.copied_records += 1;
                continue;
            }
            _ => {}
        }
        let Record::Resource(res) = raw.decode()? else {
            continue;
        };
        if res.is_memory() {
            if res.resource_length == 0 {
                trace!("[transfer] dropping empty descriptor at {:#x}", res.physical_start);
                continue;
            }
            accepted += transfer_memory(&res, accepted, budget, out, &mut summary)?;
        } else {
            let attrs = res.attributes()
                | ResourceAttributes::PRESENT
                | ResourceAttributes::INITIALIZED;
            let kind = res.kind().ok_or(HobError::BadResourceType {
                offset: raw.offset,
                resource_type: res.resource_type,
            })?;
            out.resource(
                res.owner,
                kind,
                attrs,
                res.physical_start,
                res.resource_length,
            )?;
            summary.copied_records += 1;
        }
    }

    info!(
        "[transfer] {} accepted, {} unaccepted, {} copied",
        summary.accepted_records, summary.unaccepted_records, summary.copied_records
    );
    Ok(summary)
}

/// Appends the CPU, firmware volume and mailbox records.
pub fn append_firmware_records(
    fw: &FirmwareRecords<'_>,
    out: &mut HobBuilder<'_>,
) -> Result<(), BootError> {
    out.cpu(fw.gpaw, IO_SPACE_BITS)?;
    for &(base, length) in fw.volumes {
        out.firmware_volume(base, length)?;
    }
    let (base, length) = fw.mailbox;
    out.memory_allocation(base, length, MEMORY_TYPE_ACPI_MEMORY_NVS)?;
    debug!(
        "[transfer] firmware records: gpaw={} volumes={} mailbox={:#x}",
        fw.gpaw,
        fw.volumes.len(),
        base
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BootContext;
    use crate::hob::validate::tests::ListBytes;
    use crate::hob::{
        BootMode, Guid, GuidExtension, HobHeader, MemoryAllocation, MEMORY_TYPE_BOOT_SERVICES_DATA,
        validate,
    };
    use crate::mem::accept::tests::{FakeTdx, with_units};
    use crate::mem::{LowRegion, SIZE_4K};
    use crate::process::process_hob_list;
    use zerocopy::IntoBytes;

    const MIB: u64 = 1 << 20;

    fn resources(list: &[u8]) -> Vec<ResourceDescription> {
        validate(list)
            .unwrap()
            .records()
            .filter_map(|r| match r {
                Record::Resource(res) => Some(res),
                _ => None,
            })
            .collect()
    }

    fn run(list: &HobList<'_>, budget: u64) -> (Vec<u8>, TransferSummary) {
        let mut buf = vec![0u8; 0x2000];
        let mut out = HobBuilder::new(&mut buf, 0x80_0000, BootMode::FullConfiguration).unwrap();
        let summary = transfer_hob_list(list, budget, &mut out).unwrap();
        (out.finish().to_vec(), summary)
    }

    #[test]
    fn accept_all_end_to_end() {
        let input = ListBytes::default()
            .phit(BootMode::FullConfiguration as u32, 0x10_0000)
            .memory(0, 2 * MIB)
            .memory(0x1_0000_0000, 64 * MIB)
            .end();
        let list = validate(&input.0).unwrap();
        let tdx = FakeTdx::default();
        let acc = with_units(4, &tdx, |ctx: &BootContext<'_, FakeTdx>| {
            process_hob_list(ctx, &list, u64::MAX)
        })
        .unwrap();
        assert_eq!(
            acc.low_region,
            LowRegion {
                start: 0x1000,
                length: 0x1F_F000
            }
        );
        assert!(tdx.is_accepted(0));
        assert!(tdx.is_accepted(0x1_0000_0000 + 64 * MIB - SIZE_4K));

        let (out, summary) = run(&list, acc.budget);
        assert_eq!(summary.accepted_records, 2);
        assert_eq!(summary.unaccepted_records, 0);
        let res = resources(&out);
        assert_eq!(res.len(), 2);
        assert!(
            res.iter()
                .all(|r| r.kind() == Some(ResourceType::SystemMemory))
        );
        let base = ResourceAttributes::PRESENT
            | ResourceAttributes::INITIALIZED
            | ResourceAttributes::TESTED;
        assert_eq!(res[0].attributes(), base | ResourceAttributes::ENCRYPTED);
        assert_eq!(res[1].attributes(), base);
    }

    #[test]
    fn range_crossing_4g_is_not_marked_encrypted() {
        let input = ListBytes::default()
            .phit(BootMode::FullConfiguration as u32, 0x10_0000)
            .memory(0, 0x20_0000)
            .memory(0x20_0000, 0x4_0000_0000)
            .end();
        let list = validate(&input.0).unwrap();
        let (out, summary) = run(&list, u64::MAX);
        assert_eq!(summary.accepted_records, 2);
        assert_eq!(summary.unaccepted_records, 0);

        let res = resources(&out);
        let base = ResourceAttributes::PRESENT
            | ResourceAttributes::INITIALIZED
            | ResourceAttributes::TESTED;
        assert_eq!((res[0].physical_start, res[0].resource_length), (0, 0x20_0000));
        assert_eq!(res[0].attributes(), base | ResourceAttributes::ENCRYPTED);
        assert_eq!(
            (res[1].physical_start, res[1].resource_length),
            (0x20_0000, 0x4_0000_0000)
        );
        assert_eq!(res[1].kind(), Some(ResourceType::SystemMemory));
        assert_eq!(res[1].attributes(), base);
    }

    #[test]
    fn empty_memory_descriptors_are_dropped() {
        let input = ListBytes::default()
            .phit(BootMode::FullConfiguration as u32, 0x10_0000)
            .memory(0, 2 * MIB)
            .memory(0x40_0000, 0)
            .memory(0x1_0000_0000, 4 * MIB)
            .end();
        let list = validate(&input.0).unwrap();
        let (out, summary) = run(&list, 2 * MIB);
        assert_eq!(summary.accepted_records, 1);
        assert_eq!(summary.unaccepted_records, 1);

        let spans: Vec<_> = resources(&out)
            .iter()
            .map(|r| (r.kind(), r.physical_start, r.resource_length))
            .collect();
        assert_eq!(
            spans,
            [
                (Some(ResourceType::SystemMemory), 0, 2 * MIB),
                (Some(ResourceType::Unaccepted), 0x1_0000_0000, 4 * MIB),
            ]
        );
    }

    #[test]
    fn budget_split_leaves_unaccepted_tail() {
        let input = ListBytes::default()
            .phit(BootMode::FullConfiguration as u32, 0x10_0000)
            .memory(0, 8 * MIB)
            .memory(0x1_0000_0000, 64 * MIB)
            .memory(0x2_0000_0000, 16 * MIB)
            .end();
        let list = validate(&input.0).unwrap();
        let (out, summary) = run(&list, 40 * MIB);
        assert_eq!(summary.accepted_records, 2);
        assert_eq!(summary.unaccepted_records, 2);

        let res = resources(&out);
        let spans: Vec<_> = res
            .iter()
            .map(|r| (r.kind(), r.physical_start, r.resource_length))
            .collect();
        assert_eq!(
            spans,
            [
                (Some(ResourceType::SystemMemory), 0, 8 * MIB),
                (Some(ResourceType::SystemMemory), 0x1_0000_0000, 32 * MIB),
                (
                    Some(ResourceType::Unaccepted),
                    0x1_0000_0000 + 32 * MIB,
                    32 * MIB
                ),
                (Some(ResourceType::Unaccepted), 0x2_0000_0000, 16 * MIB),
            ]
        );
        for r in &res[2..] {
            assert!(!r.attributes().contains(ResourceAttributes::TESTED));
            assert!(!r.attributes().contains(ResourceAttributes::ENCRYPTED));
            assert!(r.attributes().contains(ResourceAttributes::PRESENT));
        }
    }

    #[test]
    fn copies_allocations_and_guids_and_drops_vmm_records() {
        let alloc = MemoryAllocation {
            header: HobHeader::new(HOB_TYPE_MEMORY_ALLOCATION, size_of::<MemoryAllocation>()),
            name: Guid::from_fields(1, 2, 3, [4; 8]),
            memory_base_address: 0x80_0000,
            memory_length: 0x1000,
            memory_type: MEMORY_TYPE_BOOT_SERVICES_DATA,
            reserved: [0; 4],
        };
        let ext = GuidExtension {
            header: HobHeader::new(HOB_TYPE_GUID_EXTENSION, 32),
            name: Guid::from_fields(5, 6, 7, [8; 8]),
        };
        let mut cpu = [0u8; 16];
        cpu[..8].copy_from_slice(HobHeader::new(crate::hob::HOB_TYPE_CPU, 16).as_bytes());
        cpu[8] = 52;
        let input = ListBytes::default()
            .phit(BootMode::FullConfiguration as u32, 0x10_0000)
            .raw(alloc.as_bytes())
            .raw(&cpu)
            .raw(ext.as_bytes())
            .raw(&[0x5a; 8])
            .resource(ResourceType::MemoryMappedIo as u32, 0, 0xFEC0_0000, 0x1000)
            .end();
        let list = validate(&input.0).unwrap();
        let (out, summary) = run(&list, u64::MAX);
        assert_eq!(summary.copied_records, 3);

        let out = validate(&out).unwrap();
        let recs: Vec<_> = out.records().collect();
        assert_eq!(recs.len(), 4);
        assert!(matches!(recs[0], Record::Handoff(_)));
        assert_eq!(recs[1], Record::MemoryAllocation(alloc));
        assert_eq!(
            recs[2],
            Record::Guid {
                name: ext.name,
                data: &[0x5a; 8]
            }
        );
        match recs[3] {
            Record::Resource(r) => {
                assert_eq!(r.kind(), Some(ResourceType::MemoryMappedIo));
                assert_eq!(
                    r.attributes(),
                    ResourceAttributes::PRESENT | ResourceAttributes::INITIALIZED
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn firmware_records_are_appended() {
        let mut buf = vec![0u8; 0x400];
        let mut out = HobBuilder::new(&mut buf, 0, BootMode::FullConfiguration).unwrap();
        let fw = FirmwareRecords {
            gpaw: 52,
            volumes: &[(0xFF00_0000, 0x20_0000), (0xFFE0_0000, 0x10_0000)],
            mailbox: (0x7E_0000, 0x2000),
        };
        append_firmware_records(&fw, &mut out).unwrap();
        let bytes = out.finish();
        let recs: Vec<_> = validate(bytes).unwrap().records().collect();
        assert_eq!(recs.len(), 5);
        match recs[1] {
            Record::Cpu(cpu) => {
                assert_eq!(cpu.size_of_memory_space, 52);
                assert_eq!(cpu.size_of_io_space, IO_SPACE_BITS);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(recs[3], Record::Fv(fv) if fv.base_address == 0xFFE0_0000));
        match recs[4] {
            Record::MemoryAllocation(m) => {
                assert_eq!(m.memory_base_address, 0x7E_0000);
                assert_eq!(m.memory_type, MEMORY_TYPE_ACPI_MEMORY_NVS);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
