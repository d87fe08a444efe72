// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Measurement event requests.
//!
//! This module only describes what has to be measured: event data plus the
//! byte range to hash. Hashing and register extension belong to whoever
//! implements [`MeasurementSink`]. The firmware entry keeps requests in a
//! [`MeasurementLog`] and forwards them in the output list.

use core::fmt::Write;

use heapless::{String, Vec as HVec};
use log::{debug, error};
use zerocopy::{Immutable, IntoBytes, KnownLayout};

use crate::error::{BootError, MeasureError};
use crate::fv::{check_volume, fv_name};
use crate::hob::{Guid, HobBuilder, HobList};

pub const EV_EFI_PLATFORM_FIRMWARE_BLOB2: u32 = 0x8000_000A;
pub const EV_EFI_HANDOFF_TABLES2: u32 = 0x8000_000B;

/// Firmware code and the handoff tables both land in PCR 1.
pub const PCR_PLATFORM_CONFIG: u32 = 1;

/// Vendor GUID of the handoff-list configuration table entry.
pub const TDX_TABLE_GUID: Guid = Guid::from_fields(
    0x93bb_96af,
    0xb9f2,
    0x4eb8,
    [0x94, 0x62, 0xe0, 0xba, 0x74, 0x56, 0x42, 0x36],
);

/// Names the GUID records that carry deferred events to the next stage.
pub const TD_EVENT_GUID: Guid = Guid::from_fields(
    0x20f8_fd36,
    0x6d00,
    0x40fb,
    [0xb7, 0x04, 0xd1, 0x2c, 0x15, 0x3c, 0x62, 0xeb],
);

pub const MAX_EVENT_DATA: usize = 64;
pub const MAX_EVENTS: usize = 8;

const TABLE_DESCRIPTION: &[u8; 9] = b"TdxTable\0";
/// `Fv(` + 36 GUID characters + `)` + NUL.
const FV_DESCRIPTION_LEN: usize = 41;
const FV_PLACEHOLDER: &str = "Fv(XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX)";

pub type EventData = HVec<u8, MAX_EVENT_DATA>;

/// One event to log and the range whose digest goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementRequest {
    pub pcr_index: u32,
    pub event_type: u32,
    pub event_data: EventData,
    pub hash_base: u64,
    pub hash_len: u64,
}

impl MeasurementRequest {
    pub fn rtmr_index(&self) -> Option<u8> {
        rtmr_index(self.pcr_index)
    }
}

/// Consumer of measurement requests.
pub trait MeasurementSink {
    fn submit(&mut self, request: MeasurementRequest) -> Result<(), MeasureError>;
}

/// Maps a TPM PCR index onto the TD runtime measurement register.
pub fn rtmr_index(pcr: u32) -> Option<u8> {
    match pcr {
        1 | 7 => Some(0),
        2..=6 => Some(1),
        8..=15 => Some(2),
        _ => None,
    }
}

fn put(data: &mut EventData, bytes: &[u8]) -> Result<(), MeasureError> {
    data.extend_from_slice(bytes).map_err(|_| MeasureError::EventTooLarge(MAX_EVENT_DATA))
}

/// Event for the validated input list, loaded at `list_base`.
///
/// The end marker is not part of the hashed range.
pub fn handoff_event(
    list: &HobList<'_>,
    list_base: u64,
) -> Result<MeasurementRequest, MeasureError> {
    let mut data = EventData::new();
    put(&mut data, &[TABLE_DESCRIPTION.len() as u8])?;
    put(&mut data, TABLE_DESCRIPTION)?;
    put(&mut data, &1u64.to_le_bytes())?;
    put(&mut data, TDX_TABLE_GUID.as_bytes())?;
    put(&mut data, &list_base.to_le_bytes())?;
    Ok(MeasurementRequest {
        pcr_index: PCR_PLATFORM_CONFIG,
        event_type: EV_EFI_HANDOFF_TABLES2,
        event_data: data,
        hash_base: list_base,
        hash_len: list.end_offset() as u64,
    })
}

/// Event for the volume at `base`; `length` bytes of it are hashed.
///
/// `image` is read only to find the volume name.
pub fn firmware_volume_event(
    base: u64,
    length: u64,
    image: &[u8],
) -> Result<MeasurementRequest, MeasureError> {
    let mut desc: String<FV_DESCRIPTION_LEN> = String::new();
    let written = match fv_name(image) {
        Some(name) => write!(desc, "Fv({name})").map_err(|_| ()),
        None => desc.push_str(FV_PLACEHOLDER).map_err(|_| ()),
    };
    written.map_err(|()| MeasureError::EventTooLarge(FV_DESCRIPTION_LEN))?;
    let mut text = [0u8; FV_DESCRIPTION_LEN];
    text[..desc.len()].copy_from_slice(desc.as_bytes());

    let mut data = EventData::new();
    put(&mut data, &[FV_DESCRIPTION_LEN as u8])?;
    put(&mut data, &text)?;
    put(&mut data, &base.to_le_bytes())?;
    put(&mut data, &length.to_le_bytes())?;
    Ok(MeasurementRequest {
        pcr_index: PCR_PLATFORM_CONFIG,
        event_type: EV_EFI_PLATFORM_FIRMWARE_BLOB2,
        event_data: data,
        hash_base: base,
        hash_len: length,
    })
}

/// Verifies the configuration volume, then measures its first `raw_len`
/// bytes.
pub fn config_volume_event(
    base: u64,
    image: &[u8],
    raw_len: u64,
) -> Result<MeasurementRequest, MeasureError> {
    if let Err(e) = check_volume(base, image) {
        error!("[measure] configuration volume at {base:#x}: {e}");
        return Err(e);
    }
    firmware_volume_event(base, raw_len, image)
}

/// Header of a deferred event record; event data follows.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, Immutable, KnownLayout)]
struct DeferredEvent {
    pcr_index: u32,
    event_type: u32,
    hash_base: u64,
    hash_len: u64,
    event_size: u32,
    reserved: u32,
}

const DEFERRED_EVENT_MAX: usize = size_of::<DeferredEvent>() + MAX_EVENT_DATA;

/// Bounded in-memory sink.
#[derive(Debug, Default)]
pub struct MeasurementLog {
    events: HVec<MeasurementRequest, MAX_EVENTS>,
}

impl MeasurementLog {
    pub const fn new() -> Self {
        MeasurementLog {
            events: HVec::new(),
        }
    }

    pub fn events(&self) -> &[MeasurementRequest] {
        &self.events
    }

    /// Writes one `TD_EVENT_GUID` record per request, in submission order.
    pub fn emit_hobs(&self, out: &mut HobBuilder<'_>) -> Result<(), BootError> {
        for ev in &self.events {
            let hdr = DeferredEvent {
                pcr_index: ev.pcr_index,
                event_type: ev.event_type,
                hash_base: ev.hash_base,
                hash_len: ev.hash_len,
                event_size: ev.event_data.len() as u32,
                reserved: 0,
            };
            let mut payload: HVec<u8, DEFERRED_EVENT_MAX> = HVec::new();
            payload
                .extend_from_slice(hdr.as_bytes())
                .and_then(|()| payload.extend_from_slice(&ev.event_data))
                .map_err(|_| MeasureError::EventTooLarge(DEFERRED_EVENT_MAX))?;
            out.guid(TD_EVENT_GUID, &payload)?;
        }
        Ok(())
    }
}

impl MeasurementSink for MeasurementLog {
    fn submit(&mut self, request: MeasurementRequest) -> Result<(), MeasureError> {
        debug!(
            "[measure] pcr {} type {:#x} [{:#x}, +{:#x})",
            request.pcr_index, request.event_type, request.hash_base, request.hash_len
        );
        self.events.push(request).map_err(|_| MeasureError::LogFull)
    }
}
