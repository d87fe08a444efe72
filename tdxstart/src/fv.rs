// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Firmware volume header checks.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::MeasureError;
use crate::hob::Guid;

/// `_FVH`
pub const FV_SIGNATURE: u32 = u32::from_le_bytes(*b"_FVH");

/// Header plus the mandatory terminating block-map entry.
pub const FV_HEADER_MIN: usize = size_of::<FvHeader>() + 8;

/// Name GUID, ext header size, then at least one entry header.
const FV_EXT_HEADER_SIZE: usize = 20;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FvHeader {
    pub zero_vector: [u8; 16],
    pub file_system: Guid,
    pub fv_length: u64,
    pub signature: u32,
    pub attributes: u32,
    pub header_length: u16,
    pub checksum: u16,
    pub ext_header_offset: u16,
    pub reserved: u8,
    pub revision: u8,
}

const _: () = assert!(size_of::<FvHeader>() == 56);

fn sum16(bytes: &[u8]) -> u16 {
    bytes
        .chunks_exact(2)
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])))
}

/// Checks the signature and header checksum of the volume image at `base`.
pub fn check_volume(base: u64, image: &[u8]) -> Result<FvHeader, MeasureError> {
    let (hdr, _) =
        FvHeader::read_from_prefix(image).map_err(|_| MeasureError::BadSignature { base })?;
    if hdr.signature != FV_SIGNATURE {
        return Err(MeasureError::BadSignature { base });
    }
    let len = usize::from(hdr.header_length);
    if len < FV_HEADER_MIN || len % 2 != 0 || len > image.len() {
        return Err(MeasureError::BadHeaderLength {
            base,
            length: hdr.header_length,
        });
    }
    let sum = sum16(&image[..len]);
    if sum != 0 {
        return Err(MeasureError::BadChecksum {
            base,
            found: hdr.checksum,
            expected: hdr.checksum.wrapping_sub(sum),
        });
    }
    Ok(hdr)
}

/// Name GUID from the extended header, if the image carries a usable one.
///
/// The image is untrusted; every offset is checked against `image.len()`.
pub fn fv_name(image: &[u8]) -> Option<Guid> {
    if image.len() < FV_HEADER_MIN {
        return None;
    }
    let (hdr, _) = FvHeader::read_from_prefix(image).ok()?;
    let ext = usize::from(hdr.ext_header_offset);
    if ext < FV_HEADER_MIN || ext + FV_EXT_HEADER_SIZE > image.len() {
        return None;
    }
    let name: [u8; 16] = image[ext..ext + 16].try_into().ok()?;
    Some(Guid::from_bytes(name))
}
