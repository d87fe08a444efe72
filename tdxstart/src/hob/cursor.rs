// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Bounds-checked walk over raw handoff list bytes.

use zerocopy::FromBytes;

use super::*;
use crate::error::HobError;

/// `(buffer, offset)` over an untrusted list. Never reads past `buf`.
#[derive(Debug, Clone)]
pub struct HobCursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

/// One record's header plus exactly `header.length` bytes.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    pub offset: usize,
    pub header: HobHeader,
    pub bytes: &'a [u8],
}

/// A decoded record. Fixed-size kinds are copied out, GUID payloads borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record<'a> {
    Handoff(HandoffInfoTable),
    MemoryAllocation(MemoryAllocation),
    Resource(ResourceDescription),
    Guid { name: Guid, data: &'a [u8] },
    Fv(FirmwareVolume),
    Fv2(FirmwareVolume2),
    Fv3(FirmwareVolume3),
    Cpu(Cpu),
    End,
}

impl<'a> HobCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        HobCursor { buf, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_at_end(&self) -> bool {
        self.offset >= self.buf.len()
    }

    /// Reads the header under the cursor without moving.
    pub fn read_header(&self) -> Result<HobHeader, HobError> {
        let rest = self
            .buf
            .get(self.offset..)
            .ok_or(HobError::Truncated { offset: self.offset })?;
        HobHeader::read_from_prefix(rest)
            .map(|(h, _)| h)
            .map_err(|_| HobError::Truncated { offset: self.offset })
    }

    /// Returns the record under the cursor and steps over it.
    ///
    /// Only checks what is needed to step safely: a readable header, a length
    /// of at least one header, and a body inside the buffer.
    pub fn next_record(&mut self) -> Result<RawRecord<'a>, HobError> {
        let offset = self.offset;
        let header = self.read_header()?;
        let len = usize::from(header.length);
        if len == 0 {
            return Err(HobError::ZeroLength { offset });
        }
        if len < HobHeader::SIZE {
            return Err(HobError::BadLength {
                offset,
                kind: header.kind,
                length: header.length,
                expected: HobHeader::SIZE as u16,
            });
        }
        let bytes = offset
            .checked_add(len)
            .and_then(|end| self.buf.get(offset..end))
            .ok_or(HobError::Truncated { offset })?;
        self.offset = offset + len;
        Ok(RawRecord {
            offset,
            header,
            bytes,
        })
    }
}

fn decode_exact<T: FromBytes>(rec: &RawRecord<'_>) -> Result<T, HobError> {
    let expected = size_of::<T>();
    if rec.bytes.len() != expected {
        return Err(HobError::BadLength {
            offset: rec.offset,
            kind: rec.header.kind,
            length: rec.header.length,
            expected: expected as u16,
        });
    }
    T::read_from_bytes(rec.bytes).map_err(|_| HobError::Truncated { offset: rec.offset })
}

impl<'a> RawRecord<'a> {
    pub fn kind(&self) -> u16 {
        self.header.kind
    }

    /// Decodes into a typed record, checking the kind's exact size.
    pub fn decode(&self) -> Result<Record<'a>, HobError> {
        Ok(match self.header.kind {
            HOB_TYPE_HANDOFF => Record::Handoff(decode_exact(self)?),
            HOB_TYPE_MEMORY_ALLOCATION => Record::MemoryAllocation(decode_exact(self)?),
            HOB_TYPE_RESOURCE_DESCRIPTOR => Record::Resource(decode_exact(self)?),
            HOB_TYPE_FV => Record::Fv(decode_exact(self)?),
            HOB_TYPE_FV2 => Record::Fv2(decode_exact(self)?),
            HOB_TYPE_FV3 => Record::Fv3(decode_exact(self)?),
            HOB_TYPE_CPU => Record::Cpu(decode_exact(self)?),
            HOB_TYPE_END_OF_HOB_LIST => {
                decode_exact::<HobHeader>(self)?;
                Record::End
            }
            HOB_TYPE_GUID_EXTENSION => {
                let (ext, data) = GuidExtension::read_from_prefix(self.bytes).map_err(|_| {
                    HobError::BadLength {
                        offset: self.offset,
                        kind: self.header.kind,
                        length: self.header.length,
                        expected: size_of::<GuidExtension>() as u16,
                    }
                })?;
                Record::Guid {
                    name: ext.name,
                    data,
                }
            }
            kind => {
                return Err(HobError::UnknownKind {
                    offset: self.offset,
                    kind,
                });
            }
        })
    }
}
