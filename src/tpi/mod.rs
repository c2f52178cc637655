// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The TPI (type info) stream and the CodeView type resolver.

use std::fmt;

use crate::common::*;

mod builtin;
pub(crate) mod constants;
mod header;
mod resolve;

pub use self::builtin::builtin_type_name;
pub use self::header::{TpiHeader, TPI_VERSION_V70, TPI_VERSION_V80};
pub use self::resolve::{TypeBody, TypeMember, TypeResolver};

/// Type indices below this value encode built-in types.
pub const TYPE_INDEX_BEGIN: TypeIndex = 0x1000;

/// Location of one record's payload within the owned record buffer.
#[derive(Debug, Copy, Clone)]
struct RecordLocation {
    offset: u32,
    length: u16,
    kind: u16,
}

/// A single type record.
///
/// `data` is the payload following the `u16` kind and borrows from the
/// parent [`TypeStream`].
#[derive(Copy, Clone, PartialEq)]
pub struct TypeRecord<'t> {
    pub index: TypeIndex,
    pub kind: u16,
    pub data: &'t [u8],
}

impl<'t> fmt::Debug for TypeRecord<'t> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TypeRecord{{ index: 0x{:x}, kind: 0x{:04x} [{} bytes] }}",
            self.index,
            self.kind,
            self.data.len()
        )
    }
}

/// The parsed TPI stream: the header plus an index-addressed record arena.
///
/// Records cross-reference each other by type index (a structure's field
/// list, a pointer's underlying type), so lookup is by index rather than by
/// reference; the arena maps each index in
/// `[type_index_begin, type_index_end)` to its payload slice.
#[derive(Debug)]
pub struct TypeStream {
    data: Vec<u8>,
    header: TpiHeader,
    body_start: usize,
    locations: Vec<Option<RecordLocation>>,
}

impl TypeStream {
    /// Parses the TPI stream. Versions other than V70 and V80 are rejected.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let mut buf = ParseBuffer::from(data.as_slice());
        let header = TpiHeader::parse(&mut buf)?;
        let body_start = buf.pos();

        let body_end = body_start
            .saturating_add(header.type_record_bytes as usize)
            .min(data.len());
        let body = &data[body_start..body_end];

        let count = (header.type_index_end - header.type_index_begin) as usize;
        let mut locations: Vec<Option<RecordLocation>> = Vec::with_capacity(count.min(0x10_0000));

        let mut offset = 0usize;
        while locations.len() < count && offset + 2 <= body.len() {
            let length = u16::from(body[offset]) | (u16::from(body[offset + 1]) << 8);
            offset += 2;

            // a record too short to hold its kind still consumes a type
            // index; keep scanning
            if length < 2 {
                log::debug!(
                    "TPI record 0x{:x} has impossible length {}",
                    header.type_index_begin + locations.len() as u32,
                    length
                );
                locations.push(None);
                continue;
            }

            if offset + length as usize > body.len() {
                log::warn!(
                    "TPI record at offset {} has length {} past the stream end",
                    offset - 2,
                    length
                );
                break;
            }

            let kind = u16::from(body[offset]) | (u16::from(body[offset + 1]) << 8);
            locations.push(Some(RecordLocation {
                offset: (offset + 2) as u32,
                length: length - 2,
                kind,
            }));
            offset += length as usize;
        }

        Ok(TypeStream {
            data,
            header,
            body_start,
            locations,
        })
    }

    /// The stream header.
    pub fn header(&self) -> &TpiHeader {
        &self.header
    }

    /// The first type index described by this stream.
    pub fn type_index_begin(&self) -> TypeIndex {
        self.header.type_index_begin
    }

    /// One past the last type index described by this stream.
    pub fn type_index_end(&self) -> TypeIndex {
        self.header.type_index_end
    }

    /// The number of records actually parsed.
    pub fn len(&self) -> usize {
        self.locations.iter().filter(|l| l.is_some()).count()
    }

    /// Returns whether the stream holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a record by type index. Built-in indices and indices outside
    /// the stream's range return `None`.
    pub fn type_by_index(&self, index: TypeIndex) -> Option<TypeRecord<'_>> {
        if index < self.header.type_index_begin || index >= self.header.type_index_end {
            return None;
        }

        let ordinal = (index - self.header.type_index_begin) as usize;
        let location = self.locations.get(ordinal).copied().flatten()?;

        let start = self.body_start + location.offset as usize;
        let end = start + location.length as usize;
        Some(TypeRecord {
            index,
            kind: location.kind,
            data: &self.data[start..end],
        })
    }

    /// Iterates all parsed records in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = TypeRecord<'_>> {
        let begin = self.header.type_index_begin;
        (0..self.locations.len() as u32).filter_map(move |ordinal| self.type_by_index(begin + ordinal))
    }

    /// Returns a resolver rendering type indices against this stream.
    pub fn resolver(&self) -> TypeResolver<'_> {
        TypeResolver::new(self)
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::header::TPI_VERSION_V80;

    /// Assembles a TPI stream around a raw record body declaring `count`
    /// type indices from 0x1000 upward.
    pub(crate) fn tpi_stream_raw(count: u32, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&TPI_VERSION_V80.to_le_bytes());
        data.extend_from_slice(&56u32.to_le_bytes());
        data.extend_from_slice(&0x1000u32.to_le_bytes());
        data.extend_from_slice(&(0x1000 + count).to_le_bytes());
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(&0xffffu16.to_le_bytes());
        data.extend_from_slice(&0xffffu16.to_le_bytes());
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&0x3ffffu32.to_le_bytes());
        for _ in 0..6 {
            data.extend_from_slice(&0u32.to_le_bytes());
        }
        data.extend_from_slice(body);
        data
    }

    /// Assembles a TPI stream from `(kind, payload)` records, assigning
    /// indices from 0x1000 upward.
    pub(crate) fn tpi_stream(records: &[(u16, Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (kind, payload) in records {
            let length = (payload.len() + 2) as u16;
            body.extend_from_slice(&length.to_le_bytes());
            body.extend_from_slice(&kind.to_le_bytes());
            body.extend_from_slice(payload);
        }

        tpi_stream_raw(records.len() as u32, &body)
    }

    /// An `LF_POINTER` payload: underlying type plus attribute word.
    pub(crate) fn pointer_payload(underlying: u32, attributes: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&underlying.to_le_bytes());
        payload.extend_from_slice(&attributes.to_le_bytes());
        payload
    }
}
