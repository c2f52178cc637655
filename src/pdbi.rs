// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

// PDBI = the PDB info stream, stream 1.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use uuid::Uuid;

use crate::common::*;

/// The version of the PDB info stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PdbiVersion {
    VC70,
    VC80,
    VC110,
    VC140,
    Other(u32),
}

impl From<u32> for PdbiVersion {
    fn from(v: u32) -> Self {
        match v {
            20000404 => PdbiVersion::VC70,
            20030901 => PdbiVersion::VC80,
            20091201 => PdbiVersion::VC110,
            20140508 => PdbiVersion::VC140,
            _ => PdbiVersion::Other(v),
        }
    }
}

/// The parsed PDB info stream: identity of the PDB plus the named-stream map.
#[derive(Debug, Clone)]
pub struct PdbInformation {
    /// Raw version value; see [`PdbiVersion`].
    pub version: u32,
    /// Timestamp of PDB creation.
    pub signature: u32,
    /// Number of times the PDB has been written.
    pub age: u32,
    /// Unique identifier matched against the binary.
    pub guid: Uuid,
    /// Stream indices by name (e.g. `"/names"`).
    pub named_streams: BTreeMap<String, u32>,
}

impl PdbInformation {
    /// Parses the PDB info stream.
    ///
    /// The named-stream map is optional: any short read while decoding it
    /// yields an empty map rather than an error.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = ParseBuffer::from(data);

        let version = buf.parse_u32()?;
        let signature = buf.parse_u32()?;
        let age = buf.parse_u32()?;
        let guid_bytes = buf.take(16)?;
        let mut guid_buf = ParseBuffer::from(guid_bytes);
        let guid = Uuid::from_fields(
            guid_buf.parse_u32()?,
            guid_buf.parse_u16()?,
            guid_buf.parse_u16()?,
            guid_buf.take(8)?,
        )
        .map_err(|_| Error::UnexpectedEof)?;

        let named_streams = match parse_named_streams(&mut buf) {
            Ok(map) => map,
            Err(_) => {
                log::debug!("PDB info stream has no named-stream map");
                BTreeMap::new()
            }
        };

        Ok(PdbInformation {
            version,
            signature,
            age,
            guid,
            named_streams,
        })
    }

    /// The version of the stream.
    pub fn version_kind(&self) -> PdbiVersion {
        PdbiVersion::from(self.version)
    }

    /// The GUID as 32 uppercase hex characters: first `u32` little-endian,
    /// two `u16`s little-endian, then the raw trailing bytes.
    pub fn guid_string(&self) -> String {
        let (d1, d2, d3, d4) = self.guid.as_fields();
        let mut out = String::with_capacity(32);
        // write! to a String cannot fail
        let _ = write!(out, "{:08X}{:04X}{:04X}", d1, d2, d3);
        for byte in d4 {
            let _ = write!(out, "{:02X}", byte);
        }
        out
    }
}

/// Decodes the serialized hash table binding stream names to stream indices.
///
/// Layout: `u32` string buffer size + the buffer itself (NUL-separated
/// keys), then `u32 size`, `u32 capacity`, a present bitvector, a deleted
/// bitvector, and one `(key_offset, stream_index)` pair per present slot.
/// Deleted slots never contribute entries.
fn parse_named_streams(buf: &mut ParseBuffer<'_>) -> Result<BTreeMap<String, u32>> {
    let string_buf_size = buf.parse_u32()? as usize;
    let string_buf = buf.take(string_buf_size)?;

    let _size = buf.parse_u32()?;
    let capacity = buf.parse_u32()?;

    let present = parse_bit_vector(buf)?;
    let _deleted = parse_bit_vector(buf)?;

    let mut map = BTreeMap::new();
    for slot in 0..capacity {
        if !bit_set(&present, slot) {
            continue;
        }

        let key_offset = buf.parse_u32()? as usize;
        let stream_index = buf.parse_u32()?;

        if key_offset < string_buf.len() {
            let mut name_buf = ParseBuffer::from(&string_buf[key_offset..]);
            if let Ok(name) = name_buf.parse_cstring() {
                map.insert(name.to_string().into_owned(), stream_index);
            }
        }
    }

    Ok(map)
}

fn parse_bit_vector(buf: &mut ParseBuffer<'_>) -> Result<Vec<u32>> {
    let word_count = buf.parse_u32()?;
    let mut words = Vec::new();
    for _ in 0..word_count {
        words.push(buf.parse_u32()?);
    }
    Ok(words)
}

fn bit_set(words: &[u32], bit: u32) -> bool {
    match words.get((bit / 32) as usize) {
        Some(word) => word & (1 << (bit % 32)) != 0,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_stream(with_map: bool) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&20000404u32.to_le_bytes()); // version
        data.extend_from_slice(&0x5d30_0000u32.to_le_bytes()); // signature
        data.extend_from_slice(&2u32.to_le_bytes()); // age
        data.extend_from_slice(&[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ]);

        if with_map {
            let names = b"/names\0/src\0";
            data.extend_from_slice(&(names.len() as u32).to_le_bytes());
            data.extend_from_slice(names);
            data.extend_from_slice(&2u32.to_le_bytes()); // size
            data.extend_from_slice(&4u32.to_le_bytes()); // capacity
            data.extend_from_slice(&1u32.to_le_bytes()); // present word count
            data.extend_from_slice(&0b0101u32.to_le_bytes()); // slots 0 and 2
            data.extend_from_slice(&0u32.to_le_bytes()); // deleted word count
            data.extend_from_slice(&0u32.to_le_bytes()); // key offset "/names"
            data.extend_from_slice(&11u32.to_le_bytes()); // stream index
            data.extend_from_slice(&7u32.to_le_bytes()); // key offset "/src"
            data.extend_from_slice(&12u32.to_le_bytes()); // stream index
        }

        data
    }

    #[test]
    fn test_parse() {
        let data = info_stream(true);
        let info = PdbInformation::parse(&data).expect("parse");

        assert_eq!(info.version, 20000404);
        assert_eq!(info.version_kind(), PdbiVersion::VC70);
        assert_eq!(info.age, 2);
        assert_eq!(info.named_streams.len(), 2);
        assert_eq!(info.named_streams["/names"], 11);
        assert_eq!(info.named_streams["/src"], 12);
    }

    #[test]
    fn test_guid_string() {
        let data = info_stream(false);
        let info = PdbInformation::parse(&data).expect("parse");
        assert_eq!(info.guid_string(), "0403020106050807090A0B0C0D0E0F10");
    }

    #[test]
    fn test_missing_map_is_empty() {
        // header only, no named-stream substructure
        let data = info_stream(false);
        let info = PdbInformation::parse(&data).expect("parse");
        assert!(info.named_streams.is_empty());
    }

    #[test]
    fn test_truncated_map_is_empty() {
        let mut data = info_stream(true);
        // chop the map off mid-way through the hash table
        data.truncate(28 + 4 + 12 + 4);
        let info = PdbInformation::parse(&data).expect("parse");
        assert!(info.named_streams.is_empty());
    }

    #[test]
    fn test_header_too_short() {
        let data = vec![0u8; 10];
        assert!(PdbInformation::parse(&data).is_err());
    }
}
