// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! PE section headers as embedded in the optional debug header stream.

use std::fmt;

use crate::common::*;

/// The fixed on-disk size of a PE section header.
pub const SECTION_HEADER_SIZE: usize = 40;

/// A PE `IMAGE_SECTION_HEADER` as stored in the stream named by the DBI
/// optional debug header.
///
/// `virtual_address` is the RVA base for the section; symbols address into
/// it with `(segment, offset)` pairs.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct ImageSectionHeader {
    /// An 8-byte, NUL-padded UTF-8 string.
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: u32,
}

impl ImageSectionHeader {
    pub(crate) fn parse(buf: &mut ParseBuffer<'_>) -> Result<Self> {
        let name_bytes = buf.take(8)?;
        let mut name = [0u8; 8];
        name.copy_from_slice(name_bytes);

        Ok(ImageSectionHeader {
            name,
            virtual_size: buf.parse_u32()?,
            virtual_address: buf.parse_u32()?,
            size_of_raw_data: buf.parse_u32()?,
            pointer_to_raw_data: buf.parse_u32()?,
            pointer_to_relocations: buf.parse_u32()?,
            pointer_to_line_numbers: buf.parse_u32()?,
            number_of_relocations: buf.parse_u16()?,
            number_of_line_numbers: buf.parse_u16()?,
            characteristics: buf.parse_u32()?,
        })
    }

    /// Returns the name of the section, trimmed at the first NUL.
    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|ch| *ch == 0)
            .unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

impl fmt::Debug for ImageSectionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSectionHeader")
            .field("name()", &self.name())
            .field("virtual_size", &format_args!("{:#x}", self.virtual_size))
            .field(
                "virtual_address",
                &format_args!("{:#x}", self.virtual_address),
            )
            .field("characteristics", &format_args!("{:#x}", self.characteristics))
            .finish()
    }
}

/// Parses a stream of packed 40-byte PE section headers; a trailing partial
/// header is ignored.
pub fn parse_section_headers(data: &[u8]) -> Vec<ImageSectionHeader> {
    let mut buf = ParseBuffer::from(data);
    let mut headers = Vec::with_capacity(data.len() / SECTION_HEADER_SIZE);

    while buf.len() >= SECTION_HEADER_SIZE {
        match ImageSectionHeader::parse(&mut buf) {
            Ok(header) => headers.push(header),
            Err(_) => break,
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_section_header() {
        let bytes: Vec<u8> = vec![
            0x2E, 0x64, 0x61, 0x74, 0x61, 0x00, 0x00, 0x00, 0x48, 0x35, 0x09, 0x00, 0x00, 0xD0,
            0x1E, 0x00, 0x00, 0xFE, 0x00, 0x00, 0x00, 0xA2, 0x1E, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0xC8,
        ];

        let mut buf = ParseBuffer::from(bytes.as_slice());
        let header = ImageSectionHeader::parse(&mut buf).expect("parse");

        assert_eq!(&header.name, b".data\0\0\0");
        assert_eq!(header.name(), ".data");
        assert_eq!(header.virtual_size, 0x93548);
        assert_eq!(header.virtual_address, 0x001e_d000);
        assert_eq!(header.size_of_raw_data, 0xfe00);
        assert_eq!(header.pointer_to_raw_data, 0x001e_a200);
        assert_eq!(header.characteristics, 0xc800_0040);
    }

    #[test]
    fn test_parse_section_headers() {
        let mut data = vec![0u8; SECTION_HEADER_SIZE * 2];
        data[0..5].copy_from_slice(b".text");
        data[SECTION_HEADER_SIZE..SECTION_HEADER_SIZE + 5].copy_from_slice(b".data");
        // trailing garbage shorter than a header
        data.extend_from_slice(&[0u8; 10]);

        let headers = parse_section_headers(&data);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].name(), ".text");
        assert_eq!(headers[1].name(), ".data");
    }

    #[test]
    fn test_empty() {
        assert!(parse_section_headers(&[]).is_empty());
    }
}
