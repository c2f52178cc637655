// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

// DBI = "Debug Information", stream 3.

use std::borrow::Cow;
use std::result;

use fallible_iterator::FallibleIterator;

use crate::common::*;

/// A module symbol stream index of `0xffff` means "no stream".
pub const NO_STREAM: u16 = 0xffff;

const DBI_HEADER_SIZE: usize = 64;
const MODULE_HEADER_SIZE: usize = 64;
const SECTION_MAP_ENTRY_SIZE: usize = 20;
const DEBUG_HEADER_SIZE: usize = 22;

/// Section contribution substream version tags.
const SECTION_CONTRIBUTION_V60: u32 = 0xeffe_0000 + 19970605;
const SECTION_CONTRIBUTION_V2: u32 = 0xeffe_0000 + 20140516;

/// The version of the DBI stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DbiVersion {
    V41,
    V50,
    V60,
    V70,
    V110,
    Other(u32),
}

impl From<u32> for DbiVersion {
    fn from(v: u32) -> Self {
        match v {
            930803 => DbiVersion::V41,
            19960307 => DbiVersion::V50,
            19970606 => DbiVersion::V60,
            19990903 => DbiVersion::V70,
            20091201 => DbiVersion::V110,
            _ => DbiVersion::Other(v),
        }
    }
}

/// The fixed 64-byte DBI header.
#[derive(Debug, Copy, Clone)]
pub struct DbiHeader {
    /// Always `-1`; anything else fails the parse.
    pub version_signature: i32,
    pub version: DbiVersion,
    pub age: u32,
    pub global_symbol_stream: u16,
    pub build_number: u16,
    pub public_symbol_stream: u16,
    pub pdb_dll_version: u16,
    /// Stream holding the symbol records referenced by the hash streams.
    pub symbol_records_stream: u16,
    pub pdb_dll_rbld: u16,
    pub module_list_size: u32,
    pub section_contribution_size: u32,
    pub section_map_size: u32,
    pub source_info_size: u32,
    pub type_server_map_size: u32,
    pub mfc_type_server_index: u32,
    pub debug_header_size: u32,
    pub ec_substream_size: u32,
    pub flags: u16,
    pub machine: u16,
    pub reserved: u32,
}

impl DbiHeader {
    fn parse(buf: &mut ParseBuffer<'_>) -> Result<Self> {
        let header = DbiHeader {
            version_signature: buf.parse_i32()?,
            version: DbiVersion::from(buf.parse_u32()?),
            age: buf.parse_u32()?,
            global_symbol_stream: buf.parse_u16()?,
            build_number: buf.parse_u16()?,
            public_symbol_stream: buf.parse_u16()?,
            pdb_dll_version: buf.parse_u16()?,
            symbol_records_stream: buf.parse_u16()?,
            pdb_dll_rbld: buf.parse_u16()?,
            module_list_size: buf.parse_u32()?,
            section_contribution_size: buf.parse_u32()?,
            section_map_size: buf.parse_u32()?,
            source_info_size: buf.parse_u32()?,
            type_server_map_size: buf.parse_u32()?,
            mfc_type_server_index: buf.parse_u32()?,
            debug_header_size: buf.parse_u32()?,
            ec_substream_size: buf.parse_u32()?,
            flags: buf.parse_u16()?,
            machine: buf.parse_u16()?,
            reserved: buf.parse_u32()?,
        };

        if header.version_signature != -1 {
            return Err(Error::InvalidDbiSignature(header.version_signature));
        }

        Ok(header)
    }
}

/// Returns the conventional name for a machine type, or `0x<hex>` for
/// anything unrecognized.
pub fn machine_name(machine: u16) -> String {
    match machine {
        0x014c => "x86".to_string(),
        0x8664 => "x64".to_string(),
        0x01c0 => "ARM".to_string(),
        0xaa64 => "ARM64".to_string(),
        0x0200 => "IA64".to_string(),
        other => format!("0x{:04x}", other),
    }
}

/// A module's contribution to a PE section.
#[derive(Debug, Copy, Clone, Default)]
pub struct SectionContribution {
    pub section: u16,
    pub offset: u32,
    pub size: u32,
    pub characteristics: u32,
    /// Index of the contributing module.
    pub module: u16,
    pub data_crc: u32,
    pub reloc_crc: u32,
}

impl SectionContribution {
    fn parse(buf: &mut ParseBuffer<'_>) -> Result<Self> {
        let section = buf.parse_u16()?;
        let _padding1 = buf.parse_u16()?;
        let offset = buf.parse_u32()?;
        let size = buf.parse_u32()?;
        let characteristics = buf.parse_u32()?;
        let module = buf.parse_u16()?;
        let _padding2 = buf.parse_u16()?;
        let data_crc = buf.parse_u32()?;
        let reloc_crc = buf.parse_u32()?;
        Ok(SectionContribution {
            section,
            offset,
            size,
            characteristics,
            module,
            data_crc,
            reloc_crc,
        })
    }
}

/// One entry in the section map substream.
#[derive(Debug, Copy, Clone, Default)]
pub struct SectionMapEntry {
    pub flags: u16,
    pub overlay: u16,
    pub group: u16,
    pub frame: u16,
    pub section_name: u16,
    pub class_name: u16,
    /// Byte offset of the logical segment within the physical segment.
    pub offset: u32,
    pub section_length: u32,
}

fn parse_section_map_entry(buf: &mut ParseBuffer<'_>) -> Result<SectionMapEntry> {
    Ok(SectionMapEntry {
        flags: buf.parse_u16()?,
        overlay: buf.parse_u16()?,
        group: buf.parse_u16()?,
        frame: buf.parse_u16()?,
        section_name: buf.parse_u16()?,
        class_name: buf.parse_u16()?,
        offset: buf.parse_u32()?,
        section_length: buf.parse_u32()?,
    })
}

/// The optional debug header: 11 stream-index slots at the tail of the DBI
/// stream. Only the section-header slot is consumed by this crate.
#[derive(Debug, Copy, Clone)]
pub struct DebugHeader {
    pub fpo: u16,
    pub exception: u16,
    pub fixup: u16,
    pub omap_to_src: u16,
    pub omap_from_src: u16,
    /// Stream holding packed PE section headers.
    pub section_headers: u16,
    pub token_rid_map: u16,
    pub xdata: u16,
    pub pdata: u16,
    pub new_fpo: u16,
    pub original_section_headers: u16,
}

impl DebugHeader {
    fn parse(buf: &mut ParseBuffer<'_>) -> Result<Self> {
        Ok(DebugHeader {
            fpo: buf.parse_u16()?,
            exception: buf.parse_u16()?,
            fixup: buf.parse_u16()?,
            omap_to_src: buf.parse_u16()?,
            omap_from_src: buf.parse_u16()?,
            section_headers: buf.parse_u16()?,
            token_rid_map: buf.parse_u16()?,
            xdata: buf.parse_u16()?,
            pdata: buf.parse_u16()?,
            new_fpo: buf.parse_u16()?,
            original_section_headers: buf.parse_u16()?,
        })
    }
}

/// The fixed part of a module info entry.
#[derive(Debug, Copy, Clone)]
pub struct ModuleHeader {
    pub opened: u32,
    /// The module's first section contribution.
    pub section: SectionContribution,
    pub flags: u16,
    /// Stream number of the module's symbol stream, or [`NO_STREAM`].
    pub stream: u16,
    /// Size of symbol debug info in the module stream.
    pub symbols_size: u32,
    pub lines_size: u32,
    pub c13_lines_size: u32,
    /// Number of source files contributing to this module.
    pub files: u16,
    pub filename_offsets: u32,
    pub source_file_name_index: u32,
    pub pdb_file_path_index: u32,
}

fn parse_module_header(buf: &mut ParseBuffer<'_>) -> Result<ModuleHeader> {
    let opened = buf.parse_u32()?;
    let section = SectionContribution::parse(buf)?;
    let flags = buf.parse_u16()?;
    let stream = buf.parse_u16()?;
    let symbols_size = buf.parse_u32()?;
    let lines_size = buf.parse_u32()?;
    let c13_lines_size = buf.parse_u32()?;
    let files = buf.parse_u16()?;
    let _padding = buf.parse_u16()?;
    let filename_offsets = buf.parse_u32()?;
    let source_file_name_index = buf.parse_u32()?;
    let pdb_file_path_index = buf.parse_u32()?;
    Ok(ModuleHeader {
        opened,
        section,
        flags,
        stream,
        symbols_size,
        lines_size,
        c13_lines_size,
        files,
        filename_offsets,
        source_file_name_index,
        pdb_file_path_index,
    })
}

/// A module from the DBI module info substream: an object file or import
/// library that contributed to the binary.
#[derive(Debug, Clone)]
pub struct Module<'m> {
    header: ModuleHeader,
    module_name: RawString<'m>,
    object_file_name: RawString<'m>,
}

impl<'m> Module<'m> {
    /// The fixed header fields.
    pub fn header(&self) -> &ModuleHeader {
        &self.header
    }

    /// The module name, usually an object file path or `Import:<dll>`.
    pub fn module_name(&self) -> Cow<'m, str> {
        self.module_name.to_string()
    }

    /// The object file name; for static library members this is the archive
    /// path.
    pub fn object_file_name(&self) -> Cow<'m, str> {
        self.object_file_name.to_string()
    }

    /// Whether the module carries a symbol stream worth reading.
    pub fn has_symbols(&self) -> bool {
        self.header.stream != NO_STREAM && self.header.symbols_size > 0
    }
}

/// Iterates the module info substream in storage order.
#[derive(Debug)]
pub struct ModuleIter<'m> {
    buf: ParseBuffer<'m>,
}

impl<'m> FallibleIterator for ModuleIter<'m> {
    type Item = Module<'m>;
    type Error = Error;

    fn next(&mut self) -> result::Result<Option<Self::Item>, Self::Error> {
        // entries are 64 fixed bytes plus two strings; a smaller tail is
        // padding
        if self.buf.len() < MODULE_HEADER_SIZE {
            return Ok(None);
        }

        let header = parse_module_header(&mut self.buf)?;
        let module_name = self.buf.parse_cstring()?;
        let object_file_name = self.buf.parse_cstring()?;
        // the final entry may end without its tail padding
        let _ = self.buf.align(4);

        Ok(Some(Module {
            header,
            module_name,
            object_file_name,
        }))
    }
}

/// Iterates the section contribution substream.
#[derive(Debug)]
pub struct SectionContributionIter<'m> {
    buf: ParseBuffer<'m>,
    /// V2 entries carry a trailing `u32` (ISect in COFF terms).
    has_coff_section: bool,
}

impl<'m> FallibleIterator for SectionContributionIter<'m> {
    type Item = SectionContribution;
    type Error = Error;

    fn next(&mut self) -> result::Result<Option<Self::Item>, Self::Error> {
        let entry_size = if self.has_coff_section { 32 } else { 28 };
        if self.buf.len() < entry_size {
            return Ok(None);
        }

        let contribution = SectionContribution::parse(&mut self.buf)?;
        if self.has_coff_section {
            let _coff_section = self.buf.parse_u32()?;
        }

        Ok(Some(contribution))
    }
}

/// The parsed DBI stream.
///
/// Owns the raw stream bytes; the substreams are sliced out of it on demand
/// using the sizes declared in the header.
#[derive(Debug)]
pub struct DebugInformation {
    data: Vec<u8>,
    header: DbiHeader,
}

impl DebugInformation {
    /// Parses the DBI stream. The header's version signature must be `-1`.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let header = DbiHeader::parse(&mut ParseBuffer::from(data.as_slice()))?;
        Ok(DebugInformation { data, header })
    }

    /// The fixed header.
    pub fn header(&self) -> &DbiHeader {
        &self.header
    }

    /// The target machine, by conventional name.
    pub fn machine_name(&self) -> String {
        machine_name(self.header.machine)
    }

    /// Slices a substream out of the stream data; an out-of-bounds substream
    /// yields an empty slice.
    fn substream(&self, offset: usize, size: u32) -> &[u8] {
        let end = offset.saturating_add(size as usize);
        if size == 0 || end > self.data.len() {
            if size != 0 {
                log::warn!(
                    "DBI substream at {}+{} exceeds stream size {}",
                    offset,
                    size,
                    self.data.len()
                );
            }
            return &[];
        }
        &self.data[offset..end]
    }

    fn module_list_offset(&self) -> usize {
        DBI_HEADER_SIZE
    }

    fn section_contribution_offset(&self) -> usize {
        self.module_list_offset() + self.header.module_list_size as usize
    }

    fn section_map_offset(&self) -> usize {
        self.section_contribution_offset() + self.header.section_contribution_size as usize
    }

    fn debug_header_offset(&self) -> usize {
        self.section_map_offset()
            + self.header.section_map_size as usize
            + self.header.source_info_size as usize
            + self.header.type_server_map_size as usize
            + self.header.ec_substream_size as usize
    }

    /// Returns an iterator over the module info substream.
    pub fn modules(&self) -> ModuleIter<'_> {
        let substream = self.substream(self.module_list_offset(), self.header.module_list_size);
        ModuleIter {
            buf: ParseBuffer::from(substream),
        }
    }

    /// Returns an iterator over the section contribution substream.
    pub fn section_contributions(&self) -> SectionContributionIter<'_> {
        let substream = self.substream(
            self.section_contribution_offset(),
            self.header.section_contribution_size,
        );

        let mut buf = ParseBuffer::from(substream);
        let version = match buf.parse_u32() {
            Ok(version) => version,
            Err(_) => {
                return SectionContributionIter {
                    buf: ParseBuffer::from(&[][..]),
                    has_coff_section: false,
                }
            }
        };

        if version != SECTION_CONTRIBUTION_V60 && version != SECTION_CONTRIBUTION_V2 {
            log::warn!("unknown section contribution version 0x{:08x}", version);
        }

        SectionContributionIter {
            buf,
            has_coff_section: version == SECTION_CONTRIBUTION_V2,
        }
    }

    /// Parses the section map substream.
    ///
    /// Truncated maps are clamped to the entries actually present.
    pub fn section_map(&self) -> Vec<SectionMapEntry> {
        let substream = self.substream(self.section_map_offset(), self.header.section_map_size);
        let mut buf = ParseBuffer::from(substream);

        let (count, _log_count) = match (buf.parse_u16(), buf.parse_u16()) {
            (Ok(count), Ok(log_count)) => (count, log_count),
            _ => return Vec::new(),
        };

        let available = (buf.len() / SECTION_MAP_ENTRY_SIZE) as u16;
        let declared = count;
        let count = count.min(available);
        if count < declared {
            log::debug!("section map truncated: {} of {} entries present", count, declared);
        }

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match parse_section_map_entry(&mut buf) {
                Ok(entry) => entries.push(entry),
                Err(_) => break,
            }
        }

        entries
    }

    /// Parses the optional debug header, if the stream carries one.
    pub fn debug_header(&self) -> Option<DebugHeader> {
        if (self.header.debug_header_size as usize) < DEBUG_HEADER_SIZE {
            return None;
        }

        let substream = self.substream(self.debug_header_offset(), self.header.debug_header_size);
        DebugHeader::parse(&mut ParseBuffer::from(substream)).ok()
    }
}
