// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The facade: opens a PDB and materializes its symbols, types, modules
//! and sections as plain owned values.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use fallible_iterator::FallibleIterator;
use serde::Serialize;

use crate::common::*;
use crate::dbi::{DebugInformation, SectionMapEntry, NO_STREAM};
use crate::demangle::demangle;
use crate::msf::Msf;
use crate::pdbi::PdbInformation;
use crate::pe::{self, ImageSectionHeader};
use crate::source::Source;
use crate::symbol::constants::S_PUB32;
use crate::symbol::{SymbolData, SymbolIter};
use crate::tpi::constants as leaf;
use crate::tpi::{builtin_type_name, TypeBody, TypeStream, TYPE_INDEX_BEGIN};

// Fixed stream numbers, per the reference implementation:
//   https://github.com/Microsoft/microsoft-pdb/blob/082c5290e5aff028ae84e43affa8be717aa7af73/PDB/dbi/dbiimpl.h#L66-L68
const PDB_STREAM: u32 = 1;
const TPI_STREAM: u32 = 2;
const DBI_STREAM: u32 = 3;

/// A function or procedure symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Function {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demangled_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prototype: Option<String>,
    pub offset: u32,
    pub segment: u16,
    pub rva: u32,
    pub length: u32,
    pub type_index: TypeIndex,
    pub signature: String,
    pub is_global: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// A global or static variable symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demangled_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prototype: Option<String>,
    pub offset: u32,
    pub segment: u16,
    pub rva: u32,
    pub type_index: TypeIndex,
    pub type_name: String,
    pub is_global: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// A public symbol from the symbol-record stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublicSymbol {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demangled_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prototype: Option<String>,
    pub offset: u32,
    pub segment: u16,
    pub rva: u32,
}

/// A named type with its materialized members.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeInfo {
    pub index: TypeIndex,
    /// `"struct"`, `"class"`, `"union"`, `"enum"`, `"builtin"` or a raw
    /// leaf-kind name.
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub size: u64,
    pub signature: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Member>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// A structure member, base class or enumerator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Member {
    pub name: String,
    pub type_name: String,
    /// Byte offset for data members; the enumerator value for enums.
    pub offset: u64,
}

/// A compiled module.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub object_file: String,
    pub symbol_stream: u16,
    pub symbol_size: u32,
    pub source_files: u16,
}

/// A PE section, from section headers when available or the section map
/// otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SectionInfo {
    /// 1-based section index, as used by symbol `segment` fields.
    pub index: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Virtual address (the RVA base for the section).
    pub offset: u32,
    pub length: u32,
}

/// Summary information about the opened PDB.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PdbInfo {
    pub guid: String,
    pub age: u32,
    pub version: u32,
    pub machine: String,
    pub streams: u32,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub named_streams: BTreeMap<String, u32>,
}

impl TypeInfo {
    fn from_body(body: TypeBody) -> Self {
        TypeInfo {
            index: body.index,
            kind: body.kind_name.to_string(),
            name: body.name,
            size: body.size,
            signature: body.signature,
            members: body
                .members
                .into_iter()
                .map(|member| Member {
                    name: member.name,
                    type_name: member.type_name,
                    offset: member.offset,
                })
                .collect(),
        }
    }
}

/// An opened PDB file.
///
/// `Pdb` parses the well-known streams once at open time and then serves
/// queries from them. The aggregated symbol lists are computed lazily on
/// first request and cached for the life of the handle.
#[derive(Debug)]
pub struct Pdb<S> {
    msf: Msf<S>,
    pdbi: Option<PdbInformation>,
    tpi: Option<TypeStream>,
    dbi: Option<DebugInformation>,
    section_headers: Vec<ImageSectionHeader>,
    section_map: Vec<SectionMapEntry>,

    functions: Option<Vec<Function>>,
    variables: Option<Vec<Variable>>,
    publics: Option<Vec<PublicSymbol>>,
    sections: Option<Vec<SectionInfo>>,
}

impl Pdb<File> {
    /// Opens a PDB file at a path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Pdb::open(File::open(path)?)
    }
}

impl<S: Source> Pdb<S> {
    /// Opens a PDB over a random-access byte source and parses its core
    /// streams.
    ///
    /// Header validation failures (the MSF super-block, the DBI version
    /// signature, the TPI stream version) are fatal here; absent or empty
    /// streams are not, and leave the corresponding queries empty.
    pub fn open(source: S) -> Result<Self> {
        let mut msf = Msf::open(source)?;

        let pdbi = optional_stream(&mut msf, PDB_STREAM).and_then(|data| {
            match PdbInformation::parse(&data) {
                Ok(info) => Some(info),
                Err(e) => {
                    log::warn!("PDB info stream unparseable: {}", e);
                    None
                }
            }
        });

        let tpi = match optional_stream(&mut msf, TPI_STREAM) {
            Some(data) => Some(TypeStream::parse(data)?),
            None => None,
        };

        let dbi = match optional_stream(&mut msf, DBI_STREAM) {
            Some(data) => Some(DebugInformation::parse(data)?),
            None => None,
        };

        let mut section_headers = Vec::new();
        let mut section_map = Vec::new();
        if let Some(dbi) = &dbi {
            section_map = dbi.section_map();

            if let Some(debug_header) = dbi.debug_header() {
                if debug_header.section_headers != NO_STREAM {
                    let stream = u32::from(debug_header.section_headers);
                    if let Some(data) = optional_stream(&mut msf, stream) {
                        section_headers = pe::parse_section_headers(&data);
                    }
                }
            }
        }

        Ok(Pdb {
            msf,
            pdbi,
            tpi,
            dbi,
            section_headers,
            section_map,
            functions: None,
            variables: None,
            publics: None,
            sections: None,
        })
    }

    /// Releases the backing source. Dropping the handle is equivalent.
    pub fn close(self) {}

    /// Summary information: GUID, age, machine, stream count and named
    /// streams.
    pub fn info(&self) -> PdbInfo {
        let mut info = PdbInfo {
            streams: self.msf.num_streams(),
            ..PdbInfo::default()
        };

        if let Some(pdbi) = &self.pdbi {
            info.guid = pdbi.guid_string();
            info.age = pdbi.age;
            info.version = pdbi.version;
            info.named_streams = pdbi.named_streams.clone();
        }

        if let Some(dbi) = &self.dbi {
            info.machine = dbi.machine_name();
        }

        info
    }

    /// The modules that contributed to the binary, in DBI order.
    pub fn modules(&self) -> Vec<ModuleInfo> {
        let dbi = match &self.dbi {
            Some(dbi) => dbi,
            None => return Vec::new(),
        };

        let mut modules = Vec::new();
        let mut iter = dbi.modules();
        while let Ok(Some(module)) = iter.next() {
            modules.push(ModuleInfo {
                name: module.module_name().into_owned(),
                object_file: module.object_file_name().into_owned(),
                symbol_stream: module.header().stream,
                symbol_size: module.header().symbols_size,
                source_files: module.header().files,
            });
        }
        modules
    }

    /// All functions, aggregated from the symbol-record stream and from
    /// every module symbol stream. Cached after the first call.
    pub fn functions(&mut self) -> &[Function] {
        if self.functions.is_none() {
            let functions = self.collect_functions();
            self.functions = Some(functions);
        }
        match &self.functions {
            Some(functions) => functions,
            None => &[],
        }
    }

    /// All global and static variables. Cached after the first call.
    pub fn variables(&mut self) -> &[Variable] {
        if self.variables.is_none() {
            let variables = self.collect_variables();
            self.variables = Some(variables);
        }
        match &self.variables {
            Some(variables) => variables,
            None => &[],
        }
    }

    /// All `S_PUB32` records from the symbol-record stream. Cached after
    /// the first call.
    pub fn public_symbols(&mut self) -> &[PublicSymbol] {
        if self.publics.is_none() {
            let publics = self.collect_publics();
            self.publics = Some(publics);
        }
        match &self.publics {
            Some(publics) => publics,
            None => &[],
        }
    }

    /// PE sections: section headers when the optional debug header names
    /// them, the DBI section map otherwise. Cached after the first call.
    pub fn sections(&mut self) -> &[SectionInfo] {
        if self.sections.is_none() {
            let sections = self.collect_sections();
            self.sections = Some(sections);
        }
        match &self.sections {
            Some(sections) => sections,
            None => &[],
        }
    }

    /// All named structures, classes, unions and enums, with materialized
    /// member lists.
    pub fn types(&self) -> Vec<TypeInfo> {
        let tpi = match &self.tpi {
            Some(tpi) => tpi,
            None => return Vec::new(),
        };
        let resolver = tpi.resolver();

        let mut types = Vec::new();
        for record in tpi.iter() {
            match record.kind {
                leaf::LF_STRUCTURE
                | leaf::LF_STRUCTURE_NEW
                | leaf::LF_CLASS
                | leaf::LF_CLASS_NEW
                | leaf::LF_UNION
                | leaf::LF_UNION_NEW => {
                    if let Some(body) = resolver.parse_structure(&record) {
                        if !body.name.is_empty() {
                            types.push(TypeInfo::from_body(body));
                        }
                    }
                }

                leaf::LF_ENUM | leaf::LF_ENUM_NEW => {
                    if let Some(body) = resolver.parse_enumeration(&record) {
                        if !body.name.is_empty() {
                            types.push(TypeInfo::from_body(body));
                        }
                    }
                }

                _ => {}
            }
        }
        types
    }

    /// Resolves any type index to a [`TypeInfo`].
    ///
    /// Built-in indices resolve without consulting the TPI and report kind
    /// `"builtin"`; indices without a record return `None`.
    pub fn resolve_type(&self, index: TypeIndex) -> Option<TypeInfo> {
        if index < TYPE_INDEX_BEGIN {
            let name = builtin_type_name(index);
            return Some(TypeInfo {
                index,
                kind: "builtin".to_string(),
                signature: name.clone(),
                name,
                size: 0,
                members: Vec::new(),
            });
        }

        let tpi = self.tpi.as_ref()?;
        let resolver = tpi.resolver();
        let record = tpi.type_by_index(index)?;

        match record.kind {
            leaf::LF_STRUCTURE
            | leaf::LF_STRUCTURE_NEW
            | leaf::LF_CLASS
            | leaf::LF_CLASS_NEW
            | leaf::LF_UNION
            | leaf::LF_UNION_NEW => resolver.parse_structure(&record).map(TypeInfo::from_body),

            leaf::LF_ENUM | leaf::LF_ENUM_NEW => {
                resolver.parse_enumeration(&record).map(TypeInfo::from_body)
            }

            kind => Some(TypeInfo {
                index,
                kind: leaf::leaf_kind_name(kind),
                name: String::new(),
                size: 0,
                signature: resolver.resolve_type(index),
                members: Vec::new(),
            }),
        }
    }

    /// The number of records in the TPI stream.
    pub fn type_count(&self) -> usize {
        self.tpi.as_ref().map_or(0, TypeStream::len)
    }

    /// Translates a 1-based `(segment, offset)` pair to an RVA.
    ///
    /// Returns 0 for segment 0, out-of-range segments, or when neither
    /// section headers nor a section map is available.
    pub fn segment_to_rva(&self, segment: u16, offset: u32) -> u32 {
        rva_for(&self.section_headers, &self.section_map, segment, offset)
    }

    fn collect_functions(&mut self) -> Vec<Function> {
        let dbi = match &self.dbi {
            Some(dbi) => dbi,
            None => return Vec::new(),
        };
        let resolver = self.tpi.as_ref().map(|tpi| tpi.resolver());
        let headers = &self.section_headers;
        let map = &self.section_map;
        let msf = &mut self.msf;

        let mut functions = Vec::new();

        let mut gather = |data: &[u8], module: Option<&str>| {
            let mut symbols = SymbolIter::new(data);
            while let Ok(Some(symbol)) = symbols.next() {
                let parsed = match symbol.parse() {
                    Ok(parsed) => parsed,
                    Err(_) => continue,
                };

                if let SymbolData::Procedure {
                    global,
                    length,
                    type_index,
                    offset,
                    segment,
                    name,
                    ..
                } = parsed
                {
                    let name = name.to_string().into_owned();
                    let mut function = Function {
                        rva: rva_for(headers, map, segment, offset),
                        signature: resolver
                            .as_ref()
                            .map(|r| r.resolve_type(type_index))
                            .unwrap_or_default(),
                        name,
                        offset,
                        segment,
                        length,
                        type_index,
                        is_global: global,
                        module: module.map(str::to_string),
                        demangled_name: None,
                        prototype: None,
                    };

                    let demangled = demangle(&function.name);
                    if demangled.name != function.name {
                        function.demangled_name = Some(demangled.name);
                        if !demangled.prototype.is_empty() {
                            function.prototype = Some(demangled.prototype);
                        }
                    }

                    functions.push(function);
                }
            }
        };

        // the shared symbol-record stream
        let stream = dbi.header().symbol_records_stream;
        if stream != NO_STREAM {
            if let Ok(data) = read_stream_checked(msf, u32::from(stream)) {
                gather(&data, None);
            }
        }

        // per-module symbol streams
        let mut modules = dbi.modules();
        while let Ok(Some(module)) = modules.next() {
            if !module.has_symbols() {
                continue;
            }

            let data = match read_stream_checked(msf, u32::from(module.header().stream)) {
                Ok(data) => data,
                Err(_) => continue,
            };

            // only the leading symbols_size bytes are symbol records
            let symbols_size = module.header().symbols_size as usize;
            let sym_data = &data[..symbols_size.min(data.len())];
            gather(sym_data, Some(module.module_name().as_ref()));
        }

        functions
    }

    fn collect_variables(&mut self) -> Vec<Variable> {
        let dbi = match &self.dbi {
            Some(dbi) => dbi,
            None => return Vec::new(),
        };
        let resolver = self.tpi.as_ref().map(|tpi| tpi.resolver());
        let headers = &self.section_headers;
        let map = &self.section_map;
        let msf = &mut self.msf;

        let mut variables = Vec::new();

        let mut gather = |data: &[u8], module: Option<&str>| {
            let mut symbols = SymbolIter::new(data);
            while let Ok(Some(symbol)) = symbols.next() {
                let parsed = match symbol.parse() {
                    Ok(parsed) => parsed,
                    Err(_) => continue,
                };

                if let SymbolData::Data {
                    global,
                    type_index,
                    offset,
                    segment,
                    name,
                    ..
                } = parsed
                {
                    let name = name.to_string().into_owned();
                    let mut variable = Variable {
                        rva: rva_for(headers, map, segment, offset),
                        type_name: resolver
                            .as_ref()
                            .map(|r| r.resolve_type(type_index))
                            .unwrap_or_default(),
                        name,
                        offset,
                        segment,
                        type_index,
                        is_global: global,
                        module: module.map(str::to_string),
                        demangled_name: None,
                        prototype: None,
                    };

                    let demangled = demangle(&variable.name);
                    if demangled.name != variable.name {
                        variable.demangled_name = Some(demangled.name);
                        if !demangled.prototype.is_empty() {
                            variable.prototype = Some(demangled.prototype);
                        }
                    }

                    variables.push(variable);
                }
            }
        };

        let stream = dbi.header().symbol_records_stream;
        if stream != NO_STREAM {
            if let Ok(data) = read_stream_checked(msf, u32::from(stream)) {
                gather(&data, None);
            }
        }

        let mut modules = dbi.modules();
        while let Ok(Some(module)) = modules.next() {
            if !module.has_symbols() {
                continue;
            }

            let data = match read_stream_checked(msf, u32::from(module.header().stream)) {
                Ok(data) => data,
                Err(_) => continue,
            };

            let symbols_size = module.header().symbols_size as usize;
            let sym_data = &data[..symbols_size.min(data.len())];
            gather(sym_data, Some(module.module_name().as_ref()));
        }

        variables
    }

    fn collect_publics(&mut self) -> Vec<PublicSymbol> {
        let dbi = match &self.dbi {
            Some(dbi) => dbi,
            None => return Vec::new(),
        };
        let headers = &self.section_headers;
        let map = &self.section_map;

        let stream = dbi.header().symbol_records_stream;
        if stream == NO_STREAM {
            return Vec::new();
        }

        let data = match read_stream_checked(&mut self.msf, u32::from(stream)) {
            Ok(data) => data,
            Err(_) => return Vec::new(),
        };

        let mut publics = Vec::new();
        let mut symbols = SymbolIter::new(&data);
        while let Ok(Some(symbol)) = symbols.next() {
            if symbol.raw_kind() != S_PUB32 {
                continue;
            }

            if let Ok(SymbolData::Public {
                offset,
                segment,
                name,
                ..
            }) = symbol.parse()
            {
                let name = name.to_string().into_owned();
                let mut public = PublicSymbol {
                    rva: rva_for(headers, map, segment, offset),
                    name,
                    offset,
                    segment,
                    demangled_name: None,
                    prototype: None,
                };

                let demangled = demangle(&public.name);
                if demangled.name != public.name {
                    public.demangled_name = Some(demangled.name);
                    if !demangled.prototype.is_empty() {
                        public.prototype = Some(demangled.prototype);
                    }
                }

                publics.push(public);
            }
        }

        publics
    }

    fn collect_sections(&mut self) -> Vec<SectionInfo> {
        if !self.section_headers.is_empty() {
            return self
                .section_headers
                .iter()
                .enumerate()
                .map(|(i, header)| SectionInfo {
                    index: (i + 1) as u16,
                    name: Some(header.name().to_string()),
                    offset: header.virtual_address,
                    length: header.virtual_size,
                })
                .collect();
        }

        self.section_map
            .iter()
            .enumerate()
            .filter(|(i, entry)| !(*i == 0 && entry.section_length == 0))
            .map(|(i, entry)| SectionInfo {
                index: (i + 1) as u16,
                name: None,
                offset: entry.offset,
                length: entry.section_length,
            })
            .collect()
    }
}

fn optional_stream<S: Source>(msf: &mut Msf<S>, index: u32) -> Option<Vec<u8>> {
    if index >= msf.num_streams() {
        return None;
    }
    match msf.read_stream(index) {
        Ok(data) if !data.is_empty() => Some(data),
        Ok(_) => None,
        Err(e) => {
            log::warn!("stream {} unreadable: {}", index, e);
            None
        }
    }
}

fn read_stream_checked<S: Source>(msf: &mut Msf<S>, index: u32) -> Result<Vec<u8>> {
    if index >= msf.num_streams() {
        return Err(Error::StreamNotFound(index));
    }
    msf.read_stream(index)
}

/// Segment numbers are 1-based. PE section headers are preferred; the
/// section map is the fallback.
fn rva_for(
    headers: &[ImageSectionHeader],
    map: &[SectionMapEntry],
    segment: u16,
    offset: u32,
) -> u32 {
    if !headers.is_empty() {
        return match headers.get(segment.wrapping_sub(1) as usize) {
            Some(header) if segment != 0 => header.virtual_address + offset,
            _ => 0,
        };
    }

    match map.get(segment.wrapping_sub(1) as usize) {
        Some(entry) if segment != 0 => entry.offset + offset,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(virtual_address: u32) -> ImageSectionHeader {
        ImageSectionHeader {
            virtual_address,
            ..ImageSectionHeader::default()
        }
    }

    fn map_entry(offset: u32, length: u32) -> SectionMapEntry {
        SectionMapEntry {
            offset,
            section_length: length,
            ..SectionMapEntry::default()
        }
    }

    #[test]
    fn test_rva_prefers_section_headers() {
        let headers = vec![header(0x1000), header(0x5000)];
        let map = vec![map_entry(0x9000, 0x100)];

        assert_eq!(rva_for(&headers, &map, 1, 0x10), 0x1010);
        assert_eq!(rva_for(&headers, &map, 2, 0x20), 0x5020);
    }

    #[test]
    fn test_rva_section_map_fallback() {
        let map = vec![map_entry(0x9000, 0x100), map_entry(0xa000, 0x200)];
        assert_eq!(rva_for(&[], &map, 2, 0x30), 0xa030);
    }

    #[test]
    fn test_rva_out_of_range() {
        let headers = vec![header(0x1000)];
        assert_eq!(rva_for(&headers, &[], 0, 0x10), 0);
        assert_eq!(rva_for(&headers, &[], 2, 0x10), 0);
        assert_eq!(rva_for(&[], &[], 1, 0x10), 0);
    }
}
