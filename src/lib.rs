// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The `pdbview` crate reads Microsoft PDB (Program Database) files and
//! exposes the symbols and types they contain: functions, global and
//! static variables, public symbols, user-defined types, modules and
//! sections.
//!
//! PDB files are Multi-Stream Format (MSF) containers. This crate parses
//! the MSF block layer, the well-known info/type/debug-info streams, and
//! the CodeView symbol and type records inside them, and demangles MSVC
//! names along the way. Everything is surfaced through the [`Pdb`] facade
//! as plain owned values.
//!
//! # Example
//!
//! ```no_run
//! # fn main() -> pdbview::Result<()> {
//! let mut pdb = pdbview::Pdb::open_path("fixtures/app.pdb")?;
//!
//! println!("machine: {}", pdb.info().machine);
//!
//! for function in pdb.functions() {
//!     println!("{:08x} {}", function.rva, function.name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Malformed-but-survivable input degrades to partial results; only
//! [`Pdb::open`] reports fatal validation errors.

mod common;
mod dbi;
mod demangle;
mod msf;
mod pdb;
mod pdbi;
mod pe;
mod source;
mod symbol;
mod tpi;

pub use crate::common::{Error, RawString, Result, TypeIndex, Variant};
pub use crate::dbi::{
    machine_name, DbiHeader, DbiVersion, DebugHeader, DebugInformation, Module, ModuleIter,
    SectionContribution, SectionContributionIter, SectionMapEntry, NO_STREAM,
};
pub use crate::demangle::{demangle, Demangled};
pub use crate::msf::{Msf, StreamReader, SuperBlock};
pub use crate::pdb::{
    Function, Member, ModuleInfo, Pdb, PdbInfo, PublicSymbol, SectionInfo, TypeInfo, Variable,
};
pub use crate::pdbi::{PdbInformation, PdbiVersion};
pub use crate::pe::{parse_section_headers, ImageSectionHeader};
pub use crate::source::Source;
pub use crate::symbol::constants::{is_data_symbol, is_global_symbol, is_proc_symbol};
pub use crate::symbol::{Symbol, SymbolData, SymbolIter};
pub use crate::tpi::{
    builtin_type_name, TpiHeader, TypeBody, TypeMember, TypeRecord, TypeResolver, TypeStream,
    TYPE_INDEX_BEGIN,
};

// re-export FallibleIterator for convenience
#[doc(no_inline)]
pub use fallible_iterator::FallibleIterator;
