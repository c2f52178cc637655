// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! CodeView symbol records, as stored in the symbol-record stream and in
//! per-module symbol streams.

use std::fmt;
use std::result;

use fallible_iterator::FallibleIterator;

use crate::common::*;

pub mod constants;
use self::constants::*;

/// Value of the optional leading signature identifying C13 symbol data.
const CV_SIGNATURE_C13: u32 = 4;

// CV_PUBSYMFLAGS_e bits on S_PUB32 records.
const CVPSF_CODE: u32 = 0x0000_0001;
const CVPSF_FUNCTION: u32 = 0x0000_0002;
const CVPSF_MANAGED: u32 = 0x0000_0004;
const CVPSF_MSIL: u32 = 0x0000_0008;

/// A single symbol record: the raw bytes beginning at the `u16` kind, not
/// including the preceding length.
///
/// `Symbol`s borrow from the buffer they were iterated out of.
#[derive(Copy, Clone, PartialEq)]
pub struct Symbol<'t>(pub(crate) &'t [u8]);

impl<'t> Symbol<'t> {
    /// Returns the kind of this symbol.
    #[inline]
    pub fn raw_kind(&self) -> u16 {
        debug_assert!(self.0.len() >= 2);
        u16::from(self.0[0]) | (u16::from(self.0[1]) << 8)
    }

    /// Returns the raw record bytes, including the kind.
    pub fn raw_bytes(&self) -> &'t [u8] {
        self.0
    }

    /// Parses the record into its [`SymbolData`].
    ///
    /// Kinds outside the decoded set return
    /// `Error::UnimplementedSymbolKind`.
    pub fn parse(&self) -> Result<SymbolData<'t>> {
        let kind = self.raw_kind();
        let mut buf = ParseBuffer::from(&self.0[2..]);

        match kind {
            kind if is_proc_symbol(kind) => Ok(SymbolData::Procedure {
                global: is_global_symbol(kind),
                parent: buf.parse_u32()?,
                end: buf.parse_u32()?,
                next: buf.parse_u32()?,
                length: buf.parse_u32()?,
                dbg_start: buf.parse_u32()?,
                dbg_end: buf.parse_u32()?,
                type_index: buf.parse_u32()?,
                offset: buf.parse_u32()?,
                segment: buf.parse_u16()?,
                flags: buf.parse_u8()?,
                name: parse_name(kind, &mut buf)?,
            }),

            kind if is_data_symbol(kind) => Ok(SymbolData::Data {
                global: is_global_symbol(kind),
                managed: matches!(kind, S_LMANDATA | S_LMANDATA_ST | S_GMANDATA | S_GMANDATA_ST),
                type_index: buf.parse_u32()?,
                offset: buf.parse_u32()?,
                segment: buf.parse_u16()?,
                name: parse_name(kind, &mut buf)?,
            }),

            S_PUB32 | S_PUB32_ST => {
                let flags = buf.parse_u32()?;
                Ok(SymbolData::Public {
                    code: flags & CVPSF_CODE != 0,
                    function: flags & CVPSF_FUNCTION != 0,
                    managed: flags & CVPSF_MANAGED != 0,
                    msil: flags & CVPSF_MSIL != 0,
                    offset: buf.parse_u32()?,
                    segment: buf.parse_u16()?,
                    name: parse_name(kind, &mut buf)?,
                })
            }

            S_UDT | S_UDT_ST => Ok(SymbolData::UserDefinedType {
                type_index: buf.parse_u32()?,
                name: parse_name(kind, &mut buf)?,
            }),

            S_CONSTANT | S_CONSTANT_ST => Ok(SymbolData::Constant {
                type_index: buf.parse_u32()?,
                value: buf.parse_variant()?,
                name: parse_name(kind, &mut buf)?,
            }),

            _ => Err(Error::UnimplementedSymbolKind(kind)),
        }
    }
}

impl<'t> fmt::Debug for Symbol<'t> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Symbol{{ kind: 0x{:04x} [{} bytes] }}",
            self.raw_kind(),
            self.0.len()
        )
    }
}

/// Names on old `_ST` kinds are u8-length-prefixed; everything newer is
/// NUL-terminated.
fn parse_name<'t>(kind: u16, buf: &mut ParseBuffer<'t>) -> Result<RawString<'t>> {
    if kind < S_ST_MAX {
        buf.parse_u8_pascal_string()
    } else {
        buf.parse_cstring()
    }
}

/// The information parsed out of a symbol record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolData<'t> {
    /// `S_GPROC32`, `S_LPROC32` and friends.
    Procedure {
        global: bool,
        parent: u32,
        end: u32,
        next: u32,
        /// Length of the procedure in bytes.
        length: u32,
        dbg_start: u32,
        dbg_end: u32,
        type_index: TypeIndex,
        offset: u32,
        segment: u16,
        flags: u8,
        name: RawString<'t>,
    },

    /// `S_GDATA32`, `S_LDATA32`, managed and thread-storage variants.
    Data {
        global: bool,
        managed: bool,
        type_index: TypeIndex,
        offset: u32,
        segment: u16,
        name: RawString<'t>,
    },

    /// `S_PUB32`.
    Public {
        code: bool,
        function: bool,
        managed: bool,
        msil: bool,
        offset: u32,
        segment: u16,
        name: RawString<'t>,
    },

    /// `S_UDT`.
    UserDefinedType {
        type_index: TypeIndex,
        name: RawString<'t>,
    },

    /// `S_CONSTANT`.
    Constant {
        type_index: TypeIndex,
        value: Variant,
        name: RawString<'t>,
    },
}

/// Iterates length-prefixed symbol records.
///
/// Iteration ends cleanly at the first record whose length is impossibly
/// small or runs past the end of the buffer; damaged tails are common in
/// the wild and are not an error.
#[derive(Debug)]
pub struct SymbolIter<'t> {
    buf: ParseBuffer<'t>,
}

impl<'t> SymbolIter<'t> {
    /// Creates an iterator over a symbol buffer, skipping the optional
    /// leading C13 signature.
    pub fn new(data: &'t [u8]) -> Self {
        let mut buf = ParseBuffer::from(data);

        let mut sig_buf = buf.clone();
        if let Ok(CV_SIGNATURE_C13) = sig_buf.parse_u32() {
            buf = sig_buf;
        }

        SymbolIter { buf }
    }
}

impl<'t> FallibleIterator for SymbolIter<'t> {
    type Item = Symbol<'t>;
    type Error = Error;

    fn next(&mut self) -> result::Result<Option<Self::Item>, Self::Error> {
        if self.buf.len() < 2 {
            return Ok(None);
        }

        let length = self.buf.parse_u16()? as usize;
        if length < 2 || length > self.buf.len() {
            return Ok(None);
        }

        let record = self.buf.take(length)?;
        Ok(Some(Symbol(record)))
    }
}
