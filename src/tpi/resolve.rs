// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Renders type indices as signatures and materializes structure and enum
//! bodies, following cross-references through the record arena.

use std::collections::HashSet;

use crate::common::*;
use crate::tpi::constants::*;
use crate::tpi::{builtin_type_name, TypeRecord, TypeStream, TYPE_INDEX_BEGIN};

/// Bound on resolver recursion. Well-formed type graphs are DAGs, but a
/// malformed file can cross-reference itself.
const MAX_DEPTH: usize = 64;

/// The forward-declaration bit in a record's property word.
const PROPERTY_FORWARD_REF: u16 = 0x80;

fn unknown_type(index: TypeIndex) -> String {
    format!("type_0x{:x}", index)
}

/// A fully parsed structure, class, union or enum.
#[derive(Debug, Clone, Default)]
pub struct TypeBody {
    pub index: TypeIndex,
    pub kind: u16,
    /// `"struct"`, `"class"`, `"union"` or `"enum"`.
    pub kind_name: &'static str,
    pub name: String,
    /// Size in bytes from the record's numeric leaf; zero for enums.
    pub size: u64,
    pub signature: String,
    pub members: Vec<TypeMember>,
}

/// One member of a [`TypeBody`].
///
/// For enumerators, `offset` carries the enumerator value and `type_name`
/// its decimal rendering.
#[derive(Debug, Clone, Default)]
pub struct TypeMember {
    pub name: String,
    pub type_index: TypeIndex,
    pub type_name: String,
    pub offset: u64,
}

/// Resolves type indices against a [`TypeStream`].
#[derive(Debug, Copy, Clone)]
pub struct TypeResolver<'t> {
    tpi: &'t TypeStream,
}

impl<'t> TypeResolver<'t> {
    pub fn new(tpi: &'t TypeStream) -> Self {
        TypeResolver { tpi }
    }

    /// Renders a type index as a human-readable signature.
    ///
    /// Built-in indices render from the index alone; unknown kinds and
    /// unresolvable indices render as `type_0x<index>`.
    pub fn resolve_type(&self, index: TypeIndex) -> String {
        self.resolve(index, 0)
    }

    fn resolve(&self, index: TypeIndex, depth: usize) -> String {
        if index < TYPE_INDEX_BEGIN {
            return builtin_type_name(index);
        }

        if depth >= MAX_DEPTH {
            log::debug!("type 0x{:x} exceeds resolver depth bound", index);
            return unknown_type(index);
        }

        let record = match self.tpi.type_by_index(index) {
            Some(record) => record,
            None => return unknown_type(index),
        };

        match record.kind {
            LF_POINTER => self.render_pointer(record.data, depth),
            LF_ARRAY | LF_ARRAY_NEW => self.render_array(record.data, depth),
            LF_PROCEDURE => self.render_procedure(record.data, depth),
            LF_MFUNCTION => self.render_member_function(record.data, depth),
            LF_MODIFIER => self.render_modifier(record.data, depth),
            LF_ARGLIST => self.render_arg_list(record.data, depth),
            LF_BITFIELD => self.render_bitfield(record.data, depth),
            LF_STRUCTURE | LF_STRUCTURE_NEW => self.record_name(record.data, "struct"),
            LF_CLASS | LF_CLASS_NEW => self.record_name(record.data, "class"),
            LF_UNION | LF_UNION_NEW => self.record_name(record.data, "union"),
            LF_ENUM | LF_ENUM_NEW => self.enum_name(record.data),
            _ => unknown_type(index),
        }
    }

    /// `LF_POINTER`: underlying type index plus a packed attribute word
    /// {kind: 5 bits, mode: 3, const, volatile}.
    fn render_pointer(&self, data: &[u8], depth: usize) -> String {
        let mut buf = ParseBuffer::from(data);
        let (underlying, attributes) = match (buf.parse_u32(), buf.parse_u32()) {
            (Ok(underlying), Ok(attributes)) => (underlying, attributes),
            _ => return "ptr<?>".to_string(),
        };

        let pointer_kind = attributes & 0x1f;
        let mode = (attributes >> 5) & 0x07;
        let is_const = attributes & (1 << 10) != 0;
        let is_volatile = attributes & (1 << 11) != 0;

        let mut suffix = match pointer_kind {
            1 => " far*",
            2 => " huge*",
            _ => "*",
        };

        // modes 1 and 2 are l-value and r-value references
        match mode {
            1 => suffix = "&",
            2 => suffix = "&&",
            _ => {}
        }

        let mut result = self.resolve(underlying, depth + 1) + suffix;
        if is_const {
            result = format!("const {}", result);
        }
        if is_volatile {
            result = format!("volatile {}", result);
        }
        result
    }

    /// `LF_ARRAY`: element type, index type, then a numeric-leaf byte size.
    fn render_array(&self, data: &[u8], depth: usize) -> String {
        let mut buf = ParseBuffer::from(data);
        let (element, _index_type) = match (buf.parse_u32(), buf.parse_u32()) {
            (Ok(element), Ok(index_type)) => (element, index_type),
            _ => return "array<?>".to_string(),
        };

        let size = match buf.parse_variant() {
            Ok(variant) => variant.as_u64(),
            Err(_) => 0,
        };

        let element = self.resolve(element, depth + 1);
        if size > 0 {
            format!("{}[{}]", element, size)
        } else {
            format!("{}[]", element)
        }
    }

    /// `LF_PROCEDURE`: return type, calling convention, parameter count and
    /// an `LF_ARGLIST` index.
    fn render_procedure(&self, data: &[u8], depth: usize) -> String {
        let mut buf = ParseBuffer::from(data);
        let parsed = (
            buf.parse_u32(),
            buf.parse_u8(),
            buf.parse_u8(),
            buf.parse_u16(),
            buf.parse_u32(),
        );
        let (return_type, arg_list) = match parsed {
            (Ok(return_type), Ok(_cc), Ok(_attrs), Ok(_params), Ok(arg_list)) => {
                (return_type, arg_list)
            }
            _ => return "func<?>".to_string(),
        };

        format!(
            "{} ({})",
            self.resolve(return_type, depth + 1),
            self.resolve(arg_list, depth + 1)
        )
    }

    /// `LF_MFUNCTION`: like a procedure, qualified by the class type.
    fn render_member_function(&self, data: &[u8], depth: usize) -> String {
        let mut buf = ParseBuffer::from(data);
        let parsed = (
            buf.parse_u32(),
            buf.parse_u32(),
            buf.parse_u32(),
            buf.parse_u8(),
            buf.parse_u8(),
            buf.parse_u16(),
            buf.parse_u32(),
        );
        let (return_type, class_type, arg_list) = match parsed {
            (Ok(ret), Ok(class), Ok(_this), Ok(_cc), Ok(_attrs), Ok(_params), Ok(args)) => {
                (ret, class, args)
            }
            _ => return "mfunc<?>".to_string(),
        };

        format!(
            "{}::{} ({})",
            self.resolve(class_type, depth + 1),
            self.resolve(return_type, depth + 1),
            self.resolve(arg_list, depth + 1)
        )
    }

    /// `LF_MODIFIER`: const/volatile/unaligned flags over an inner type.
    fn render_modifier(&self, data: &[u8], depth: usize) -> String {
        let mut buf = ParseBuffer::from(data);
        let (inner, flags) = match (buf.parse_u32(), buf.parse_u16()) {
            (Ok(inner), Ok(flags)) => (inner, flags),
            _ => return "mod<?>".to_string(),
        };

        let mut result = self.resolve(inner, depth + 1);
        if flags & 0x01 != 0 {
            result = format!("const {}", result);
        }
        if flags & 0x02 != 0 {
            result = format!("volatile {}", result);
        }
        if flags & 0x04 != 0 {
            result = format!("unaligned {}", result);
        }
        result
    }

    /// `LF_ARGLIST`: a count followed by that many type indices. An empty
    /// list renders as `void`.
    fn render_arg_list(&self, data: &[u8], depth: usize) -> String {
        let mut buf = ParseBuffer::from(data);
        let count = match buf.parse_u32() {
            Ok(count) => count,
            Err(_) => return String::new(),
        };

        if count == 0 {
            return "void".to_string();
        }

        let mut args = Vec::new();
        for _ in 0..count {
            match buf.parse_u32() {
                Ok(arg) => args.push(self.resolve(arg, depth + 1)),
                Err(_) => break,
            }
        }
        args.join(", ")
    }

    /// `LF_BITFIELD`: base type, bit length and bit position.
    fn render_bitfield(&self, data: &[u8], depth: usize) -> String {
        let mut buf = ParseBuffer::from(data);
        let parsed = (buf.parse_u32(), buf.parse_u8(), buf.parse_u8());
        let (base, length, position) = match parsed {
            (Ok(base), Ok(length), Ok(position)) => (base, length, position),
            _ => return "bitfield<?>".to_string(),
        };

        format!(
            "{} : {} (pos {})",
            self.resolve(base, depth + 1),
            length,
            position
        )
    }

    /// Renders a structure-like record as its declared name, falling back
    /// to the bare kind for anonymous records.
    fn record_name(&self, data: &[u8], kind_name: &str) -> String {
        let mut buf = ParseBuffer::from(data);
        if buf.take(16).is_err() {
            return format!("{}<?>", kind_name);
        }
        if buf.parse_variant().is_err() {
            return format!("{}<?>", kind_name);
        }
        match buf.parse_cstring() {
            Ok(name) if !name.is_empty() => name.to_string().into_owned(),
            _ => kind_name.to_string(),
        }
    }

    fn enum_name(&self, data: &[u8]) -> String {
        let mut buf = ParseBuffer::from(data);
        if buf.take(12).is_err() {
            return "enum<?>".to_string();
        }
        match buf.parse_cstring() {
            Ok(name) if !name.is_empty() => name.to_string().into_owned(),
            _ => "enum".to_string(),
        }
    }

    /// Parses a structure/class/union record into a [`TypeBody`].
    ///
    /// Forward declarations (property bit 0x80) yield the header and name
    /// without following the field list.
    pub fn parse_structure(&self, record: &TypeRecord<'_>) -> Option<TypeBody> {
        let kind_name = match record.kind {
            LF_STRUCTURE | LF_STRUCTURE_NEW => "struct",
            LF_CLASS | LF_CLASS_NEW => "class",
            LF_UNION | LF_UNION_NEW => "union",
            _ => return None,
        };

        let mut buf = ParseBuffer::from(record.data);
        let _count = buf.parse_u16().ok()?;
        let property = buf.parse_u16().ok()?;
        let field_list = buf.parse_u32().ok()?;
        let _derived = buf.parse_u32().ok()?;
        let _vshape = buf.parse_u32().ok()?;
        let size = buf.parse_variant().ok()?.as_u64();
        let name = buf.parse_cstring().ok()?.to_string().into_owned();

        let mut body = TypeBody {
            index: record.index,
            kind: record.kind,
            kind_name,
            signature: format!("{} {}", kind_name, name),
            name,
            size,
            members: Vec::new(),
        };

        if property & PROPERTY_FORWARD_REF != 0 {
            return Some(body);
        }

        if field_list >= TYPE_INDEX_BEGIN {
            body.members = self.field_list_members(field_list);
        }

        Some(body)
    }

    /// Parses an enum record into a [`TypeBody`] whose members carry the
    /// enumerator values.
    pub fn parse_enumeration(&self, record: &TypeRecord<'_>) -> Option<TypeBody> {
        if !matches!(record.kind, LF_ENUM | LF_ENUM_NEW) {
            return None;
        }

        let mut buf = ParseBuffer::from(record.data);
        let _count = buf.parse_u16().ok()?;
        let _property = buf.parse_u16().ok()?;
        let underlying = buf.parse_u32().ok()?;
        let field_list = buf.parse_u32().ok()?;
        let name = buf.parse_cstring().ok()?.to_string().into_owned();

        let mut body = TypeBody {
            index: record.index,
            kind: record.kind,
            kind_name: "enum",
            signature: format!("enum {} : {}", name, self.resolve_type(underlying)),
            name,
            size: 0,
            members: Vec::new(),
        };

        if field_list >= TYPE_INDEX_BEGIN {
            body.members = self.field_list_members(field_list);
        }

        Some(body)
    }

    /// Collects the members of a field list, splicing `LF_INDEX`
    /// continuations in order. A visited set keeps malformed cyclic
    /// continuation chains from recursing forever.
    fn field_list_members(&self, index: TypeIndex) -> Vec<TypeMember> {
        let mut members = Vec::new();
        let mut visited = HashSet::new();
        self.collect_fields(index, &mut members, &mut visited);
        members
    }

    fn collect_fields(
        &self,
        index: TypeIndex,
        members: &mut Vec<TypeMember>,
        visited: &mut HashSet<TypeIndex>,
    ) {
        if !visited.insert(index) {
            log::debug!("field list 0x{:x} revisited; cycle in continuation chain", index);
            return;
        }

        let record = match self.tpi.type_by_index(index) {
            Some(record) if record.kind == LF_FIELDLIST => record,
            _ => return,
        };

        self.walk_field_list(record.data, members, visited);
    }

    fn walk_field_list(
        &self,
        data: &[u8],
        members: &mut Vec<TypeMember>,
        visited: &mut HashSet<TypeIndex>,
    ) {
        let mut buf = ParseBuffer::from(data);

        while buf.len() >= 2 {
            // padding bytes 0xf0..0xff carry their own width in the low
            // nibble; they are one byte wide, so peek before committing to
            // a u16 leaf read
            match buf.peek_u8() {
                Ok(pad) if pad >= LF_PAD_MIN => {
                    let n = ((pad & 0x0f) as usize).max(1).min(buf.len());
                    if buf.take(n).is_err() {
                        return;
                    }
                    continue;
                }
                Err(_) => return,
                _ => {}
            }

            let leaf = match buf.parse_u16() {
                Ok(leaf) => leaf,
                Err(_) => return,
            };

            match leaf {
                LF_MEMBER | LF_MEMBER_NEW => match self.parse_member_field(&mut buf) {
                    Some(member) => members.push(member),
                    None => return,
                },

                LF_STMEMBER | LF_STMEMBER_NEW => {
                    let parsed = (buf.parse_u16(), buf.parse_u32(), buf.parse_cstring());
                    match parsed {
                        (Ok(_attrs), Ok(type_index), Ok(name)) => members.push(TypeMember {
                            name: name.to_string().into_owned(),
                            type_index,
                            type_name: self.resolve_type(type_index) + " (static)",
                            offset: 0,
                        }),
                        _ => return,
                    }
                }

                LF_BCLASS => {
                    let parsed = (buf.parse_u16(), buf.parse_u32(), buf.parse_variant());
                    match parsed {
                        (Ok(_attrs), Ok(type_index), Ok(offset)) => members.push(TypeMember {
                            name: "(base)".to_string(),
                            type_index,
                            type_name: self.resolve_type(type_index),
                            offset: offset.as_u64(),
                        }),
                        _ => return,
                    }
                }

                LF_ENUMERATE => {
                    let parsed = (buf.parse_u16(), buf.parse_variant());
                    let value = match parsed {
                        (Ok(_attrs), Ok(value)) => value,
                        _ => return,
                    };
                    let name = match buf.parse_cstring() {
                        Ok(name) => name.to_string().into_owned(),
                        Err(_) => return,
                    };
                    members.push(TypeMember {
                        name,
                        type_index: 0,
                        type_name: value.to_string(),
                        offset: value.as_u64(),
                    });
                }

                // consumed for cursor advancement only
                LF_METHOD | LF_METHOD_NEW | LF_ONEMETHOD | LF_ONEMETHOD_NEW | LF_NESTTYPE
                | LF_NESTTYPE_NEW => {
                    let parsed = (buf.parse_u16(), buf.parse_u32(), buf.parse_cstring());
                    if parsed.0.is_err() || parsed.1.is_err() || parsed.2.is_err() {
                        return;
                    }
                }

                LF_VFUNCTAB => {
                    let parsed = (buf.parse_u16(), buf.parse_u32());
                    if parsed.0.is_err() || parsed.1.is_err() {
                        return;
                    }
                }

                LF_INDEX => {
                    let parsed = (buf.parse_u16(), buf.parse_u32());
                    match parsed {
                        (Ok(_pad), Ok(next)) => {
                            if next >= TYPE_INDEX_BEGIN {
                                self.collect_fields(next, members, visited);
                            }
                        }
                        _ => return,
                    }
                }

                other => {
                    log::debug!("field list stops at unrecognized leaf 0x{:04x}", other);
                    return;
                }
            }

            if buf.align(4).is_err() {
                return;
            }
        }
    }

    fn parse_member_field(&self, buf: &mut ParseBuffer<'_>) -> Option<TypeMember> {
        let _attrs = buf.parse_u16().ok()?;
        let type_index = buf.parse_u32().ok()?;
        let offset = buf.parse_variant().ok()?.as_u64();
        let name = buf.parse_cstring().ok()?.to_string().into_owned();
        Some(TypeMember {
            name,
            type_index,
            type_name: self.resolve_type(type_index),
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpi::test_fixtures::{pointer_payload, tpi_stream};
    use crate::tpi::TypeStream;

    const T_INT4: u32 = 0x0074;
    const T_UINT4: u32 = 0x0075;
    const T_REAL32: u32 = 0x0040;

    fn parse(records: &[(u16, Vec<u8>)]) -> TypeStream {
        TypeStream::parse(tpi_stream(records)).expect("parse TPI")
    }

    fn member_field(name: &str, type_index: u32, offset: u16) -> Vec<u8> {
        let mut field = Vec::new();
        field.extend_from_slice(&LF_MEMBER_NEW.to_le_bytes());
        field.extend_from_slice(&0u16.to_le_bytes()); // attributes
        field.extend_from_slice(&type_index.to_le_bytes());
        field.extend_from_slice(&offset.to_le_bytes()); // numeric leaf
        field.extend_from_slice(name.as_bytes());
        field.push(0);
        while field.len() % 4 != 0 {
            field.push(0);
        }
        field
    }

    fn index_field(next: u32) -> Vec<u8> {
        let mut field = Vec::new();
        field.extend_from_slice(&LF_INDEX.to_le_bytes());
        field.extend_from_slice(&0u16.to_le_bytes());
        field.extend_from_slice(&next.to_le_bytes());
        field
    }

    fn enumerate_field(name: &str, value: u16) -> Vec<u8> {
        let mut field = Vec::new();
        field.extend_from_slice(&LF_ENUMERATE.to_le_bytes());
        field.extend_from_slice(&0u16.to_le_bytes()); // attributes
        field.extend_from_slice(&value.to_le_bytes()); // numeric leaf
        field.extend_from_slice(name.as_bytes());
        field.push(0);
        while field.len() % 4 != 0 {
            field.push(0);
        }
        field
    }

    fn structure_payload(name: &str, property: u16, field_list: u32, size: u16) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u16.to_le_bytes()); // member count
        payload.extend_from_slice(&property.to_le_bytes());
        payload.extend_from_slice(&field_list.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes()); // derived
        payload.extend_from_slice(&0u32.to_le_bytes()); // vshape
        payload.extend_from_slice(&size.to_le_bytes()); // numeric leaf
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload
    }

    fn enum_payload(name: &str, underlying: u32, field_list: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&3u16.to_le_bytes()); // count
        payload.extend_from_slice(&0u16.to_le_bytes()); // property
        payload.extend_from_slice(&underlying.to_le_bytes());
        payload.extend_from_slice(&field_list.to_le_bytes());
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload
    }

    #[test]
    fn test_pointer_to_builtin() {
        let tpi = parse(&[(LF_POINTER, pointer_payload(T_INT4, 0))]);
        assert_eq!(tpi.resolver().resolve_type(0x1000), "int32*");
    }

    #[test]
    fn test_pointer_modes_and_qualifiers() {
        let tpi = parse(&[
            (LF_POINTER, pointer_payload(T_INT4, 1 << 5)), // l-value ref
            (LF_POINTER, pointer_payload(T_INT4, 2 << 5)), // r-value ref
            (LF_POINTER, pointer_payload(T_INT4, 1 << 10)), // const
            (LF_POINTER, pointer_payload(T_INT4, (1 << 11) | 1)), // volatile far
        ]);
        let resolver = tpi.resolver();
        assert_eq!(resolver.resolve_type(0x1000), "int32&");
        assert_eq!(resolver.resolve_type(0x1001), "int32&&");
        assert_eq!(resolver.resolve_type(0x1002), "const int32*");
        assert_eq!(resolver.resolve_type(0x1003), "volatile int32 far*");
    }

    #[test]
    fn test_modifier() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&T_INT4.to_le_bytes());
        payload.extend_from_slice(&0x03u16.to_le_bytes()); // const + volatile

        let tpi = parse(&[(LF_MODIFIER, payload)]);
        assert_eq!(tpi.resolver().resolve_type(0x1000), "volatile const int32");
    }

    #[test]
    fn test_array() {
        let mut sized = Vec::new();
        sized.extend_from_slice(&T_INT4.to_le_bytes());
        sized.extend_from_slice(&0x0077u32.to_le_bytes()); // index type
        sized.extend_from_slice(&40u16.to_le_bytes()); // numeric leaf size

        let mut unsized_data = Vec::new();
        unsized_data.extend_from_slice(&T_REAL32.to_le_bytes());
        unsized_data.extend_from_slice(&0x0077u32.to_le_bytes());
        unsized_data.extend_from_slice(&0u16.to_le_bytes());

        let tpi = parse(&[(LF_ARRAY_NEW, sized), (LF_ARRAY, unsized_data)]);
        assert_eq!(tpi.resolver().resolve_type(0x1000), "int32[40]");
        assert_eq!(tpi.resolver().resolve_type(0x1001), "float[]");
    }

    #[test]
    fn test_procedure_and_arg_list() {
        let mut args = Vec::new();
        args.extend_from_slice(&2u32.to_le_bytes());
        args.extend_from_slice(&T_INT4.to_le_bytes());
        args.extend_from_slice(&T_REAL32.to_le_bytes());

        let mut empty_args = Vec::new();
        empty_args.extend_from_slice(&0u32.to_le_bytes());

        let mut proc = Vec::new();
        proc.extend_from_slice(&T_INT4.to_le_bytes()); // return type
        proc.push(0); // calling convention
        proc.push(0); // attributes
        proc.extend_from_slice(&2u16.to_le_bytes()); // parameter count
        proc.extend_from_slice(&0x1000u32.to_le_bytes()); // arg list

        let mut thunk = Vec::new();
        thunk.extend_from_slice(&0x0003u32.to_le_bytes()); // void
        thunk.push(0);
        thunk.push(0);
        thunk.extend_from_slice(&0u16.to_le_bytes());
        thunk.extend_from_slice(&0x1001u32.to_le_bytes());

        let tpi = parse(&[
            (LF_ARGLIST, args),
            (LF_ARGLIST, empty_args),
            (LF_PROCEDURE, proc),
            (LF_PROCEDURE, thunk),
        ]);
        assert_eq!(tpi.resolver().resolve_type(0x1002), "int32 (int32, float)");
        assert_eq!(tpi.resolver().resolve_type(0x1003), "void (void)");
    }

    #[test]
    fn test_member_function() {
        let structure = structure_payload("Point", 0, 0, 8);

        let mut args = Vec::new();
        args.extend_from_slice(&0u32.to_le_bytes());

        let mut mfunc = Vec::new();
        mfunc.extend_from_slice(&T_INT4.to_le_bytes()); // return
        mfunc.extend_from_slice(&0x1000u32.to_le_bytes()); // class
        mfunc.extend_from_slice(&0u32.to_le_bytes()); // this
        mfunc.push(0); // calling convention
        mfunc.push(0); // attributes
        mfunc.extend_from_slice(&0u16.to_le_bytes()); // parameters
        mfunc.extend_from_slice(&0x1001u32.to_le_bytes()); // arg list
        mfunc.extend_from_slice(&0u32.to_le_bytes()); // this adjustment

        let tpi = parse(&[
            (LF_STRUCTURE_NEW, structure),
            (LF_ARGLIST, args),
            (LF_MFUNCTION, mfunc),
        ]);
        assert_eq!(tpi.resolver().resolve_type(0x1002), "Point::int32 (void)");
    }

    #[test]
    fn test_bitfield() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&T_UINT4.to_le_bytes());
        payload.push(3); // length
        payload.push(4); // position

        let tpi = parse(&[(LF_BITFIELD, payload)]);
        assert_eq!(tpi.resolver().resolve_type(0x1000), "uint32 : 3 (pos 4)");
    }

    #[test]
    fn test_unknown_kind() {
        let tpi = parse(&[(0x1234, vec![0u8; 8])]);
        assert_eq!(tpi.resolver().resolve_type(0x1000), "type_0x1000");
        assert_eq!(tpi.resolver().resolve_type(0x2000), "type_0x2000");
    }

    #[test]
    fn test_structure_body() {
        let mut fields = Vec::new();
        fields.extend_from_slice(&member_field("x", T_INT4, 0));
        fields.extend_from_slice(&member_field("y", T_INT4, 4));

        let tpi = parse(&[
            (LF_FIELDLIST, fields),
            (LF_STRUCTURE_NEW, structure_payload("Point", 0, 0x1000, 8)),
        ]);

        let record = tpi.type_by_index(0x1001).expect("record");
        let body = tpi.resolver().parse_structure(&record).expect("body");

        assert_eq!(body.kind_name, "struct");
        assert_eq!(body.name, "Point");
        assert_eq!(body.size, 8);
        assert_eq!(body.signature, "struct Point");
        assert_eq!(body.members.len(), 2);
        assert_eq!(body.members[0].name, "x");
        assert_eq!(body.members[0].type_name, "int32");
        assert_eq!(body.members[0].offset, 0);
        assert_eq!(body.members[1].name, "y");
        assert_eq!(body.members[1].offset, 4);
    }

    #[test]
    fn test_forward_declaration() {
        let tpi = parse(&[
            (LF_FIELDLIST, member_field("x", T_INT4, 0)),
            (
                LF_STRUCTURE_NEW,
                structure_payload("Fwd", PROPERTY_FORWARD_REF, 0x1000, 0),
            ),
        ]);

        let record = tpi.type_by_index(0x1001).expect("record");
        let body = tpi.resolver().parse_structure(&record).expect("body");
        assert_eq!(body.name, "Fwd");
        assert!(body.members.is_empty());
    }

    #[test]
    fn test_field_list_continuation() {
        // FL2 holds the tail member; FL1 holds two members and continues
        // into FL2
        let fl2 = member_field("c", T_INT4, 8);

        let mut fl1 = Vec::new();
        fl1.extend_from_slice(&member_field("a", T_INT4, 0));
        fl1.extend_from_slice(&member_field("b", T_INT4, 4));
        fl1.extend_from_slice(&index_field(0x1000));

        let tpi = parse(&[
            (LF_FIELDLIST, fl2),
            (LF_FIELDLIST, fl1),
            (LF_STRUCTURE_NEW, structure_payload("Point3", 0, 0x1001, 12)),
        ]);

        let record = tpi.type_by_index(0x1002).expect("record");
        let body = tpi.resolver().parse_structure(&record).expect("body");

        let names: Vec<_> = body.members.iter().map(|m| m.name.as_str()).collect();
        let offsets: Vec<_> = body.members.iter().map(|m| m.offset).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(offsets, vec![0, 4, 8]);
    }

    #[test]
    fn test_field_list_cycle() {
        // a continuation chain pointing back at itself must terminate
        let mut fl = Vec::new();
        fl.extend_from_slice(&member_field("a", T_INT4, 0));
        fl.extend_from_slice(&index_field(0x1000));

        let tpi = parse(&[
            (LF_FIELDLIST, fl),
            (LF_STRUCTURE_NEW, structure_payload("Cycle", 0, 0x1000, 4)),
        ]);

        let record = tpi.type_by_index(0x1001).expect("record");
        let body = tpi.resolver().parse_structure(&record).expect("body");
        assert_eq!(body.members.len(), 1);
        assert_eq!(body.members[0].name, "a");
    }

    #[test]
    fn test_field_list_padding_bytes() {
        let mut fl = Vec::new();
        fl.extend_from_slice(&member_field("a", T_INT4, 0));
        // two single-byte padding leaves, then another member
        fl.push(0xf2);
        fl.push(0xf1);
        fl.extend_from_slice(&member_field("b", T_INT4, 4));

        let tpi = parse(&[
            (LF_FIELDLIST, fl),
            (LF_STRUCTURE_NEW, structure_payload("Padded", 0, 0x1000, 8)),
        ]);

        let record = tpi.type_by_index(0x1001).expect("record");
        let body = tpi.resolver().parse_structure(&record).expect("body");
        let names: Vec<_> = body.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_enumeration() {
        let mut fields = Vec::new();
        fields.extend_from_slice(&enumerate_field("RED", 0));
        fields.extend_from_slice(&enumerate_field("GREEN", 1));
        fields.extend_from_slice(&enumerate_field("BLUE", 2));

        let tpi = parse(&[
            (LF_FIELDLIST, fields),
            (LF_ENUM_NEW, enum_payload("Color", T_INT4, 0x1000)),
        ]);

        let record = tpi.type_by_index(0x1001).expect("record");
        let body = tpi.resolver().parse_enumeration(&record).expect("body");

        assert_eq!(body.kind_name, "enum");
        assert_eq!(body.name, "Color");
        assert_eq!(body.signature, "enum Color : int32");
        assert_eq!(body.members.len(), 3);
        assert_eq!(body.members[1].name, "GREEN");
        assert_eq!(body.members[1].offset, 1);
        assert_eq!(body.members[1].type_name, "1");
    }

    #[test]
    fn test_self_referential_pointer_terminates() {
        let tpi = parse(&[(LF_POINTER, pointer_payload(0x1000, 0))]);
        let rendered = tpi.resolver().resolve_type(0x1000);
        // the depth bound cuts the cycle; the exact rendering is bounded
        assert!(rendered.contains("type_0x1000"));
        assert!(rendered.ends_with('*'));
    }

    #[test]
    fn test_unsupported_numeric_leaf_abandons_record() {
        // structure whose size uses an unsupported numeric discriminator
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&0x8005u16.to_le_bytes()); // LF_REAL32
        payload.extend_from_slice(&[0u8; 6]);

        let tpi = parse(&[(LF_STRUCTURE_NEW, payload)]);
        let record = tpi.type_by_index(0x1000).expect("record");
        assert!(tpi.resolver().parse_structure(&record).is_none());
    }
}
