// Copyright 2019 pdbview Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A best-effort MSVC name demangler.
//!
//! Handles three shapes of decorated name:
//!
//! * C++ names starting with `?`, via recursive descent with a
//!   back-reference table,
//! * C decorations starting with `_` (optionally suffixed `@<digits>` for
//!   stdcall/fastcall parameter sizes),
//! * import thunks prefixed `__imp_`.
//!
//! Undecorated names pass through unchanged. Exhausted or unrecognized
//! input yields whatever was accumulated so far; full parity with MSVC's
//! own undecorator is out of scope.

/// The separated parts of a demangled name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demangled {
    /// The qualified name, e.g. `MyClass::my_method`.
    pub name: String,
    /// The prototype, e.g. `int __cdecl(int, char*)`; empty for data
    /// symbols and names without type encodings.
    pub prototype: String,
}

/// Demangles an MSVC decorated name into name and prototype.
pub fn demangle(name: &str) -> Demangled {
    if name.is_empty() {
        return Demangled::default();
    }

    if name.starts_with('?') {
        return Demangler::new(name).run();
    }

    if let Some(inner) = name.strip_prefix("__imp_") {
        let mut result = demangle(inner);
        if !result.name.is_empty() {
            result.name.push_str(" [import]");
            return result;
        }
    }

    if name.starts_with('_') {
        return Demangled {
            name: demangle_c_decl(name),
            prototype: String::new(),
        };
    }

    Demangled {
        name: name.to_string(),
        prototype: String::new(),
    }
}

/// Strips one leading underscore and any trailing `@<digits>` suffix.
fn demangle_c_decl(name: &str) -> String {
    let stripped = &name[1..];

    if let Some(at) = stripped.rfind('@') {
        let suffix = &stripped[at + 1..];
        if at > 0 && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            return stripped[..at].to_string();
        }
    }

    stripped.to_string()
}

/// Recursion and argument caps keep malformed input from running away.
const MAX_ARGUMENTS: usize = 20;

struct Demangler<'a> {
    input: &'a [u8],
    pos: usize,
    /// Back-reference table: literal name segments in order of appearance.
    names: Vec<String>,
}

impl<'a> Demangler<'a> {
    fn new(input: &'a str) -> Self {
        Demangler {
            input: input.as_bytes(),
            pos: 1, // skip the leading '?'
            names: Vec::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn run(mut self) -> Demangled {
        let name = self.parse_qualified_name();
        if name.is_empty() {
            return Demangled::default();
        }

        let prototype = self.parse_type_encoding();
        Demangled { name, prototype }
    }

    /// A qualified name is a sequence of segments terminated by `@@`,
    /// encoded inner-to-outer.
    fn parse_qualified_name(&mut self) -> String {
        let mut parts: Vec<String> = Vec::new();

        while let Some(ch) = self.peek() {
            match ch {
                b'@' => {
                    self.pos += 1;
                    if self.peek() == Some(b'@') {
                        self.pos += 1;
                        break;
                    }
                }

                b'0'..=b'9' => {
                    // back-reference to a previously recorded segment
                    self.pos += 1;
                    let index = (ch - b'0') as usize;
                    if let Some(referenced) = self.names.get(index) {
                        parts.push(referenced.clone());
                    }
                }

                b'?' => {
                    self.pos += 1;
                    let special = self.parse_special_name();
                    if !special.is_empty() {
                        parts.push(special);
                    }
                }

                _ => {
                    let segment = self.parse_segment();
                    if !segment.is_empty() {
                        self.names.push(segment.clone());
                        parts.push(segment);
                    }
                }
            }
        }

        parts.reverse();
        parts.join("::")
    }

    /// A literal segment runs up to the next `@` or `?`.
    fn parse_segment(&mut self) -> String {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == b'@' || ch == b'?' {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_special_name(&mut self) -> String {
        let ch = match self.bump() {
            Some(ch) => ch,
            None => return String::new(),
        };

        let fixed = match ch {
            b'0' => return self.parse_segment(), // constructor
            b'1' => return format!("~{}", self.parse_segment()), // destructor
            b'2' => "operator new",
            b'3' => "operator delete",
            b'4' => "operator=",
            b'5' => "operator>>",
            b'6' => "operator<<",
            b'7' => "operator!",
            b'8' => "operator==",
            b'9' => "operator!=",
            b'A' => "operator[]",
            b'B' => "operator (cast)",
            b'C' => "operator->",
            b'D' => "operator*",
            b'E' => "operator++",
            b'F' => "operator--",
            b'G' => "operator-",
            b'H' => "operator+",
            b'I' => "operator&",
            b'J' => "operator->*",
            b'K' => "operator/",
            b'L' => "operator%",
            b'M' => "operator<",
            b'N' => "operator<=",
            b'O' => "operator>",
            b'P' => "operator>=",
            b'Q' => "operator,",
            b'R' => "operator()",
            b'S' => "operator~",
            b'T' => "operator^",
            b'U' => "operator|",
            b'V' => "operator&&",
            b'W' => "operator||",
            b'X' => "operator*=",
            b'Y' => "operator+=",
            b'Z' => "operator-=",
            b'_' => {
                return match self.bump() {
                    Some(b'0') => "operator/=".to_string(),
                    Some(b'1') => "operator%=".to_string(),
                    Some(b'2') => "operator>>=".to_string(),
                    Some(b'3') => "operator<<=".to_string(),
                    Some(b'4') => "operator&=".to_string(),
                    Some(b'5') => "operator|=".to_string(),
                    Some(b'6') => "operator^=".to_string(),
                    Some(b'E') => "dynamic initializer".to_string(),
                    Some(b'F') => "dynamic atexit destructor".to_string(),
                    Some(b'K') => format!("operator \"\" {}", self.parse_segment()),
                    _ => String::new(),
                };
            }
            _ => return String::new(),
        };

        fixed.to_string()
    }

    /// The character after the qualified name classifies storage: free
    /// function, member function with access modifiers, or data member.
    fn parse_type_encoding(&mut self) -> String {
        let ch = match self.peek() {
            Some(ch) => ch,
            None => return String::new(),
        };

        match ch {
            b'Y' => {
                self.pos += 1;
                self.parse_function_type("")
            }
            b'Q' | b'R' | b'S' | b'T' | b'A' | b'B' | b'C' | b'D' => {
                self.pos += 1;
                let access = access_modifier(ch);
                self.parse_function_type(access)
            }
            // data members carry no prototype
            b'0'..=b'3' => {
                self.pos += 1;
                String::new()
            }
            _ => String::new(),
        }
    }

    fn parse_function_type(&mut self, access: &str) -> String {
        if self.peek().is_none() {
            return access.to_string();
        }

        let calling_convention = self.parse_calling_convention();
        let return_type = self.parse_type();
        let arguments = self.parse_arguments();

        let mut result = String::new();
        if !access.is_empty() {
            result.push_str(access);
        }
        if !return_type.is_empty() {
            if !result.is_empty() {
                result.push(' ');
            }
            result.push_str(&return_type);
        }
        if !calling_convention.is_empty() {
            if !result.is_empty() {
                result.push(' ');
            }
            result.push_str(calling_convention);
        }
        if !arguments.is_empty() {
            result.push('(');
            result.push_str(&arguments);
            result.push(')');
        }
        result
    }

    fn parse_calling_convention(&mut self) -> &'static str {
        let ch = match self.peek() {
            Some(ch) => ch,
            None => return "",
        };

        let convention = match ch {
            b'A' => "__cdecl",
            b'B' => "__cdecl __export",
            b'C' => "__pascal",
            b'D' => "__pascal __export",
            b'E' => "__thiscall",
            b'F' => "__thiscall __export",
            b'G' => "__stdcall",
            b'H' => "__stdcall __export",
            b'I' => "__fastcall",
            b'J' => "__fastcall __export",
            b'K' | b'L' => "",
            b'M' => "__clrcall",
            b'Q' => "__vectorcall",
            _ => return "",
        };

        self.pos += 1;
        convention
    }

    fn parse_type(&mut self) -> String {
        let ch = match self.peek() {
            Some(ch) => ch,
            None => return String::new(),
        };
        self.pos += 1;

        let fixed = match ch {
            b'X' => "void",
            b'C' => "signed char",
            b'D' => "char",
            b'E' => "unsigned char",
            b'F' => "short",
            b'G' => "unsigned short",
            b'H' => "int",
            b'I' => "unsigned int",
            b'J' => "long",
            b'K' => "unsigned long",
            b'M' => "float",
            b'N' => "double",
            b'O' => "long double",
            b'Z' => "...",
            b'_' => {
                return match self.bump() {
                    Some(b'J') => "__int64".to_string(),
                    Some(b'K') => "unsigned __int64".to_string(),
                    Some(b'N') => "bool".to_string(),
                    Some(b'W') => "wchar_t".to_string(),
                    Some(b'S') => "char16_t".to_string(),
                    Some(b'U') => "char32_t".to_string(),
                    _ => String::new(),
                };
            }
            b'P' => return format!("{}*", self.parse_type()),
            b'Q' => return format!("{}* const", self.parse_type()),
            b'A' => return format!("{}&", self.parse_type()),
            b'B' => return format!("volatile {}", self.parse_type()),
            // class, struct and union introduce a nested qualified name
            b'U' | b'V' | b'T' => return self.parse_class_name(),
            b'@' => return String::new(),
            _ => {
                // not a type we recognize; leave it for the caller
                self.pos -= 1;
                return String::new();
            }
        };

        fixed.to_string()
    }

    /// A user-defined type name: `@`-separated segments up to `@@`,
    /// reversed and joined with `::`.
    fn parse_class_name(&mut self) -> String {
        let start = self.pos;
        let mut end = None;

        while self.pos < self.input.len() {
            if self.input[self.pos] == b'@' {
                if self.input.get(self.pos + 1) == Some(&b'@') {
                    end = Some(self.pos);
                    self.pos += 2;
                    break;
                }
            }
            self.pos += 1;
        }

        let raw = &self.input[start..end.unwrap_or(self.pos)];
        let mut parts: Vec<&str> = std::str::from_utf8(raw)
            .unwrap_or("")
            .split('@')
            .collect();
        parts.reverse();
        parts.join("::")
    }

    /// Argument types up to `@` (end of list) or `Z` (varargs terminator).
    fn parse_arguments(&mut self) -> String {
        let mut arguments = Vec::new();

        while let Some(ch) = self.peek() {
            if ch == b'@' || ch == b'Z' {
                self.pos += 1;
                break;
            }

            let argument = self.parse_type();
            if argument.is_empty() {
                break;
            }
            arguments.push(argument);

            if arguments.len() > MAX_ARGUMENTS {
                break;
            }
        }

        arguments.join(", ")
    }
}

fn access_modifier(ch: u8) -> &'static str {
    match ch {
        b'A' | b'Q' => "private:",
        b'B' | b'R' => "private: static",
        b'C' | b'S' => "protected:",
        b'D' | b'T' => "protected: static",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_pass_through() {
        assert_eq!(demangle("main").name, "main");
        assert_eq!(demangle("main").prototype, "");
        assert_eq!(demangle("operator.new").name, "operator.new");
        assert_eq!(demangle("").name, "");
    }

    #[test]
    fn test_c_decoration() {
        assert_eq!(demangle("_printf").name, "printf");
        assert_eq!(demangle("_func@8").name, "func");
        assert_eq!(demangle("_func@").name, "func@");
        assert_eq!(demangle("_f@1x2").name, "f@1x2");
    }

    #[test]
    fn test_free_function() {
        let result = demangle("?foo@Bar@@YAHH@Z");
        assert_eq!(result.name, "Bar::foo");
        assert!(result.prototype.starts_with("int __cdecl(int)"));
    }

    #[test]
    fn test_import_thunk() {
        let result = demangle("__imp_?foo@Bar@@YAHH@Z");
        assert_eq!(result.name, "Bar::foo [import]");
        assert!(result.prototype.starts_with("int __cdecl(int)"));
    }

    #[test]
    fn test_nested_namespaces() {
        let result = demangle("?run@Worker@detail@acme@@YAXXZ");
        assert_eq!(result.name, "acme::detail::Worker::run");
        assert_eq!(result.prototype, "void __cdecl(void)");
    }

    #[test]
    fn test_back_reference() {
        // segment 0 is "Foo"; the digit 0 refers back to it
        let result = demangle("?Foo@0@@YAXXZ");
        assert_eq!(result.name, "Foo::Foo");
    }

    #[test]
    fn test_destructor() {
        let result = demangle("??1Widget@@QAE@XZ");
        assert_eq!(result.name, "~Widget");
    }

    #[test]
    fn test_operator() {
        let result = demangle("??4Widget@@QGHH@Z");
        assert_eq!(result.name, "Widget::operator=");
        assert_eq!(result.prototype, "private: int __stdcall(int)");
    }

    #[test]
    fn test_compound_assign_operator() {
        let result = demangle("??_0Widget@@QAEXH@Z");
        assert_eq!(result.name, "Widget::operator/=");
    }

    #[test]
    fn test_member_function_access() {
        // 'Q' after @@ marks a member function
        let result = demangle("?get@Point@@QEHXZ");
        assert_eq!(result.name, "Point::get");
        assert_eq!(result.prototype, "private: int __thiscall(void)");
    }

    #[test]
    fn test_class_argument() {
        let result = demangle("?take@@YAXVWidget@ui@@@Z");
        assert_eq!(result.name, "take");
        assert_eq!(result.prototype, "void __cdecl(ui::Widget)");
    }

    #[test]
    fn test_pointer_arguments() {
        let result = demangle("?copy@@YAHPDH@Z");
        assert_eq!(result.name, "copy");
        assert_eq!(result.prototype, "int __cdecl(char*, int)");
    }

    #[test]
    fn test_wide_types() {
        let result = demangle("?len@@YA_KP_W@Z");
        assert_eq!(result.name, "len");
        assert_eq!(result.prototype, "unsigned __int64 __cdecl(wchar_t*)");
    }

    #[test]
    fn test_data_member_has_no_prototype() {
        let result = demangle("?instance@Singleton@@0HA");
        assert_eq!(result.name, "Singleton::instance");
        assert_eq!(result.prototype, "");
    }

    #[test]
    fn test_truncated_input_returns_partial() {
        let result = demangle("?foo@Bar@@");
        assert_eq!(result.name, "Bar::foo");
        assert_eq!(result.prototype, "");

        let result = demangle("?foo@Bar@@YA");
        assert_eq!(result.name, "Bar::foo");
    }
}
