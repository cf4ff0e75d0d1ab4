//! Recursive value-shape model.
//!
//! A [`TypeDescriptor`] is the only schema the wire format has: no tags are
//! written to the wire, so host and guest must agree on the descriptor for
//! every value they exchange.
//!
//! Descriptors render to a canonical string (`int`, `string`, `array<T>`,
//! `object<K,V>`) and parse back from the same grammar, which is how
//! declarations are written in configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shape of a value crossing the host/guest boundary.
///
/// Child descriptors are boxed, so an `Array` or `Object` always carries its
/// children. Descriptors are immutable once built and are shared read-only
/// between calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeDescriptor {
    /// 32-bit signed integer.
    Int,
    /// UTF-8 text.
    String,
    /// Ordered sequence of elements sharing one descriptor.
    Array(Box<TypeDescriptor>),
    /// Unordered key to value mapping.
    Object(Box<TypeDescriptor>, Box<TypeDescriptor>),
}

impl TypeDescriptor {
    /// `array<elem>`
    pub fn array(elem: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Box::new(elem))
    }

    /// `object<key,value>`
    pub fn object(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        TypeDescriptor::Object(Box::new(key), Box::new(value))
    }

    /// Canonical display string, e.g. `object<string,array<int>>`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        match self {
            TypeDescriptor::Int => out.push_str("int"),
            TypeDescriptor::String => out.push_str("string"),
            TypeDescriptor::Array(elem) => {
                out.push_str("array<");
                elem.render_into(out);
                out.push('>');
            }
            TypeDescriptor::Object(key, value) => {
                out.push_str("object<");
                key.render_into(out);
                out.push(',');
                value.render_into(out);
                out.push('>');
            }
        }
    }

    /// Nesting depth; scalars have depth 1.
    pub fn depth(&self) -> usize {
        match self {
            TypeDescriptor::Int | TypeDescriptor::String => 1,
            TypeDescriptor::Array(elem) => 1 + elem.depth(),
            TypeDescriptor::Object(key, value) => 1 + key.depth().max(value.depth()),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<TypeDescriptor> for String {
    fn from(descriptor: TypeDescriptor) -> String {
        descriptor.render()
    }
}

impl TryFrom<String> for TypeDescriptor {
    type Error = ParseDescriptorError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        source.parse()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A descriptor string that does not follow the `render()` grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid type descriptor {source_text:?} at column {column}: {message}")]
pub struct ParseDescriptorError {
    /// The full text being parsed.
    pub source_text: String,
    /// Byte offset (0-based) where parsing stopped.
    pub column: usize,
    /// What was expected at that point.
    pub message: String,
}

impl FromStr for TypeDescriptor {
    type Err = ParseDescriptorError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let mut cursor = Cursor {
            source,
            pos: 0,
            depth: 0,
        };
        let descriptor = cursor.parse_descriptor()?;
        cursor.skip_whitespace();
        if cursor.pos != source.len() {
            return Err(cursor.error("trailing characters after descriptor"));
        }
        Ok(descriptor)
    }
}

/// Deepest nesting the parser accepts.
pub const MAX_NESTING: usize = 64;

struct Cursor<'a> {
    source: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Cursor<'a> {
    fn error(&self, message: impl Into<String>) -> ParseDescriptorError {
        ParseDescriptorError {
            source_text: self.source.to_string(),
            column: self.pos,
            message: message.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.source[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn expect(&mut self, ch: char) -> Result<(), ParseDescriptorError> {
        self.skip_whitespace();
        if self.source[self.pos..].starts_with(ch) {
            self.pos += ch.len_utf8();
            Ok(())
        } else {
            Err(self.error(format!("expected '{ch}'")))
        }
    }

    fn keyword(&mut self) -> &'a str {
        self.skip_whitespace();
        let rest = &self.source[self.pos..];
        let len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn parse_descriptor(&mut self) -> Result<TypeDescriptor, ParseDescriptorError> {
        if self.depth == MAX_NESTING {
            return Err(self.error(format!("nesting deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let parsed = self.parse_kind();
        self.depth -= 1;
        parsed
    }

    fn parse_kind(&mut self) -> Result<TypeDescriptor, ParseDescriptorError> {
        let start = self.pos;
        match self.keyword() {
            "int" => Ok(TypeDescriptor::Int),
            "string" => Ok(TypeDescriptor::String),
            "array" => {
                self.expect('<')?;
                let elem = self.parse_descriptor()?;
                self.expect('>')?;
                Ok(TypeDescriptor::array(elem))
            }
            "object" => {
                self.expect('<')?;
                let key = self.parse_descriptor()?;
                self.expect(',')?;
                let value = self.parse_descriptor()?;
                self.expect('>')?;
                Ok(TypeDescriptor::object(key, value))
            }
            "" => Err(self.error("expected a type name")),
            other => {
                let other = other.to_string();
                self.pos = start;
                self.skip_whitespace();
                Err(self.error(format!("unknown type `{other}`")))
            }
        }
    }
}
