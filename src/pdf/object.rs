//! PDF object types and serialization

use std::fmt;
use std::io::{self, Write};

use super::{Dictionary, Stream};
use crate::error::{PDFError, PDFResult};

/// Identifier of an indirect object
///
/// Ordering compares the object number first, so sorted collections of ids
/// follow cross-reference placement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    /// Object number, never reused while the object is live
    pub number: u32,
    /// Generation number, bumped when a number is freed or replaced
    pub generation: u16,
}

impl ObjectId {
    /// Create new object id
    pub const fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

/// How a string was (or should be) written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringFormat {
    /// `(...)` form, falls back to hex when the bytes are not printable
    #[default]
    Literal,
    /// `<...>` form
    Hexadecimal,
}

/// PDF object value
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer number
    Integer(i64),
    /// Real number
    Real(f64),
    /// Byte string
    String(Vec<u8>, StringFormat),
    /// Name object without the leading slash
    Name(String),
    /// Array object
    Array(Vec<Object>),
    /// Dictionary object
    Dictionary(Dictionary),
    /// Stream object
    Stream(Stream),
    /// Indirect reference
    Reference(ObjectId),
}

/// Shared null used when a reference does not resolve
pub(crate) static NULL: Object = Object::Null;

impl Object {
    /// Name object
    pub fn name(name: impl Into<String>) -> Self {
        Object::Name(name.into())
    }

    /// Literal string object
    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        Object::String(bytes.into(), StringFormat::Literal)
    }

    /// Hexadecimal string object
    pub fn hex_string(bytes: impl Into<Vec<u8>>) -> Self {
        Object::String(bytes.into(), StringFormat::Hexadecimal)
    }

    /// Human-readable kind, used in type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(..) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream(_) => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer value; reals with no fractional part are accepted too
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            Object::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Object::String(bytes, _) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Object]> {
        match self {
            Object::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary of a dictionary or stream object
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Some(dict),
            Object::Stream(stream) => Some(stream.dict()),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&Stream> {
        match self {
            Object::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            Object::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// Dictionary or a type error
    pub fn expect_dict(&self) -> PDFResult<&Dictionary> {
        self.as_dict().ok_or(PDFError::InvalidObjectType {
            expected: "Dictionary",
            found: self.type_name(),
        })
    }

    /// Serialize in PDF syntax
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match self {
            Object::Null => out.write_all(b"null"),
            Object::Boolean(b) => write!(out, "{}", b),
            Object::Integer(i) => write!(out, "{}", i),
            Object::Real(r) => out.write_all(format_real(*r).as_bytes()),
            Object::String(bytes, format) => write_string(out, bytes, *format),
            Object::Name(name) => write_name(out, name),
            Object::Array(items) => {
                out.write_all(b"[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.write_all(b" ")?;
                    }
                    item.write_to(out)?;
                }
                out.write_all(b"]")
            }
            Object::Dictionary(dict) => dict.write_to(out),
            Object::Stream(stream) => stream.write_to(out),
            Object::Reference(id) => write!(out, "{} {} R", id.number, id.generation),
        }
    }

    /// Serialized bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut out);
        out
    }
}

fn format_real(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let mut text = format!("{:.6}", value);
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.push('0');
    }
    text
}

fn write_string<W: Write>(out: &mut W, bytes: &[u8], format: StringFormat) -> io::Result<()> {
    let printable = bytes
        .iter()
        .all(|&b| (0x20..=0x7E).contains(&b) || matches!(b, b'\n' | b'\r' | b'\t'));

    if format == StringFormat::Hexadecimal || !printable {
        out.write_all(b"<")?;
        out.write_all(hex::encode_upper(bytes).as_bytes())?;
        return out.write_all(b">");
    }

    out.write_all(b"(")?;
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => out.write_all(&[b'\\', b])?,
            b'\n' => out.write_all(b"\\n")?,
            b'\r' => out.write_all(b"\\r")?,
            b'\t' => out.write_all(b"\\t")?,
            _ => out.write_all(&[b])?,
        }
    }
    out.write_all(b")")
}

pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

pub(crate) fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn write_name<W: Write>(out: &mut W, name: &str) -> io::Result<()> {
    out.write_all(b"/")?;
    for &b in name.as_bytes() {
        if b < 0x21 || b > 0x7E || b == b'#' || is_delimiter(b) {
            write!(out, "#{:02X}", b)?;
        } else {
            out.write_all(&[b])?;
        }
    }
    Ok(())
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Object::Integer(value)
    }
}

impl From<i32> for Object {
    fn from(value: i32) -> Self {
        Object::Integer(value as i64)
    }
}

impl From<u32> for Object {
    fn from(value: u32) -> Self {
        Object::Integer(value as i64)
    }
}

impl From<usize> for Object {
    fn from(value: usize) -> Self {
        Object::Integer(value as i64)
    }
}

impl From<f64> for Object {
    fn from(value: f64) -> Self {
        Object::Real(value)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}

impl From<Vec<Object>> for Object {
    fn from(items: Vec<Object>) -> Self {
        Object::Array(items)
    }
}

impl From<Dictionary> for Object {
    fn from(dict: Dictionary) -> Self {
        Object::Dictionary(dict)
    }
}

impl From<Stream> for Object {
    fn from(stream: Stream) -> Self {
        Object::Stream(stream)
    }
}

/// Object together with its identity in the cross-reference table
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectObject {
    pub id: ObjectId,
    pub object: Object,
}

impl IndirectObject {
    pub fn new(id: ObjectId, object: Object) -> Self {
        Self { id, object }
    }

    /// Serialize as `N G obj ... endobj`
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write!(out, "{} {} obj\n", self.id.number, self.id.generation)?;
        self.object.write_to(out)?;
        out.write_all(b"\nendobj\n")
    }
}
