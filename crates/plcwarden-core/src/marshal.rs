//! Type marshaling between controller bytes and host values.
//!
//! Every supported type tag maps to one [`TypeEntry`] in a fixed table built
//! at compile time. Lookup is case-insensitive. Anything the table does not
//! name (structures, arrays, enums, aliases) resolves to the raw-bytes
//! fallback, which decodes to hex and refuses to encode.
//!
//! All multi-byte values are little-endian.

use std::fmt;

use crate::result::{ErrorKind, HasErrorKind};

/// Canonical type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bool,
    Byte,
    USInt,
    SInt,
    Word,
    UInt,
    Int,
    DWord,
    UDInt,
    DInt,
    LWord,
    ULInt,
    LInt,
    Real,
    LReal,
    String,
    Raw,
}

/// A decoded host value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Real(f32),
    LReal(f64),
    Text(String),
    Raw(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Unsigned(v) => write!(f, "{v}"),
            Value::Signed(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::LReal(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Raw(bytes) => {
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
        }
    }
}

/// Marshaling failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    #[error("UnsupportedType: writing type '{type_name}' is not supported (composite or unknown type)")]
    UnsupportedType { type_name: String },

    #[error("UnsupportedValue: cannot parse {text:?} as {type_name}: {reason}")]
    UnsupportedValue {
        type_name: String,
        text: String,
        reason: String,
    },

    #[error("size mismatch for {type_name}: expected {expected} bytes, got {actual}")]
    Size {
        type_name: String,
        expected: usize,
        actual: usize,
    },
}

impl MarshalError {
    /// Replace the canonical tag name with the symbol's declared type name.
    pub fn with_type_name(self, name: &str) -> Self {
        let type_name = name.to_string();
        match self {
            MarshalError::UnsupportedType { .. } => MarshalError::UnsupportedType { type_name },
            MarshalError::UnsupportedValue { text, reason, .. } => MarshalError::UnsupportedValue {
                type_name,
                text,
                reason,
            },
            MarshalError::Size {
                expected, actual, ..
            } => MarshalError::Size {
                type_name,
                expected,
                actual,
            },
        }
    }
}

impl HasErrorKind for MarshalError {
    fn kind(&self) -> ErrorKind {
        match self {
            MarshalError::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            MarshalError::UnsupportedValue { .. } => ErrorKind::UnsupportedValue,
            MarshalError::Size { .. } => ErrorKind::Protocol,
        }
    }
}

type DecodeFn = fn(&[u8]) -> Value;
type EncodeFn = fn(&str, usize) -> Result<Vec<u8>, String>;

/// One row of the marshaling table.
#[derive(Clone, Copy)]
pub struct TypeEntry {
    pub tag: TypeTag,
    /// Canonical upper-case name.
    pub name: &'static str,
    /// Fixed byte width, or `None` when the symbol's size is authoritative.
    pub width: Option<usize>,
    decode: DecodeFn,
    encode: Option<EncodeFn>,
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry")
            .field("tag", &self.tag)
            .field("name", &self.name)
            .field("width", &self.width)
            .field("writable", &self.encode.is_some())
            .finish()
    }
}

impl TypeEntry {
    /// Whether values of this type can be written.
    pub fn is_writable(&self) -> bool {
        self.encode.is_some()
    }

    /// Decode `bytes` into a host value.
    ///
    /// Fixed-width entries require at least `width` bytes and ignore the rest.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, MarshalError> {
        if let Some(width) = self.width {
            if bytes.len() < width {
                return Err(MarshalError::Size {
                    type_name: self.name.to_string(),
                    expected: width,
                    actual: bytes.len(),
                });
            }
            return Ok((self.decode)(&bytes[..width]));
        }
        Ok((self.decode)(bytes))
    }

    /// Encode `text` into exactly the bytes to write for a symbol of `size` bytes.
    pub fn encode(&self, text: &str, size: usize) -> Result<Vec<u8>, MarshalError> {
        let encode = self.encode.ok_or_else(|| MarshalError::UnsupportedType {
            type_name: self.name.to_string(),
        })?;
        encode(text, size).map_err(|reason| MarshalError::UnsupportedValue {
            type_name: self.name.to_string(),
            text: text.to_string(),
            reason,
        })
    }
}

const fn entry(
    tag: TypeTag,
    name: &'static str,
    width: usize,
    decode: DecodeFn,
    encode: EncodeFn,
) -> TypeEntry {
    TypeEntry {
        tag,
        name,
        width: Some(width),
        decode,
        encode: Some(encode),
    }
}

static TABLE: [TypeEntry; 15] = [
    entry(TypeTag::Bool, "BOOL", 1, decode_bool, encode_bool),
    entry(TypeTag::Byte, "BYTE", 1, decode_unsigned, encode_unsigned::<1>),
    entry(TypeTag::USInt, "USINT", 1, decode_unsigned, encode_unsigned::<1>),
    entry(TypeTag::SInt, "SINT", 1, decode_signed, encode_signed::<1>),
    entry(TypeTag::Word, "WORD", 2, decode_unsigned, encode_unsigned::<2>),
    entry(TypeTag::UInt, "UINT", 2, decode_unsigned, encode_unsigned::<2>),
    entry(TypeTag::Int, "INT", 2, decode_signed, encode_signed::<2>),
    entry(TypeTag::DWord, "DWORD", 4, decode_unsigned, encode_unsigned::<4>),
    entry(TypeTag::UDInt, "UDINT", 4, decode_unsigned, encode_unsigned::<4>),
    entry(TypeTag::DInt, "DINT", 4, decode_signed, encode_signed::<4>),
    entry(TypeTag::LWord, "LWORD", 8, decode_unsigned, encode_unsigned::<8>),
    entry(TypeTag::ULInt, "ULINT", 8, decode_unsigned, encode_unsigned::<8>),
    entry(TypeTag::LInt, "LINT", 8, decode_signed, encode_signed::<8>),
    entry(TypeTag::Real, "REAL", 4, decode_real, encode_real),
    entry(TypeTag::LReal, "LREAL", 8, decode_lreal, encode_lreal),
];

static STRING_ENTRY: TypeEntry = TypeEntry {
    tag: TypeTag::String,
    name: "STRING",
    width: None,
    decode: decode_string,
    encode: Some(encode_string),
};

static RAW_ENTRY: TypeEntry = TypeEntry {
    tag: TypeTag::Raw,
    name: "RAW",
    width: None,
    decode: decode_raw,
    encode: None,
};

/// Default buffer size of an unqualified `STRING` (80 characters plus terminator).
pub const DEFAULT_STRING_SIZE: usize = 81;

/// Look up the entry for a declared type name.
pub fn lookup(type_name: &str) -> &'static TypeEntry {
    let upper = type_name.trim().to_ascii_uppercase();
    if string_length(&upper).is_some() {
        return &STRING_ENTRY;
    }
    TABLE
        .iter()
        .find(|e| e.name == upper)
        .unwrap_or(&RAW_ENTRY)
}

/// Size in bytes implied by a type name alone, if it has one.
///
/// `STRING(n)` occupies `n + 1` bytes; composite types return `None`.
pub fn declared_size(type_name: &str) -> Option<usize> {
    let upper = type_name.trim().to_ascii_uppercase();
    if let Some(len) = string_length(&upper) {
        return Some(len + 1);
    }
    lookup(&upper).width
}

/// `Some(n)` for `STRING(n)`, `Some(80)` for bare `STRING`.
fn string_length(upper: &str) -> Option<usize> {
    if upper == "STRING" {
        return Some(DEFAULT_STRING_SIZE - 1);
    }
    upper
        .strip_prefix("STRING(")?
        .strip_suffix(')')?
        .trim()
        .parse()
        .ok()
}

// ── Decoders ────────────────────────────────────────────────────────────

fn decode_bool(bytes: &[u8]) -> Value {
    Value::Bool(bytes[0] != 0)
}

fn decode_unsigned(bytes: &[u8]) -> Value {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Value::Unsigned(u64::from_le_bytes(buf))
}

fn decode_signed(bytes: &[u8]) -> Value {
    let negative = bytes.last().is_some_and(|b| b & 0x80 != 0);
    let mut buf = if negative { [0xFF; 8] } else { [0u8; 8] };
    buf[..bytes.len()].copy_from_slice(bytes);
    Value::Signed(i64::from_le_bytes(buf))
}

fn decode_real(bytes: &[u8]) -> Value {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    Value::Real(f32::from_le_bytes(buf))
}

fn decode_lreal(bytes: &[u8]) -> Value {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Value::LReal(f64::from_le_bytes(buf))
}

fn decode_string(bytes: &[u8]) -> Value {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Value::Text(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

fn decode_raw(bytes: &[u8]) -> Value {
    Value::Raw(bytes.to_vec())
}

// ── Encoders ────────────────────────────────────────────────────────────

fn encode_bool(text: &str, _size: usize) -> Result<Vec<u8>, String> {
    let t = text.trim();
    if t.eq_ignore_ascii_case("true") || t == "1" {
        Ok(vec![1])
    } else if t.eq_ignore_ascii_case("false") || t == "0" {
        Ok(vec![0])
    } else {
        Err("expected TRUE, FALSE, 1 or 0".to_string())
    }
}

fn encode_unsigned<const N: usize>(text: &str, _size: usize) -> Result<Vec<u8>, String> {
    let value = parse_integer(text)?;
    let max = if N == 8 { u64::MAX as i128 } else { (1i128 << (N * 8)) - 1 };
    if !(0..=max).contains(&value) {
        return Err(format!("{value} is out of range 0..={max}"));
    }
    Ok((value as u64).to_le_bytes()[..N].to_vec())
}

fn encode_signed<const N: usize>(text: &str, _size: usize) -> Result<Vec<u8>, String> {
    let value = parse_integer(text)?;
    let bits = N * 8;
    let min = -(1i128 << (bits - 1));
    let max = (1i128 << (bits - 1)) - 1;
    if !(min..=max).contains(&value) {
        return Err(format!("{value} is out of range {min}..={max}"));
    }
    Ok((value as i64).to_le_bytes()[..N].to_vec())
}

// Infinities and NaN are refused, including overflow to infinity.
fn encode_real(text: &str, _size: usize) -> Result<Vec<u8>, String> {
    let value: f32 = text.trim().parse().map_err(|e| format!("{e}"))?;
    if !value.is_finite() {
        return Err("not a finite REAL value".to_string());
    }
    Ok(value.to_le_bytes().to_vec())
}

fn encode_lreal(text: &str, _size: usize) -> Result<Vec<u8>, String> {
    let value: f64 = text.trim().parse().map_err(|e| format!("{e}"))?;
    if !value.is_finite() {
        return Err("not a finite LREAL value".to_string());
    }
    Ok(value.to_le_bytes().to_vec())
}

fn encode_string(text: &str, size: usize) -> Result<Vec<u8>, String> {
    let bytes = text.as_bytes();
    if bytes.contains(&0) {
        return Err("text contains a NUL byte".to_string());
    }
    if size == 0 || bytes.len() > size - 1 {
        return Err(format!(
            "{} bytes do not fit a {size}-byte string buffer",
            bytes.len()
        ));
    }
    let mut buf = vec![0u8; size];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

/// Parse a decimal or IEC-prefixed (`2#`, `8#`, `16#`) integer literal.
///
/// Underscore separators are accepted anywhere after the first digit.
pub fn parse_integer(text: &str) -> Result<i128, String> {
    let t = text.trim();
    let (negative, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let (radix, digits) = match body.split_once('#') {
        Some(("2", d)) => (2, d),
        Some(("8", d)) => (8, d),
        Some(("16", d)) => (16, d),
        Some((prefix, _)) => return Err(format!("unsupported radix prefix {prefix}#")),
        None => (10, body),
    };
    if digits.is_empty() || digits.starts_with('_') {
        return Err("missing digits".to_string());
    }
    if digits.contains(['+', '-']) {
        return Err("misplaced sign".to_string());
    }
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    let magnitude = i128::from_str_radix(&cleaned, radix).map_err(|e| format!("{e}"))?;
    Ok(if negative { -magnitude } else { magnitude })
}
