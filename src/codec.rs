//! Value encoding: application values to flagged payloads and back
//!
//! Flag layout (low bits of the memcached item flags):
//!
//! ```text
//! bit 0  GENERIC  structured value (JSON)
//! bit 1  INTEGER  ASCII decimal, fits i64 (also booleans)
//! bit 2  LONG     ASCII decimal, wider than i64
//! bit 3  ZLIB     payload is zlib-compressed (orthogonal to the others)
//! bit 4  TEXT     UTF-8 string
//! none   RAW      bytes as-is
//! ```

use crate::error::{DecodeError, Error, Result};
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use std::fmt;

pub const FLAG_GENERIC: u32 = 1 << 0;
pub const FLAG_INTEGER: u32 = 1 << 1;
pub const FLAG_LONG: u32 = 1 << 2;
pub const FLAG_ZLIB: u32 = 1 << 3;
pub const FLAG_TEXT: u32 = 1 << 4;

/// Bits that select the encoding
pub const TYPE_MASK: u32 = FLAG_GENERIC | FLAG_INTEGER | FLAG_LONG | FLAG_TEXT;

/// Highest structured-serialization protocol; `-1` selects it
pub const HIGHEST_PROTOCOL: i32 = 1;

/// Frame marker in front of protocol >= 1 payloads
const FRAME_MAGIC: u8 = 0x80;

/// A cacheable value
#[derive(Debug, Clone)]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
    Int(i64),
    Long(i128),
    Generic(JsonValue),
}

impl Value {
    /// Numeric view of the integer-like variants
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Self::Bool(b) => Some(i128::from(*b)),
            Self::Int(i) => Some(i128::from(*i)),
            Self::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_integer().and_then(|i| i64::try_from(i).ok())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Generic(v) => Some(v),
            _ => None,
        }
    }

    /// The encoding this value is written with
    pub fn encoding(&self) -> Encoding {
        match self {
            Self::Bytes(_) => Encoding::Raw,
            Self::Text(_) => Encoding::Text,
            Self::Bool(_) | Self::Int(_) => Encoding::Integer,
            Self::Long(_) => Encoding::Long,
            Self::Generic(_) => Encoding::Generic,
        }
    }
}

// Integer-like variants compare by value, so a bool read back as an int matches.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
            return a == b;
        }
        match (self, other) {
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Generic(a), Self::Generic(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "{}", b.escape_ascii()),
            Self::Text(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Long(l) => write!(f, "{l}"),
            Self::Generic(v) => write!(f, "{v}"),
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(b: &[u8; N]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        match i64::try_from(i) {
            Ok(i) => Self::Int(i),
            Err(_) => Self::Long(i128::from(i)),
        }
    }
}

impl From<i128> for Value {
    fn from(i: i128) -> Self {
        Self::Long(i)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Self::Generic(v)
    }
}

/// Payload encodings, selected by `flags & TYPE_MASK`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Text,
    Integer,
    Long,
    Generic,
}

impl Encoding {
    pub fn flag(self) -> u32 {
        match self {
            Self::Raw => 0,
            Self::Text => FLAG_TEXT,
            Self::Integer => FLAG_INTEGER,
            Self::Long => FLAG_LONG,
            Self::Generic => FLAG_GENERIC,
        }
    }

    /// Decode the encoding bits of `flags`, ignoring the compression bit
    pub fn from_flags(flags: u32) -> std::result::Result<Self, DecodeError> {
        match flags & TYPE_MASK {
            0 => Ok(Self::Raw),
            FLAG_TEXT => Ok(Self::Text),
            FLAG_INTEGER => Ok(Self::Integer),
            FLAG_LONG => Ok(Self::Long),
            FLAG_GENERIC => Ok(Self::Generic),
            other => Err(DecodeError::UnknownFlags(other)),
        }
    }
}

/// Pluggable value codec.
///
/// A client built with a custom codec routes every value through it. A
/// custom `deserialize` may return [`Error::CacheMiss`] to make a hit look
/// like a miss.
pub trait Codec: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<(Vec<u8>, u32)>;

    fn deserialize(&self, payload: &[u8], flags: u32) -> Result<Value>;
}

/// The built-in codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeCodec {
    protocol: i32,
}

impl NativeCodec {
    pub fn new(protocol: i32) -> Result<Self> {
        check_protocol(protocol)?;
        Ok(Self { protocol })
    }

    pub fn protocol(&self) -> i32 {
        self.protocol
    }
}

impl Default for NativeCodec {
    fn default() -> Self {
        Self { protocol: -1 }
    }
}

impl Codec for NativeCodec {
    fn serialize(&self, value: &Value) -> Result<(Vec<u8>, u32)> {
        encode(value, self.protocol)
    }

    fn deserialize(&self, payload: &[u8], flags: u32) -> Result<Value> {
        Ok(decode(payload, flags)?)
    }
}

/// Validate a structured-serialization protocol number
pub fn check_protocol(protocol: i32) -> Result<()> {
    if !(-1..=HIGHEST_PROTOCOL).contains(&protocol) {
        return Err(Error::Value(format!(
            "serialization_protocol must be between -1 and {HIGHEST_PROTOCOL}, got {protocol}"
        )));
    }
    Ok(())
}

/// Encode a value with the native rules
pub fn encode(value: &Value, protocol: i32) -> Result<(Vec<u8>, u32)> {
    let encoding = value.encoding();
    let payload = match value {
        Value::Bytes(b) => b.clone(),
        Value::Text(s) => s.as_bytes().to_vec(),
        Value::Bool(b) => vec![if *b { b'1' } else { b'0' }],
        Value::Int(i) => itoa::Buffer::new().format(*i).as_bytes().to_vec(),
        Value::Long(l) => itoa::Buffer::new().format(*l).as_bytes().to_vec(),
        Value::Generic(v) => {
            check_protocol(protocol)?;
            GENERIC_FORMATS.dump(v, protocol)?
        }
    };
    Ok((payload, encoding.flag()))
}

/// Decode a payload with the native rules
pub fn decode(payload: &[u8], flags: u32) -> std::result::Result<Value, DecodeError> {
    match Encoding::from_flags(flags)? {
        Encoding::Raw => Ok(Value::Bytes(payload.to_vec())),
        Encoding::Text => Ok(Value::Text(std::str::from_utf8(payload)?.to_string())),
        Encoding::Integer | Encoding::Long => parse_integer(payload),
        Encoding::Generic => GENERIC_FORMATS.load(payload).map(Value::Generic),
    }
}

fn parse_integer(payload: &[u8]) -> std::result::Result<Value, DecodeError> {
    let invalid = || DecodeError::InvalidInteger(String::from_utf8_lossy(payload).into_owned());

    // Counters shrunk by decr can carry trailing padding
    let digits = std::str::from_utf8(payload).map_err(|_| invalid())?.trim();
    if let Ok(i) = digits.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    digits.parse::<i128>().map(Value::Long).map_err(|_| invalid())
}

type DumpFn = fn(&JsonValue) -> serde_json::Result<Vec<u8>>;

/// Per-protocol structured serializers, resolved once per process
struct GenericFormats {
    dumpers: Vec<DumpFn>,
}

static GENERIC_FORMATS: Lazy<GenericFormats> = Lazy::new(|| GenericFormats {
    dumpers: vec![dump_plain, dump_framed],
});

impl GenericFormats {
    fn dump(&self, value: &JsonValue, protocol: i32) -> Result<Vec<u8>> {
        let protocol = if protocol < 0 {
            HIGHEST_PROTOCOL
        } else {
            protocol
        };
        let dumper = usize::try_from(protocol)
            .ok()
            .and_then(|p| self.dumpers.get(p))
            .ok_or_else(|| Error::Value(format!("unsupported serialization protocol {protocol}")))?;
        dumper(value).map_err(|e| Error::Value(format!("failed to serialize value: {e}")))
    }

    fn load(&self, payload: &[u8]) -> std::result::Result<JsonValue, DecodeError> {
        let body = match payload {
            [FRAME_MAGIC, protocol, body @ ..] => {
                if i32::from(*protocol) > HIGHEST_PROTOCOL {
                    return Err(DecodeError::Generic(format!(
                        "unsupported serialization protocol {protocol}"
                    )));
                }
                body
            }
            _ => payload,
        };
        serde_json::from_slice(body).map_err(|e| DecodeError::Generic(e.to_string()))
    }
}

fn dump_plain(value: &JsonValue) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

fn dump_framed(value: &JsonValue) -> serde_json::Result<Vec<u8>> {
    let mut out = vec![FRAME_MAGIC, HIGHEST_PROTOCOL as u8];
    serde_json::to_writer(&mut out, value)?;
    Ok(out)
}
