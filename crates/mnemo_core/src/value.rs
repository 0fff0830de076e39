//! Typed values and their order-preserving byte encoding.
//!
//! A value is stored as raw bytes after the fixed key prefix. The encoding of
//! every tag sorts under plain byte comparison in the same order as the
//! logical values, which lets value-ordered indexes use `memcmp`:
//!
//! - unsigned integers are big-endian
//! - `Int64` is big-endian with the sign bit flipped
//! - `Float64` uses the IEEE-754 total-order transform
//! - strings and blobs are their raw bytes

use crate::error::{CoreError, CoreResult};
use crate::types::EntityId;
use std::fmt;

const SIGN_BIT: u64 = 1 << 63;

/// Closed set of value types an attribute may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ValueTag {
    /// No payload.
    Null = 0,
    /// `u8`.
    UInt8 = 1,
    /// `u16`.
    UInt16 = 2,
    /// `u32`.
    UInt32 = 3,
    /// `u64`.
    UInt64 = 4,
    /// `i64`.
    Int64 = 5,
    /// `f64`.
    Float64 = 6,
    /// 7-bit ASCII text.
    Ascii = 7,
    /// UTF-8 text.
    Utf8 = 8,
    /// Opaque bytes.
    Blob = 9,
    /// Another entity.
    Reference = 10,
}

impl ValueTag {
    /// Converts a byte to a tag.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::Null,
            1 => Self::UInt8,
            2 => Self::UInt16,
            3 => Self::UInt32,
            4 => Self::UInt64,
            5 => Self::Int64,
            6 => Self::Float64,
            7 => Self::Ascii,
            8 => Self::Utf8,
            9 => Self::Blob,
            10 => Self::Reference,
            _ => return None,
        })
    }

    /// Converts the tag to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Encoded width for fixed-size tags.
    #[must_use]
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::UInt8 => Some(1),
            Self::UInt16 => Some(2),
            Self::UInt32 => Some(4),
            Self::UInt64 | Self::Int64 | Self::Float64 | Self::Reference => Some(8),
            Self::Ascii | Self::Utf8 | Self::Blob => None,
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No payload.
    Null,
    /// `u8`.
    UInt8(u8),
    /// `u16`.
    UInt16(u16),
    /// `u32`.
    UInt32(u32),
    /// `u64`.
    UInt64(u64),
    /// `i64`.
    Int64(i64),
    /// `f64`.
    Float64(f64),
    /// ASCII text.
    Ascii(String),
    /// UTF-8 text.
    Utf8(String),
    /// Opaque bytes.
    Blob(Vec<u8>),
    /// Another entity.
    Reference(EntityId),
}

impl Value {
    /// Returns the tag of this value.
    #[must_use]
    pub fn tag(&self) -> ValueTag {
        match self {
            Self::Null => ValueTag::Null,
            Self::UInt8(_) => ValueTag::UInt8,
            Self::UInt16(_) => ValueTag::UInt16,
            Self::UInt32(_) => ValueTag::UInt32,
            Self::UInt64(_) => ValueTag::UInt64,
            Self::Int64(_) => ValueTag::Int64,
            Self::Float64(_) => ValueTag::Float64,
            Self::Ascii(_) => ValueTag::Ascii,
            Self::Utf8(_) => ValueTag::Utf8,
            Self::Blob(_) => ValueTag::Blob,
            Self::Reference(_) => ValueTag::Reference,
        }
    }

    /// Returns the referenced entity for [`Value::Reference`].
    #[must_use]
    pub fn as_reference(&self) -> Option<EntityId> {
        match self {
            Self::Reference(e) => Some(*e),
            _ => None,
        }
    }

    /// Returns the text of a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Ascii(s) | Self::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// Returns any unsigned value widened to `u64`.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt8(v) => Some(u64::from(*v)),
            Self::UInt16(v) => Some(u64::from(*v)),
            Self::UInt32(v) => Some(u64::from(*v)),
            Self::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    /// Appends the encoded value to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] for non-ASCII text in an
    /// [`Value::Ascii`].
    pub fn encode_into(&self, out: &mut Vec<u8>) -> CoreResult<()> {
        match self {
            Self::Null => {}
            Self::UInt8(v) => out.push(*v),
            Self::UInt16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::UInt32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::UInt64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Self::Int64(v) => out.extend_from_slice(&((*v as u64) ^ SIGN_BIT).to_be_bytes()),
            Self::Float64(v) => {
                let bits = v.to_bits();
                let ordered = if bits & SIGN_BIT != 0 {
                    !bits
                } else {
                    bits ^ SIGN_BIT
                };
                out.extend_from_slice(&ordered.to_be_bytes());
            }
            Self::Ascii(s) => {
                if !s.is_ascii() {
                    return Err(CoreError::invalid_value(format!(
                        "non-ASCII text in ASCII value: {s:?}"
                    )));
                }
                out.extend_from_slice(s.as_bytes());
            }
            Self::Utf8(s) => out.extend_from_slice(s.as_bytes()),
            Self::Blob(b) => out.extend_from_slice(b),
            Self::Reference(e) => out.extend_from_slice(&e.as_u64().to_be_bytes()),
        }
        Ok(())
    }

    /// Returns the encoded value.
    ///
    /// # Errors
    ///
    /// See [`Value::encode_into`].
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Decodes `bytes` as a value of type `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] when the width does not match a
    /// fixed-size tag or text is not valid for its tag.
    pub fn decode(tag: ValueTag, bytes: &[u8]) -> CoreResult<Self> {
        if let Some(width) = tag.fixed_width() {
            if bytes.len() != width {
                return Err(CoreError::invalid_value(format!(
                    "{tag} value must be {width} bytes, got {}",
                    bytes.len()
                )));
            }
        }

        let be_u64 = |b: &[u8]| -> u64 {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            u64::from_be_bytes(buf)
        };

        Ok(match tag {
            ValueTag::Null => Self::Null,
            ValueTag::UInt8 => Self::UInt8(bytes[0]),
            ValueTag::UInt16 => Self::UInt16(u16::from_be_bytes([bytes[0], bytes[1]])),
            ValueTag::UInt32 => {
                Self::UInt32(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            ValueTag::UInt64 => Self::UInt64(be_u64(bytes)),
            ValueTag::Int64 => Self::Int64((be_u64(bytes) ^ SIGN_BIT) as i64),
            ValueTag::Float64 => {
                let ordered = be_u64(bytes);
                let bits = if ordered & SIGN_BIT != 0 {
                    ordered ^ SIGN_BIT
                } else {
                    !ordered
                };
                Self::Float64(f64::from_bits(bits))
            }
            ValueTag::Ascii => {
                if !bytes.is_ascii() {
                    return Err(CoreError::invalid_value("non-ASCII bytes in ASCII value"));
                }
                Self::Ascii(String::from_utf8_lossy(bytes).into_owned())
            }
            ValueTag::Utf8 => Self::Utf8(
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| CoreError::invalid_value(e.to_string()))?,
            ),
            ValueTag::Blob => Self::Blob(bytes.to_vec()),
            ValueTag::Reference => Self::Reference(EntityId::new(be_u64(bytes))),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::UInt8(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Ascii(s) | Self::Utf8(s) => write!(f, "{s:?}"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Self::Reference(e) => write!(f, "{e}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Utf8(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Utf8(s)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::UInt8(u8::from(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Blob(b)
    }
}

impl From<EntityId> for Value {
    fn from(e: EntityId) -> Self {
        Self::Reference(e)
    }
}
