//! PackStream encoder.
//!
//! Encoding is a straight recursive walk over [`Value`]: primitives write
//! their marker (plus payload) inline, containers write a size header from
//! the shared family table and then their elements. Integers take the
//! narrowest two's-complement form that holds the value.

use bytes::{BufMut, BytesMut};

use super::marker;
use super::types::Value;
use super::PackStreamError;

/// The four marker families that carry a size: a tiny nibble form plus
/// 8-bit and 16-bit wide forms.
#[derive(Clone, Copy)]
enum Family {
    Text,
    Sequence,
    Entries,
    Fields,
}

impl Family {
    /// (tiny base, 8-bit marker, 16-bit marker, name for errors)
    fn markers(self) -> (u8, u8, u8, &'static str) {
        match self {
            Family::Text => (marker::TINY_STRING_BASE, marker::STRING_8, marker::STRING_16, "string"),
            Family::Sequence => (marker::TINY_LIST_BASE, marker::LIST_8, marker::LIST_16, "list"),
            Family::Entries => (marker::TINY_MAP_BASE, marker::MAP_8, marker::MAP_16, "map"),
            Family::Fields => {
                (marker::TINY_STRUCT_BASE, marker::STRUCT_8, marker::STRUCT_16, "structure fields")
            }
        }
    }
}

/// Write a size header, picking the narrowest form. Sizes past the 16-bit
/// range are not representable on this wire.
fn write_header(buf: &mut BytesMut, family: Family, size: usize) -> Result<(), PackStreamError> {
    let (tiny, wide8, wide16, what) = family.markers();

    if size <= 0x0F {
        buf.put_u8(tiny | size as u8);
    } else if let Ok(n) = u8::try_from(size) {
        buf.put_u8(wide8);
        buf.put_u8(n);
    } else if let Ok(n) = u16::try_from(size) {
        buf.put_u8(wide16);
        buf.put_u16(n);
    } else {
        return Err(PackStreamError::ValueTooLarge(what, size));
    }

    Ok(())
}

fn write_int(buf: &mut BytesMut, value: i64) {
    if marker::can_encode_tiny_int(value) {
        // The marker byte is the value itself.
        buf.put_u8(value as u8);
    } else if let Ok(v) = i8::try_from(value) {
        buf.put_u8(marker::INT_8);
        buf.put_i8(v);
    } else if let Ok(v) = i16::try_from(value) {
        buf.put_u8(marker::INT_16);
        buf.put_i16(v);
    } else if let Ok(v) = i32::try_from(value) {
        buf.put_u8(marker::INT_32);
        buf.put_i32(v);
    } else {
        buf.put_u8(marker::INT_64);
        buf.put_i64(value);
    }
}

fn write_text(buf: &mut BytesMut, text: &str) -> Result<(), PackStreamError> {
    write_header(buf, Family::Text, text.len())?;
    buf.put_slice(text.as_bytes());
    Ok(())
}

/// Append one value to `buf`.
pub fn write_value(buf: &mut BytesMut, value: &Value) -> Result<(), PackStreamError> {
    match value {
        Value::Null => buf.put_u8(marker::NULL),
        Value::Boolean(true) => buf.put_u8(marker::TRUE),
        Value::Boolean(false) => buf.put_u8(marker::FALSE),
        Value::Integer(i) => write_int(buf, *i),
        Value::Float(f) => {
            buf.put_u8(marker::FLOAT_64);
            buf.put_f64(*f);
        }
        Value::String(s) => write_text(buf, s)?,
        Value::List(items) => {
            write_header(buf, Family::Sequence, items.len())?;
            for item in items {
                write_value(buf, item)?;
            }
        }
        Value::Map(entries) => {
            write_header(buf, Family::Entries, entries.len())?;
            for (key, item) in entries {
                write_text(buf, key)?;
                write_value(buf, item)?;
            }
        }
        Value::Structure(s) => {
            write_header(buf, Family::Fields, s.fields.len())?;
            buf.put_u8(s.tag);
            for field in &s.fields {
                write_value(buf, field)?;
            }
        }
    }

    Ok(())
}

/// Incremental encoder accumulating values into one buffer.
pub struct Encoder {
    buffer: BytesMut,
}

impl Encoder {
    /// Create a new encoder with default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new encoder with specified buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Append a value.
    pub fn encode(&mut self, value: &Value) -> Result<(), PackStreamError> {
        write_value(&mut self.buffer, value)
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Borrow the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the encoder and return the bytes.
    pub fn into_bytes(self) -> BytesMut {
        self.buffer
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a single value into a fresh buffer.
pub fn encode(value: &Value) -> Result<BytesMut, PackStreamError> {
    let mut buffer = BytesMut::with_capacity(64);
    write_value(&mut buffer, value)?;
    Ok(buffer)
}
