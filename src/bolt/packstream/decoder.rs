//! PackStream decoder.
//!
//! The decoder walks a shrinking input slice: every read splits the
//! consumed bytes off the front, so exhaustion shows up as a too-short
//! slice rather than an index check. Dispatch looks at the marker's high
//! nibble first (the tiny container families all encode their size there)
//! and falls back to exact markers for everything else.

use std::collections::HashMap;

use super::marker;
use super::types::{Structure, Value};
use super::PackStreamError;

/// Split `n` bytes off the front of the input.
fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], PackStreamError> {
    if input.len() < n {
        return Err(PackStreamError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

/// Split a fixed-size array off the front of the input.
fn take_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], PackStreamError> {
    let head = take(input, N)?;
    let mut array = [0u8; N];
    array.copy_from_slice(head);
    Ok(array)
}

fn take_byte(input: &mut &[u8]) -> Result<u8, PackStreamError> {
    Ok(take_array::<1>(input)?[0])
}

fn read_text(input: &mut &[u8], len: usize) -> Result<Value, PackStreamError> {
    let raw = take(input, len)?;
    let text = std::str::from_utf8(raw)
        .map_err(|e| PackStreamError::InvalidUtf8(e.to_string()))?;
    Ok(Value::String(text.to_string()))
}

fn read_sequence(input: &mut &[u8], len: usize) -> Result<Value, PackStreamError> {
    let mut items = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        items.push(read_value(input)?);
    }
    Ok(Value::List(items))
}

fn read_entries(input: &mut &[u8], len: usize) -> Result<Value, PackStreamError> {
    let mut entries = HashMap::with_capacity(len.min(1024));
    for _ in 0..len {
        let key = match read_value(input)? {
            Value::String(key) => key,
            _ => return Err(PackStreamError::InvalidMapKey),
        };
        entries.insert(key, read_value(input)?);
    }
    Ok(Value::Map(entries))
}

fn read_struct(input: &mut &[u8], arity: usize) -> Result<Value, PackStreamError> {
    let tag = take_byte(input)?;
    let mut fields = Vec::with_capacity(arity.min(64));
    for _ in 0..arity {
        fields.push(read_value(input)?);
    }
    Ok(Value::Structure(Structure::new(tag, fields)))
}

/// Decode one value off the front of the input.
pub fn read_value(input: &mut &[u8]) -> Result<Value, PackStreamError> {
    let m = take_byte(input)?;

    // Tiny ints occupy both ends of the byte range; everything in between
    // is a tiny container or a dedicated marker.
    if m < 0x80 || m >= marker::TINY_INT_MIN {
        return Ok(Value::Integer((m as i8) as i64));
    }

    let nibble = (m & 0x0F) as usize;
    match m & 0xF0 {
        0x80 => read_text(input, nibble),
        0x90 => read_sequence(input, nibble),
        0xA0 => read_entries(input, nibble),
        0xB0 => read_struct(input, nibble),
        _ => match m {
            marker::NULL => Ok(Value::Null),
            marker::TRUE => Ok(Value::Boolean(true)),
            marker::FALSE => Ok(Value::Boolean(false)),

            marker::FLOAT_64 => Ok(Value::Float(f64::from_be_bytes(take_array(input)?))),

            marker::INT_8 => Ok(Value::Integer(take_byte(input)? as i8 as i64)),
            marker::INT_16 => Ok(Value::Integer(
                i16::from_be_bytes(take_array(input)?) as i64
            )),
            marker::INT_32 => Ok(Value::Integer(
                i32::from_be_bytes(take_array(input)?) as i64
            )),
            marker::INT_64 => Ok(Value::Integer(i64::from_be_bytes(take_array(input)?))),

            marker::STRING_8 => {
                let len = take_byte(input)? as usize;
                read_text(input, len)
            }
            marker::STRING_16 => {
                let len = u16::from_be_bytes(take_array(input)?) as usize;
                read_text(input, len)
            }

            marker::LIST_8 => {
                let len = take_byte(input)? as usize;
                read_sequence(input, len)
            }
            marker::LIST_16 => {
                let len = u16::from_be_bytes(take_array(input)?) as usize;
                read_sequence(input, len)
            }

            marker::MAP_8 => {
                let len = take_byte(input)? as usize;
                read_entries(input, len)
            }
            marker::MAP_16 => {
                let len = u16::from_be_bytes(take_array(input)?) as usize;
                read_entries(input, len)
            }

            marker::STRUCT_8 => {
                let arity = take_byte(input)? as usize;
                read_struct(input, arity)
            }
            marker::STRUCT_16 => {
                let arity = u16::from_be_bytes(take_array(input)?) as usize;
                read_struct(input, arity)
            }

            // Everything else, including the Bytes family (0xCC-0xCE) and
            // 32-bit size headers, is outside the repertoire this codec
            // speaks.
            unknown => Err(PackStreamError::UnknownMarker(unknown)),
        },
    }
}

/// Streaming decoder over a byte slice.
pub struct Decoder<'a> {
    input: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> Result<Value, PackStreamError> {
        read_value(&mut self.input)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    /// Whether all input has been consumed.
    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }
}

/// Decode a single value from bytes.
pub fn decode(data: &[u8]) -> Result<Value, PackStreamError> {
    let mut input = data;
    read_value(&mut input)
}
