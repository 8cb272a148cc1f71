//! PackStream serialization format.
//!
//! PackStream is the binary serialization format used by the Bolt protocol
//! to carry values between client and server. This module implements the
//! Bolt 5.x subset used by this driver.
//!
//! # Supported Types
//!
//! - **Null**: single marker byte
//! - **Boolean**: true/false markers
//! - **Integer**: smallest-width encoding (-2^63 to 2^63-1), always read back as i64
//! - **Float**: 64-bit IEEE 754, big-endian
//! - **String**: UTF-8 with tiny/8-bit/16-bit length headers
//! - **List**: heterogeneous, tiny/8-bit/16-bit length headers
//! - **Map**: string keys only, tiny/8-bit/16-bit length headers
//! - **Structure**: tag byte plus up to 15 fields (tiny encoding on write)
//!
//! The dedicated Bytes family and 32-bit size headers are not part of the
//! repertoire: byte payloads cannot be packed, and their markers fail with
//! [`PackStreamError::UnknownMarker`] on read.

pub mod decoder;
pub mod encoder;
pub mod marker;
pub mod types;

pub use decoder::{decode, Decoder};
pub use encoder::{encode, Encoder};
pub use types::{Structure, Value};

use std::fmt;

/// PackStream errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamError {
    /// Unexpected end of input
    UnexpectedEof,
    /// Unknown marker byte
    UnknownMarker(u8),
    /// Invalid UTF-8 in string
    InvalidUtf8(String),
    /// Invalid map key (must be string)
    InvalidMapKey,
    /// Value too large to encode
    ValueTooLarge(&'static str, usize),
    /// Invalid structure format
    InvalidStructure(String),
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof => write!(f, "Unexpected end of PackStream data"),
            PackStreamError::UnknownMarker(m) => {
                write!(f, "Unknown PackStream marker: 0x{:02X}", m)
            }
            PackStreamError::InvalidUtf8(e) => write!(f, "Invalid UTF-8 in string: {}", e),
            PackStreamError::InvalidMapKey => write!(f, "Map keys must be strings"),
            PackStreamError::ValueTooLarge(t, s) => write!(f, "{} too large: {} elements", t, s),
            PackStreamError::InvalidStructure(msg) => write!(f, "Invalid structure: {}", msg),
        }
    }
}

impl std::error::Error for PackStreamError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_roundtrip_null() {
        let value = Value::Null;
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_roundtrip_bool() {
        for v in [true, false] {
            let value = Value::Boolean(v);
            let bytes = encode(&value).unwrap();
            assert_eq!(decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_roundtrip_int() {
        // Integers come back as i64 regardless of the wire width chosen.
        for v in [0i64, 1, -1, 42, 127, -16, 128, -128, 1000, -1000, i64::MAX, i64::MIN] {
            let value = Value::Integer(v);
            let bytes = encode(&value).unwrap();
            assert_eq!(decode(&bytes).unwrap(), value, "failed for {}", v);
        }
    }

    #[test]
    fn test_roundtrip_float() {
        for v in [0.0f64, 1.0, -1.0, 3.14159, f64::MAX, f64::MIN] {
            let value = Value::Float(v);
            let bytes = encode(&value).unwrap();
            assert_eq!(decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_roundtrip_string() {
        for s in ["", "a", "hello", "hello world", &"x".repeat(100), &"y".repeat(1000)] {
            let value = Value::String(s.to_string());
            let bytes = encode(&value).unwrap();
            assert_eq!(decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_roundtrip_list() {
        let value = Value::List(vec![
            Value::Integer(1),
            Value::String("two".into()),
            Value::Boolean(true),
            Value::Null,
        ]);
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_roundtrip_map() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), Value::Integer(1));
        map.insert("b".to_string(), Value::String("hello".into()));
        map.insert("c".to_string(), Value::Boolean(false));

        let value = Value::Map(map);
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_roundtrip_nested_map() {
        // The classic profile map: string, int, bool, and a list with a null.
        let mut map = HashMap::new();
        map.insert("name".to_string(), Value::String("John".into()));
        map.insert("age".to_string(), Value::Integer(42));
        map.insert("active".to_string(), Value::Boolean(true));
        map.insert(
            "hobbies".to_string(),
            Value::List(vec![
                Value::String("reading".into()),
                Value::String("coding".into()),
                Value::Null,
            ]),
        );

        let bytes = encode(&Value::Map(map)).unwrap();
        let decoded = decode(&bytes).unwrap();
        let m = decoded.as_map().unwrap();

        assert_eq!(m.get("name").unwrap().as_str(), Some("John"));
        assert_eq!(m.get("age").unwrap().as_int(), Some(42));
        assert_eq!(m.get("active").unwrap().as_bool(), Some(true));
        let hobbies = m.get("hobbies").unwrap().as_list().unwrap();
        assert_eq!(hobbies.len(), 3);
        assert!(hobbies[2].is_null());
    }

    #[test]
    fn test_roundtrip_structure() {
        let s = Structure::new(
            0x70,
            vec![
                Value::Integer(1),
                Value::List(vec![Value::String("n".into())]),
                Value::Map(HashMap::new()),
            ],
        );
        let value = Value::Structure(s);
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_roundtrip_larger_containers() {
        // Sizes past the tiny range exercise the 8-bit and 16-bit headers.
        let list = Value::List((0..300).map(Value::Integer).collect());
        let bytes = encode(&list).unwrap();
        assert_eq!(decode(&bytes).unwrap(), list);

        let mut map = HashMap::new();
        for i in 0..20 {
            map.insert(format!("k{}", i), Value::Integer(i));
        }
        let map = Value::Map(map);
        let bytes = encode(&map).unwrap();
        assert_eq!(decode(&bytes).unwrap(), map);
    }

    #[test]
    fn test_deeply_nested() {
        let mut inner_map = HashMap::new();
        inner_map.insert(
            "items".to_string(),
            Value::List(vec![Value::Integer(1), Value::Integer(2)]),
        );

        let value = Value::List(vec![
            Value::Map(inner_map.clone()),
            Value::Map(inner_map),
        ]);

        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }
}
