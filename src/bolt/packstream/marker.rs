//! PackStream type markers.
//!
//! Every PackStream value starts with a marker byte. Tiny integers use the
//! marker byte itself; the tiny container forms carry their size in the low
//! nibble; everything else is a dedicated marker, with sizes following as
//! 8-bit or 16-bit big-endian integers.

/// Null marker
pub const NULL: u8 = 0xC0;

/// Boolean markers
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

/// Float marker (64-bit IEEE 754)
pub const FLOAT_64: u8 = 0xC1;

/// Integer markers
/// Tiny integers (-16 to 127) are encoded inline
pub const TINY_INT_MIN: u8 = 0xF0; // -16
pub const TINY_INT_MAX: u8 = 0x7F; // 127
pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

/// String markers; tiny strings (0-15 bytes) use 0x80-0x8F
pub const TINY_STRING_BASE: u8 = 0x80;
pub const STRING_8: u8 = 0xD0;
pub const STRING_16: u8 = 0xD1;

/// List markers; tiny lists (0-15 elements) use 0x90-0x9F
pub const TINY_LIST_BASE: u8 = 0x90;
pub const LIST_8: u8 = 0xD4;
pub const LIST_16: u8 = 0xD5;

/// Map markers; tiny maps (0-15 entries) use 0xA0-0xAF
pub const TINY_MAP_BASE: u8 = 0xA0;
pub const MAP_8: u8 = 0xD8;
pub const MAP_16: u8 = 0xD9;

/// Structure markers; tiny structures (0-15 fields) use 0xB0-0xBF
pub const TINY_STRUCT_BASE: u8 = 0xB0;
pub const STRUCT_8: u8 = 0xDC;
pub const STRUCT_16: u8 = 0xDD;

/// Largest size encodable with the 16-bit headers above. PackStream also
/// defines 32-bit headers and a dedicated Bytes family; this codec emits
/// neither, matching the Bolt 5.x subset it speaks.
pub const MAX_SIZE: usize = u16::MAX as usize;

/// Check if an integer fits the inline tiny form.
#[inline]
pub fn can_encode_tiny_int(value: i64) -> bool {
    (-16..=127).contains(&value)
}
