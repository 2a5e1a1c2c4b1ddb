//! # Typed scalar kinds
//!
//! The log and parameter subsystems each advertise their variables with a
//! small set of wire types. Each kind knows its wire id, its fixed on-wire
//! size and its textual C-type name, and dispatches the matching
//! little-endian unpack. The two tables are distinct: log variables and
//! parameters use different id spaces.

use serde::{Deserialize, Serialize};

use crate::packing;
use crate::{Error, Result};

/// Wire type of a log variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LogValueKind {
    /// `uint8_t` value
    U8,
    /// `uint16_t` value
    U16,
    /// `uint32_t` value
    U32,
    /// `int8_t` value
    I8,
    /// `int16_t` value
    I16,
    /// `int32_t` value
    I32,
    /// `float16_t` value
    F16,
    /// `float32_t` value
    F32,
}

impl LogValueKind {
    /// On-wire size in bytes.
    pub fn size(&self) -> usize {
        match self {
            LogValueKind::U8 | LogValueKind::I8 => 1,
            LogValueKind::U16 | LogValueKind::I16 | LogValueKind::F16 => 2,
            LogValueKind::U32 | LogValueKind::I32 | LogValueKind::F32 => 4,
        }
    }

    /// Textual name of the matching C type.
    pub fn name(&self) -> &'static str {
        match self {
            LogValueKind::U8 => "uint8_t",
            LogValueKind::U16 => "uint16_t",
            LogValueKind::U32 => "uint32_t",
            LogValueKind::I8 => "int8_t",
            LogValueKind::I16 => "int16_t",
            LogValueKind::I32 => "int32_t",
            LogValueKind::F16 => "float16_t",
            LogValueKind::F32 => "float32_t",
        }
    }

    /// Unpack `size()` little-endian bytes as a `f32`.
    pub fn unpack_f32(&self, bytes: &[u8]) -> Result<f32> {
        let value = match self {
            LogValueKind::U8 => bytes[0] as f32,
            LogValueKind::U16 => u16::from_le_bytes(bytes[..2].try_into()?) as f32,
            LogValueKind::U32 => u32::from_le_bytes(bytes[..4].try_into()?) as f32,
            LogValueKind::I8 => bytes[0] as i8 as f32,
            LogValueKind::I16 => i16::from_le_bytes(bytes[..2].try_into()?) as f32,
            LogValueKind::I32 => i32::from_le_bytes(bytes[..4].try_into()?) as f32,
            LogValueKind::F16 => packing::unpack_f16_bytes(bytes[..2].try_into()?),
            LogValueKind::F32 => f32::from_le_bytes(bytes[..4].try_into()?),
        };
        Ok(value)
    }

    /// Unpack `size()` little-endian bytes as an `i64`, rounding floats.
    pub fn unpack_i64(&self, bytes: &[u8]) -> Result<i64> {
        let value = match self {
            LogValueKind::U8 => bytes[0] as i64,
            LogValueKind::U16 => u16::from_le_bytes(bytes[..2].try_into()?) as i64,
            LogValueKind::U32 => u32::from_le_bytes(bytes[..4].try_into()?) as i64,
            LogValueKind::I8 => bytes[0] as i8 as i64,
            LogValueKind::I16 => i16::from_le_bytes(bytes[..2].try_into()?) as i64,
            LogValueKind::I32 => i32::from_le_bytes(bytes[..4].try_into()?) as i64,
            LogValueKind::F16 => packing::unpack_f16_bytes(bytes[..2].try_into()?).round() as i64,
            LogValueKind::F32 => f32::from_le_bytes(bytes[..4].try_into()?).round() as i64,
        };
        Ok(value)
    }
}

impl From<LogValueKind> for u8 {
    fn from(kind: LogValueKind) -> u8 {
        match kind {
            LogValueKind::U8 => 0,
            LogValueKind::U16 => 1,
            LogValueKind::U32 => 2,
            LogValueKind::I8 => 3,
            LogValueKind::I16 => 4,
            LogValueKind::I32 => 5,
            LogValueKind::F16 => 6,
            LogValueKind::F32 => 7,
        }
    }
}

impl TryFrom<u8> for LogValueKind {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        let kind = match id {
            0 => LogValueKind::U8,
            1 => LogValueKind::U16,
            2 => LogValueKind::U32,
            3 => LogValueKind::I8,
            4 => LogValueKind::I16,
            5 => LogValueKind::I32,
            6 => LogValueKind::F16,
            7 => LogValueKind::F32,
            _ => {
                return Err(Error::ProtocolError(format!(
                    "invalid log variable type id: {}",
                    id
                )))
            }
        };
        Ok(kind)
    }
}

/// Wire type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ParamValueKind {
    /// `int8_t` value
    I8,
    /// `int16_t` value
    I16,
    /// `int32_t` value
    I32,
    /// `int64_t` value
    I64,
    /// `FP8` fixed-point value
    Fp8,
    /// `FP16` half-float value
    Fp16,
    /// `float32_t` value
    F32,
    /// `float64_t` value
    F64,
    /// `uint8_t` value
    U8,
    /// `uint16_t` value
    U16,
    /// `uint32_t` value
    U32,
    /// `uint64_t` value
    U64,
}

impl ParamValueKind {
    /// On-wire size in bytes.
    pub fn size(&self) -> usize {
        match self {
            ParamValueKind::I8 | ParamValueKind::U8 | ParamValueKind::Fp8 => 1,
            ParamValueKind::I16 | ParamValueKind::U16 | ParamValueKind::Fp16 => 2,
            ParamValueKind::I32 | ParamValueKind::U32 | ParamValueKind::F32 => 4,
            ParamValueKind::I64 | ParamValueKind::U64 | ParamValueKind::F64 => 8,
        }
    }

    /// Textual name of the matching C type.
    pub fn name(&self) -> &'static str {
        match self {
            ParamValueKind::I8 => "int8_t",
            ParamValueKind::I16 => "int16_t",
            ParamValueKind::I32 => "int32_t",
            ParamValueKind::I64 => "int64_t",
            ParamValueKind::Fp8 => "FP8",
            ParamValueKind::Fp16 => "FP16",
            ParamValueKind::F32 => "float32_t",
            ParamValueKind::F64 => "float64_t",
            ParamValueKind::U8 => "uint8_t",
            ParamValueKind::U16 => "uint16_t",
            ParamValueKind::U32 => "uint32_t",
            ParamValueKind::U64 => "uint64_t",
        }
    }

    /// True for the signed and unsigned integer kinds.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ParamValueKind::I8
                | ParamValueKind::I16
                | ParamValueKind::I32
                | ParamValueKind::I64
                | ParamValueKind::U8
                | ParamValueKind::U16
                | ParamValueKind::U32
                | ParamValueKind::U64
        )
    }

    /// True for the signed integer kinds.
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ParamValueKind::I8 | ParamValueKind::I16 | ParamValueKind::I32 | ParamValueKind::I64
        )
    }
}

impl From<ParamValueKind> for u8 {
    fn from(kind: ParamValueKind) -> u8 {
        match kind {
            ParamValueKind::I8 => 0,
            ParamValueKind::I16 => 1,
            ParamValueKind::I32 => 2,
            ParamValueKind::I64 => 3,
            ParamValueKind::Fp8 => 4,
            ParamValueKind::Fp16 => 5,
            ParamValueKind::F32 => 6,
            ParamValueKind::F64 => 7,
            ParamValueKind::U8 => 8,
            ParamValueKind::U16 => 9,
            ParamValueKind::U32 => 10,
            ParamValueKind::U64 => 11,
        }
    }
}

impl TryFrom<u8> for ParamValueKind {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        let kind = match id {
            0 => ParamValueKind::I8,
            1 => ParamValueKind::I16,
            2 => ParamValueKind::I32,
            3 => ParamValueKind::I64,
            4 => ParamValueKind::Fp8,
            5 => ParamValueKind::Fp16,
            6 => ParamValueKind::F32,
            7 => ParamValueKind::F64,
            8 => ParamValueKind::U8,
            9 => ParamValueKind::U16,
            10 => ParamValueKind::U32,
            11 => ParamValueKind::U64,
            _ => {
                return Err(Error::ProtocolError(format!(
                    "invalid parameter type id: {}",
                    id
                )))
            }
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_kind_ids_round_trip() {
        for id in 0..8u8 {
            let kind = LogValueKind::try_from(id).unwrap();
            assert_eq!(u8::from(kind), id);
        }
        assert!(LogValueKind::try_from(8).is_err());
    }

    #[test]
    fn param_kind_ids_round_trip() {
        for id in 0..12u8 {
            let kind = ParamValueKind::try_from(id).unwrap();
            assert_eq!(u8::from(kind), id);
        }
        assert!(ParamValueKind::try_from(12).is_err());
    }

    #[test]
    fn sizes_match_the_wire_layout() {
        assert_eq!(LogValueKind::U8.size(), 1);
        assert_eq!(LogValueKind::F16.size(), 2);
        assert_eq!(LogValueKind::F32.size(), 4);
        assert_eq!(ParamValueKind::Fp8.size(), 1);
        assert_eq!(ParamValueKind::U64.size(), 8);
        assert_eq!(ParamValueKind::F64.size(), 8);
    }

    #[test]
    fn unpack_dispatches_by_kind() {
        assert_eq!(LogValueKind::U16.unpack_f32(&[0x34, 0x12]).unwrap(), 4660.0);
        assert_eq!(LogValueKind::I8.unpack_f32(&[0xff]).unwrap(), -1.0);
        assert_eq!(
            LogValueKind::F32.unpack_f32(&1.5f32.to_le_bytes()).unwrap(),
            1.5
        );
        assert_eq!(LogValueKind::F16.unpack_f32(&[0x00, 0x3c]).unwrap(), 1.0);
        assert_eq!(
            LogValueKind::I32
                .unpack_i64(&(-42i32).to_le_bytes())
                .unwrap(),
            -42
        );
        assert_eq!(LogValueKind::F32.unpack_i64(&2.6f32.to_le_bytes()).unwrap(), 3);
    }

    #[test]
    fn scalar_pack_unpack_round_trips() {
        assert_eq!(LogValueKind::U8.unpack_i64(&[200]).unwrap(), 200);
        assert_eq!(
            LogValueKind::U32
                .unpack_i64(&0xdead_beefu32.to_le_bytes())
                .unwrap(),
            0xdead_beef
        );
        assert_eq!(
            LogValueKind::I16
                .unpack_i64(&(-1234i16).to_le_bytes())
                .unwrap(),
            -1234
        );
        let half = crate::packing::pack_f16(0.5);
        assert_eq!(
            LogValueKind::F16.unpack_f32(&half.to_le_bytes()).unwrap(),
            0.5
        );
    }

    #[test]
    fn names_match_the_c_tables() {
        assert_eq!(LogValueKind::F16.name(), "float16_t");
        assert_eq!(ParamValueKind::U64.name(), "uint64_t");
        assert_eq!(ParamValueKind::Fp16.name(), "FP16");
    }
}
