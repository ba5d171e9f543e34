//! Fixed-layout packed encode/decode over a byte slice.
//!
//! A [`ByteOperation`] is the one place "packed interpretation" happens:
//! given a byte order and a run of primitive type codes, it reads or writes
//! exactly that many primitives from/to a byte slice in one shot. Every
//! linear map (and every leaf primitive map) is built on top of one of
//! these.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian, NativeEndian};
use dtfabric_support::{EncodeError, FormatError};

use crate::definitions::ByteOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveCode {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl PrimitiveCode {
    pub fn size(self) -> usize {
        match self {
            PrimitiveCode::I8 | PrimitiveCode::U8 => 1,
            PrimitiveCode::I16 | PrimitiveCode::U16 => 2,
            PrimitiveCode::I32 | PrimitiveCode::U32 | PrimitiveCode::F32 => 4,
            PrimitiveCode::I64 | PrimitiveCode::U64 | PrimitiveCode::F64 => 8,
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            'b' => Some(PrimitiveCode::I8),
            'B' => Some(PrimitiveCode::U8),
            'h' => Some(PrimitiveCode::I16),
            'H' => Some(PrimitiveCode::U16),
            'i' => Some(PrimitiveCode::I32),
            'I' => Some(PrimitiveCode::U32),
            'q' => Some(PrimitiveCode::I64),
            'Q' => Some(PrimitiveCode::U64),
            'f' => Some(PrimitiveCode::F32),
            'd' => Some(PrimitiveCode::F64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrimitiveValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl PrimitiveValue {
    pub fn as_i64(self) -> i64 {
        match self {
            PrimitiveValue::I8(v) => v as i64,
            PrimitiveValue::U8(v) => v as i64,
            PrimitiveValue::I16(v) => v as i64,
            PrimitiveValue::U16(v) => v as i64,
            PrimitiveValue::I32(v) => v as i64,
            PrimitiveValue::U32(v) => v as i64,
            PrimitiveValue::I64(v) => v,
            PrimitiveValue::U64(v) => v as i64,
            PrimitiveValue::F32(_) | PrimitiveValue::F64(_) => 0,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            PrimitiveValue::F32(v) => v as f64,
            PrimitiveValue::F64(v) => v,
            other => other.as_i64() as f64,
        }
    }
}

/// Failure modes of [`ByteOperation::read_from`]. Callers translate
/// `TooSmall` into a [`dtfabric_support::ByteStreamTooSmall`] and
/// `Malformed` into a [`dtfabric_support::MappingError`], both annotated
/// with the node that was being decoded.
#[derive(Debug)]
pub enum ReadError {
    TooSmall { requested: u64, available: u64 },
    Malformed(String),
}

/// A packed encoder/decoder for one concatenation of primitive codes under
/// a single byte order.
#[derive(Debug, Clone)]
pub struct ByteOperation {
    byte_order: ByteOrder,
    codes: Vec<PrimitiveCode>,
}

impl ByteOperation {
    pub fn new(byte_order: ByteOrder, codes: Vec<PrimitiveCode>) -> Self {
        Self { byte_order, codes }
    }

    /// Builds an operation from a format descriptor: a byte-order prefix
    /// (`=`, `<`, `>`) followed by a run of primitive codes
    /// (`b B h H i I q Q f d`). Fails with `FormatError` on anything else.
    pub fn from_descriptor(descriptor: &str) -> Result<Self, FormatError> {
        let mut chars = descriptor.chars();
        let byte_order = match chars.next() {
            Some('=') => ByteOrder::Native,
            Some('<') => ByteOrder::Little,
            Some('>') => ByteOrder::Big,
            _ => {
                return Err(FormatError::new(
                    descriptor,
                    "format descriptor must start with a byte-order prefix (=, <, >)",
                ))
            }
        };
        let mut codes = Vec::new();
        for c in chars {
            let code = PrimitiveCode::from_char(c).ok_or_else(|| {
                FormatError::new(descriptor, format!("invalid primitive code `{c}`"))
            })?;
            codes.push(code);
        }
        Ok(Self { byte_order, codes })
    }

    pub fn byte_size(&self) -> u64 {
        self.codes.iter().map(|c| c.size() as u64).sum()
    }

    pub fn codes(&self) -> &[PrimitiveCode] {
        &self.codes
    }

    pub fn read_from(&self, bytes: &[u8]) -> Result<Vec<PrimitiveValue>, ReadError> {
        let needed = self.byte_size();
        if (bytes.len() as u64) < needed {
            return Err(ReadError::TooSmall {
                requested: needed,
                available: bytes.len() as u64,
            });
        }
        match self.byte_order {
            ByteOrder::Native => Ok(read_all::<NativeEndian>(&self.codes, bytes)),
            ByteOrder::Little => Ok(read_all::<LittleEndian>(&self.codes, bytes)),
            ByteOrder::Big => Ok(read_all::<BigEndian>(&self.codes, bytes)),
        }
    }

    pub fn write_to(&self, values: &[PrimitiveValue]) -> Result<Vec<u8>, EncodeError> {
        if values.len() != self.codes.len() {
            return Err(EncodeError::new(
                "byte-operation",
                format!(
                    "wrong arity: expected {} values, got {}",
                    self.codes.len(),
                    values.len()
                ),
            ));
        }
        let mut buffer = vec![0u8; self.byte_size() as usize];
        match self.byte_order {
            ByteOrder::Native => write_all::<NativeEndian>(&self.codes, values, &mut buffer)?,
            ByteOrder::Little => write_all::<LittleEndian>(&self.codes, values, &mut buffer)?,
            ByteOrder::Big => write_all::<BigEndian>(&self.codes, values, &mut buffer)?,
        }
        Ok(buffer)
    }
}

fn read_all<O: byteorder::ByteOrder>(codes: &[PrimitiveCode], bytes: &[u8]) -> Vec<PrimitiveValue> {
    let mut offset = 0usize;
    let mut out = Vec::with_capacity(codes.len());
    for code in codes {
        let size = code.size();
        let chunk = &bytes[offset..offset + size];
        let value = match code {
            PrimitiveCode::I8 => PrimitiveValue::I8(chunk[0] as i8),
            PrimitiveCode::U8 => PrimitiveValue::U8(chunk[0]),
            PrimitiveCode::I16 => PrimitiveValue::I16(O::read_i16(chunk)),
            PrimitiveCode::U16 => PrimitiveValue::U16(O::read_u16(chunk)),
            PrimitiveCode::I32 => PrimitiveValue::I32(O::read_i32(chunk)),
            PrimitiveCode::U32 => PrimitiveValue::U32(O::read_u32(chunk)),
            PrimitiveCode::I64 => PrimitiveValue::I64(O::read_i64(chunk)),
            PrimitiveCode::U64 => PrimitiveValue::U64(O::read_u64(chunk)),
            PrimitiveCode::F32 => PrimitiveValue::F32(O::read_f32(chunk)),
            PrimitiveCode::F64 => PrimitiveValue::F64(O::read_f64(chunk)),
        };
        out.push(value);
        offset += size;
    }
    out
}

fn write_all<O: byteorder::ByteOrder>(
    codes: &[PrimitiveCode],
    values: &[PrimitiveValue],
    buffer: &mut [u8],
) -> Result<(), EncodeError> {
    let mut offset = 0usize;
    for (code, value) in codes.iter().zip(values) {
        let size = code.size();
        let chunk = &mut buffer[offset..offset + size];
        match (code, *value) {
            (PrimitiveCode::I8, PrimitiveValue::I8(v)) => chunk[0] = v as u8,
            (PrimitiveCode::U8, PrimitiveValue::U8(v)) => chunk[0] = v,
            (PrimitiveCode::I16, PrimitiveValue::I16(v)) => O::write_i16(chunk, v),
            (PrimitiveCode::U16, PrimitiveValue::U16(v)) => O::write_u16(chunk, v),
            (PrimitiveCode::I32, PrimitiveValue::I32(v)) => O::write_i32(chunk, v),
            (PrimitiveCode::U32, PrimitiveValue::U32(v)) => O::write_u32(chunk, v),
            (PrimitiveCode::I64, PrimitiveValue::I64(v)) => O::write_i64(chunk, v),
            (PrimitiveCode::U64, PrimitiveValue::U64(v)) => O::write_u64(chunk, v),
            (PrimitiveCode::F32, PrimitiveValue::F32(v)) => O::write_f32(chunk, v),
            (PrimitiveCode::F64, PrimitiveValue::F64(v)) => O::write_f64(chunk, v),
            _ => {
                return Err(EncodeError::new(
                    "byte-operation",
                    "value does not match its primitive code",
                ))
            }
        }
        offset += size;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_little_endian_u32() {
        let op = ByteOperation::from_descriptor("<I").unwrap();
        let values = op.read_from(&[0x12, 0x34, 0x56, 0x78]).unwrap();
        assert_eq!(values, vec![PrimitiveValue::U32(0x78563412)]);
        let bytes = op.write_to(&values).unwrap();
        assert_eq!(bytes, vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn too_small_buffer_reports_requested_and_available() {
        let op = ByteOperation::from_descriptor("<I").unwrap();
        match op.read_from(&[0x12, 0x34]) {
            Err(ReadError::TooSmall { requested, available }) => {
                assert_eq!(requested, 4);
                assert_eq!(available, 2);
            }
            other => panic!("expected TooSmall, got {other:?}"),
        }
    }

    #[test]
    fn invalid_descriptor_is_a_format_error() {
        assert!(ByteOperation::from_descriptor("<z").is_err());
        assert!(ByteOperation::from_descriptor("I").is_err());
    }

    #[test]
    fn wrong_arity_write_is_an_encode_error() {
        let op = ByteOperation::from_descriptor("<II").unwrap();
        assert!(op.write_to(&[PrimitiveValue::U32(1)]).is_err());
    }
}
