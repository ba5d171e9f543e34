//! Boolean, character, integer, floating-point, UUID, and padding maps: the
//! leaves of the map tree, each backed by a single [`ByteOperation`].

use std::rc::Rc;

use dtfabric_support::{ByteStreamTooSmall, EncodeError, FormatError, MappingError};
use uuid::Uuid;

use crate::byte_ops::{ByteOperation, PrimitiveCode, PrimitiveValue, ReadError};
use crate::context::Context;
use crate::definitions::{ByteOrder, Definition, DefinitionKind, IntegerFormat};
use crate::map::DecodeError;
use crate::value::Value;

fn byte_operation_for(byte_order: ByteOrder, code: PrimitiveCode) -> ByteOperation {
    ByteOperation::new(byte_order, vec![code])
}

fn translate_read_error(name: &str, offset: u64, error: ReadError) -> DecodeError {
    match error {
        ReadError::TooSmall { requested, available } => {
            ByteStreamTooSmall::new(name, offset + requested, offset + available).into()
        }
        ReadError::Malformed(message) => MappingError::at(name, message, offset).into(),
    }
}

#[derive(Debug)]
pub struct BooleanMap {
    pub(crate) definition: Rc<Definition>,
    operation: ByteOperation,
    true_value: Option<u64>,
    false_value: Option<u64>,
}

impl BooleanMap {
    pub(crate) fn new(definition: Rc<Definition>) -> Result<Self, FormatError> {
        let DefinitionKind::Boolean(inner) = &definition.kind else {
            unreachable!("BooleanMap built from a non-boolean definition")
        };
        if inner.true_value.is_none() && inner.false_value.is_none() {
            return Err(FormatError::new(
                &definition.name,
                "boolean definition must set true_value, false_value, or both",
            ));
        }
        let code = match inner.size {
            1 => PrimitiveCode::U8,
            2 => PrimitiveCode::U16,
            4 => PrimitiveCode::U32,
            other => {
                return Err(FormatError::new(
                    &definition.name,
                    format!("unsupported boolean size {other}"),
                ))
            }
        };
        let operation = byte_operation_for(inner.byte_order, code);
        Ok(Self {
            true_value: inner.true_value,
            false_value: inner.false_value,
            operation,
            definition,
        })
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let slice = &buffer[byte_offset as usize..];
        let values = self
            .operation
            .read_from(slice)
            .map_err(|e| translate_read_error(&self.definition.name, byte_offset, e))?;
        let raw = values[0].as_i64() as u64;
        let result = match (self.true_value, self.false_value) {
            (Some(t), Some(f)) => {
                if raw == t {
                    true
                } else if raw == f {
                    false
                } else {
                    return Err(MappingError::at(
                        &self.definition.name,
                        format!("{raw} is neither true_value nor false_value"),
                        byte_offset,
                    )
                    .into());
                }
            }
            (Some(t), None) => raw == t,
            (None, Some(f)) => raw != f,
            (None, None) => unreachable!("validated at construction"),
        };
        context.byte_size = self.operation.byte_size();
        context.requested_size = context.byte_size;
        Ok(Value::Boolean(result))
    }

    pub fn fold_byte_stream(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let flag = value
            .as_bool()
            .ok_or_else(|| EncodeError::new(&self.definition.name, "expected a boolean value"))?;
        let raw = match (flag, self.true_value, self.false_value) {
            (true, Some(t), _) => t,
            (false, _, Some(f)) => f,
            (true, None, Some(f)) => f.wrapping_add(1),
            (false, Some(t), None) => t.wrapping_add(1),
            _ => {
                return Err(EncodeError::new(
                    &self.definition.name,
                    "cannot encode this side of the boolean without a defined value",
                ))
            }
        };
        self.operation
            .write_to(&[primitive_from_u64(self.operation.codes()[0], raw)])
            .map_err(|e| EncodeError::new(&self.definition.name, e.to_string()))
    }
}

fn primitive_from_u64(code: PrimitiveCode, raw: u64) -> PrimitiveValue {
    match code {
        PrimitiveCode::U8 => PrimitiveValue::U8(raw as u8),
        PrimitiveCode::U16 => PrimitiveValue::U16(raw as u16),
        PrimitiveCode::U32 => PrimitiveValue::U32(raw as u32),
        other => unreachable!("boolean maps only use unsigned codes, got {other:?}"),
    }
}

#[derive(Debug)]
pub struct CharacterMap {
    pub(crate) definition: Rc<Definition>,
    operation: ByteOperation,
}

impl CharacterMap {
    pub(crate) fn new(definition: Rc<Definition>) -> Self {
        let DefinitionKind::Character(inner) = &definition.kind else {
            unreachable!("CharacterMap built from a non-character definition")
        };
        let code = match inner.size {
            1 => PrimitiveCode::I8,
            2 => PrimitiveCode::I16,
            4 => PrimitiveCode::I32,
            _ => PrimitiveCode::I32,
        };
        let operation = byte_operation_for(inner.byte_order, code);
        Self { operation, definition }
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let slice = &buffer[byte_offset as usize..];
        let values = self
            .operation
            .read_from(slice)
            .map_err(|e| translate_read_error(&self.definition.name, byte_offset, e))?;
        let scalar = values[0].as_i64();
        let c = u32::try_from(scalar)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| {
                MappingError::at(&self.definition.name, format!("{scalar} is not a valid scalar value"), byte_offset)
            })?;
        context.byte_size = self.operation.byte_size();
        context.requested_size = context.byte_size;
        Ok(Value::Character(c))
    }

    pub fn fold_byte_stream(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let Value::Character(c) = value else {
            return Err(EncodeError::new(&self.definition.name, "expected a character value"));
        };
        let raw = *c as i64;
        let primitive = match self.operation.codes()[0] {
            PrimitiveCode::I8 => PrimitiveValue::I8(raw as i8),
            PrimitiveCode::I16 => PrimitiveValue::I16(raw as i16),
            _ => PrimitiveValue::I32(raw as i32),
        };
        self.operation
            .write_to(&[primitive])
            .map_err(|e| EncodeError::new(&self.definition.name, e.to_string()))
    }
}

#[derive(Debug)]
pub struct IntegerMap {
    pub(crate) definition: Rc<Definition>,
    operation: ByteOperation,
    values: Option<Vec<i64>>,
}

impl IntegerMap {
    pub(crate) fn new(definition: Rc<Definition>) -> Self {
        let DefinitionKind::Integer(inner) = &definition.kind else {
            unreachable!("IntegerMap built from a non-integer definition")
        };
        let code = match (inner.size, inner.format) {
            (1, IntegerFormat::Signed) => PrimitiveCode::I8,
            (1, IntegerFormat::Unsigned) => PrimitiveCode::U8,
            (2, IntegerFormat::Signed) => PrimitiveCode::I16,
            (2, IntegerFormat::Unsigned) => PrimitiveCode::U16,
            (4, IntegerFormat::Signed) => PrimitiveCode::I32,
            (4, IntegerFormat::Unsigned) => PrimitiveCode::U32,
            (8, IntegerFormat::Signed) => PrimitiveCode::I64,
            (8, IntegerFormat::Unsigned) => PrimitiveCode::U64,
            _ => PrimitiveCode::I32,
        };
        let operation = byte_operation_for(inner.byte_order, code);
        Self {
            operation,
            values: None,
            definition,
        }
    }

    /// Attaches a `values` allow-list; used by structure compilation when a
    /// member restricts this leaf to a set of accepted values.
    pub(crate) fn with_allow_list(mut self, values: Option<Vec<i64>>) -> Self {
        self.values = values;
        self
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let slice = &buffer[byte_offset as usize..];
        let values = self
            .operation
            .read_from(slice)
            .map_err(|e| translate_read_error(&self.definition.name, byte_offset, e))?;
        let raw = values[0].as_i64();
        if let Some(allow) = &self.values {
            if !allow.contains(&raw) {
                return Err(MappingError::at(
                    &self.definition.name,
                    format!("{raw} is not an allowed value"),
                    byte_offset,
                )
                .into());
            }
        }
        context.byte_size = self.operation.byte_size();
        context.requested_size = context.byte_size;
        Ok(Value::Integer(raw))
    }

    pub fn fold_byte_stream(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let raw = value
            .as_integer()
            .ok_or_else(|| EncodeError::new(&self.definition.name, "expected an integer value"))?;
        let primitive = match self.operation.codes()[0] {
            PrimitiveCode::I8 => PrimitiveValue::I8(raw as i8),
            PrimitiveCode::U8 => PrimitiveValue::U8(raw as u8),
            PrimitiveCode::I16 => PrimitiveValue::I16(raw as i16),
            PrimitiveCode::U16 => PrimitiveValue::U16(raw as u16),
            PrimitiveCode::I32 => PrimitiveValue::I32(raw as i32),
            PrimitiveCode::U32 => PrimitiveValue::U32(raw as u32),
            PrimitiveCode::I64 => PrimitiveValue::I64(raw),
            PrimitiveCode::U64 => PrimitiveValue::U64(raw as u64),
            _ => unreachable!("integer maps never use float codes"),
        };
        self.operation
            .write_to(&[primitive])
            .map_err(|e| EncodeError::new(&self.definition.name, e.to_string()))
    }
}

#[derive(Debug)]
pub struct FloatMap {
    pub(crate) definition: Rc<Definition>,
    operation: ByteOperation,
}

impl FloatMap {
    pub(crate) fn new(definition: Rc<Definition>) -> Self {
        let DefinitionKind::FloatingPoint(inner) = &definition.kind else {
            unreachable!("FloatMap built from a non-floating-point definition")
        };
        let code = if inner.size == 8 { PrimitiveCode::F64 } else { PrimitiveCode::F32 };
        let operation = byte_operation_for(inner.byte_order, code);
        Self { operation, definition }
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let slice = &buffer[byte_offset as usize..];
        let values = self
            .operation
            .read_from(slice)
            .map_err(|e| translate_read_error(&self.definition.name, byte_offset, e))?;
        context.byte_size = self.operation.byte_size();
        context.requested_size = context.byte_size;
        Ok(Value::Float(values[0].as_f64()))
    }

    pub fn fold_byte_stream(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let Value::Float(raw) = value else {
            return Err(EncodeError::new(&self.definition.name, "expected a floating-point value"));
        };
        let primitive = if self.operation.codes()[0] == PrimitiveCode::F64 {
            PrimitiveValue::F64(*raw)
        } else {
            PrimitiveValue::F32(*raw as f32)
        };
        self.operation
            .write_to(&[primitive])
            .map_err(|e| EncodeError::new(&self.definition.name, e.to_string()))
    }
}

/// 16 bytes; little-endian UUIDs byte-swap the first three groups per the
/// Microsoft GUID convention, so this is always decoded as a composite
/// (it can't be expressed as a single `ByteOperation` format code).
#[derive(Debug)]
pub struct UuidMap {
    pub(crate) definition: Rc<Definition>,
    byte_order: ByteOrder,
}

impl UuidMap {
    pub(crate) fn new(definition: Rc<Definition>) -> Self {
        let DefinitionKind::Uuid(inner) = &definition.kind else {
            unreachable!("UuidMap built from a non-uuid definition")
        };
        Self {
            byte_order: inner.byte_order,
            definition,
        }
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let available = buffer.len() as u64 - byte_offset.min(buffer.len() as u64);
        if available < 16 {
            return Err(ByteStreamTooSmall::new(&self.definition.name, byte_offset + 16, byte_offset + available).into());
        }
        let slice = &buffer[byte_offset as usize..byte_offset as usize + 16];
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(slice);
        let uuid = match self.byte_order {
            ByteOrder::Big => Uuid::from_bytes(bytes),
            ByteOrder::Little | ByteOrder::Native => Uuid::from_bytes_le(bytes),
        };
        context.byte_size = 16;
        context.requested_size = 16;
        Ok(Value::Uuid(uuid))
    }

    pub fn fold_byte_stream(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let Value::Uuid(uuid) = value else {
            return Err(EncodeError::new(&self.definition.name, "expected a uuid value"));
        };
        let bytes = match self.byte_order {
            ByteOrder::Big => *uuid.as_bytes(),
            ByteOrder::Little | ByteOrder::Native => uuid.to_bytes_le(),
        };
        Ok(bytes.to_vec())
    }
}

/// Consumes the minimum number of bytes needed to align the running
/// structure offset. `byte_size` is set by the enclosing structure map
/// just before each decode/encode, since it depends on where the offset
/// currently stands.
#[derive(Debug)]
pub struct PaddingMap {
    pub(crate) definition: Rc<Definition>,
    pub(crate) alignment_size: u64,
}

impl PaddingMap {
    pub(crate) fn new(definition: Rc<Definition>) -> Self {
        let DefinitionKind::Padding(inner) = &definition.kind else {
            unreachable!("PaddingMap built from a non-padding definition")
        };
        Self {
            alignment_size: inner.alignment_size,
            definition,
        }
    }

    /// `byte_size` comes from the caller's running `members_data_size`: the
    /// number of bytes needed to bring that offset up to the next multiple
    /// of `alignment_size`.
    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let byte_size =
            dtfabric_support::align(context.members_data_size, self.alignment_size) - context.members_data_size;
        let available = buffer.len() as u64 - byte_offset.min(buffer.len() as u64);
        if available < byte_size {
            return Err(ByteStreamTooSmall::new(&self.definition.name, byte_offset + byte_size, byte_offset + available).into());
        }
        let slice = &buffer[byte_offset as usize..(byte_offset + byte_size) as usize];
        context.byte_size = byte_size;
        context.requested_size = byte_size;
        Ok(Value::Padding(slice.to_vec()))
    }

    pub fn fold_byte_stream(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        match value {
            Value::Padding(bytes) => Ok(bytes.clone()),
            _ => Err(EncodeError::new(&self.definition.name, "expected padding bytes")),
        }
    }
}
