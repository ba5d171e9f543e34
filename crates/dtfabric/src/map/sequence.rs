//! Sequence, stream, and string maps: repeated decode of one element type,
//! bounded by a data size, an element count, or a terminator value.

use std::rc::Rc;

use dtfabric_support::{ByteStreamTooSmall, EncodeError, FormatError, MappingError};

use crate::context::{Context, SequenceResume, SizeHint};
use crate::definitions::{Definition, LengthMode, TextEncoding};
use crate::map::{compile_cached, DataTypeMap, DecodeError, MapCache};
use crate::value::Value;

/// How many sequence maps may nest before a decode is rejected. The source
/// never pins this down; 32 is a conservative, arbitrarily chosen ceiling.
const MAX_RECURSION_DEPTH: u32 = 32;

enum Bound {
    DataSize(u64),
    Count(u64),
    Terminator(Value),
}

fn resolve_bound(name: &str, mode: &LengthMode, context: &Context) -> Result<Bound, MappingError> {
    match mode {
        LengthMode::DataSize { literal, expression } => {
            resolve_length(name, "elements data size", *literal, expression, context).map(Bound::DataSize)
        }
        LengthMode::NumberOfElements { literal, expression } => {
            resolve_length(name, "number of elements", *literal, expression, context).map(Bound::Count)
        }
        LengthMode::Terminator(value) => Ok(Bound::Terminator(value.clone())),
    }
}

fn resolve_length(
    name: &str,
    what: &str,
    literal: Option<u64>,
    expression: &Option<crate::expr::Expr>,
    context: &Context,
) -> Result<u64, MappingError> {
    if let Some(v) = literal {
        return Ok(v);
    }
    let expr = expression
        .as_ref()
        .ok_or_else(|| MappingError::new(name, format!("{what} has neither a literal nor an expression")))?;
    let value = expr.eval(&context.values).map_err(|e| MappingError::new(name, e.to_string()))?;
    let raw = value
        .as_integer()
        .ok_or_else(|| MappingError::new(name, format!("{what} expression did not evaluate to an integer")))?;
    u64::try_from(raw).map_err(|_| MappingError::new(name, format!("invalid {what}: {raw}")))
}

/// Drives the shared decode loop for sequence and stream nodes: call the
/// element map repeatedly against the running offset, snapshotting into
/// `context.state.sequence` on `ByteStreamTooSmall` so a resumed call can
/// pick up where the previous attempt left off.
fn decode_elements(
    name: &str,
    element_map: &DataTypeMap,
    length_mode: &LengthMode,
    buffer: &[u8],
    byte_offset: u64,
    context: &mut Context,
) -> Result<Vec<Value>, DecodeError> {
    if context.recursion_depth >= MAX_RECURSION_DEPTH {
        return Err(MappingError::at(name, "sequence recursion depth exceeded", byte_offset).into());
    }
    let bound = resolve_bound(name, length_mode, context)?;

    let resume = context.state.sequence.take();
    let (mut index, mut consumed, mut values) = match resume {
        Some(r) => (r.element_index, r.elements_data_offset, r.mapped_values),
        None => (0usize, 0u64, Vec::new()),
    };

    loop {
        let terminator_mode = matches!(bound, Bound::Terminator(_));
        if !terminator_mode {
            let done = match &bound {
                Bound::DataSize(size) => consumed >= *size,
                Bound::Count(n) => index as u64 >= *n,
                Bound::Terminator(_) => unreachable!(),
            };
            if done {
                break;
            }
        }

        let running_offset = byte_offset + consumed;
        let mut subcontext = Context::with_values(context.values.clone());
        subcontext.recursion_depth = context.recursion_depth + 1;

        let decoded = match element_map.map_byte_stream(buffer, running_offset, &mut subcontext) {
            Ok(value) => value,
            Err(DecodeError::TooSmall(small)) => {
                if terminator_mode {
                    let hint = (buffer.len() as u64).saturating_sub(byte_offset);
                    context
                        .state
                        .size_hints
                        .insert(name.to_string(), SizeHint { byte_size: hint, is_complete: false });
                }
                context.state.sequence = Some(SequenceResume {
                    element_index: index,
                    elements_data_offset: consumed,
                    mapped_values: values,
                    subcontext: Some(Box::new(subcontext)),
                });
                context.requested_size = small.accounting.requested;
                return Err(ByteStreamTooSmall::new(name, small.accounting.requested, small.accounting.available).into());
            }
            Err(other) => return Err(other),
        };

        consumed += subcontext.byte_size;
        let reached_terminator = terminator_mode && matches!(&bound, Bound::Terminator(t) if *t == decoded);
        values.push(decoded);
        index += 1;

        if reached_terminator {
            break;
        }
    }

    context.byte_size = consumed;
    context.requested_size = consumed;
    context.state.clear();
    Ok(values)
}

fn size_hint(
    definition: &Definition,
    length_mode: &LengthMode,
    element_type: &Definition,
    context: Option<&Context>,
) -> Option<u64> {
    if let Some(size) = definition.get_byte_size() {
        return Some(size);
    }
    let context = context?;
    if let Ok(bound) = resolve_bound(&definition.name, length_mode, context) {
        match bound {
            Bound::DataSize(size) => return Some(size),
            Bound::Count(n) => {
                if let Some(element_size) = element_type.get_byte_size() {
                    return Some(n * element_size);
                }
            }
            Bound::Terminator(_) => {}
        }
    }
    let hint = context.state.size_hints.get(&definition.name)?;
    let element_size = element_type.get_byte_size().unwrap_or(1);
    Some(hint.byte_size + element_size)
}

/// A fixed or variable run of decoded element values.
#[derive(Debug)]
pub struct SequenceMap {
    pub(crate) definition: Rc<Definition>,
    element_type: Rc<Definition>,
    element_map: Rc<DataTypeMap>,
    length_mode: LengthMode,
}

impl SequenceMap {
    pub(crate) fn new(definition: Rc<Definition>, cache: &mut MapCache) -> Result<Self, FormatError> {
        let d = definition
            .as_element_sequence()
            .ok_or_else(|| FormatError::new(&definition.name, "not an element-sequence definition"))?;
        let element_map = compile_cached(&d.element_type, cache)?;
        let element_type = d.element_type.clone();
        let length_mode = d.length_mode.clone();
        Ok(Self { element_type, element_map, length_mode, definition })
    }

    pub fn get_byte_size(&self) -> Option<u64> {
        self.definition.get_byte_size()
    }

    pub fn get_size_hint(&self, context: Option<&Context>) -> Option<u64> {
        size_hint(&self.definition, &self.length_mode, &self.element_type, context)
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let values = decode_elements(&self.definition.name, &self.element_map, &self.length_mode, buffer, byte_offset, context)?;
        Ok(Value::Sequence(values))
    }

    pub fn fold_byte_stream(&self, value: &Value, context: &mut Context) -> Result<Vec<u8>, EncodeError> {
        let Value::Sequence(elements) = value else {
            return Err(EncodeError::new(&self.definition.name, "expected a sequence value"));
        };
        let mut out = Vec::new();
        let mut members_data_size = context.members_data_size;
        for element in elements {
            let mut subcontext = Context::new();
            subcontext.members_data_size = members_data_size;
            let bytes = self.element_map.fold_byte_stream(element, &mut subcontext)?;
            members_data_size += bytes.len() as u64;
            out.extend(bytes);
        }
        Ok(out)
    }
}

/// A run of non-composite elements, returned as the raw bytes they occupy
/// rather than a tuple of decoded values.
#[derive(Debug)]
pub struct StreamMap {
    pub(crate) definition: Rc<Definition>,
    element_type: Rc<Definition>,
    element_map: Rc<DataTypeMap>,
    length_mode: LengthMode,
}

impl StreamMap {
    pub(crate) fn new(definition: Rc<Definition>, cache: &mut MapCache) -> Result<Self, FormatError> {
        let d = definition
            .as_element_sequence()
            .ok_or_else(|| FormatError::new(&definition.name, "not an element-sequence definition"))?;
        if d.element_type.is_composite() {
            return Err(FormatError::new(&definition.name, "a stream's element type must be non-composite"));
        }
        let element_map = compile_cached(&d.element_type, cache)?;
        let element_type = d.element_type.clone();
        let length_mode = d.length_mode.clone();
        Ok(Self { element_type, element_map, length_mode, definition })
    }

    pub fn get_byte_size(&self) -> Option<u64> {
        self.definition.get_byte_size()
    }

    pub fn get_size_hint(&self, context: Option<&Context>) -> Option<u64> {
        size_hint(&self.definition, &self.length_mode, &self.element_type, context)
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let values = decode_elements(&self.definition.name, &self.element_map, &self.length_mode, buffer, byte_offset, context)?;
        let mut bytes = Vec::new();
        for value in &values {
            bytes.extend(self.element_map.fold_byte_stream(value, &mut Context::new()).map_err(|e| {
                DecodeError::Mapping(MappingError::new(&self.definition.name, e.to_string()))
            })?);
        }
        Ok(Value::Stream(bytes))
    }

    pub fn fold_byte_stream(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        match value {
            Value::Stream(bytes) => Ok(bytes.clone()),
            _ => Err(EncodeError::new(&self.definition.name, "expected a stream value")),
        }
    }
}

/// A stream decoded and re-encoded as text under a declared encoding, with
/// an optional terminator trimmed from the decoded content.
#[derive(Debug)]
pub struct StringMap {
    pub(crate) stream: StreamMap,
    encoding: TextEncoding,
    terminator: Option<Value>,
}

impl StringMap {
    pub(crate) fn new(definition: Rc<Definition>, cache: &mut MapCache) -> Result<Self, FormatError> {
        let d = definition
            .as_element_sequence()
            .ok_or_else(|| FormatError::new(&definition.name, "not an element-sequence definition"))?;
        let encoding = d
            .encoding
            .ok_or_else(|| FormatError::new(&definition.name, "a string node requires an encoding"))?;
        let terminator = match &d.length_mode {
            LengthMode::Terminator(value) => Some(value.clone()),
            _ => None,
        };
        let stream = StreamMap::new(definition, cache)?;
        Ok(Self { stream, encoding, terminator })
    }

    pub fn get_byte_size(&self) -> Option<u64> {
        self.stream.get_byte_size()
    }

    pub fn get_size_hint(&self, context: Option<&Context>) -> Option<u64> {
        self.stream.get_size_hint(context)
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let raw = self.stream.map_byte_stream(buffer, byte_offset, context)?;
        let Value::Stream(mut bytes) = raw else {
            unreachable!("StreamMap::map_byte_stream always returns Value::Stream")
        };
        if let Some(terminator) = &self.terminator {
            if let Ok(term_bytes) = self.stream.element_map.fold_byte_stream(terminator, &mut Context::new()) {
                if !term_bytes.is_empty() && bytes.ends_with(term_bytes.as_slice()) {
                    bytes.truncate(bytes.len() - term_bytes.len());
                }
            }
        }
        let text = decode_text(&self.stream.definition.name, self.encoding, &bytes)?;
        Ok(Value::Text(text))
    }

    pub fn fold_byte_stream(&self, value: &Value) -> Result<Vec<u8>, EncodeError> {
        let Value::Text(text) = value else {
            return Err(EncodeError::new(&self.stream.definition.name, "expected a text value"));
        };
        let mut bytes = encode_text(&self.stream.definition.name, self.encoding, text)?;
        if let Some(terminator) = &self.terminator {
            bytes.extend(self.stream.element_map.fold_byte_stream(terminator, &mut Context::new())?);
        }
        Ok(bytes)
    }
}

fn decode_text(name: &str, encoding: TextEncoding, bytes: &[u8]) -> Result<String, DecodeError> {
    match encoding {
        TextEncoding::Ascii => {
            if !bytes.is_ascii() {
                return Err(MappingError::new(name, "byte stream is not valid ASCII").into());
            }
            Ok(bytes.iter().map(|&b| b as char).collect())
        }
        TextEncoding::Utf8 => {
            String::from_utf8(bytes.to_vec()).map_err(|e| MappingError::new(name, e.to_string()).into())
        }
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            if bytes.len() % 2 != 0 {
                return Err(MappingError::new(name, "UTF-16 byte stream has an odd length").into());
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| match encoding {
                    TextEncoding::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                    _ => u16::from_be_bytes([pair[0], pair[1]]),
                })
                .collect();
            String::from_utf16(&units).map_err(|e| MappingError::new(name, e.to_string()).into())
        }
    }
}

fn encode_text(name: &str, encoding: TextEncoding, text: &str) -> Result<Vec<u8>, EncodeError> {
    match encoding {
        TextEncoding::Ascii => {
            if !text.is_ascii() {
                return Err(EncodeError::new(name, "text is not valid ASCII"));
            }
            Ok(text.as_bytes().to_vec())
        }
        TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            let mut bytes = Vec::with_capacity(text.len() * 2);
            for unit in text.encode_utf16() {
                match encoding {
                    TextEncoding::Utf16Le => bytes.extend(unit.to_le_bytes()),
                    _ => bytes.extend(unit.to_be_bytes()),
                }
            }
            Ok(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{ByteOrder, Definition, DefinitionKind, ElementSequenceDefinition, IntegerDefinition, IntegerFormat};
    use crate::map::compile;

    fn int32le() -> Rc<Definition> {
        Rc::new(
            Definition::new(
                "int32le",
                DefinitionKind::Integer(IntegerDefinition {
                    byte_order: ByteOrder::Little,
                    size: 4,
                    format: IntegerFormat::Signed,
                    minimum_value: None,
                    maximum_value: None,
                }),
            )
            .unwrap(),
        )
    }

    #[test]
    fn fixed_count_sequence_decodes_in_order() {
        let element = int32le();
        let definition = Rc::new(
            Definition::new(
                "vector4",
                DefinitionKind::Sequence(ElementSequenceDefinition {
                    element_type: element,
                    length_mode: LengthMode::NumberOfElements { literal: Some(4), expression: None },
                    encoding: None,
                }),
            )
            .unwrap(),
        );
        let map = compile(&definition).unwrap();
        let input = [1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0];
        let mut context = Context::new();
        let value = map.map_byte_stream(&input, 0, &mut context).unwrap();
        assert_eq!(
            value,
            Value::Sequence(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3), Value::Integer(4)])
        );
        assert_eq!(context.byte_size, 16);
    }

    #[test]
    fn short_buffer_raises_too_small_and_resumes() {
        let element = int32le();
        let definition = Rc::new(
            Definition::new(
                "vector4",
                DefinitionKind::Sequence(ElementSequenceDefinition {
                    element_type: element,
                    length_mode: LengthMode::NumberOfElements { literal: Some(4), expression: None },
                    encoding: None,
                }),
            )
            .unwrap(),
        );
        let map = compile(&definition).unwrap();
        let full = [1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, 0, 0, 0];
        let mut context = Context::new();
        for len in [4, 8, 12] {
            let err = map.map_byte_stream(&full[..len], 0, &mut context).unwrap_err();
            assert!(matches!(err, DecodeError::TooSmall(_)));
        }
        let value = map.map_byte_stream(&full, 0, &mut context).unwrap();
        assert_eq!(
            value,
            Value::Sequence(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3), Value::Integer(4)])
        );
        assert_eq!(context.byte_size, 16);
    }

    #[test]
    fn string_decodes_utf16le_to_text() {
        let byte_def = Rc::new(
            Definition::new(
                "uint8",
                DefinitionKind::Integer(IntegerDefinition {
                    byte_order: ByteOrder::Native,
                    size: 1,
                    format: IntegerFormat::Unsigned,
                    minimum_value: None,
                    maximum_value: None,
                }),
            )
            .unwrap(),
        );
        let definition = Rc::new(
            Definition::new(
                "text",
                DefinitionKind::String(ElementSequenceDefinition {
                    element_type: byte_def,
                    length_mode: LengthMode::DataSize { literal: Some(16), expression: None },
                    encoding: Some(TextEncoding::Utf16Le),
                }),
            )
            .unwrap(),
        );
        let map = compile(&definition).unwrap();
        let mut bytes = Vec::new();
        for unit in "dtFabric".encode_utf16() {
            bytes.extend(unit.to_le_bytes());
        }
        let mut context = Context::new();
        let value = map.map_byte_stream(&bytes, 0, &mut context).unwrap();
        assert_eq!(value, Value::Text("dtFabric".to_string()));
    }
}
