//! The structure (and union) map: ordered member composition with a linear
//! fast path and a composite fallback.

use std::rc::Rc;

use dtfabric_support::{ByteStreamTooSmall, EncodeError, FormatError, MappingError};

use crate::byte_ops::{ByteOperation, PrimitiveValue};
use crate::context::{Context, StructureResume};
use crate::definitions::{
    BooleanDefinition, ByteOrder, CharacterDefinition, Definition, DefinitionKind,
    FloatingPointDefinition, IntegerDefinition, Member, UuidDefinition,
};
use crate::expr::Expr;
use crate::map::{compile_cached, DataTypeMap, DecodeError, MapCache};
use crate::value::{name_table, NameTable, StructureValue, Value};

struct CompiledMember {
    name: String,
    map: Rc<DataTypeMap>,
    condition: Option<Expr>,
    values: Option<Vec<Value>>,
    is_padding: bool,
}

#[derive(Debug)]
pub struct StructureMap {
    pub(crate) definition: Rc<Definition>,
    type_name: Rc<str>,
    names: NameTable,
    members: Vec<CompiledMember>,
    /// `Some` when every member is non-composite and byte-order compatible:
    /// the whole record decodes in a single packed read.
    linear_operation: Option<ByteOperation>,
}

impl std::fmt::Debug for CompiledMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledMember").field("name", &self.name).finish()
    }
}

impl StructureMap {
    pub(crate) fn new(definition: Rc<Definition>, cache: &mut MapCache) -> Result<Self, FormatError> {
        let members = match &definition.kind {
            DefinitionKind::Structure(d) => &d.members,
            DefinitionKind::Union(d) => &d.members,
            _ => unreachable!("StructureMap built from a non-structure/union definition"),
        };
        let structure_order = match &definition.kind {
            DefinitionKind::Structure(d) => d.byte_order,
            DefinitionKind::Union(d) => d.byte_order,
            _ => unreachable!(),
        };

        let mut compiled = Vec::with_capacity(members.len());
        let mut has_padding = false;
        for member in members {
            let resolved_def = resolve_member_definition(&definition.name, member, structure_order);
            let map = compile_cached(&resolved_def, cache)?;
            let is_padding = resolved_def.as_padding().is_some();
            has_padding |= is_padding;
            compiled.push(CompiledMember {
                name: member.name.clone(),
                map,
                condition: member.condition.clone(),
                values: member.values.clone(),
                is_padding,
            });
        }

        let is_composite = definition.is_composite() || has_padding;
        let linear_operation = if is_composite {
            None
        } else {
            build_linear_operation(structure_order, &compiled)
        };

        log::debug!(
            "`{}` compiled as a {} structure ({} members)",
            definition.name,
            if linear_operation.is_some() { "linear" } else { "composite" },
            compiled.len()
        );
        let names = name_table(compiled.iter().map(|m| m.name.as_str()));
        Ok(Self {
            type_name: Rc::from(definition.name.as_str()),
            names,
            members: compiled,
            linear_operation,
            definition,
        })
    }

    pub fn get_byte_size(&self) -> Option<u64> {
        self.definition.get_byte_size()
    }

    pub fn get_size_hint(&self, context: Option<&Context>) -> Option<u64> {
        if let Some(size) = self.get_byte_size() {
            return Some(size);
        }
        let (mut total, start_index, subcontext) = match context.and_then(|c| c.state.structure.as_ref()) {
            Some(resume) => (0u64, resume.attribute_index, resume.subcontext.as_deref()),
            None => (0u64, 0usize, None),
        };
        for member in &self.members[start_index..] {
            match member.map.get_size_hint(subcontext) {
                Some(size) => total += size,
                None => return Some(total),
            }
        }
        Some(total)
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        if let Some(operation) = &self.linear_operation {
            self.map_linear(operation, buffer, byte_offset, context)
        } else {
            self.map_composite(buffer, byte_offset, context)
        }
    }

    fn map_linear(
        &self,
        operation: &ByteOperation,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let slice = &buffer[byte_offset as usize..];
        let raw = operation.read_from(slice).map_err(|e| match e {
            crate::byte_ops::ReadError::TooSmall { requested, available } => {
                ByteStreamTooSmall::new(&self.definition.name, byte_offset + requested, byte_offset + available).into()
            }
            crate::byte_ops::ReadError::Malformed(message) => {
                DecodeError::from(MappingError::at(&self.definition.name, message, byte_offset))
            }
        })?;
        let mut values = Vec::with_capacity(self.members.len());
        for (member, primitive) in self.members.iter().zip(raw) {
            let value = primitive_to_member_value(member, primitive, byte_offset)?;
            values.push(Some(value));
        }
        context.byte_size = operation.byte_size();
        context.requested_size = context.byte_size;
        Ok(Value::Structure(StructureValue::new(
            self.type_name.clone(),
            self.names.clone(),
            values,
        )))
    }

    fn map_composite(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let resume = context.state.structure.take();
        let (start_index, mut values) = match resume {
            Some(r) => (r.attribute_index, r.mapped_values),
            None => (0, Vec::with_capacity(self.members.len())),
        };

        // `members_data_size` already reflects everything decoded before a
        // prior `ByteStreamTooSmall`, so a resumed call picks the offset up
        // from there rather than re-walking earlier members.
        let mut members_data_size = context.members_data_size;
        let mut running_offset = byte_offset + members_data_size;

        for index in start_index..self.members.len() {
            let member = &self.members[index];

            let partial = StructureValue::new(self.type_name.clone(), self.names.clone(), values.clone());
            let partial_value = Value::Structure(partial);
            let mut namespace = context.namespace(Some((self.type_name.as_ref(), &partial_value)));
            // Expose every member decoded so far under its own bare name too,
            // not just through the `this_type.member` partial-structure path -
            // conditions and size expressions reference members directly.
            for (name, slot) in self.names.iter().zip(values.iter()) {
                if let Some(value) = slot {
                    namespace.insert(name.to_string(), value.clone());
                }
            }

            if let Some(condition) = &member.condition {
                let passed = condition
                    .eval(&namespace)
                    .map_err(DecodeError::from)?
                    .as_bool()
                    .ok_or_else(|| MappingError::at(&member.name, "condition did not evaluate to a boolean", running_offset))?;
                if !passed {
                    values.push(None);
                    continue;
                }
            }

            let mut subcontext = Context::with_values(namespace);
            subcontext.members_data_size = members_data_size;
            subcontext.recursion_depth = context.recursion_depth;

            let decoded = match member.map.map_byte_stream(buffer, running_offset, &mut subcontext) {
                Ok(value) => value,
                Err(DecodeError::TooSmall(small)) => {
                    context.state.structure = Some(StructureResume {
                        attribute_index: index,
                        mapped_values: values,
                        subcontext: Some(Box::new(subcontext)),
                    });
                    context.members_data_size = members_data_size;
                    // Offsets the child map reports are already absolute
                    // within the shared buffer, so they carry straight
                    // through as the structure's own aggregated request.
                    context.requested_size = small.accounting.requested;
                    return Err(ByteStreamTooSmall::new(
                        &self.definition.name,
                        small.accounting.requested,
                        small.accounting.available,
                    )
                    .into());
                }
                Err(other) => return Err(other),
            };

            if let Some(allow) = &member.values {
                if !allow.contains(&decoded) {
                    return Err(MappingError::at(
                        &member.name,
                        "decoded value is not in the allowed set",
                        running_offset,
                    )
                    .into());
                }
            }

            running_offset += subcontext.byte_size;
            members_data_size += subcontext.byte_size;
            values.push(Some(decoded));
        }

        context.byte_size = members_data_size;
        context.requested_size = context.byte_size;
        context.members_data_size = members_data_size;
        context.state.clear();
        Ok(Value::Structure(StructureValue::new(self.type_name.clone(), self.names.clone(), values)))
    }

    pub fn fold_byte_stream(&self, value: &Value, context: &mut Context) -> Result<Vec<u8>, EncodeError> {
        let Value::Structure(structure) = value else {
            return Err(EncodeError::new(&self.definition.name, "expected a structure value"));
        };
        if let Some(operation) = &self.linear_operation {
            let mut primitives = Vec::with_capacity(self.members.len());
            for (member, slot) in self.members.iter().zip(structure.values()) {
                let decoded = slot
                    .as_ref()
                    .ok_or_else(|| EncodeError::new(&member.name, "linear structure is missing a value"))?;
                primitives.push(member_value_to_primitive(member, decoded)?);
            }
            operation
                .write_to(&primitives)
                .map_err(|e| EncodeError::new(&self.definition.name, e.to_string()))
        } else {
            let mut out = Vec::new();
            let mut members_data_size = 0u64;
            for (index, member) in self.members.iter().enumerate() {
                let Some(decoded) = structure.get_by_index(index) else {
                    continue;
                };
                let mut subcontext = Context::new();
                subcontext.members_data_size = members_data_size;
                let bytes = member.map.fold_byte_stream(decoded, &mut subcontext)?;
                members_data_size += bytes.len() as u64;
                out.extend(bytes);
            }
            Ok(out)
        }
    }

    pub fn create_structure_values(&self, named: Vec<(&str, Value)>) -> Result<Value, EncodeError> {
        let mut values = Vec::with_capacity(self.names.len());
        for name in self.names.iter() {
            let value = named
                .iter()
                .find(|(n, _)| *n == name.as_ref())
                .map(|(_, v)| v.clone())
                .ok_or_else(|| EncodeError::new(&self.definition.name, format!("missing value for `{name}`")))?;
            values.push(Some(value));
        }
        Ok(Value::Structure(StructureValue::new(self.type_name.clone(), self.names.clone(), values)))
    }
}

/// A union decodes every member from the same starting offset and returns
/// every interpretation that succeeded, tagged by member name - the source
/// specifies union sizing (max member size) but never implements a decode
/// strategy, so this is the chosen default (see the design ledger).
#[derive(Debug)]
pub struct UnionMap {
    pub(crate) definition: Rc<Definition>,
    members: Vec<CompiledMember>,
}

impl UnionMap {
    pub(crate) fn new(definition: Rc<Definition>, cache: &mut MapCache) -> Result<Self, FormatError> {
        let DefinitionKind::Union(d) = &definition.kind else {
            unreachable!("UnionMap built from a non-union definition")
        };
        let mut members = Vec::with_capacity(d.members.len());
        for member in &d.members {
            let resolved = resolve_member_definition(&definition.name, member, d.byte_order);
            let map = compile_cached(&resolved, cache)?;
            let is_padding = resolved.as_padding().is_some();
            members.push(CompiledMember {
                name: member.name.clone(),
                map,
                condition: member.condition.clone(),
                values: member.values.clone(),
                is_padding,
            });
        }
        Ok(Self { definition, members })
    }

    pub fn get_byte_size(&self) -> Option<u64> {
        self.definition.get_byte_size()
    }

    pub fn get_size_hint(&self, _context: Option<&Context>) -> Option<u64> {
        self.get_byte_size()
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        let mut interpretations = Vec::new();
        let mut consumed = 0u64;
        let mut smallest: Option<(u64, u64)> = None;
        for member in &self.members {
            if member.is_padding {
                continue;
            }
            let mut subcontext = Context::with_values(context.values.clone());
            subcontext.recursion_depth = context.recursion_depth;
            match member.map.map_byte_stream(buffer, byte_offset, &mut subcontext) {
                Ok(value) => {
                    consumed = consumed.max(subcontext.byte_size);
                    interpretations.push((member.name.clone(), value));
                }
                Err(DecodeError::TooSmall(small)) => {
                    let candidate = (small.accounting.requested, small.accounting.available);
                    smallest = Some(match smallest {
                        Some(existing) if existing.0 <= candidate.0 => existing,
                        _ => candidate,
                    });
                }
                Err(DecodeError::Mapping(_)) => {}
            }
        }
        if interpretations.is_empty() {
            if let Some((requested, available)) = smallest {
                return Err(ByteStreamTooSmall::new(&self.definition.name, requested, available).into());
            }
            return Err(MappingError::at(
                &self.definition.name,
                "no union member decoded successfully",
                byte_offset,
            )
            .into());
        }
        context.byte_size = self.get_byte_size().unwrap_or(consumed);
        context.requested_size = context.byte_size;
        Ok(Value::Union(interpretations))
    }

    pub fn fold_byte_stream(&self, value: &Value, context: &mut Context) -> Result<Vec<u8>, EncodeError> {
        let Value::Union(interpretations) = value else {
            return Err(EncodeError::new(&self.definition.name, "expected a union value"));
        };
        let (selected_name, selected_value) = interpretations
            .first()
            .ok_or_else(|| EncodeError::new(&self.definition.name, "union value has no interpretation to encode"))?;
        let member = self
            .members
            .iter()
            .find(|m| &m.name == selected_name)
            .ok_or_else(|| EncodeError::new(&self.definition.name, format!("unknown union member `{selected_name}`")))?;
        member.map.fold_byte_stream(selected_value, context)
    }
}

fn primitive_to_member_value(
    member: &CompiledMember,
    primitive: PrimitiveValue,
    byte_offset: u64,
) -> Result<Value, DecodeError> {
    let value = match &*member.map {
        DataTypeMap::Boolean(_) => Value::Boolean(primitive.as_i64() != 0),
        DataTypeMap::Character(m) => {
            let scalar = primitive.as_i64();
            let c = u32::try_from(scalar)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| MappingError::at(&m.definition.name, format!("{scalar} is not a valid scalar value"), byte_offset))?;
            Value::Character(c)
        }
        DataTypeMap::Integer(_) => Value::Integer(primitive.as_i64()),
        DataTypeMap::FloatingPoint(_) => Value::Float(primitive.as_f64()),
        _ => unreachable!("linear members are always primitive"),
    };
    if let Some(allow) = &member.values {
        if !allow.contains(&value) {
            return Err(MappingError::at(&member.name, "decoded value is not in the allowed set", byte_offset).into());
        }
    }
    Ok(value)
}

fn member_value_to_primitive(member: &CompiledMember, value: &Value) -> Result<PrimitiveValue, EncodeError> {
    match &*member.map {
        DataTypeMap::Boolean(_) => Ok(PrimitiveValue::U32(value.as_bool().unwrap_or(false) as u32)),
        DataTypeMap::Character(_) => {
            let Value::Character(c) = value else {
                return Err(EncodeError::new(&member.name, "expected a character value"));
            };
            Ok(PrimitiveValue::I32(*c as i32))
        }
        DataTypeMap::Integer(_) => {
            let raw = value
                .as_integer()
                .ok_or_else(|| EncodeError::new(&member.name, "expected an integer value"))?;
            Ok(PrimitiveValue::I64(raw))
        }
        DataTypeMap::FloatingPoint(_) => {
            let Value::Float(f) = value else {
                return Err(EncodeError::new(&member.name, "expected a floating-point value"));
            };
            Ok(PrimitiveValue::F64(*f))
        }
        _ => Err(EncodeError::new(&member.name, "non-primitive member in a linear structure")),
    }
}

fn resolve_member_definition(
    structure_name: &str,
    member: &Member,
    structure_order: Option<ByteOrder>,
) -> Rc<Definition> {
    let Some(order) = structure_order else {
        return member.data_type.clone();
    };
    if order == ByteOrder::Native {
        return member.data_type.clone();
    }
    if !matches!(member.data_type.byte_order(), Some(ByteOrder::Native)) {
        return member.data_type.clone();
    }
    let new_name = format!("_{structure_name}_{}", member.name);
    let kind = match &member.data_type.kind {
        DefinitionKind::Boolean(d) => DefinitionKind::Boolean(BooleanDefinition { byte_order: order, ..d.clone() }),
        DefinitionKind::Character(d) => DefinitionKind::Character(CharacterDefinition { byte_order: order, ..d.clone() }),
        DefinitionKind::Integer(d) => DefinitionKind::Integer(IntegerDefinition { byte_order: order, ..d.clone() }),
        DefinitionKind::FloatingPoint(d) => {
            DefinitionKind::FloatingPoint(FloatingPointDefinition { byte_order: order, ..d.clone() })
        }
        DefinitionKind::Uuid(_) => DefinitionKind::Uuid(UuidDefinition { byte_order: order }),
        other => other.clone(),
    };
    Rc::new(Definition::new_unchecked(new_name, kind))
}

/// Builds the single packed operation for a structure whose members are all
/// non-composite, non-padding, and byte-order compatible. Returns `None`
/// (forcing the composite path) when byte orders disagree in a way no
/// single format descriptor can express.
fn build_linear_operation(
    structure_order: Option<ByteOrder>,
    members: &[CompiledMember],
) -> Option<ByteOperation> {
    let mut effective_order = structure_order.filter(|o| *o != ByteOrder::Native);
    for member in members {
        let order = match &*member.map {
            DataTypeMap::Boolean(m) => m.definition.byte_order(),
            DataTypeMap::Character(m) => m.definition.byte_order(),
            DataTypeMap::Integer(m) => m.definition.byte_order(),
            DataTypeMap::FloatingPoint(m) => m.definition.byte_order(),
            _ => return None,
        };
        match order {
            Some(ByteOrder::Native) | None => {}
            Some(order) => match effective_order {
                None => effective_order = Some(order),
                Some(existing) if existing == order => {}
                Some(_) => return None,
            },
        }
    }
    let order = effective_order.unwrap_or(ByteOrder::Native);
    let mut codes = Vec::with_capacity(members.len());
    for member in members {
        let code = match &*member.map {
            DataTypeMap::Boolean(m) => match m.definition.get_byte_size()? {
                1 => crate::byte_ops::PrimitiveCode::U8,
                2 => crate::byte_ops::PrimitiveCode::U16,
                4 => crate::byte_ops::PrimitiveCode::U32,
                _ => return None,
            },
            DataTypeMap::Character(m) => match m.definition.get_byte_size()? {
                1 => crate::byte_ops::PrimitiveCode::I8,
                2 => crate::byte_ops::PrimitiveCode::I16,
                _ => crate::byte_ops::PrimitiveCode::I32,
            },
            DataTypeMap::Integer(m) => integer_code(m),
            DataTypeMap::FloatingPoint(m) => {
                if m.definition.get_byte_size()? == 8 {
                    crate::byte_ops::PrimitiveCode::F64
                } else {
                    crate::byte_ops::PrimitiveCode::F32
                }
            }
            _ => return None,
        };
        codes.push(code);
    }
    Some(ByteOperation::new(order, codes))
}

fn integer_code(m: &crate::map::IntegerMap) -> crate::byte_ops::PrimitiveCode {
    use crate::byte_ops::PrimitiveCode;
    let DefinitionKind::Integer(inner) = &m.definition.kind else {
        unreachable!()
    };
    match (inner.size, inner.format) {
        (1, crate::definitions::IntegerFormat::Signed) => PrimitiveCode::I8,
        (1, crate::definitions::IntegerFormat::Unsigned) => PrimitiveCode::U8,
        (2, crate::definitions::IntegerFormat::Signed) => PrimitiveCode::I16,
        (2, crate::definitions::IntegerFormat::Unsigned) => PrimitiveCode::U16,
        (4, crate::definitions::IntegerFormat::Signed) => PrimitiveCode::I32,
        (4, crate::definitions::IntegerFormat::Unsigned) => PrimitiveCode::U32,
        (8, crate::definitions::IntegerFormat::Signed) => PrimitiveCode::I64,
        (8, crate::definitions::IntegerFormat::Unsigned) => PrimitiveCode::U64,
        _ => PrimitiveCode::I32,
    }
}
