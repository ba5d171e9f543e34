//! The map compiler and the compiled map tree it produces.
//!
//! [`compile`] walks a [`Definition`] tree once and produces a [`DataTypeMap`]
//! specialised to it. From then on the map tree, the definition tree, and
//! any member-map cache used while compiling are all read-only; the only
//! thing that changes on the decode hot path is the [`Context`] passed in.

mod layout;
mod primitive;
mod sequence;
mod structure;

use std::collections::HashMap;
use std::rc::Rc;

use dtfabric_support::{ByteStreamTooSmall, EncodeError, FormatError, MappingError};

use crate::context::Context;
use crate::definitions::{Definition, DefinitionKind};
use crate::value::Value;

pub use layout::{EnumerationMap, InertMap, StructureGroupMap};
pub use primitive::{BooleanMap, CharacterMap, FloatMap, IntegerMap, PaddingMap, UuidMap};
pub use sequence::{SequenceMap, StreamMap, StringMap};
pub use structure::{StructureMap, UnionMap};

/// The error a decode call can fail with: either a terminal mapping
/// failure, or a request for more bytes that a cooperative caller is
/// expected to catch and retry past.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    TooSmall(#[from] ByteStreamTooSmall),
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// The compiled counterpart of a [`Definition`]. One variant per storage,
/// semantic, or layout kind in the definition model.
#[derive(Debug)]
pub enum DataTypeMap {
    Boolean(BooleanMap),
    Character(CharacterMap),
    Integer(IntegerMap),
    FloatingPoint(FloatMap),
    Uuid(UuidMap),
    Padding(PaddingMap),
    Sequence(SequenceMap),
    Stream(StreamMap),
    String(StringMap),
    Structure(StructureMap),
    Union(UnionMap),
    Constant(InertMap),
    Enumeration(EnumerationMap),
    Format(InertMap),
    StructureFamily(InertMap),
    StructureGroup(StructureGroupMap),
}

impl DataTypeMap {
    pub fn name(&self) -> &str {
        match self {
            DataTypeMap::Boolean(m) => &m.definition.name,
            DataTypeMap::Character(m) => &m.definition.name,
            DataTypeMap::Integer(m) => &m.definition.name,
            DataTypeMap::FloatingPoint(m) => &m.definition.name,
            DataTypeMap::Uuid(m) => &m.definition.name,
            DataTypeMap::Padding(m) => &m.definition.name,
            DataTypeMap::Sequence(m) => &m.definition.name,
            DataTypeMap::Stream(m) => &m.definition.name,
            DataTypeMap::String(m) => &m.stream.definition.name,
            DataTypeMap::Structure(m) => &m.definition.name,
            DataTypeMap::Union(m) => &m.definition.name,

            DataTypeMap::Constant(m) => &m.definition.name,
            DataTypeMap::Enumeration(m) => &m.definition.name,
            DataTypeMap::Format(m) => &m.definition.name,
            DataTypeMap::StructureFamily(m) => &m.definition.name,
            DataTypeMap::StructureGroup(m) => &m.definition.name,
        }
    }

    pub fn get_byte_size(&self) -> Option<u64> {
        match self {
            DataTypeMap::Boolean(m) => m.definition.get_byte_size(),
            DataTypeMap::Character(m) => m.definition.get_byte_size(),
            DataTypeMap::Integer(m) => m.definition.get_byte_size(),
            DataTypeMap::FloatingPoint(m) => m.definition.get_byte_size(),
            DataTypeMap::Uuid(m) => m.definition.get_byte_size(),
            DataTypeMap::Padding(_) => None,
            DataTypeMap::Sequence(m) => m.get_byte_size(),
            DataTypeMap::Stream(m) => m.get_byte_size(),
            DataTypeMap::String(m) => m.get_byte_size(),
            DataTypeMap::Structure(m) => m.get_byte_size(),
            DataTypeMap::Union(m) => m.get_byte_size(),
            DataTypeMap::Constant(_) | DataTypeMap::Enumeration(_) => None,
            DataTypeMap::Format(_) | DataTypeMap::StructureFamily(_) => None,
            DataTypeMap::StructureGroup(_) => None,
        }
    }

    pub fn get_size_hint(&self, context: Option<&Context>) -> Option<u64> {
        if let Some(size) = self.get_byte_size() {
            return Some(size);
        }
        match self {
            DataTypeMap::Sequence(m) => m.get_size_hint(context),
            DataTypeMap::Stream(m) => m.get_size_hint(context),
            DataTypeMap::String(m) => m.get_size_hint(context),
            DataTypeMap::Structure(m) => m.get_size_hint(context),
            DataTypeMap::Union(m) => m.get_size_hint(context),
            DataTypeMap::StructureGroup(m) => m.get_size_hint(context),
            _ => None,
        }
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        match self {
            DataTypeMap::Boolean(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::Character(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::Integer(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::FloatingPoint(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::Uuid(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::Padding(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::Sequence(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::Stream(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::String(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::Structure(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::Union(m) => m.map_byte_stream(buffer, byte_offset, context),
            DataTypeMap::Constant(m) | DataTypeMap::Format(m) | DataTypeMap::StructureFamily(m) => {
                Err(MappingError::new(&m.definition.name, "semantic/layout types cannot be decoded").into())
            }
            DataTypeMap::Enumeration(m) => {
                Err(MappingError::new(&m.definition.name, "enumeration types cannot be decoded").into())
            }
            DataTypeMap::StructureGroup(m) => m.map_byte_stream(buffer, byte_offset, context),
        }
    }

    pub fn fold_byte_stream(&self, value: &Value, context: &mut Context) -> Result<Vec<u8>, EncodeError> {
        match self {
            DataTypeMap::Boolean(m) => m.fold_byte_stream(value),
            DataTypeMap::Character(m) => m.fold_byte_stream(value),
            DataTypeMap::Integer(m) => m.fold_byte_stream(value),
            DataTypeMap::FloatingPoint(m) => m.fold_byte_stream(value),
            DataTypeMap::Uuid(m) => m.fold_byte_stream(value),
            DataTypeMap::Padding(m) => m.fold_byte_stream(value),
            DataTypeMap::Sequence(m) => m.fold_byte_stream(value, context),
            DataTypeMap::Stream(m) => m.fold_byte_stream(value),
            DataTypeMap::String(m) => m.fold_byte_stream(value),
            DataTypeMap::Structure(m) => m.fold_byte_stream(value, context),
            DataTypeMap::Union(m) => m.fold_byte_stream(value, context),
            DataTypeMap::Constant(m) | DataTypeMap::Format(m) | DataTypeMap::StructureFamily(m) => {
                Err(EncodeError::new(&m.definition.name, "semantic/layout types cannot be encoded"))
            }
            DataTypeMap::Enumeration(m) => {
                Err(EncodeError::new(&m.definition.name, "enumeration types cannot be encoded"))
            }
            DataTypeMap::StructureGroup(m) => m.fold_byte_stream(value, context),
        }
    }

    pub fn as_structure(&self) -> Option<&StructureMap> {
        match self {
            DataTypeMap::Structure(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_union(&self) -> Option<&UnionMap> {
        match self {
            DataTypeMap::Union(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_enumeration(&self) -> Option<&EnumerationMap> {
        match self {
            DataTypeMap::Enumeration(m) => Some(m),
            _ => None,
        }
    }
}

/// Caches leaf maps by member name within one structure compile, so an
/// identical member definition referenced twice doesn't get recompiled.
pub(crate) type MapCache = HashMap<String, Rc<DataTypeMap>>;

/// Compiles a definition tree into a map tree. This is the map compiler of
/// the design: the only place that decides linear vs. composite, resolves
/// element types, and validates structure-group disjointness (already done
/// at definition-construction time, but re-checked here defensively).
pub fn compile(definition: &Rc<Definition>) -> Result<Rc<DataTypeMap>, FormatError> {
    let mut cache = MapCache::new();
    compile_cached(definition, &mut cache)
}

pub(crate) fn compile_cached(
    definition: &Rc<Definition>,
    cache: &mut MapCache,
) -> Result<Rc<DataTypeMap>, FormatError> {
    if let Some(existing) = cache.get(&definition.name) {
        return Ok(existing.clone());
    }
    let map = Rc::new(compile_uncached(definition, cache)?);
    cache.insert(definition.name.clone(), map.clone());
    Ok(map)
}

fn compile_uncached(definition: &Rc<Definition>, cache: &mut MapCache) -> Result<DataTypeMap, FormatError> {
    log::trace!("compiling `{}` ({})", definition.name, definition.type_indicator());
    let map = match &definition.kind {
        DefinitionKind::Boolean(_) => DataTypeMap::Boolean(primitive::BooleanMap::new(definition.clone())?),
        DefinitionKind::Character(_) => DataTypeMap::Character(primitive::CharacterMap::new(definition.clone())),
        DefinitionKind::Integer(_) => DataTypeMap::Integer(primitive::IntegerMap::new(definition.clone())),
        DefinitionKind::FloatingPoint(_) => {
            DataTypeMap::FloatingPoint(primitive::FloatMap::new(definition.clone()))
        }
        DefinitionKind::Uuid(_) => DataTypeMap::Uuid(primitive::UuidMap::new(definition.clone())),
        DefinitionKind::Padding(_) => DataTypeMap::Padding(primitive::PaddingMap::new(definition.clone())),
        DefinitionKind::Sequence(_) => DataTypeMap::Sequence(sequence::SequenceMap::new(definition.clone(), cache)?),
        DefinitionKind::Stream(_) => DataTypeMap::Stream(sequence::StreamMap::new(definition.clone(), cache)?),
        DefinitionKind::String(_) => DataTypeMap::String(sequence::StringMap::new(definition.clone(), cache)?),
        DefinitionKind::Structure(_) => {
            DataTypeMap::Structure(structure::StructureMap::new(definition.clone(), cache)?)
        }
        DefinitionKind::Union(_) => DataTypeMap::Union(structure::UnionMap::new(definition.clone(), cache)?),
        DefinitionKind::Constant(_) => DataTypeMap::Constant(layout::InertMap::new(definition.clone())),
        DefinitionKind::Enumeration(_) => DataTypeMap::Enumeration(layout::EnumerationMap::new(definition.clone())),
        DefinitionKind::Format(_) => DataTypeMap::Format(layout::InertMap::new(definition.clone())),
        DefinitionKind::StructureFamily(_) => {
            DataTypeMap::StructureFamily(layout::InertMap::new(definition.clone()))
        }
        DefinitionKind::StructureGroup(_) => {
            DataTypeMap::StructureGroup(layout::StructureGroupMap::new(definition.clone(), cache)?)
        }
    };
    Ok(map)
}
