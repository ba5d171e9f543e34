//! Layout maps: structure-group dispatch, enumerations, and the inert
//! semantic kinds (constant, format, structure-family) that anchor
//! documentation but never touch a byte stream.

use std::collections::HashMap;
use std::rc::Rc;

use dtfabric_support::{EncodeError, FormatError, MappingError};

use crate::context::Context;
use crate::definitions::{Definition, DefinitionKind};
use crate::map::{compile_cached, DataTypeMap, DecodeError, MapCache};
use crate::value::Value;

/// Shared body of `constant`, `format`, and `structure-family`: none of
/// them map onto a byte stream, they only exist to be looked up by name.
#[derive(Debug)]
pub struct InertMap {
    pub(crate) definition: Rc<Definition>,
}

impl InertMap {
    pub(crate) fn new(definition: Rc<Definition>) -> Self {
        Self { definition }
    }
}

#[derive(Debug)]
pub struct EnumerationMap {
    pub(crate) definition: Rc<Definition>,
}

impl EnumerationMap {
    pub(crate) fn new(definition: Rc<Definition>) -> Self {
        Self { definition }
    }

    pub fn name_for(&self, number: i64) -> Option<&str> {
        let DefinitionKind::Enumeration(d) = &self.definition.kind else {
            unreachable!("EnumerationMap built from a non-enumeration definition")
        };
        d.values.iter().find(|v| v.number == number).map(|v| v.name.as_str())
    }
}

/// Dispatches to one of several structure variants by a discriminator
/// member read off a structural pre-read of the base structure. The base
/// decode and the eventual variant decode share the same starting offset;
/// the base read is purely a peek at the tag.
#[derive(Debug)]
pub struct StructureGroupMap {
    pub(crate) definition: Rc<Definition>,
    base: Rc<DataTypeMap>,
    identifier: String,
    by_value: HashMap<Value, Rc<DataTypeMap>>,
    by_name: HashMap<String, Rc<DataTypeMap>>,
}

impl StructureGroupMap {
    pub(crate) fn new(definition: Rc<Definition>, cache: &mut MapCache) -> Result<Self, FormatError> {
        let DefinitionKind::StructureGroup(d) = &definition.kind else {
            unreachable!("StructureGroupMap built from a non-structure-group definition")
        };
        let base = compile_cached(&d.base, cache)?;
        let mut by_value = HashMap::new();
        let mut by_name = HashMap::new();
        for variant in &d.variants {
            let variant_map = compile_cached(variant, cache)?;
            let structure = variant
                .as_structure()
                .ok_or_else(|| FormatError::new(&d.identifier, "structure-group variant must be a structure"))?;
            let member = structure.member(&d.identifier).ok_or_else(|| {
                FormatError::new(
                    &d.identifier,
                    format!("variant is missing discriminator member `{}`", d.identifier),
                )
            })?;
            let values = member
                .values
                .as_ref()
                .ok_or_else(|| FormatError::new(&d.identifier, "discriminator member must declare a `values` set"))?;
            for value in values {
                by_value.insert(value.clone(), variant_map.clone());
            }
            by_name.insert(variant.name.clone(), variant_map);
        }
        Ok(Self {
            identifier: d.identifier.clone(),
            base,
            by_value,
            by_name,
            definition,
        })
    }

    pub fn get_size_hint(&self, context: Option<&Context>) -> Option<u64> {
        if let Some(ctx) = context {
            if let Some(discriminator) = &ctx.state.member_identifier {
                if let Some(variant) = self.by_value.get(discriminator) {
                    return variant.get_size_hint(context);
                }
            }
        }
        self.base.get_size_hint(context)
    }

    pub fn map_byte_stream(
        &self,
        buffer: &[u8],
        byte_offset: u64,
        context: &mut Context,
    ) -> Result<Value, DecodeError> {
        if context.state.member_identifier.is_none() {
            let mut base_context = Context::with_values(context.values.clone());
            base_context.recursion_depth = context.recursion_depth;
            let base_value = self.base.map_byte_stream(buffer, byte_offset, &mut base_context)?;
            let structure = base_value.as_structure().ok_or_else(|| {
                MappingError::new(&self.definition.name, "base decode did not produce a structure")
            })?;
            let discriminator = structure.get(&self.identifier).cloned().ok_or_else(|| {
                MappingError::new(
                    &self.definition.name,
                    format!("discriminator member `{}` absent from base decode", self.identifier),
                )
            })?;
            context.state.member_identifier = Some(discriminator);
        }
        let discriminator = context.state.member_identifier.clone().expect("just set above");
        log::trace!("`{}` dispatching on discriminator {discriminator:?}", self.definition.name);
        let variant = self.by_value.get(&discriminator).ok_or_else(|| {
            MappingError::new(
                &self.definition.name,
                format!("no variant claims discriminator value {discriminator:?}"),
            )
        })?;
        variant.map_byte_stream(buffer, byte_offset, context)
    }

    pub fn fold_byte_stream(&self, value: &Value, context: &mut Context) -> Result<Vec<u8>, EncodeError> {
        let structure = value
            .as_structure()
            .ok_or_else(|| EncodeError::new(&self.definition.name, "expected a structure value"))?;
        let variant = self.by_name.get(structure.type_name.as_ref()).ok_or_else(|| {
            EncodeError::new(&self.definition.name, format!("no variant named `{}`", structure.type_name))
        })?;
        variant.fold_byte_stream(value, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{
        ByteOrder, ConstantDefinition, EnumerationValue, IntegerDefinition, IntegerFormat, Member,
        StructureDefinition, StructureGroupDefinition,
    };
    use crate::map::compile;

    fn uint8() -> Rc<Definition> {
        Rc::new(
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
        )
    }

    #[test]
    fn enumeration_maps_number_to_name() {
        let definition = Rc::new(
            Definition::new(
                "kind",
                DefinitionKind::Enumeration(
                    crate::definitions::EnumerationDefinition::new(vec![
                        EnumerationValue { name: "a".into(), number: 0, aliases: vec![] },
                        EnumerationValue { name: "b".into(), number: 1, aliases: vec![] },
                    ])
                    .unwrap(),
                ),
            )
            .unwrap(),
        );
        let map = compile(&definition).unwrap();
        let enumeration = map.as_enumeration().unwrap();
        assert_eq!(enumeration.name_for(1), Some("b"));
        assert_eq!(enumeration.name_for(9), None);
    }

    #[test]
    fn constant_is_inert() {
        let definition = Rc::new(
            Definition::new("answer", DefinitionKind::Constant(ConstantDefinition { value: Value::Integer(42) }))
                .unwrap(),
        );
        let map = compile(&definition).unwrap();
        let mut context = Context::new();
        assert!(map.map_byte_stream(&[], 0, &mut context).is_err());
    }

    #[test]
    fn structure_group_dispatches_on_discriminator() {
        let tag = uint8();
        let variant_a = Rc::new(
            Definition::new(
                "variant_a",
                DefinitionKind::Structure(
                    StructureDefinition::new(
                        Some(ByteOrder::Little),
                        vec![Member {
                            name: "tag".into(),
                            data_type: tag.clone(),
                            condition: None,
                            values: Some(vec![Value::Integer(1)]),
                        }],
                    )
                    .unwrap(),
                ),
            )
            .unwrap(),
        );
        let variant_b = Rc::new(
            Definition::new(
                "variant_b",
                DefinitionKind::Structure(
                    StructureDefinition::new(
                        Some(ByteOrder::Little),
                        vec![Member {
                            name: "tag".into(),
                            data_type: tag.clone(),
                            condition: None,
                            values: Some(vec![Value::Integer(2)]),
                        }],
                    )
                    .unwrap(),
                ),
            )
            .unwrap(),
        );
        let base = Rc::new(
            Definition::new(
                "record_base",
                DefinitionKind::Structure(
                    StructureDefinition::new(
                        Some(ByteOrder::Little),
                        vec![Member {
                            name: "tag".into(),
                            data_type: tag,
                            condition: None,
                            values: None,
                        }],
                    )
                    .unwrap(),
                ),
            )
            .unwrap(),
        );
        let group = Rc::new(
            Definition::new(
                "record",
                DefinitionKind::StructureGroup(
                    StructureGroupDefinition::new(base, "tag".into(), vec![variant_a.clone(), variant_b.clone()])
                        .unwrap(),
                ),
            )
            .unwrap(),
        );
        let map = compile(&group).unwrap();
        let mut context = Context::new();
        let value = map.map_byte_stream(&[2], 0, &mut context).unwrap();
        let structure = value.as_structure().unwrap();
        assert_eq!(structure.type_name.as_ref(), "variant_b");
    }
}
