//! The definition tree: the passive, validated description of a binary
//! layout that a reader hands to the map compiler.
//!
//! Definitions are built bottom-up through the constructors in this module
//! and are immutable from that point on - there's no `add_member` that
//! mutates a structure after the fact, so the byte-size cache never needs
//! invalidating, only filling in once.

use std::cell::OnceCell;
use std::rc::Rc;

use dtfabric_support::FormatError;

use crate::expr::Expr;
use crate::value::Value;

/// Names that a member or definition may not use, mirroring the identifier
/// rules a generated-value namespace would otherwise collide with.
const RESERVED_WORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield", "None",
    "True", "False", "self", "type",
];

pub fn validate_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("identifier must not be empty".into());
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if first == '_' {
        return Err(format!("identifier `{name}` must not start with an underscore"));
    }
    if !(first.is_ascii_alphabetic()) {
        return Err(format!("identifier `{name}` must start with a letter"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "identifier `{name}` must contain only alphanumerics and underscores"
        ));
    }
    if RESERVED_WORDS.contains(&name) {
        return Err(format!("identifier `{name}` is a reserved word"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Native,
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerFormat {
    Signed,
    Unsigned,
}

#[derive(Debug, Clone)]
pub struct BooleanDefinition {
    pub size: u8,
    pub byte_order: ByteOrder,
    pub true_value: Option<u64>,
    pub false_value: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CharacterDefinition {
    pub size: u8,
    pub byte_order: ByteOrder,
}

#[derive(Debug, Clone)]
pub struct IntegerDefinition {
    pub size: u8,
    pub byte_order: ByteOrder,
    pub format: IntegerFormat,
    pub minimum_value: Option<i64>,
    pub maximum_value: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct FloatingPointDefinition {
    pub size: u8,
    pub byte_order: ByteOrder,
}

#[derive(Debug, Clone)]
pub struct UuidDefinition {
    pub byte_order: ByteOrder,
}

#[derive(Debug, Clone)]
pub struct PaddingDefinition {
    pub alignment_size: u64,
}

/// One of the three mutually-exclusive ways an element-sequence node may
/// bound its length. Within `DataSize` and `NumberOfElements`, a literal and
/// an expression may both be present - the literal wins at evaluation time,
/// the expression is a fallback for when it isn't known until decode.
#[derive(Debug, Clone)]
pub enum LengthMode {
    DataSize {
        literal: Option<u64>,
        expression: Option<Expr>,
    },
    NumberOfElements {
        literal: Option<u64>,
        expression: Option<Expr>,
    },
    Terminator(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Ascii,
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ascii" => Some(Self::Ascii),
            "utf-8" | "utf8" => Some(Self::Utf8),
            "utf-16-le" | "utf16le" => Some(Self::Utf16Le),
            "utf-16-be" | "utf16be" => Some(Self::Utf16Be),
            _ => None,
        }
    }
}

/// Shared body of `sequence`, `stream`, and `string` nodes.
#[derive(Debug, Clone)]
pub struct ElementSequenceDefinition {
    pub element_type: Rc<Definition>,
    pub length_mode: LengthMode,
    /// Only meaningful on `string` nodes.
    pub encoding: Option<TextEncoding>,
}

impl ElementSequenceDefinition {
    /// The byte size derivable without evaluating any expression or
    /// touching a byte stream: a literal data size, or a literal element
    /// count times a statically known element size.
    pub fn static_byte_size(&self) -> Option<u64> {
        match &self.length_mode {
            LengthMode::DataSize { literal, .. } => *literal,
            LengthMode::NumberOfElements { literal, .. } => {
                let count = (*literal)?;
                let element_size = self.element_type.get_byte_size()?;
                Some(count * element_size)
            }
            LengthMode::Terminator(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub data_type: Rc<Definition>,
    pub condition: Option<Expr>,
    pub values: Option<Vec<Value>>,
}

impl Member {
    /// A member is composite if it carries a condition (its presence can't
    /// be known without evaluating the namespace) or if its type is.
    pub fn is_composite(&self) -> bool {
        self.condition.is_some() || self.data_type.is_composite()
    }

    pub fn get_byte_size(&self) -> Option<u64> {
        if self.condition.is_some() {
            return None;
        }
        self.data_type.get_byte_size()
    }
}

#[derive(Debug, Clone)]
pub struct StructureDefinition {
    pub byte_order: Option<ByteOrder>,
    pub members: Vec<Member>,
}

impl StructureDefinition {
    pub fn new(byte_order: Option<ByteOrder>, members: Vec<Member>) -> Result<Self, FormatError> {
        let mut seen = std::collections::HashSet::new();
        for member in &members {
            validate_identifier(&member.name)
                .map_err(|message| FormatError::new(&member.name, message))?;
            if !seen.insert(member.name.clone()) {
                return Err(FormatError::new(
                    &member.name,
                    format!("duplicate member `{}`", member.name),
                ));
            }
        }
        Ok(Self { byte_order, members })
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    fn byte_size(&self) -> Option<u64> {
        let mut running: u64 = 0;
        for member in &self.members {
            if let Some(padding) = member.data_type.as_padding() {
                let aligned = dtfabric_support::align(running, padding.alignment_size);
                running = aligned;
                continue;
            }
            let size = member.get_byte_size()?;
            running += size;
        }
        Some(running)
    }

    pub fn is_composite(&self) -> bool {
        self.members.iter().any(Member::is_composite)
    }
}

#[derive(Debug, Clone)]
pub struct UnionDefinition {
    pub byte_order: Option<ByteOrder>,
    pub members: Vec<Member>,
}

impl UnionDefinition {
    pub fn new(byte_order: Option<ByteOrder>, members: Vec<Member>) -> Result<Self, FormatError> {
        let mut seen = std::collections::HashSet::new();
        for member in &members {
            validate_identifier(&member.name)
                .map_err(|message| FormatError::new(&member.name, message))?;
            if !seen.insert(member.name.clone()) {
                return Err(FormatError::new(
                    &member.name,
                    format!("duplicate member `{}`", member.name),
                ));
            }
        }
        Ok(Self { byte_order, members })
    }

    fn byte_size(&self) -> Option<u64> {
        let mut max = None;
        for member in &self.members {
            let size = member.get_byte_size()?;
            max = Some(max.map_or(size, |m: u64| m.max(size)));
        }
        max
    }

    pub fn is_composite(&self) -> bool {
        self.members.iter().any(Member::is_composite)
    }
}

#[derive(Debug, Clone)]
pub struct ConstantDefinition {
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct EnumerationValue {
    pub name: String,
    pub number: i64,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EnumerationDefinition {
    pub values: Vec<EnumerationValue>,
}

impl EnumerationDefinition {
    pub fn new(values: Vec<EnumerationValue>) -> Result<Self, FormatError> {
        let mut names = std::collections::HashSet::new();
        let mut numbers = std::collections::HashSet::new();
        for value in &values {
            if !names.insert(value.name.clone()) {
                return Err(FormatError::new(
                    &value.name,
                    format!("duplicate enumeration value name `{}`", value.name),
                ));
            }
            if !numbers.insert(value.number) {
                return Err(FormatError::new(
                    &value.name,
                    format!("duplicate enumeration value number {}", value.number),
                ));
            }
        }
        Ok(Self { values })
    }

    pub fn name_for(&self, number: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.number == number)
            .map(|v| v.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct FormatDefinition {
    pub metadata: Vec<(String, String)>,
}

/// Treated as inert, like `format`: it anchors documentation and validation
/// but has no associated map. See the design ledger for why this was chosen
/// over modelling it as a dispatch-less structure group.
#[derive(Debug, Clone)]
pub struct StructureFamilyDefinition {
    pub base: Option<Rc<Definition>>,
    pub members: Vec<(String, Rc<Definition>)>,
}

#[derive(Debug, Clone)]
pub struct StructureGroupDefinition {
    pub base: Rc<Definition>,
    pub identifier: String,
    pub variants: Vec<Rc<Definition>>,
}

impl StructureGroupDefinition {
    /// Validates invariant 5: the discriminator member's allowed `values`
    /// must be non-empty and pairwise disjoint across variants.
    pub fn new(
        base: Rc<Definition>,
        identifier: String,
        variants: Vec<Rc<Definition>>,
    ) -> Result<Self, FormatError> {
        let mut seen_values: Vec<Value> = Vec::new();
        for variant in &variants {
            let structure = variant.as_structure().ok_or_else(|| {
                FormatError::new(&identifier, "structure-group variant must be a structure")
            })?;
            let member = structure.member(&identifier).ok_or_else(|| {
                FormatError::new(
                    &identifier,
                    format!("variant is missing discriminator member `{identifier}`"),
                )
            })?;
            let values = member.values.as_ref().filter(|v| !v.is_empty()).ok_or_else(|| {
                FormatError::new(
                    &identifier,
                    "discriminator member must declare a non-empty `values` set",
                )
            })?;
            for value in values {
                if seen_values.contains(value) {
                    return Err(FormatError::new(
                        &identifier,
                        format!("discriminator value {value:?} is claimed by more than one variant"),
                    ));
                }
                seen_values.push(value.clone());
            }
        }
        Ok(Self {
            base,
            identifier,
            variants,
        })
    }
}

#[derive(Debug, Clone)]
pub enum DefinitionKind {
    Boolean(BooleanDefinition),
    Character(CharacterDefinition),
    Integer(IntegerDefinition),
    FloatingPoint(FloatingPointDefinition),
    Uuid(UuidDefinition),
    Padding(PaddingDefinition),
    Sequence(ElementSequenceDefinition),
    Stream(ElementSequenceDefinition),
    String(ElementSequenceDefinition),
    Structure(StructureDefinition),
    Union(UnionDefinition),
    Constant(ConstantDefinition),
    Enumeration(EnumerationDefinition),
    Format(FormatDefinition),
    StructureFamily(StructureFamilyDefinition),
    StructureGroup(StructureGroupDefinition),
}

/// A single node of the definition tree: a name plus a kind-specific body.
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub urls: Vec<String>,
    pub kind: DefinitionKind,
    byte_size: OnceCell<Option<u64>>,
}

impl Definition {
    pub fn new(name: impl Into<String>, kind: DefinitionKind) -> Result<Self, FormatError> {
        let name = name.into();
        validate_identifier(&name).map_err(|message| FormatError::new(&name, message))?;
        Ok(Self::new_unchecked(name, kind))
    }

    /// Builds a definition without running identifier validation. Reserved
    /// for the map compiler's internal renamed copies of `native`-ordered
    /// members (see [`crate::map`]) - those names are never exposed through
    /// an expression namespace, so the leading-underscore rule doesn't
    /// apply to them.
    pub(crate) fn new_unchecked(name: impl Into<String>, kind: DefinitionKind) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            description: None,
            urls: Vec::new(),
            kind,
            byte_size: OnceCell::new(),
        }
    }

    pub fn type_indicator(&self) -> &'static str {
        match &self.kind {
            DefinitionKind::Boolean(_) => "boolean",
            DefinitionKind::Character(_) => "character",
            DefinitionKind::Integer(_) => "integer",
            DefinitionKind::FloatingPoint(_) => "floating-point",
            DefinitionKind::Uuid(_) => "uuid",
            DefinitionKind::Padding(_) => "padding",
            DefinitionKind::Sequence(_) => "sequence",
            DefinitionKind::Stream(_) => "stream",
            DefinitionKind::String(_) => "string",
            DefinitionKind::Structure(_) => "structure",
            DefinitionKind::Union(_) => "union",
            DefinitionKind::Constant(_) => "constant",
            DefinitionKind::Enumeration(_) => "enumeration",
            DefinitionKind::Format(_) => "format",
            DefinitionKind::StructureFamily(_) => "structure-family",
            DefinitionKind::StructureGroup(_) => "structure-group",
        }
    }

    pub fn byte_order(&self) -> Option<ByteOrder> {
        match &self.kind {
            DefinitionKind::Boolean(d) => Some(d.byte_order),
            DefinitionKind::Character(d) => Some(d.byte_order),
            DefinitionKind::Integer(d) => Some(d.byte_order),
            DefinitionKind::FloatingPoint(d) => Some(d.byte_order),
            DefinitionKind::Uuid(d) => Some(d.byte_order),
            DefinitionKind::Structure(d) => d.byte_order,
            DefinitionKind::Union(d) => d.byte_order,
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        match &self.kind {
            DefinitionKind::Boolean(_)
            | DefinitionKind::Character(_)
            | DefinitionKind::Integer(_)
            | DefinitionKind::FloatingPoint(_)
            | DefinitionKind::Padding(_) => false,
            DefinitionKind::Uuid(_) => true,
            DefinitionKind::Sequence(_) | DefinitionKind::Stream(_) | DefinitionKind::String(_) => {
                true
            }
            DefinitionKind::Structure(d) => d.is_composite(),
            DefinitionKind::Union(d) => d.is_composite(),
            DefinitionKind::Constant(_) | DefinitionKind::Enumeration(_) => true,
            DefinitionKind::Format(_)
            | DefinitionKind::StructureFamily(_)
            | DefinitionKind::StructureGroup(_) => true,
        }
    }

    pub fn get_byte_size(&self) -> Option<u64> {
        *self.byte_size.get_or_init(|| self.compute_byte_size())
    }

    fn compute_byte_size(&self) -> Option<u64> {
        match &self.kind {
            DefinitionKind::Boolean(d) => Some(d.size as u64),
            DefinitionKind::Character(d) => Some(d.size as u64),
            DefinitionKind::Integer(d) => Some(d.size as u64),
            DefinitionKind::FloatingPoint(d) => Some(d.size as u64),
            DefinitionKind::Uuid(_) => Some(16),
            DefinitionKind::Padding(_) => None,
            DefinitionKind::Sequence(d) | DefinitionKind::Stream(d) | DefinitionKind::String(d) => {
                d.static_byte_size()
            }
            DefinitionKind::Structure(d) => d.byte_size(),
            DefinitionKind::Union(d) => d.byte_size(),
            DefinitionKind::Constant(_) | DefinitionKind::Enumeration(_) => None,
            DefinitionKind::Format(_)
            | DefinitionKind::StructureFamily(_)
            | DefinitionKind::StructureGroup(_) => None,
        }
    }

    pub fn as_padding(&self) -> Option<&PaddingDefinition> {
        match &self.kind {
            DefinitionKind::Padding(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&StructureDefinition> {
        match &self.kind {
            DefinitionKind::Structure(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_element_sequence(&self) -> Option<&ElementSequenceDefinition> {
        match &self.kind {
            DefinitionKind::Sequence(d) | DefinitionKind::Stream(d) | DefinitionKind::String(d) => {
                Some(d)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32le() -> Definition {
        Definition::new(
            "int32le",
            DefinitionKind::Integer(IntegerDefinition {
                size: 4,
                byte_order: ByteOrder::Little,
                format: IntegerFormat::Signed,
                minimum_value: None,
                maximum_value: None,
            }),
        )
        .unwrap()
    }

    #[test]
    fn primitive_byte_size_is_fixed() {
        assert_eq!(int32le().get_byte_size(), Some(4));
    }

    #[test]
    fn structure_byte_size_sums_members() {
        let members = vec![
            Member {
                name: "a".into(),
                data_type: Rc::new(int32le()),
                condition: None,
                values: None,
            },
            Member {
                name: "b".into(),
                data_type: Rc::new(int32le()),
                condition: None,
                values: None,
            },
        ];
        let structure = StructureDefinition::new(None, members).unwrap();
        assert_eq!(structure.byte_size(), Some(8));
        assert!(!structure.is_composite());
    }

    #[test]
    fn structure_with_condition_member_has_unknown_size() {
        let members = vec![Member {
            name: "maybe".into(),
            data_type: Rc::new(int32le()),
            condition: Some(Expr::parse("1 == 1").unwrap()),
            values: None,
        }];
        let structure = StructureDefinition::new(None, members).unwrap();
        assert_eq!(structure.byte_size(), None);
        assert!(structure.is_composite());
    }

    #[test]
    fn rejects_leading_underscore_identifier() {
        assert!(validate_identifier("_foo").is_err());
    }

    #[test]
    fn rejects_duplicate_members() {
        let members = vec![
            Member {
                name: "a".into(),
                data_type: Rc::new(int32le()),
                condition: None,
                values: None,
            },
            Member {
                name: "a".into(),
                data_type: Rc::new(int32le()),
                condition: None,
                values: None,
            },
        ];
        assert!(StructureDefinition::new(None, members).is_err());
    }
}
