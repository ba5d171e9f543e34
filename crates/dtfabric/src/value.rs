//! Decoded values.
//!
//! A definition tree is built once by an external reader and is otherwise
//! opaque to callers; what they actually get back from a decode is one of
//! these. Structures are represented as a generic record - a shared name
//! table plus a parallel value vector - rather than a per-definition
//! generated type, so that a tree discovered at load time can still be
//! decoded without any compile-time knowledge of its shape.

use std::hash::{Hash, Hasher};
use std::rc::Rc;
use uuid::Uuid;

/// A dynamically typed decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Character(char),
    Integer(i64),
    Float(f64),
    Uuid(Uuid),
    /// The skipped bytes of a padding member. Carries no meaning on its own.
    Padding(Vec<u8>),
    /// A stream of raw bytes (non-composite element sequences, or a `stream`
    /// node).
    Stream(Vec<u8>),
    /// A decoded `string` node.
    Text(String),
    /// A decoded `sequence` node: an ordered tuple of element values.
    Sequence(Vec<Value>),
    Structure(StructureValue),
    /// The result of decoding a `union`: every member decoded from the same
    /// starting offset, tagged by member name. See the open question on
    /// union decode strategy in the design notes.
    Union(Vec<(String, Value)>),
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Boolean(v) => v.hash(state),
            Value::Character(v) => v.hash(state),
            Value::Integer(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Uuid(v) => v.hash(state),
            Value::Padding(v) => v.hash(state),
            Value::Stream(v) => v.hash(state),
            Value::Text(v) => v.hash(state),
            Value::Sequence(v) => v.hash(state),
            Value::Structure(v) => v.hash(state),
            Value::Union(v) => v.hash(state),
        }
    }
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Boolean(v) => Some(*v as i64),
            Value::Character(c) => Some(*c as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&StructureValue> {
        match self {
            Value::Structure(s) => Some(s),
            _ => None,
        }
    }
}

/// The shared, insertion-ordered list of attribute names for one structure
/// definition. Every [`StructureValue`] produced by the same structure map
/// points at the same `NameTable`, so instances don't each carry their own
/// copy of the member names.
pub type NameTable = Rc<[Box<str>]>;

pub fn name_table(names: impl IntoIterator<Item = impl Into<Box<str>>>) -> NameTable {
    names.into_iter().map(Into::into).collect::<Vec<_>>().into()
}

/// A decoded structure: a name table shared with its definition's map, and
/// one slot per attribute, in definition order. A conditional member that
/// was skipped gets an explicit `None` slot rather than being dropped, so
/// `values` stays index-aligned with `names` - a field after a skipped one
/// is still found at its own position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructureValue {
    pub type_name: Rc<str>,
    names: NameTable,
    values: Vec<Option<Value>>,
}

impl StructureValue {
    pub fn new(type_name: Rc<str>, names: NameTable, values: Vec<Option<Value>>) -> Self {
        Self {
            type_name,
            names,
            values,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n.as_ref() == name)
            .and_then(|index| self.get_by_index(index))
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn names(&self) -> &[Box<str>] {
        &self.names
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
