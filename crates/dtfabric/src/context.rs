//! Per-decode state: the namespace a condition or size expression reads
//! from, byte accounting, and the snapshot a composite map needs in order
//! to resume after a [`dtfabric_support::ByteStreamTooSmall`].

use std::collections::HashMap;

use crate::value::Value;

/// A remembered byte-size estimate for a node that couldn't be fully
/// resolved yet - typically a terminator-driven sequence that ran off the
/// end of the buffer before finding its terminator.
#[derive(Debug, Clone, Copy)]
pub struct SizeHint {
    pub byte_size: u64,
    pub is_complete: bool,
}

/// A snapshot of an in-progress sequence decode, stashed in
/// [`Context::state`] across a `ByteStreamTooSmall`.
#[derive(Debug, Clone, Default)]
pub struct SequenceResume {
    pub element_index: usize,
    pub elements_data_offset: u64,
    pub mapped_values: Vec<Value>,
    /// The child element's own context, as it stood at the point the
    /// buffer ran out - needed when the element itself is composite and
    /// has resume state of its own.
    pub subcontext: Option<Box<Context>>,
}

/// A snapshot of an in-progress structure decode.
#[derive(Debug, Clone, Default)]
pub struct StructureResume {
    pub attribute_index: usize,
    pub mapped_values: Vec<Option<Value>>,
    pub subcontext: Option<Box<Context>>,
}

/// The resumable state carried between calls to the same map while a
/// decode is incomplete. Cleared on every successful decode.
#[derive(Debug, Clone, Default)]
pub struct ResumeState {
    pub sequence: Option<SequenceResume>,
    pub structure: Option<StructureResume>,
    pub size_hints: HashMap<String, SizeHint>,
    /// The discriminator value a structure-group decode settled on, cached
    /// so a resumed call doesn't re-decode the base structure.
    pub member_identifier: Option<Value>,
}

impl ResumeState {
    pub fn clear(&mut self) {
        *self = ResumeState::default();
    }
}

/// Per-call (or per-streaming-session) decode state. Single-threaded: a
/// `Context` flows through exactly one decode at a time, though independent
/// concurrent decodes may each own their own.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub values: HashMap<String, Value>,
    pub byte_size: u64,
    pub requested_size: u64,
    pub members_data_size: u64,
    pub state: ResumeState,
    /// How many sequence maps deep the current decode is nested. Checked by
    /// the sequence map against a conservative ceiling to catch a
    /// self-referential element type before it blows the call stack.
    pub recursion_depth: u32,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: HashMap<String, Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    /// Builds the namespace an expression or condition should be evaluated
    /// against: the context's own values, plus (if a structure is
    /// partially built) an extra binding under its type name.
    pub fn namespace(&self, this: Option<(&str, &Value)>) -> HashMap<String, Value> {
        let mut namespace = self.values.clone();
        if let Some((type_name, value)) = this {
            namespace.insert(type_name.to_string(), value.clone());
        }
        namespace
    }
}
