//! The four error kinds shared by every definition, map, and byte operation.
//!
//! Each kind is its own small type rather than one catch-all enum, because
//! callers need to tell them apart: a [`ByteStreamTooSmall`] is something a
//! streaming caller is expected to catch and retry past, while the other
//! three are terminal.

use std::fmt;

/// How many bytes a failed decode/encode step wanted versus had available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteAccounting {
    pub requested: u64,
    pub available: u64,
}

impl fmt::Display for ByteAccounting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested {} bytes, {} available",
            self.requested, self.available
        )
    }
}

/// Raised when a definition is malformed in a way that can be caught before
/// any byte stream is involved: bad identifiers, conflicting byte orders,
/// an unsupported element type, duplicate or empty `values` sets in a
/// structure group, and the like. Fatal to the map being compiled.
#[derive(Debug, thiserror::Error)]
#[error("format error in `{name}`: {message}")]
pub struct FormatError {
    pub name: String,
    pub message: String,
}

impl FormatError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Raised during decode: a value outside its allow-list, an unknown
/// structure-group variant, a condition that failed to evaluate, a codec
/// failure, or an attempt to decode a semantic (constant/enumeration) type.
#[derive(Debug)]
pub struct MappingError {
    pub name: String,
    pub message: String,
    pub offset: Option<u64>,
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mapping error in `{}`{}: {}",
            self.name,
            offset_suffix(self.offset),
            self.message
        )
    }
}

impl std::error::Error for MappingError {}

impl MappingError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            offset: None,
        }
    }

    pub fn at(name: impl Into<String>, message: impl Into<String>, offset: u64) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            offset: Some(offset),
        }
    }
}

/// The encode-time mirror of [`MappingError`].
#[derive(Debug, thiserror::Error)]
#[error("encode error in `{name}`: {message}")]
pub struct EncodeError {
    pub name: String,
    pub message: String,
}

impl EncodeError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Raised when a decode cannot proceed because the buffer is shorter than
/// needed. Carries enough information for a cooperative caller to grow the
/// buffer and retry; the retry resumes from state snapshotted in the
/// `Context` rather than starting over.
#[derive(Debug, thiserror::Error)]
#[error("`{name}` needs more data: {accounting}")]
pub struct ByteStreamTooSmall {
    pub name: String,
    pub accounting: ByteAccounting,
}

impl ByteStreamTooSmall {
    pub fn new(name: impl Into<String>, requested: u64, available: u64) -> Self {
        Self {
            name: name.into(),
            accounting: ByteAccounting {
                requested,
                available,
            },
        }
    }
}

fn offset_suffix(offset: Option<u64>) -> String {
    match offset {
        Some(offset) => format!(" at offset {offset}"),
        None => String::new(),
    }
}
