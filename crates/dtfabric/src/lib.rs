//! A data-type fabric: compiles declarative binary record-layout
//! definitions into [`map::DataTypeMap`] trees that decode and encode byte
//! streams into structured [`value::Value`]s.
//!
//! The three moving pieces are the definition tree ([`definitions`]), the
//! map compiler ([`map::compile`]), and the per-decode [`context::Context`]
//! that carries resumable state across a [`dtfabric_support::ByteStreamTooSmall`].

pub mod byte_ops;
pub mod context;
pub mod definitions;
pub mod expr;
pub mod map;
pub mod value;

pub use context::Context;
pub use definitions::Definition;
pub use map::{compile, DataTypeMap, DecodeError};
pub use value::{StructureValue, Value};
