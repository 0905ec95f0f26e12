//! Vanta Runtime Reflection
//!
//! This crate is the engine's reflection and dynamic-type-introspection
//! core: it lets tools, serializers, scripting bridges, and data-binding
//! layers enumerate, read, write, and invoke members of statically-defined
//! structs at runtime, without those structs having been authored with any
//! particular consumer in mind.
//!
//! ## Layers
//!
//! - [`ty`] — canonical per-type identity descriptors with pointer-shape
//!   normalization ("decay")
//! - [`any`] + [`convert`] — the type-erased value container and its open
//!   cross-type conversion registry
//! - [`inherit`] — base/derived relationships with pointer-adjusting casts
//! - [`structure`] — lazily-built, per-type member metadata and the chained
//!   registration builder
//! - [`wrapper`] — the merged name index over inherited and own members
//! - [`reflection`] — the composed handle clients navigate with
//!
//! ## Registering a type
//!
//! ```ignore
//! use vanta_reflect::{reflect_base, structure, Reflection};
//!
//! #[derive(Clone, PartialEq, Debug, Default)]
//! struct Entity { id: i64 }
//!
//! #[derive(Clone, PartialEq, Debug, Default)]
//! struct Camera { entity: Entity, fov: f32 }
//!
//! structure::register::<Entity>(|b| {
//!     b.field("id", |e: &Entity| &e.id, |e: &mut Entity| &mut e.id)
//! });
//! structure::register::<Camera>(|b| {
//!     b.field("fov", |c: &Camera| &c.fov, |c: &mut Camera| &mut c.fov)
//! });
//! reflect_base!(Camera, entity: Entity);
//!
//! let mut camera = Camera::default();
//! let r = Reflection::of(&mut camera);
//! r.field("id").set_value(&vanta_reflect::AnyValue::new(7i64))?;
//! ```
//!
//! ## Concurrency
//!
//! The layer spawns no threads and never blocks on I/O. Global tables are
//! populated during module setup; per-type structures and merged indices
//! build lazily, exactly once, behind one-time-initialization cells, so a
//! reader either sees nothing or a fully-formed structure. Once built,
//! everything is immutable and read lock-free from any thread.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod access;
pub mod any;
pub mod convert;
pub mod inherit;
pub mod reflection;
pub mod structure;
pub mod ty;
pub mod wrapper;

pub use access::{AccessKind, ValueAccess};
pub use any::{AnyStorable, AnyValue};
pub use inherit::{can_cast, cast_raw, upcast, upcast_mut, InheritanceEdge};
pub use reflection::{BoundMethod, FieldRef, MethodRef, Reflection};
pub use structure::{
    create, create_dyn, destroy, find_by_name, register, register_named, registered_types,
    structure_of, structure_of_dyn, Annotations, Constructor, Destructor, FieldDescriptor,
    MethodDescriptor, ReflectedStructure, StructureBuilder,
};
pub use ty::TypeDescriptor;
pub use wrapper::{FieldIndex, FieldSlot, MethodSlot};

/// Reflection errors
///
/// Only conditions expected during ordinary use are represented here;
/// registration defects (a missing destructor, destroying a non-pointer
/// value) panic instead, because silently degrading metadata would corrupt
/// every downstream consumer.
#[derive(Debug, thiserror::Error)]
pub enum ReflectError {
    /// The handle denotes nothing.
    #[error("invalid reflection target")]
    Invalid,

    /// Write attempted through a read-only handle or access.
    #[error("value is read-only")]
    ReadOnly,

    /// A value could not be converted to the member's type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Name of the type the member requires.
        expected: &'static str,
        /// Name of the type that was supplied.
        found: &'static str,
    },

    /// A method was invoked with the wrong number of arguments.
    #[error("arity mismatch: expected {expected} arguments, found {found}")]
    ArityMismatch {
        /// Number of arguments the method takes.
        expected: usize,
        /// Number of arguments supplied.
        found: usize,
    },
}
