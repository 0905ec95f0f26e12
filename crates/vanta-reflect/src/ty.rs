//! Type identity
//!
//! Every reflectable Rust type is represented at runtime by exactly one
//! [`TypeDescriptor`]. Descriptors are created on first reference, live for
//! the rest of the process, and are compared by identity, never structurally.
//! Repeated calls to [`TypeDescriptor::of`] for the same underlying type
//! return the same `&'static` reference.
//!
//! A descriptor may be *pointer-shaped*: a shape derived lazily from a value
//! type's descriptor via [`TypeDescriptor::pointer`]. [`TypeDescriptor::decay`]
//! strips pointer shape back to the canonical value-type identity, so two
//! differently-shaped views of the same logical type compare equal after
//! decay. This layer never fails; it only returns identity.

use std::any::TypeId;
use std::fmt;
use std::ptr;

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;

use crate::inherit::InheritanceEdge;

/// Global descriptor table, keyed by the underlying Rust type.
static DESCRIPTORS: Lazy<DashMap<TypeId, &'static TypeDescriptor>> = Lazy::new(DashMap::new);

/// Canonical runtime identity for a single Rust type.
///
/// One instance exists per underlying type for the process lifetime. Compare
/// descriptors with `==` (identity) or [`ptr::eq`]; never compare fields.
pub struct TypeDescriptor {
    name: &'static str,
    type_id: TypeId,
    size: usize,
    pointer_shape: bool,
    pointee: Option<&'static TypeDescriptor>,
    pointer: OnceCell<&'static TypeDescriptor>,
    pub(crate) bases: RwLock<Vec<InheritanceEdge>>,
    pub(crate) derived: RwLock<Vec<InheritanceEdge>>,
}

impl TypeDescriptor {
    /// Get the descriptor for `T`, creating it on first reference.
    ///
    /// First access for a given type performs one allocation; every
    /// subsequent access is a pure table read returning the same reference.
    pub fn of<T: 'static>() -> &'static TypeDescriptor {
        let id = TypeId::of::<T>();
        if let Some(existing) = DESCRIPTORS.get(&id) {
            return *existing;
        }

        *DESCRIPTORS.entry(id).or_insert_with(|| {
            Box::leak(Box::new(TypeDescriptor {
                name: std::any::type_name::<T>(),
                type_id: id,
                size: std::mem::size_of::<T>(),
                pointer_shape: false,
                pointee: None,
                pointer: OnceCell::new(),
                bases: RwLock::new(Vec::new()),
                derived: RwLock::new(Vec::new()),
            }))
        })
    }

    /// The pointer-shaped descriptor whose pointee is `self`.
    ///
    /// Created lazily, exactly once per pointee.
    pub fn pointer(&'static self) -> &'static TypeDescriptor {
        *self.pointer.get_or_init(|| {
            let name: &'static str =
                Box::leak(format!("*mut {}", self.name).into_boxed_str());
            Box::leak(Box::new(TypeDescriptor {
                name,
                type_id: self.type_id,
                size: std::mem::size_of::<usize>(),
                pointer_shape: true,
                pointee: Some(self),
                pointer: OnceCell::new(),
                bases: RwLock::new(Vec::new()),
                derived: RwLock::new(Vec::new()),
            }))
        })
    }

    /// Strip pointer shape, yielding the canonical value-type identity.
    pub fn decay(&'static self) -> &'static TypeDescriptor {
        self.pointee.unwrap_or(self)
    }

    /// Human-readable type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Size in bytes of a value of this type.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this descriptor is pointer-shaped.
    pub fn is_pointer(&self) -> bool {
        self.pointer_shape
    }

    /// The pointee descriptor, for pointer-shaped descriptors.
    pub fn pointee(&self) -> Option<&'static TypeDescriptor> {
        self.pointee
    }

    /// Whether this descriptor identifies the value type `T`.
    pub fn is<T: 'static>(&self) -> bool {
        !self.pointer_shape && self.type_id == TypeId::of::<T>()
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Snapshot of the registered base edges.
    pub fn base_edges(&self) -> Vec<InheritanceEdge> {
        self.bases.read().clone()
    }

    /// Snapshot of the registered derived edges.
    pub fn derived_edges(&self) -> Vec<InheritanceEdge> {
        self.derived.read().clone()
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("pointer", &self.pointer_shape)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    #[test]
    fn test_identity_is_stable() {
        let a = TypeDescriptor::of::<i32>();
        let b = TypeDescriptor::of::<i32>();
        assert!(ptr::eq(a, b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_types_distinct_descriptors() {
        let a = TypeDescriptor::of::<i32>();
        let b = TypeDescriptor::of::<i64>();
        assert!(!ptr::eq(a, b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_descriptor_fields() {
        let d = TypeDescriptor::of::<u64>();
        assert_eq!(d.size(), 8);
        assert!(!d.is_pointer());
        assert!(d.is::<u64>());
        assert!(!d.is::<u32>());
        assert!(d.name().contains("u64"));
    }

    #[test]
    fn test_pointer_shape_and_decay() {
        let v = TypeDescriptor::of::<Marker>();
        let p = v.pointer();
        assert!(p.is_pointer());
        assert!(ptr::eq(p.pointee().unwrap(), v));
        assert!(ptr::eq(p.decay(), v));
        assert!(ptr::eq(v.decay(), v));
        // pointer shape is itself a singleton
        assert!(ptr::eq(v.pointer(), p));
        // pointer shape never satisfies a value-type identity check
        assert!(!p.is::<Marker>());
    }
}
