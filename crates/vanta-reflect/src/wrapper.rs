//! Merged member index
//!
//! A [`FieldIndex`] flattens a type's own members and everything it
//! inherits into one name-indexed table for O(1) lookup. Bases are visited
//! first (recursively, through the inheritance graph), then the type's own
//! structure entries are inserted with last-write-wins, so a same-named own
//! member shadows the inherited one — in place, keeping the base-then-own
//! iteration order.
//!
//! Built once per concrete type and cached; safe for concurrent reads once
//! built.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::access::ValueAccess;
use crate::structure::{self, Annotations, MethodFn};
use crate::ty::TypeDescriptor;

/// One merged field entry.
pub struct FieldSlot {
    name: String,
    owner: &'static TypeDescriptor,
    offset: isize,
    access: ValueAccess,
    annotations: Option<Arc<Annotations>>,
}

impl FieldSlot {
    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type that declared this field.
    pub fn owner(&self) -> &'static TypeDescriptor {
        self.owner
    }

    /// Byte delta from the concrete object to the declaring type's layout.
    pub(crate) fn offset(&self) -> isize {
        self.offset
    }

    pub(crate) fn access(&self) -> &ValueAccess {
        &self.access
    }

    pub(crate) fn annotations(&self) -> Option<&Arc<Annotations>> {
        self.annotations.as_ref()
    }
}

/// One merged method entry.
pub struct MethodSlot {
    name: String,
    owner: &'static TypeDescriptor,
    offset: isize,
    invoke: MethodFn,
}

impl MethodSlot {
    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type that declared this method.
    pub fn owner(&self) -> &'static TypeDescriptor {
        self.owner
    }

    pub(crate) fn offset(&self) -> isize {
        self.offset
    }

    pub(crate) fn invoke_fn(&self) -> MethodFn {
        self.invoke.clone()
    }
}

/// Name → member table merging inherited and own members of one type.
#[derive(Default)]
pub struct FieldIndex {
    fields_by_name: FxHashMap<String, usize>,
    fields: Vec<FieldSlot>,
    methods_by_name: FxHashMap<String, usize>,
    methods: Vec<MethodSlot>,
}

impl FieldIndex {
    pub(crate) fn build(ty: &'static TypeDescriptor) -> FieldIndex {
        log::debug!("merging member index for {}", ty.name());
        let mut index = FieldIndex::default();
        visit(ty, 0, &mut index);
        index
    }

    /// Merged field lookup by name.
    pub fn field(&self, name: &str) -> Option<&FieldSlot> {
        self.fields_by_name.get(name).map(|&i| &self.fields[i])
    }

    /// All merged fields, bases before own members.
    pub fn fields(&self) -> &[FieldSlot] {
        &self.fields
    }

    /// Merged method lookup by name.
    pub fn method(&self, name: &str) -> Option<&MethodSlot> {
        self.methods_by_name.get(name).map(|&i| &self.methods[i])
    }

    /// All merged methods, bases before own members.
    pub fn methods(&self) -> &[MethodSlot] {
        &self.methods
    }

    /// Whether no members were found at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.methods.is_empty()
    }

    fn insert_field(&mut self, slot: FieldSlot) {
        match self.fields_by_name.get(&slot.name) {
            Some(&i) => self.fields[i] = slot,
            None => {
                self.fields_by_name.insert(slot.name.clone(), self.fields.len());
                self.fields.push(slot);
            }
        }
    }

    fn insert_method(&mut self, slot: MethodSlot) {
        match self.methods_by_name.get(&slot.name) {
            Some(&i) => self.methods[i] = slot,
            None => {
                self.methods_by_name
                    .insert(slot.name.clone(), self.methods.len());
                self.methods.push(slot);
            }
        }
    }
}

/// Base-first recursive merge. `delta` accumulates the embedding offset
/// from the concrete object down to the type being visited.
fn visit(ty: &'static TypeDescriptor, delta: isize, index: &mut FieldIndex) {
    for edge in ty.base_edges() {
        visit(edge.ty, delta + edge.offset, index);
    }

    let Some(structure) = structure::structure_of_dyn(ty) else {
        return;
    };
    for field in structure.fields() {
        index.insert_field(FieldSlot {
            name: field.name().to_owned(),
            owner: ty,
            offset: delta,
            access: field.access().clone(),
            annotations: field.annotations().cloned(),
        });
    }
    for method in structure.methods() {
        index.insert_method(MethodSlot {
            name: method.name().to_owned(),
            owner: ty,
            offset: delta,
            invoke: method.invoke_fn(),
        });
    }
}
