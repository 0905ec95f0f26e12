//! Reflection handle
//!
//! [`Reflection`] is the composed, transient facade clients use to navigate
//! and mutate reflected data: it binds an object reference to a value
//! access strategy and resolves member names through the merged index. A
//! handle borrows the object it denotes and must not outlive it; the
//! lifetime parameter enforces exactly that. Handles are cheap to clone and
//! deliberately `!Send`.
//!
//! Ordinary misses — an unknown member name, an unregistered type, an
//! invalid object — come back as invalid handles or `None`, never as
//! panics. Only [`set_value`](Reflection::set_value) and method invocation
//! mutate the referenced object.

use std::fmt;
use std::marker::PhantomData;

use crate::access::{ErasedRef, ValueAccess};
use crate::any::{AnyStorable, AnyValue};
use crate::structure::{self, MethodFn};
use crate::ty::TypeDescriptor;
use crate::wrapper::{FieldSlot, MethodSlot};
use crate::ReflectError;

/// A transient, non-owning view of one reflected value.
#[derive(Clone)]
pub struct Reflection<'obj> {
    obj: *mut u8,
    access: Option<ValueAccess>,
    read_only: bool,
    annotations: Option<std::sync::Arc<structure::Annotations>>,
    _marker: PhantomData<&'obj ()>,
}

/// One entry of [`Reflection::fields`].
pub struct FieldRef<'obj> {
    /// Field name.
    pub name: String,
    /// The type that declared the field.
    pub owner: &'static TypeDescriptor,
    /// Handle bound to the field.
    pub reflection: Reflection<'obj>,
}

/// A method bound to its receiver.
pub struct BoundMethod<'obj> {
    obj: *mut u8,
    invoke: MethodFn,
    read_only: bool,
    _marker: PhantomData<&'obj ()>,
}

/// One entry of [`Reflection::methods`].
pub struct MethodRef<'obj> {
    /// Method name.
    pub name: String,
    /// The type that declared the method.
    pub owner: &'static TypeDescriptor,
    /// The bound method.
    pub method: BoundMethod<'obj>,
}

impl<'obj> Reflection<'obj> {
    /// Reflect an object through an exclusive borrow.
    pub fn of<T: AnyStorable>(obj: &'obj mut T) -> Self {
        let ty = TypeDescriptor::of::<T>();
        Self {
            obj: obj as *mut T as *mut u8,
            access: Some(
                structure::object_access_of(ty).unwrap_or_else(ValueAccess::object::<T>),
            ),
            read_only: false,
            annotations: structure::annotations_of(ty),
            _marker: PhantomData,
        }
    }

    /// Reflect an object through a shared borrow. The handle and everything
    /// reached through it is read-only.
    pub fn of_ref<T: AnyStorable>(obj: &'obj T) -> Self {
        let ty = TypeDescriptor::of::<T>();
        Self {
            obj: obj as *const T as *mut u8,
            access: Some(
                structure::object_access_of(ty).unwrap_or_else(ValueAccess::object::<T>),
            ),
            read_only: true,
            annotations: structure::annotations_of(ty),
            _marker: PhantomData,
        }
    }

    /// Reflect the pointee of a pointer-shaped value (such as the result of
    /// [`structure::create_dyn`]).
    ///
    /// Returns an invalid handle when the value is not pointer-shaped or
    /// its pointee type is not registered.
    ///
    /// # Safety
    ///
    /// The stored pointer must reference a live object for the lifetime of
    /// the returned handle; the container cannot know whether the pointee
    /// was already destroyed.
    pub unsafe fn from_any_ptr(value: &AnyValue) -> Reflection<'_> {
        let Some((addr, ty)) = value.ptr_target() else {
            return Reflection::invalid();
        };
        let Some(access) = structure::object_access_of(ty) else {
            return Reflection::invalid();
        };
        Reflection {
            obj: addr,
            access: Some(access),
            read_only: false,
            annotations: structure::annotations_of(ty),
            _marker: PhantomData,
        }
    }

    /// The invalid handle. Every query on it reports a miss.
    pub fn invalid() -> Self {
        Self {
            obj: std::ptr::null_mut(),
            access: None,
            read_only: true,
            annotations: None,
            _marker: PhantomData,
        }
    }

    /// Whether the handle denotes anything.
    pub fn is_valid(&self) -> bool {
        self.access.is_some() && !self.obj.is_null()
    }

    /// Runtime type of the denoted value.
    pub fn value_type(&self) -> Option<&'static TypeDescriptor> {
        self.access.as_ref().map(|a| a.value_type())
    }

    /// Whether writes through this handle are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only || self.access.as_ref().is_none_or(|a| a.is_read_only())
    }

    /// Load the denoted value. Empty for invalid handles.
    pub fn value(&self) -> AnyValue {
        match &self.access {
            Some(access) if !self.obj.is_null() => access.load(self.obj),
            _ => AnyValue::empty(),
        }
    }

    /// Store a value, converting it to the member's type if necessary.
    ///
    /// Fails without mutating on read-only handles and on values that
    /// cannot be converted.
    pub fn set_value(&self, value: &AnyValue) -> Result<(), ReflectError> {
        let access = self.access.as_ref().ok_or(ReflectError::Invalid)?;
        if self.obj.is_null() {
            return Err(ReflectError::Invalid);
        }
        if self.read_only {
            return Err(ReflectError::ReadOnly);
        }
        access.store(self.obj, value)
    }

    /// The object this handle's value denotes, when it has an address.
    fn target(&self) -> Option<ErasedRef> {
        if self.obj.is_null() {
            return None;
        }
        self.access.as_ref()?.locate(self.obj)
    }

    fn bind_field(&self, target: &ErasedRef, slot: &FieldSlot) -> Reflection<'obj> {
        Reflection {
            obj: target.addr.wrapping_offset(slot.offset()),
            access: Some(slot.access().clone()),
            read_only: self.read_only,
            annotations: slot.annotations().cloned(),
            _marker: PhantomData,
        }
    }

    fn bind_method(&self, target: &ErasedRef, slot: &MethodSlot) -> BoundMethod<'obj> {
        BoundMethod {
            obj: target.addr.wrapping_offset(slot.offset()),
            invoke: slot.invoke_fn(),
            read_only: self.read_only,
            _marker: PhantomData,
        }
    }

    /// Navigate to a member field by name.
    ///
    /// Unknown names, unregistered types, and valueless members all yield
    /// an invalid handle.
    pub fn field(&self, name: &str) -> Reflection<'obj> {
        let Some(target) = self.target() else {
            return Reflection::invalid();
        };
        let Some(index) = structure::index_of(target.ty) else {
            return Reflection::invalid();
        };
        match index.field(name) {
            Some(slot) => self.bind_field(&target, slot),
            None => Reflection::invalid(),
        }
    }

    /// All member fields, inherited first, with their declaring types.
    pub fn fields(&self) -> Vec<FieldRef<'obj>> {
        let Some(target) = self.target() else {
            return Vec::new();
        };
        let Some(index) = structure::index_of(target.ty) else {
            return Vec::new();
        };
        index
            .fields()
            .iter()
            .map(|slot| FieldRef {
                name: slot.name().to_owned(),
                owner: slot.owner(),
                reflection: self.bind_field(&target, slot),
            })
            .collect()
    }

    /// Look up a method by name and bind it to this object.
    pub fn method(&self, name: &str) -> Option<BoundMethod<'obj>> {
        let target = self.target()?;
        let index = structure::index_of(target.ty)?;
        index.method(name).map(|slot| self.bind_method(&target, slot))
    }

    /// All methods, inherited first, bound to this object.
    pub fn methods(&self) -> Vec<MethodRef<'obj>> {
        let Some(target) = self.target() else {
            return Vec::new();
        };
        let Some(index) = structure::index_of(target.ty) else {
            return Vec::new();
        };
        index
            .methods()
            .iter()
            .map(|slot| MethodRef {
                name: slot.name().to_owned(),
                owner: slot.owner(),
                method: self.bind_method(&target, slot),
            })
            .collect()
    }

    /// Look up an annotation on the denoted member or type.
    pub fn annotation<M: 'static>(&self) -> Option<&M> {
        self.annotations.as_ref()?.get::<M>()
    }

    /// Whether an annotation of type `M` is present.
    pub fn has_annotation<M: 'static>(&self) -> bool {
        self.annotation::<M>().is_some()
    }
}

impl fmt::Debug for Reflection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "Reflection(<invalid>)");
        }
        let ty = self.value_type().map_or("<unknown>", |t| t.name());
        write!(f, "Reflection({ty}")?;
        if self.is_read_only() {
            write!(f, ", read-only")?;
        }
        write!(f, ")")
    }
}

impl<'obj> BoundMethod<'obj> {
    /// Invoke with the given arguments.
    ///
    /// Methods take the receiver exclusively, so invocation through a
    /// read-only handle is rejected.
    pub fn invoke(&self, args: &[AnyValue]) -> Result<AnyValue, ReflectError> {
        if self.read_only {
            return Err(ReflectError::ReadOnly);
        }
        (self.invoke)(self.obj, args)
    }
}
