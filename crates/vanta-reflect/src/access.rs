//! Value access strategies
//!
//! A [`ValueAccess`] knows how to reach the value a reflected member (or a
//! whole reflected object) denotes: its runtime type, whether it can be
//! written, how to load it into an [`AnyValue`], how to store one back, and
//! the address of the sub-object it denotes when it has one. The capability
//! set is deliberately closed; extension happens in the converter registry,
//! not here.
//!
//! Strategies are built from monomorphized projection functions captured
//! behind erased closures, so no offsets are trusted at access time.

use std::fmt;
use std::sync::Arc;

use crate::any::{AnyStorable, AnyValue};
use crate::ty::TypeDescriptor;
use crate::ReflectError;

type LoadFn = Arc<dyn Fn(*const u8) -> AnyValue + Send + Sync>;
type StoreFn = Arc<dyn Fn(*mut u8, &AnyValue) -> Result<(), ReflectError> + Send + Sync>;
type LocateFn = Arc<dyn Fn(*mut u8) -> ErasedRef + Send + Sync>;

/// Address and type of a denoted sub-object.
pub(crate) struct ErasedRef {
    pub addr: *mut u8,
    pub ty: &'static TypeDescriptor,
}

/// How a [`ValueAccess`] reaches its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// The reflected object itself is the value.
    Object,
    /// A member reached through a field projection.
    Direct,
    /// A value produced and consumed by accessor functions; it has no
    /// stable address.
    Computed,
}

/// Access strategy for one reflected value.
#[derive(Clone)]
pub struct ValueAccess {
    kind: AccessKind,
    ty: &'static TypeDescriptor,
    load: LoadFn,
    store: Option<StoreFn>,
    locate: Option<LocateFn>,
}

impl ValueAccess {
    /// Whole-object access for `T`.
    pub(crate) fn object<T: AnyStorable>() -> Self {
        let ty = TypeDescriptor::of::<T>();
        let load: LoadFn = Arc::new(move |obj| {
            let target = unsafe { &*(obj as *const T) };
            AnyValue::new(target.clone())
        });
        let store: StoreFn = Arc::new(move |obj, value| {
            let v = cast_for_store::<T>(ty, value)?;
            unsafe { *(obj as *mut T) = v };
            Ok(())
        });
        let locate: LocateFn = Arc::new(move |obj| ErasedRef { addr: obj, ty });
        Self {
            kind: AccessKind::Object,
            ty,
            load,
            store: Some(store),
            locate: Some(locate),
        }
    }

    /// Member access through reference projections on the owner `O`.
    pub(crate) fn direct<O: 'static, F: AnyStorable>(
        get: fn(&O) -> &F,
        get_mut: Option<fn(&mut O) -> &mut F>,
    ) -> Self {
        let ty = TypeDescriptor::of::<F>();
        let load: LoadFn = Arc::new(move |obj| {
            let owner = unsafe { &*(obj as *const O) };
            AnyValue::new(get(owner).clone())
        });
        let store = get_mut.map(|gm| {
            let store: StoreFn = Arc::new(move |obj, value| {
                let v = cast_for_store::<F>(ty, value)?;
                let owner = unsafe { &mut *(obj as *mut O) };
                *gm(owner) = v;
                Ok(())
            });
            store
        });
        let locate: LocateFn = Arc::new(move |obj| {
            let owner = unsafe { &*(obj as *const O) };
            ErasedRef {
                addr: get(owner) as *const F as *mut u8,
                ty,
            }
        });
        Self {
            kind: AccessKind::Direct,
            ty,
            load,
            store,
            locate: Some(locate),
        }
    }

    /// Accessor-function access on the owner `O`; the value has no address.
    pub(crate) fn computed<O: 'static, F: AnyStorable>(
        get: fn(&O) -> F,
        set: Option<fn(&mut O, F)>,
    ) -> Self {
        let ty = TypeDescriptor::of::<F>();
        let load: LoadFn = Arc::new(move |obj| {
            let owner = unsafe { &*(obj as *const O) };
            AnyValue::new(get(owner))
        });
        let store = set.map(|s| {
            let store: StoreFn = Arc::new(move |obj, value| {
                let v = cast_for_store::<F>(ty, value)?;
                let owner = unsafe { &mut *(obj as *mut O) };
                s(owner, v);
                Ok(())
            });
            store
        });
        Self {
            kind: AccessKind::Computed,
            ty,
            load,
            store,
            locate: None,
        }
    }

    /// Which strategy this is.
    pub fn kind(&self) -> AccessKind {
        self.kind
    }

    /// Runtime type of the denoted value.
    pub fn value_type(&self) -> &'static TypeDescriptor {
        self.ty
    }

    /// Whether the value cannot be written through this access.
    pub fn is_read_only(&self) -> bool {
        self.store.is_none()
    }

    pub(crate) fn load(&self, obj: *const u8) -> AnyValue {
        (self.load)(obj)
    }

    pub(crate) fn store(&self, obj: *mut u8, value: &AnyValue) -> Result<(), ReflectError> {
        match &self.store {
            Some(store) => store(obj, value),
            None => Err(ReflectError::ReadOnly),
        }
    }

    /// Address and type of the denoted sub-object, when it has one.
    pub(crate) fn locate(&self, obj: *mut u8) -> Option<ErasedRef> {
        self.locate.as_ref().map(|l| l(obj))
    }
}

impl fmt::Debug for ValueAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueAccess")
            .field("kind", &self.kind)
            .field("ty", &self.ty.name())
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

/// Shared store-side conversion: exact type first, cast second.
fn cast_for_store<T: AnyStorable>(
    ty: &'static TypeDescriptor,
    value: &AnyValue,
) -> Result<T, ReflectError> {
    value.cast::<T>().ok_or(ReflectError::TypeMismatch {
        expected: ty.name(),
        found: value.type_name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    struct Sample {
        count: u32,
        label: String,
    }

    fn sample() -> Sample {
        Sample {
            count: 3,
            label: String::from("s"),
        }
    }

    #[test]
    fn test_direct_load_store() {
        let access = ValueAccess::direct::<Sample, u32>(
            |s| &s.count,
            Some(|s| &mut s.count),
        );
        assert_eq!(access.kind(), AccessKind::Direct);
        assert!(!access.is_read_only());
        assert!(access.value_type().is::<u32>());

        let mut s = sample();
        let obj = &mut s as *mut Sample as *mut u8;
        assert_eq!(*access.load(obj).get::<u32>(), 3);

        access.store(obj, &AnyValue::new(9u32)).unwrap();
        assert_eq!(s.count, 9);
    }

    #[test]
    fn test_direct_store_converts() {
        let access = ValueAccess::direct::<Sample, u32>(
            |s| &s.count,
            Some(|s| &mut s.count),
        );
        let mut s = sample();
        let obj = &mut s as *mut Sample as *mut u8;

        // numeric promotion applies on the store path
        access.store(obj, &AnyValue::new(12i64)).unwrap();
        assert_eq!(s.count, 12);

        // no conversion from text
        let err = access.store(obj, &AnyValue::new(String::from("x")));
        assert!(matches!(err, Err(ReflectError::TypeMismatch { .. })));
        assert_eq!(s.count, 12);
    }

    #[test]
    fn test_readonly_direct() {
        let access = ValueAccess::direct::<Sample, String>(|s| &s.label, None);
        assert!(access.is_read_only());

        let mut s = sample();
        let obj = &mut s as *mut Sample as *mut u8;
        let err = access.store(obj, &AnyValue::new(String::from("y")));
        assert!(matches!(err, Err(ReflectError::ReadOnly)));
        assert_eq!(s.label, "s");
    }

    #[test]
    fn test_computed_has_no_address() {
        let access = ValueAccess::computed::<Sample, u32>(|s| s.count * 2, None);
        assert_eq!(access.kind(), AccessKind::Computed);

        let mut s = sample();
        let obj = &mut s as *mut Sample as *mut u8;
        assert_eq!(*access.load(obj).get::<u32>(), 6);
        assert!(access.locate(obj).is_none());
    }

    #[test]
    fn test_object_access() {
        let access = ValueAccess::object::<Sample>();
        assert_eq!(access.kind(), AccessKind::Object);

        let mut s = sample();
        let obj = &mut s as *mut Sample as *mut u8;
        assert_eq!(access.load(obj).get::<Sample>(), &sample());

        let located = access.locate(obj).unwrap();
        assert_eq!(located.addr, obj);
        assert!(located.ty.is::<Sample>());

        let replacement = Sample {
            count: 1,
            label: String::from("r"),
        };
        access.store(obj, &AnyValue::new(replacement.clone())).unwrap();
        assert_eq!(s, replacement);
    }
}
