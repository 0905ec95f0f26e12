//! Type-erased value container
//!
//! [`AnyValue`] holds a single value of any storable type together with its
//! [`TypeDescriptor`]. Small trivially-copyable primitives live inline in an
//! aligned buffer; everything else is boxed behind a forwarding trait so
//! clone, equality, drop, and debug all reach the held type's own
//! implementations rather than a raw byte copy.
//!
//! Retrieval comes in two flavors. The strict path ([`AnyValue::get`])
//! requires the stored type to match exactly and panics otherwise; probe
//! first with [`AnyValue::try_get`]. The casting path ([`AnyValue::cast`])
//! tries identity, then built-in numeric promotion, then the process-wide
//! converter registry, and reports failure as `None`.

use std::any::{Any, TypeId};
use std::fmt;
use std::mem;
use std::ptr;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::convert;
use crate::ty::TypeDescriptor;

/// Bound for values storable in an [`AnyValue`].
///
/// Blanket-implemented; container operations forward to these impls.
pub trait AnyStorable: Any + Send + Sync + Clone + PartialEq + fmt::Debug {}

impl<T: Any + Send + Sync + Clone + PartialEq + fmt::Debug> AnyStorable for T {}

/// Inline buffer size in 8-byte words. Covers every primitive the inline
/// table admits, with alignment for all of them.
const INLINE_WORDS: usize = 3;

/// Per-type operations for inline-stored primitives.
struct InlineOps {
    size: usize,
    eq: unsafe fn(*const u8, *const u8) -> bool,
    debug: unsafe fn(*const u8, &mut fmt::Formatter<'_>) -> fmt::Result,
}

unsafe fn eq_raw<T: PartialEq>(a: *const u8, b: *const u8) -> bool {
    *(a as *const T) == *(b as *const T)
}

unsafe fn debug_raw<T: fmt::Debug>(p: *const u8, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&*(p as *const T), f)
}

macro_rules! pod_entry {
    ($map:ident, $t:ty) => {{
        static OPS: InlineOps = InlineOps {
            size: mem::size_of::<$t>(),
            eq: eq_raw::<$t>,
            debug: debug_raw::<$t>,
        };
        $map.insert(TypeId::of::<$t>(), &OPS);
    }};
}

/// Types eligible for inline storage: the `Copy` primitives whose size and
/// alignment fit the inline buffer. 128-bit integers box.
static INLINE_TABLE: Lazy<FxHashMap<TypeId, &'static InlineOps>> = Lazy::new(|| {
    let mut m = FxHashMap::default();
    pod_entry!(m, bool);
    pod_entry!(m, char);
    pod_entry!(m, i8);
    pod_entry!(m, i16);
    pod_entry!(m, i32);
    pod_entry!(m, i64);
    pod_entry!(m, isize);
    pod_entry!(m, u8);
    pod_entry!(m, u16);
    pod_entry!(m, u32);
    pod_entry!(m, u64);
    pod_entry!(m, usize);
    pod_entry!(m, f32);
    pod_entry!(m, f64);
    m
});

fn inline_ops(id: TypeId) -> Option<&'static InlineOps> {
    INLINE_TABLE.get(&id).copied()
}

/// Boxed storage: forwards container operations to the held type.
trait BoxedValue: Send + Sync {
    fn clone_boxed(&self) -> Box<dyn BoxedValue>;
    fn eq_other(&self, other: &dyn Any) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T: AnyStorable> BoxedValue for T {
    fn clone_boxed(&self) -> Box<dyn BoxedValue> {
        Box::new(self.clone())
    }

    fn eq_other(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|o| self == o)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

enum Storage {
    Empty,
    Inline {
        data: [u64; INLINE_WORDS],
        ops: &'static InlineOps,
    },
    /// Type-erased object pointer; the descriptor is pointer-shaped. The
    /// container never owns or drops the pointee — see
    /// [`crate::structure::destroy`].
    Ptr { addr: usize },
    Boxed(Box<dyn BoxedValue>),
}

/// A type-safe container for single values of any storable type.
pub struct AnyValue {
    ty: Option<&'static TypeDescriptor>,
    storage: Storage,
}

impl AnyValue {
    /// The empty container.
    pub fn empty() -> Self {
        Self {
            ty: None,
            storage: Storage::Empty,
        }
    }

    /// Wrap a value, moving it into the container.
    pub fn new<T: AnyStorable>(value: T) -> Self {
        let ty = TypeDescriptor::of::<T>();
        if let Some(ops) = inline_ops(TypeId::of::<T>()) {
            debug_assert!(ops.size <= INLINE_WORDS * 8);
            let mut data = [0u64; INLINE_WORDS];
            // the table only admits Copy primitives, so a byte copy is the
            // value's own copy semantics
            unsafe {
                ptr::copy_nonoverlapping(
                    &value as *const T as *const u8,
                    data.as_mut_ptr() as *mut u8,
                    mem::size_of::<T>(),
                );
            }
            mem::forget(value);
            Self {
                ty: Some(ty),
                storage: Storage::Inline { data, ops },
            }
        } else {
            Self {
                ty: Some(ty),
                storage: Storage::Boxed(Box::new(value)),
            }
        }
    }

    /// Wrap an object pointer. The result is pointer-shaped: it compares by
    /// address, clones by address, and never drops the pointee.
    pub fn from_ptr<T: 'static>(ptr: *mut T) -> Self {
        Self {
            ty: Some(TypeDescriptor::of::<T>().pointer()),
            storage: Storage::Ptr { addr: ptr as usize },
        }
    }

    /// Whether the container holds no value.
    pub fn is_empty(&self) -> bool {
        matches!(self.storage, Storage::Empty)
    }

    /// The descriptor of the contained value, or `None` when empty.
    pub fn value_type(&self) -> Option<&'static TypeDescriptor> {
        self.ty
    }

    /// Name of the contained type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.ty.map_or("<empty>", |t| t.name())
    }

    /// Borrow the contained value if its type is exactly `T`.
    pub fn try_get<T: 'static>(&self) -> Option<&T> {
        match &self.storage {
            Storage::Inline { data, .. } => {
                if self.ty.is_some_and(|t| t.is::<T>()) {
                    Some(unsafe { &*(data.as_ptr() as *const T) })
                } else {
                    None
                }
            }
            Storage::Boxed(b) => b.as_any().downcast_ref::<T>(),
            Storage::Ptr { .. } | Storage::Empty => None,
        }
    }

    /// Mutably borrow the contained value if its type is exactly `T`.
    pub fn try_get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        match &mut self.storage {
            Storage::Inline { data, .. } => {
                if self.ty.is_some_and(|t| t.is::<T>()) {
                    Some(unsafe { &mut *(data.as_mut_ptr() as *mut T) })
                } else {
                    None
                }
            }
            Storage::Boxed(b) => b.as_any_mut().downcast_mut::<T>(),
            Storage::Ptr { .. } | Storage::Empty => None,
        }
    }

    /// Borrow the contained value with the exact type `T`.
    ///
    /// # Panics
    ///
    /// Panics when the stored type is not exactly `T`. Probe with
    /// [`try_get`](Self::try_get) first when a mismatch is an expected
    /// condition.
    pub fn get<T: 'static>(&self) -> &T {
        match self.try_get::<T>() {
            Some(v) => v,
            None => panic!(
                "AnyValue::get::<{}> on a value of type {}",
                std::any::type_name::<T>(),
                self.type_name()
            ),
        }
    }

    /// The contained object pointer, when pointer-shaped with pointee `T`.
    pub fn try_get_ptr<T: 'static>(&self) -> Option<*mut T> {
        if let Storage::Ptr { addr } = self.storage {
            let ty = self.ty?;
            if ty.is_pointer() && ty.pointee().is_some_and(|p| p.is::<T>()) {
                return Some(addr as *mut T);
            }
        }
        None
    }

    /// The contained object pointer with pointee exactly `T`.
    ///
    /// # Panics
    ///
    /// Panics when the value is not a pointer to `T`.
    pub fn get_ptr<T: 'static>(&self) -> *mut T {
        match self.try_get_ptr::<T>() {
            Some(p) => p,
            None => panic!(
                "AnyValue::get_ptr::<{}> on a value of type {}",
                std::any::type_name::<T>(),
                self.type_name()
            ),
        }
    }

    /// Erased pointee address and type, when pointer-shaped.
    pub(crate) fn ptr_target(&self) -> Option<(*mut u8, &'static TypeDescriptor)> {
        if let Storage::Ptr { addr } = self.storage {
            Some((addr as *mut u8, self.ty?.pointee()?))
        } else {
            None
        }
    }

    /// Replace the contained value.
    pub fn set<T: AnyStorable>(&mut self, value: T) {
        *self = AnyValue::new(value);
    }

    /// Cast the contained value to `T`.
    ///
    /// Tries identity, then built-in numeric promotion, then a registered
    /// converter for the `(stored, T)` pair. Returns `None` when none apply.
    pub fn cast<T: AnyStorable>(&self) -> Option<T> {
        if let Some(v) = self.try_get::<T>() {
            return Some(v.clone());
        }
        if let Some(v) = self.numeric_cast::<T>() {
            return Some(v);
        }
        convert::convert(self, TypeId::of::<T>()).and_then(|any| any.try_get::<T>().cloned())
    }

    /// Test castability to `T` without materializing a value.
    pub fn can_cast<T: AnyStorable>(&self) -> bool {
        if self.try_get::<T>().is_some() {
            return true;
        }
        if self.numeric().is_some() && NUMERIC_TARGETS.contains_key(&TypeId::of::<T>()) {
            return true;
        }
        match self.convert_key() {
            Some(src) => convert::is_registered(src, TypeId::of::<T>()),
            None => false,
        }
    }

    /// Converter-registry key of the stored type; pointer-shaped and empty
    /// values take part in no conversions.
    pub(crate) fn convert_key(&self) -> Option<TypeId> {
        self.ty.filter(|t| !t.is_pointer()).map(|t| t.type_id())
    }

    fn numeric(&self) -> Option<Numeric> {
        macro_rules! probe {
            ($slf:expr, $($t:ty => $variant:ident as $cast:ty),* $(,)?) => {
                $(
                    if let Some(v) = $slf.try_get::<$t>() {
                        return Some(Numeric::$variant(*v as $cast));
                    }
                )*
            };
        }
        probe!(
            self,
            i8 => Signed as i64,
            i16 => Signed as i64,
            i32 => Signed as i64,
            i64 => Signed as i64,
            isize => Signed as i64,
            u8 => Unsigned as u64,
            u16 => Unsigned as u64,
            u32 => Unsigned as u64,
            u64 => Unsigned as u64,
            usize => Unsigned as u64,
            f32 => Float as f64,
            f64 => Float as f64,
        );
        if let Some(b) = self.try_get::<bool>() {
            return Some(Numeric::Unsigned(*b as u64));
        }
        None
    }

    fn numeric_cast<T: 'static + AnyStorable>(&self) -> Option<T> {
        let n = self.numeric()?;
        let make = NUMERIC_TARGETS.get(&TypeId::of::<T>())?;
        make(n).try_get::<T>().cloned()
    }
}

/// Widened view of a stored numeric primitive.
#[derive(Clone, Copy)]
enum Numeric {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

macro_rules! numeric_target {
    ($map:ident, $t:ty) => {{
        fn make(n: Numeric) -> AnyValue {
            let v = match n {
                Numeric::Signed(v) => v as $t,
                Numeric::Unsigned(v) => v as $t,
                Numeric::Float(v) => v as $t,
            };
            AnyValue::new(v)
        }
        $map.insert(TypeId::of::<$t>(), make as fn(Numeric) -> AnyValue);
    }};
}

/// Numeric promotion targets: every integer and float primitive. `bool` is
/// a promotion source but not a target.
static NUMERIC_TARGETS: Lazy<FxHashMap<TypeId, fn(Numeric) -> AnyValue>> = Lazy::new(|| {
    let mut m = FxHashMap::default();
    numeric_target!(m, i8);
    numeric_target!(m, i16);
    numeric_target!(m, i32);
    numeric_target!(m, i64);
    numeric_target!(m, isize);
    numeric_target!(m, u8);
    numeric_target!(m, u16);
    numeric_target!(m, u32);
    numeric_target!(m, u64);
    numeric_target!(m, usize);
    numeric_target!(m, f32);
    numeric_target!(m, f64);
    m
});

impl Clone for AnyValue {
    fn clone(&self) -> Self {
        let storage = match &self.storage {
            Storage::Empty => Storage::Empty,
            Storage::Inline { data, ops } => Storage::Inline { data: *data, ops },
            Storage::Ptr { addr } => Storage::Ptr { addr: *addr },
            Storage::Boxed(b) => Storage::Boxed(b.clone_boxed()),
        };
        Self {
            ty: self.ty,
            storage,
        }
    }
}

impl PartialEq for AnyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self.ty, other.ty) {
            (None, None) => return true,
            (Some(a), Some(b)) if ptr::eq(a, b) => {}
            _ => return false,
        }
        match (&self.storage, &other.storage) {
            (Storage::Empty, Storage::Empty) => true,
            (Storage::Inline { data: a, ops }, Storage::Inline { data: b, .. }) => unsafe {
                (ops.eq)(a.as_ptr() as *const u8, b.as_ptr() as *const u8)
            },
            (Storage::Ptr { addr: a }, Storage::Ptr { addr: b }) => a == b,
            (Storage::Boxed(a), Storage::Boxed(b)) => a.eq_other(b.as_any()),
            _ => false,
        }
    }
}

impl Default for AnyValue {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.storage {
            Storage::Empty => write!(f, "AnyValue(<empty>)"),
            Storage::Inline { data, ops } => {
                write!(f, "AnyValue({}: ", self.type_name())?;
                unsafe { (ops.debug)(data.as_ptr() as *const u8, f)? };
                write!(f, ")")
            }
            Storage::Ptr { addr } => {
                write!(f, "AnyValue({} @ {:#x})", self.type_name(), addr)
            }
            Storage::Boxed(b) => {
                write!(f, "AnyValue({}: ", self.type_name())?;
                b.debug(f)?;
                write!(f, ")")
            }
        }
    }
}
