//! Structure registry
//!
//! Per-type member metadata. A type opts into reflection by registering a
//! builder callback ([`register`] / [`register_named`]); the callback runs
//! lazily, exactly once, on the first request for that type's structure,
//! and the resulting [`ReflectedStructure`] is immutable and freely
//! shareable across threads afterwards. The one-time build is published
//! through a `OnceCell`, so a racing reader either finds nothing started or
//! a fully formed structure, never a partial one.
//!
//! Base relationships are registered eagerly at module-setup time through
//! [`crate::reflect_base!`]; only the member structure is lazy.
//!
//! Ordinary misses (asking for an unregistered type, an unknown name) are
//! `None`. Registration defects — destroying a value whose type never
//! registered a destructor, destroying a non-pointer value — panic, because
//! silently degrading metadata would corrupt every downstream consumer.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};

use crate::access::ValueAccess;
use crate::any::{AnyStorable, AnyValue};
use crate::ty::TypeDescriptor;
use crate::wrapper::FieldIndex;
use crate::ReflectError;

/// Type-keyed annotation set attached to structures and fields.
///
/// Annotations are looked up by their own Rust type: at most one value per
/// annotation type is kept.
#[derive(Clone, Default)]
pub struct Annotations {
    entries: Vec<AnyValue>,
}

impl Annotations {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an annotation value, replacing any existing value of the same
    /// type.
    pub fn insert(&mut self, value: AnyValue) {
        let ty = value.value_type();
        self.entries.retain(|e| e.value_type() != ty);
        self.entries.push(value);
    }

    /// Look up an annotation by its type.
    pub fn get<M: 'static>(&self) -> Option<&M> {
        self.entries.iter().find_map(|e| e.try_get::<M>())
    }

    /// Whether an annotation of type `M` is present.
    pub fn has<M: 'static>(&self) -> bool {
        self.get::<M>().is_some()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One declared field: a name, an access strategy, optional annotations.
pub struct FieldDescriptor {
    name: String,
    access: ValueAccess,
    annotations: Option<Arc<Annotations>>,
}

impl FieldDescriptor {
    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field's access strategy.
    pub fn access(&self) -> &ValueAccess {
        &self.access
    }

    /// Annotations declared on the field.
    pub fn annotations(&self) -> Option<&Arc<Annotations>> {
        self.annotations.as_ref()
    }
}

/// Type-erased method callable: receiver address plus argument values.
pub type MethodFn =
    Arc<dyn Fn(*mut u8, &[AnyValue]) -> Result<AnyValue, ReflectError> + Send + Sync>;

/// One declared method.
pub struct MethodDescriptor {
    name: String,
    invoke: MethodFn,
}

impl MethodDescriptor {
    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invoke_fn(&self) -> MethodFn {
        Arc::clone(&self.invoke)
    }
}

/// A registered constructor. Creating yields a pointer-shaped [`AnyValue`]
/// owning a heap object; pass it to [`destroy`] to release it.
pub struct Constructor {
    arity: usize,
    create: Arc<dyn Fn(&[AnyValue]) -> Option<AnyValue> + Send + Sync>,
}

impl Constructor {
    /// Number of arguments the constructor takes.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Instantiate. `None` when the arguments do not fit.
    pub fn create(&self, args: &[AnyValue]) -> Option<AnyValue> {
        (self.create)(args)
    }
}

/// A registered destructor for heap objects made by a [`Constructor`].
pub struct Destructor {
    destroy: Arc<dyn Fn(AnyValue) + Send + Sync>,
}

/// The lazily-built, immutable member structure of one type.
pub struct ReflectedStructure {
    ty: &'static TypeDescriptor,
    fields: Vec<FieldDescriptor>,
    methods: Vec<MethodDescriptor>,
    constructors: Vec<Constructor>,
    destructor: Option<Destructor>,
    annotations: Arc<Annotations>,
}

impl ReflectedStructure {
    /// The described type.
    pub fn ty(&self) -> &'static TypeDescriptor {
        self.ty
    }

    /// Own (non-inherited) fields, in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Own methods, in declaration order.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// Registered constructors.
    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    /// Whether a destructor was registered.
    pub fn has_destructor(&self) -> bool {
        self.destructor.is_some()
    }

    /// Type-level annotations.
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub(crate) fn annotations_arc(&self) -> Arc<Annotations> {
        Arc::clone(&self.annotations)
    }
}

/// Chained builder collecting a type's members inside its registered
/// callback.
pub struct StructureBuilder<T: 'static> {
    fields: Vec<FieldDescriptor>,
    methods: Vec<MethodDescriptor>,
    constructors: Vec<Constructor>,
    destructor: Option<Destructor>,
    annotations: Annotations,
    _marker: PhantomData<fn() -> T>,
}

impl<T: AnyStorable> StructureBuilder<T> {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            destructor: None,
            annotations: Annotations::new(),
            _marker: PhantomData,
        }
    }

    /// Declare a read-write member field through a pair of projections.
    pub fn field<F: AnyStorable>(
        mut self,
        name: impl Into<String>,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            access: ValueAccess::direct::<T, F>(get, Some(get_mut)),
            annotations: None,
        });
        self
    }

    /// Declare a read-only member field.
    pub fn field_readonly<F: AnyStorable>(
        mut self,
        name: impl Into<String>,
        get: fn(&T) -> &F,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            access: ValueAccess::direct::<T, F>(get, None),
            annotations: None,
        });
        self
    }

    /// Declare a computed field backed by accessor functions.
    pub fn property<F: AnyStorable>(
        mut self,
        name: impl Into<String>,
        get: fn(&T) -> F,
        set: Option<fn(&mut T, F)>,
    ) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            access: ValueAccess::computed::<T, F>(get, set),
            annotations: None,
        });
        self
    }

    /// Declare a method invokable through reflection.
    pub fn method<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut T, &[AnyValue]) -> Result<AnyValue, ReflectError> + Send + Sync + 'static,
    {
        let invoke: MethodFn = Arc::new(move |obj, args| {
            let target = unsafe { &mut *(obj as *mut T) };
            body(target, args)
        });
        self.methods.push(MethodDescriptor {
            name: name.into(),
            invoke,
        });
        self
    }

    /// Declare a zero-argument constructor.
    pub fn constructor(mut self, make: fn() -> T) -> Self {
        let create = Arc::new(move |args: &[AnyValue]| {
            if !args.is_empty() {
                return None;
            }
            Some(AnyValue::from_ptr(Box::into_raw(Box::new(make()))))
        });
        self.constructors.push(Constructor { arity: 0, create });
        self
    }

    /// Declare an N-argument constructor. `make` returns `None` when the
    /// arguments do not fit.
    pub fn constructor_args<F>(mut self, arity: usize, make: F) -> Self
    where
        F: Fn(&[AnyValue]) -> Option<T> + Send + Sync + 'static,
    {
        let create = Arc::new(move |args: &[AnyValue]| {
            if args.len() != arity {
                return None;
            }
            make(args).map(|v| AnyValue::from_ptr(Box::into_raw(Box::new(v))))
        });
        self.constructors.push(Constructor { arity, create });
        self
    }

    /// Declare the destructor for heap objects of this type.
    pub fn destructor(mut self) -> Self {
        let destroy = Arc::new(|value: AnyValue| {
            let ptr = value.get_ptr::<T>();
            drop(unsafe { Box::from_raw(ptr) });
        });
        self.destructor = Some(Destructor { destroy });
        self
    }

    /// Attach a type-level annotation.
    pub fn meta<M: AnyStorable>(mut self, annotation: M) -> Self {
        self.annotations.insert(AnyValue::new(annotation));
        self
    }

    /// Attach an annotation to the most recently declared field.
    pub fn field_meta<M: AnyStorable>(mut self, annotation: M) -> Self {
        match self.fields.last_mut() {
            Some(field) => {
                let set = field
                    .annotations
                    .get_or_insert_with(|| Arc::new(Annotations::new()));
                Arc::make_mut(set).insert(AnyValue::new(annotation));
            }
            None => log::warn!("field_meta with no preceding field, ignoring"),
        }
        self
    }

    fn finish(self, ty: &'static TypeDescriptor) -> ReflectedStructure {
        ReflectedStructure {
            ty,
            fields: self.fields,
            methods: self.methods,
            constructors: self.constructors,
            destructor: self.destructor,
            annotations: Arc::new(self.annotations),
        }
    }
}

type BuildFn = Box<dyn Fn() -> ReflectedStructure + Send + Sync>;

/// Registry entry for one reflectable type.
struct TypeEntry {
    ty: &'static TypeDescriptor,
    build: BuildFn,
    object_access: ValueAccess,
    structure: OnceCell<ReflectedStructure>,
    index: OnceCell<FieldIndex>,
}

static TYPES: Lazy<DashMap<TypeId, &'static TypeEntry>> = Lazy::new(DashMap::new);
static NAMES: Lazy<DashMap<String, &'static TypeEntry>> = Lazy::new(DashMap::new);

/// Register the builder callback for `T`.
///
/// The callback runs lazily on the first structure request. Registering a
/// type twice is ignored with a warning.
pub fn register<T: AnyStorable>(build: fn(StructureBuilder<T>) -> StructureBuilder<T>) {
    register_entry::<T>(None, build);
}

/// Register `T` under a stable permanent name, additionally enabling
/// [`find_by_name`].
pub fn register_named<T: AnyStorable>(
    name: &str,
    build: fn(StructureBuilder<T>) -> StructureBuilder<T>,
) {
    register_entry::<T>(Some(name), build);
}

fn register_entry<T: AnyStorable>(
    name: Option<&str>,
    build: fn(StructureBuilder<T>) -> StructureBuilder<T>,
) {
    let ty = TypeDescriptor::of::<T>();
    let id = ty.type_id();
    if TYPES.contains_key(&id) {
        log::warn!("type {} registered twice, ignoring", ty.name());
        return;
    }

    let entry: &'static TypeEntry = Box::leak(Box::new(TypeEntry {
        ty,
        build: Box::new(move || build(StructureBuilder::<T>::new()).finish(ty)),
        object_access: ValueAccess::object::<T>(),
        structure: OnceCell::new(),
        index: OnceCell::new(),
    }));
    TYPES.insert(id, entry);

    if let Some(name) = name {
        if NAMES.insert(name.to_owned(), entry).is_some() {
            log::warn!("permanent name {name:?} registered twice, keeping the newest");
        }
    }
}

fn entry_of(ty: &'static TypeDescriptor) -> Option<&'static TypeEntry> {
    TYPES.get(&ty.decay().type_id()).map(|e| *e)
}

/// The structure of `T`, building it on first request.
pub fn structure_of<T: 'static>() -> Option<&'static ReflectedStructure> {
    structure_of_dyn(TypeDescriptor::of::<T>())
}

/// The structure for a descriptor, building it on first request.
///
/// Pointer-shaped descriptors resolve to their pointee's structure. Returns
/// `None` for unregistered types.
pub fn structure_of_dyn(ty: &'static TypeDescriptor) -> Option<&'static ReflectedStructure> {
    let entry = entry_of(ty)?;
    Some(entry.structure.get_or_init(|| {
        log::debug!("building structure for {}", entry.ty.name());
        (entry.build)()
    }))
}

/// The merged name index for a descriptor, building it (and any structures
/// it depends on) on first request.
pub(crate) fn index_of(ty: &'static TypeDescriptor) -> Option<&'static FieldIndex> {
    let entry = entry_of(ty)?;
    Some(entry.index.get_or_init(|| FieldIndex::build(entry.ty)))
}

/// Whole-object access strategy for a registered descriptor.
pub(crate) fn object_access_of(ty: &'static TypeDescriptor) -> Option<ValueAccess> {
    entry_of(ty).map(|e| e.object_access.clone())
}

/// Type-level annotations for a registered descriptor.
pub(crate) fn annotations_of(ty: &'static TypeDescriptor) -> Option<Arc<Annotations>> {
    structure_of_dyn(ty).map(|s| s.annotations_arc())
}

/// Look up a type registered under a permanent name.
pub fn find_by_name(name: &str) -> Option<&'static TypeDescriptor> {
    NAMES.get(name).map(|e| e.ty)
}

/// Every registered type descriptor, in no particular order.
pub fn registered_types() -> Vec<&'static TypeDescriptor> {
    TYPES.iter().map(|e| e.ty).collect()
}

/// Instantiate `T` through a registered constructor matching `args`.
pub fn create<T: 'static>(args: &[AnyValue]) -> Option<AnyValue> {
    create_dyn(TypeDescriptor::of::<T>(), args)
}

/// Instantiate by descriptor through a registered constructor matching
/// `args`. The result is pointer-shaped and owned by the caller; release it
/// with [`destroy`].
pub fn create_dyn(ty: &'static TypeDescriptor, args: &[AnyValue]) -> Option<AnyValue> {
    let structure = structure_of_dyn(ty)?;
    structure
        .constructors()
        .iter()
        .filter(|c| c.arity() == args.len())
        .find_map(|c| c.create(args))
}

/// Destroy a heap object held by a pointer-shaped value.
///
/// # Panics
///
/// Panics when the value is not pointer-shaped, when its pointee type was
/// never registered, or when the registered structure has no destructor.
/// All three indicate a registration defect, not an ordinary runtime
/// condition.
pub fn destroy(value: AnyValue) {
    let ty = match value.value_type() {
        Some(ty) => ty,
        None => panic!("destroy: empty value"),
    };
    if !ty.is_pointer() {
        panic!("destroy: value of type {} is not pointer-shaped", ty.name());
    }
    let pointee = ty.pointee().expect("pointer-shaped descriptor has a pointee");
    let structure = match structure_of_dyn(pointee) {
        Some(s) => s,
        None => panic!("destroy: type {} is not registered", pointee.name()),
    };
    match &structure.destructor {
        Some(d) => (d.destroy)(value),
        None => panic!(
            "destroy: type {} has no registered destructor",
            pointee.name()
        ),
    }
}
