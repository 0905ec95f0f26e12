//! End-to-end tests for structure registration, merged field access, and
//! the reflection handle.

use vanta_reflect::{reflect_base, structure, AnyValue, Reflection, ReflectError};

// ============================================================================
// Fixture types
// ============================================================================

#[derive(Clone, PartialEq, Debug, Default)]
struct Base {
    id: i32,
}

#[derive(Clone, PartialEq, Debug, Default)]
struct Derived {
    base: Base,
    name: String,
}

#[derive(Clone, PartialEq, Debug, Default)]
struct Shadowing {
    base: Base,
    // redeclares the base field name
    id: i32,
}

fn setup() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        structure::register_named::<Base>("Base", |b| {
            b.field("id", |x: &Base| &x.id, |x: &mut Base| &mut x.id)
        });
        structure::register_named::<Derived>("Derived", |b| {
            b.field("name", |x: &Derived| &x.name, |x: &mut Derived| &mut x.name)
        });
        structure::register::<Shadowing>(|b| {
            b.field("id", |x: &Shadowing| &x.id, |x: &mut Shadowing| &mut x.id)
        });
        reflect_base!(Derived, base: Base);
        reflect_base!(Shadowing, base: Base);
    });
}

// ============================================================================
// Merged field lists
// ============================================================================

#[test]
fn test_merged_fields_base_then_own() {
    setup();
    let mut d = Derived::default();
    let r = Reflection::of(&mut d);

    let fields = r.fields();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name"]);
    assert!(fields[0].owner.is::<Base>());
    assert!(fields[1].owner.is::<Derived>());
}

#[test]
fn test_redeclared_name_has_exactly_one_entry() {
    setup();
    let mut s = Shadowing::default();
    let r = Reflection::of(&mut s);

    let fields = r.fields();
    let ids: Vec<_> = fields.iter().filter(|f| f.name == "id").collect();
    assert_eq!(ids.len(), 1);
    assert!(ids[0].owner.is::<Shadowing>());

    // writing through the merged accessor hits the derived member, not the
    // shadowed base member
    r.field("id").set_value(&AnyValue::new(41i32)).unwrap();
    assert_eq!(s.id, 41);
    assert_eq!(s.base.id, 0);
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_set_then_get_round_trip() {
    setup();
    let mut d = Derived::default();
    let r = Reflection::of(&mut d);

    r.field("id").set_value(&AnyValue::new(5i32)).unwrap();
    r.field("name")
        .set_value(&AnyValue::new(String::from("alpha")))
        .unwrap();

    assert_eq!(*r.field("id").value().get::<i32>(), 5);
    assert_eq!(r.field("name").value().get::<String>(), "alpha");

    // reading the underlying members directly agrees
    assert_eq!(d.base.id, 5);
    assert_eq!(d.name, "alpha");
}

#[test]
fn test_round_trip_preserves_equality() {
    setup();
    let mut d = Derived::default();
    let r = Reflection::of(&mut d);

    let written = AnyValue::new(String::from("exact"));
    r.field("name").set_value(&written).unwrap();
    assert_eq!(r.field("name").value(), written);
}

// ============================================================================
// Misses and read-only behavior
// ============================================================================

#[test]
fn test_unknown_member_never_panics() {
    setup();
    let mut d = Derived::default();
    let r = Reflection::of(&mut d);

    let missing = r.field("bogus");
    assert!(!missing.is_valid());
    assert!(missing.value().is_empty());
    assert!(r.method("bogus").is_none());
}

#[test]
fn test_shared_borrow_rejects_writes() {
    setup();
    let d = Derived::default();
    let r = Reflection::of_ref(&d);

    let result = r.field("id").set_value(&AnyValue::new(9i32));
    assert!(matches!(result, Err(ReflectError::ReadOnly)));
    assert_eq!(d.base.id, 0);
}

// ============================================================================
// Registry lookups
// ============================================================================

#[test]
fn test_permanent_names_resolve() {
    setup();
    let base = structure::find_by_name("Base").unwrap();
    assert!(base.is::<Base>());
    assert!(structure::find_by_name("Unknown").is_none());

    let derived = structure::find_by_name("Derived").unwrap();
    let s = structure::structure_of_dyn(derived).unwrap();
    assert_eq!(s.fields().len(), 1);
    assert_eq!(s.fields()[0].name(), "name");
}
