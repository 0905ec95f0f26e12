//! Tests for inheritance casts and the value container's casting rules.

use vanta_reflect::{
    can_cast, cast_raw, convert, reflect_base, upcast, AnyValue, TypeDescriptor,
};

// ============================================================================
// Fixture hierarchy: Component <- Behavior <- Script
// ============================================================================

#[derive(Clone, PartialEq, Debug, Default)]
struct Component {
    enabled: bool,
}

#[derive(Clone, PartialEq, Debug, Default)]
struct Behavior {
    component: Component,
    priority: i32,
}

#[derive(Clone, PartialEq, Debug, Default)]
struct Script {
    marker: u64,
    behavior: Behavior,
}

fn setup() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        reflect_base!(Behavior, component: Component);
        reflect_base!(Script, behavior: Behavior);
    });
}

// ============================================================================
// Inheritance casts
// ============================================================================

#[test]
fn test_upcast_to_every_base_and_back() {
    setup();
    let mut script = Script::default();
    let script_addr = &mut script as *mut Script as *mut u8;

    let script_ty = TypeDescriptor::of::<Script>();
    let behavior_ty = TypeDescriptor::of::<Behavior>();
    let component_ty = TypeDescriptor::of::<Component>();

    for &base_ty in &[behavior_ty, component_ty] {
        let up = cast_raw(script_ty, base_ty, script_addr).unwrap();
        // down-casting the adjusted address recovers the original exactly
        let down = cast_raw(base_ty, script_ty, up).unwrap();
        assert_eq!(down, script_addr);
    }
}

#[test]
fn test_upcast_reads_the_embedded_base() {
    setup();
    let script = Script {
        marker: 1,
        behavior: Behavior {
            component: Component { enabled: true },
            priority: 9,
        },
    };

    let behavior: &Behavior = upcast(&script).unwrap();
    assert_eq!(behavior.priority, 9);

    let component: &Component = upcast(&script).unwrap();
    assert!(component.enabled);
}

#[test]
fn test_castability_probe_matches_cast() {
    setup();
    let script_ty = TypeDescriptor::of::<Script>();
    let component_ty = TypeDescriptor::of::<Component>();
    let unrelated = TypeDescriptor::of::<String>();

    assert!(can_cast(script_ty, component_ty));
    assert!(can_cast(component_ty, script_ty));
    assert!(!can_cast(script_ty, unrelated));
    assert!(!can_cast(unrelated, script_ty));
}

// ============================================================================
// Any value casting
// ============================================================================

#[test]
fn test_any_exact_and_promoted() {
    let v = AnyValue::new(42i32);
    assert_eq!(*v.get::<i32>(), 42);
    assert_eq!(v.cast::<f64>(), Some(42.0));
}

#[test]
fn test_text_needs_an_explicit_converter() {
    #[derive(Clone, PartialEq, Debug)]
    struct Hex(String);

    let v = AnyValue::new(Hex(String::from("2a")));
    assert!(!v.can_cast::<i32>());
    assert_eq!(v.cast::<i32>(), None);

    convert::register(|h: &Hex| i32::from_str_radix(&h.0, 16).unwrap_or(0));

    assert!(v.can_cast::<i32>());
    assert_eq!(v.cast::<i32>(), Some(42));
}

#[test]
fn test_converter_output_is_the_function_output() {
    #[derive(Clone, PartialEq, Debug)]
    struct Meters(f64);
    #[derive(Clone, PartialEq, Debug)]
    struct Feet(f64);

    fn to_feet(m: &Meters) -> Feet {
        Feet(m.0 * 3.28084)
    }
    convert::register(to_feet);

    for value in [0.0, 1.0, -2.5, 1000.0] {
        let v = AnyValue::new(Meters(value));
        assert_eq!(v.cast::<Feet>(), Some(to_feet(&Meters(value))));
    }
}
