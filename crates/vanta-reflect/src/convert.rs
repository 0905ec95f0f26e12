//! Cross-type conversion registry
//!
//! The converter table is the one open extension surface of the value
//! layer: consumers register a function per `(source, destination)` type
//! pair and [`AnyValue::cast`] consults it after identity and numeric
//! promotion both fail. Registration is a startup-time operation; the table
//! is read-mostly once the registration burst has completed.
//!
//! [`AnyValue::cast`]: crate::any::AnyValue::cast

use std::any::TypeId;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::any::{AnyStorable, AnyValue};

type ConvertFn = Box<dyn Fn(&AnyValue) -> Option<AnyValue> + Send + Sync>;

struct ConverterRegistry {
    map: RwLock<FxHashMap<(TypeId, TypeId), ConvertFn>>,
}

static CONVERTERS: Lazy<ConverterRegistry> = Lazy::new(|| ConverterRegistry {
    map: RwLock::new(FxHashMap::default()),
});

/// Register a conversion from `S` to `D`.
///
/// Replaces (with a warning) any previously registered converter for the
/// same pair. Intended to run during startup, before concurrent lookups
/// begin.
pub fn register<S, D, F>(convert: F)
where
    S: AnyStorable,
    D: AnyStorable,
    F: Fn(&S) -> D + Send + Sync + 'static,
{
    let key = (TypeId::of::<S>(), TypeId::of::<D>());
    let thunk: ConvertFn =
        Box::new(move |any| any.try_get::<S>().map(|s| AnyValue::new(convert(s))));

    let mut map = CONVERTERS.map.write();
    if map.insert(key, thunk).is_some() {
        log::warn!(
            "converter {} -> {} registered twice, keeping the newest",
            std::any::type_name::<S>(),
            std::any::type_name::<D>()
        );
    }
}

/// Run the registered converter for `(value's type, dst)`, if any.
pub(crate) fn convert(value: &AnyValue, dst: TypeId) -> Option<AnyValue> {
    let src = value.convert_key()?;
    let map = CONVERTERS.map.read();
    map.get(&(src, dst)).and_then(|f| f(value))
}

/// Whether a converter exists for the pair.
pub(crate) fn is_registered(src: TypeId, dst: TypeId) -> bool {
    CONVERTERS.map.read().contains_key(&(src, dst))
}

#[cfg(test)]
mod tests {
    use super::*;

    // conversions registered here are process-wide; each test uses its own
    // source or destination type to stay independent

    #[derive(Clone, PartialEq, Debug)]
    struct Celsius(f64);

    #[derive(Clone, PartialEq, Debug)]
    struct Fahrenheit(f64);

    #[test]
    fn test_registered_converter_applies() {
        register(|c: &Celsius| Fahrenheit(c.0 * 9.0 / 5.0 + 32.0));

        let v = AnyValue::new(Celsius(100.0));
        assert!(v.can_cast::<Fahrenheit>());
        assert_eq!(v.cast::<Fahrenheit>(), Some(Fahrenheit(212.0)));
    }

    #[test]
    fn test_unregistered_pair_fails() {
        let v = AnyValue::new(Fahrenheit(70.0));
        assert!(!v.can_cast::<Celsius>());
        assert_eq!(v.cast::<Celsius>(), None);
    }

    #[test]
    fn test_converter_output_matches_function() {
        #[derive(Clone, PartialEq, Debug)]
        struct Id(u32);

        register(|id: &Id| format!("id-{}", id.0));

        let v = AnyValue::new(Id(9));
        assert_eq!(v.cast::<String>(), Some(String::from("id-9")));
    }
}
