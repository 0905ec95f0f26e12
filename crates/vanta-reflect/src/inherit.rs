//! Base/derived relationships and pointer-adjusting casts
//!
//! Rust has no language-level inheritance, so polymorphic reflection models
//! it as base-struct embedding: a derived type carries its base as a leading
//! (or interior) field, and the byte offset of that field is the pointer
//! delta between the two layouts. Relationships form an explicit directed
//! graph of [`InheritanceEdge`]s attached to each [`TypeDescriptor`] in both
//! directions, and casts are resolved by graph search that accumulates
//! offsets along the discovered path.
//!
//! Edges are append-only and registered once per `(type, base)` pair during
//! module setup, before concurrent reads begin. Use [`reflect_base!`] rather
//! than calling [`register_base`] directly; the macro proves at compile time
//! that the named field really has the base type.
//!
//! [`reflect_base!`]: crate::reflect_base

use std::ptr;

use crate::ty::TypeDescriptor;

/// A recorded base/derived relationship plus the byte delta needed to
/// convert a pointer between the two layouts.
#[derive(Debug, Clone, Copy)]
pub struct InheritanceEdge {
    /// The related type: a base on the derived side, a derived type on the
    /// base side.
    pub ty: &'static TypeDescriptor,
    /// Byte delta from the derived layout to the base layout.
    pub offset: isize,
}

/// Record that `B` is embedded in `D` at `offset` bytes.
///
/// Appends one edge to `D`'s base list and the mirrored edge to `B`'s
/// derived list. Registering the same `(D, B)` pair twice is ignored with a
/// warning.
///
/// # Safety
///
/// `offset` must be the byte offset of a field of type `B` inside `D`
/// (`core::mem::offset_of!`). A wrong offset makes every cast between the
/// two types produce a dangling pointer. The [`reflect_base!`] macro
/// discharges this obligation.
///
/// [`reflect_base!`]: crate::reflect_base
pub unsafe fn register_base<D: 'static, B: 'static>(offset: usize) {
    let derived = TypeDescriptor::of::<D>();
    let base = TypeDescriptor::of::<B>();
    register_base_dyn(derived, base, offset as isize);
}

pub(crate) fn register_base_dyn(
    derived: &'static TypeDescriptor,
    base: &'static TypeDescriptor,
    offset: isize,
) {
    {
        let mut bases = derived.bases.write();
        if bases.iter().any(|e| ptr::eq(e.ty, base)) {
            log::warn!(
                "base {} already registered for {}, ignoring",
                base.name(),
                derived.name()
            );
            return;
        }
        bases.push(InheritanceEdge { ty: base, offset });
    }
    base.derived.write().push(InheritanceEdge { ty: derived, offset });
}

/// Check whether a pointer of type `src` can be adjusted to type `dst`.
///
/// Performs the same graph search as [`cast_raw`] without materializing a
/// pointer.
pub fn can_cast(src: &'static TypeDescriptor, dst: &'static TypeDescriptor) -> bool {
    resolve_offset(src, dst).is_some()
}

/// Adjust `addr` from the layout of `src` to the layout of `dst`.
///
/// Searches base edges for up-casts, then derived edges for down-casts,
/// accumulating offsets along the path. Returns `None` when no path exists
/// or when distinct paths disagree on the cumulative offset. Failure is
/// always `None`, never a panic.
pub fn cast_raw(
    src: &'static TypeDescriptor,
    dst: &'static TypeDescriptor,
    addr: *mut u8,
) -> Option<*mut u8> {
    if addr.is_null() {
        return None;
    }
    let offset = resolve_offset(src, dst)?;
    Some(addr.wrapping_offset(offset))
}

/// Up-cast a reference to an embedded base.
///
/// Only the base direction is searched: a derived target never resolves
/// here, so the returned reference always lies inside `obj`.
pub fn upcast<D: 'static, B: 'static>(obj: &D) -> Option<&B> {
    let src = TypeDescriptor::of::<D>();
    let dst = TypeDescriptor::of::<B>();
    let offset = resolve_offset_up(src, dst)?;
    let addr = (obj as *const D as *const u8).wrapping_offset(offset);
    Some(unsafe { &*(addr as *const B) })
}

/// Up-cast a mutable reference to an embedded base.
pub fn upcast_mut<D: 'static, B: 'static>(obj: &mut D) -> Option<&mut B> {
    let src = TypeDescriptor::of::<D>();
    let dst = TypeDescriptor::of::<B>();
    let offset = resolve_offset_up(src, dst)?;
    let addr = (obj as *mut D as *mut u8).wrapping_offset(offset);
    Some(unsafe { &mut *(addr as *mut B) })
}

/// Down-cast a base reference back to the deriving type.
///
/// # Safety
///
/// `obj` must actually be the base sub-object of a live `D`; the adjusted
/// reference is dereferenceable only in that case. The reflection layer
/// tracks the concrete type of reflected objects and upholds this itself.
pub unsafe fn downcast<B: 'static, D: 'static>(obj: &B) -> Option<&D> {
    let src = TypeDescriptor::of::<B>();
    let dst = TypeDescriptor::of::<D>();
    let addr = cast_raw(src, dst, obj as *const B as *mut u8)?;
    Some(&*(addr as *const D))
}

/// Sum the edge offsets along every simple path from `src` to `dst`.
///
/// Up direction first; the down direction is only searched when no upward
/// path exists. Distinct paths that disagree on the cumulative offset mean
/// the relationship is ambiguous (a diamond with differing deltas); the
/// cast is refused loudly instead of committing to an arbitrary path.
fn resolve_offset(src: &'static TypeDescriptor, dst: &'static TypeDescriptor) -> Option<isize> {
    if ptr::eq(src, dst) {
        return Some(0);
    }

    let mut offsets = Vec::new();
    let mut path = Vec::new();
    collect_offsets(src, dst, Direction::Up, 0, &mut path, &mut offsets);
    if offsets.is_empty() {
        collect_offsets(src, dst, Direction::Down, 0, &mut path, &mut offsets);
    }
    agreed_offset(src, dst, &offsets)
}

/// Like [`resolve_offset`], but searching only the base direction.
fn resolve_offset_up(src: &'static TypeDescriptor, dst: &'static TypeDescriptor) -> Option<isize> {
    if ptr::eq(src, dst) {
        return Some(0);
    }

    let mut offsets = Vec::new();
    let mut path = Vec::new();
    collect_offsets(src, dst, Direction::Up, 0, &mut path, &mut offsets);
    agreed_offset(src, dst, &offsets)
}

fn agreed_offset(
    src: &'static TypeDescriptor,
    dst: &'static TypeDescriptor,
    offsets: &[isize],
) -> Option<isize> {
    let first = *offsets.first()?;
    if offsets.iter().any(|&o| o != first) {
        log::warn!(
            "ambiguous cast {} -> {}: {} paths with differing offsets, refusing",
            src.name(),
            dst.name(),
            offsets.len()
        );
        return None;
    }
    Some(first)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

fn collect_offsets(
    from: &'static TypeDescriptor,
    to: &'static TypeDescriptor,
    direction: Direction,
    acc: isize,
    path: &mut Vec<*const TypeDescriptor>,
    out: &mut Vec<isize>,
) {
    if ptr::eq(from, to) {
        out.push(acc);
        return;
    }

    let edges = match direction {
        Direction::Up => from.base_edges(),
        Direction::Down => from.derived_edges(),
    };
    for edge in edges {
        let key = edge.ty as *const TypeDescriptor;
        if path.contains(&key) {
            continue;
        }
        let delta = match direction {
            Direction::Up => edge.offset,
            Direction::Down => -edge.offset,
        };
        path.push(key);
        collect_offsets(edge.ty, to, direction, acc + delta, path, out);
        path.pop();
    }
}

/// Record an embedded base relationship, proving the field type at compile
/// time.
///
/// ```ignore
/// struct Base { id: i32 }
/// struct Derived { base: Base, name: String }
///
/// reflect_base!(Derived, base: Base);
/// ```
#[macro_export]
macro_rules! reflect_base {
    ($derived:ty, $field:ident : $base:ty) => {{
        // the witness fails to compile unless the field really is $base
        const _: fn(&$derived) -> &$base = |d| &d.$field;
        unsafe {
            $crate::inherit::register_base::<$derived, $base>(::core::mem::offset_of!(
                $derived, $field
            ));
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug, Default)]
    struct Root {
        tag: u32,
    }

    #[derive(Clone, PartialEq, Debug, Default)]
    struct Mid {
        root: Root,
        extra: u64,
    }

    #[derive(Clone, PartialEq, Debug, Default)]
    struct Leaf {
        pad: u64,
        mid: Mid,
    }

    fn setup() {
        use std::sync::Once;
        static ONCE: Once = Once::new();
        ONCE.call_once(|| {
            reflect_base!(Mid, root: Root);
            reflect_base!(Leaf, mid: Mid);
        });
    }

    #[test]
    fn test_edges_recorded_both_directions() {
        setup();
        let mid = TypeDescriptor::of::<Mid>();
        let root = TypeDescriptor::of::<Root>();
        assert!(mid.base_edges().iter().any(|e| ptr::eq(e.ty, root)));
        assert!(root.derived_edges().iter().any(|e| ptr::eq(e.ty, mid)));
    }

    #[test]
    fn test_upcast_and_downcast_recover_address() {
        setup();
        let mut leaf = Leaf::default();
        let leaf_addr = &mut leaf as *mut Leaf as *mut u8;

        let src = TypeDescriptor::of::<Leaf>();
        let dst = TypeDescriptor::of::<Root>();

        // multi-hop up-cast Leaf -> Mid -> Root
        let root_addr = cast_raw(src, dst, leaf_addr).unwrap();
        let expected = core::mem::offset_of!(Leaf, mid) + core::mem::offset_of!(Mid, root);
        assert_eq!(root_addr as usize - leaf_addr as usize, expected);

        // down-cast recovers the original address exactly
        let back = cast_raw(dst, src, root_addr).unwrap();
        assert_eq!(back, leaf_addr);
    }

    #[test]
    fn test_typed_upcast() {
        setup();
        let leaf = Leaf {
            pad: 0,
            mid: Mid {
                root: Root { tag: 7 },
                extra: 1,
            },
        };
        let root: &Root = upcast(&leaf).unwrap();
        assert_eq!(root.tag, 7);
    }

    #[test]
    fn test_unrelated_cast_fails() {
        setup();
        let src = TypeDescriptor::of::<Root>();
        let dst = TypeDescriptor::of::<String>();
        assert!(!can_cast(src, dst));
        let mut root = Root::default();
        assert!(cast_raw(src, dst, &mut root as *mut Root as *mut u8).is_none());
    }

    #[test]
    fn test_duplicate_registration_ignored() {
        setup();
        let before = TypeDescriptor::of::<Mid>().base_edges().len();
        reflect_base!(Mid, root: Root);
        let after = TypeDescriptor::of::<Mid>().base_edges().len();
        assert_eq!(before, after);
    }

    #[test]
    fn test_ambiguous_diamond_refused() {
        // Diamond where the two Shared sub-objects sit at different offsets:
        // Join -> LegA -> Shared and Join -> LegB -> Shared disagree, so the
        // cast must refuse rather than pick a path.
        #[derive(Default)]
        struct Shared {
            _v: u32,
        }
        #[derive(Default)]
        struct LegA {
            shared: Shared,
        }
        #[derive(Default)]
        struct LegB {
            _pad: u64,
            shared: Shared,
        }
        #[derive(Default)]
        struct Join {
            a: LegA,
            b: LegB,
        }

        reflect_base!(LegA, shared: Shared);
        reflect_base!(LegB, shared: Shared);
        reflect_base!(Join, a: LegA);
        reflect_base!(Join, b: LegB);

        let join = TypeDescriptor::of::<Join>();
        let shared = TypeDescriptor::of::<Shared>();
        assert!(!can_cast(join, shared));

        let mut value = Join::default();
        assert!(cast_raw(join, shared, &mut value as *mut Join as *mut u8).is_none());
    }

    #[test]
    fn test_agreeing_diamond_allowed() {
        // A zero-sized common base sits at offset 0 through both legs, so
        // every path accumulates the same delta and the cast goes through.
        #[derive(Default)]
        struct Common;
        #[derive(Default)]
        struct Left {
            common: Common,
        }
        #[derive(Default)]
        struct Right {
            common: Common,
        }
        #[derive(Default)]
        struct Bottom {
            left: Left,
            right: Right,
        }

        reflect_base!(Left, common: Common);
        reflect_base!(Right, common: Common);
        reflect_base!(Bottom, left: Left);
        reflect_base!(Bottom, right: Right);

        let bottom = TypeDescriptor::of::<Bottom>();
        let common = TypeDescriptor::of::<Common>();
        assert!(can_cast(bottom, common));
    }
}
