use std::collections::{BTreeSet, HashSet};

use crate::gc::Gc;
use crate::object::{ObjRef, Slot};
use crate::symbols::{PARENT, Symbol};

/// Look up `name` on `start`, delegating along the parent chain.
///
/// The walk keeps a visited set so that delegation cycles terminate:
/// each object is inspected at most once, and the nearest-ancestor
/// definition wins. Returns `None` when the name is absent from the
/// whole chain or the chain cycles back on itself.
pub fn get_inherited_slot(gc: &Gc, start: ObjRef, name: Symbol) -> Option<ObjRef> {
    let mut visited: HashSet<ObjRef> = HashSet::new();
    let mut current = start;
    loop {
        if !visited.insert(current) {
            return None;
        }
        let obj = gc.try_get(current)?;
        match obj.get(name) {
            Slot::Ptr(value) => return Some(value),
            Slot::Inherited => match obj.get(PARENT) {
                Slot::Ptr(parent) => current = parent,
                Slot::Inherited => return None,
            },
        }
    }
}

/// Look up `name` on `obj` without delegation.
pub fn get_direct_slot(gc: &Gc, obj: ObjRef, name: Symbol) -> Option<ObjRef> {
    match gc.try_get(obj)?.get(name) {
        Slot::Ptr(value) => Some(value),
        Slot::Inherited => None,
    }
}

/// The union of all slot names visible from `start` through delegation,
/// each name reported once even when shadowed. Cycle-guarded like
/// `get_inherited_slot`.
pub fn keys(gc: &Gc, start: ObjRef) -> BTreeSet<Symbol> {
    let mut result = BTreeSet::new();
    let mut visited: HashSet<ObjRef> = HashSet::new();
    let mut current = start;
    loop {
        if !visited.insert(current) {
            return result;
        }
        let Some(obj) = gc.try_get(current) else {
            return result;
        };
        result.extend(obj.direct_keys());
        match obj.get(PARENT) {
            Slot::Ptr(parent) => current = parent,
            Slot::Inherited => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{Gc, GcConfig};
    use crate::symbols::Symbols;

    fn fresh(gc: &mut Gc) -> ObjRef {
        gc.allocate()
    }

    #[test]
    fn lookup_walks_the_delegation_chain() {
        let syms = Symbols::new();
        let mut gc = Gc::new(GcConfig::default());
        let s = syms.intern("s");

        let c = fresh(&mut gc);
        let b = fresh(&mut gc);
        let a = fresh(&mut gc);
        let value = fresh(&mut gc);

        gc.get_mut(a).put(PARENT, b);
        gc.get_mut(b).put(PARENT, c);
        gc.get_mut(c).put(s, value);

        assert_eq!(get_inherited_slot(&gc, a, s), Some(value));
        assert_eq!(get_direct_slot(&gc, a, s), None);
        assert_eq!(get_direct_slot(&gc, c, s), Some(value));
    }

    #[test]
    fn lookup_terminates_on_a_cyclic_chain() {
        let syms = Symbols::new();
        let mut gc = Gc::new(GcConfig::default());
        let s = syms.intern("s");
        let missing = syms.intern("missing");

        let c = fresh(&mut gc);
        let b = fresh(&mut gc);
        let a = fresh(&mut gc);
        let value = fresh(&mut gc);

        gc.get_mut(a).put(PARENT, b);
        gc.get_mut(b).put(PARENT, c);
        gc.get_mut(c).put(s, value);
        // Close the cycle: C's parent is A again.
        gc.get_mut(c).put(PARENT, a);

        assert_eq!(get_inherited_slot(&gc, a, s), Some(value));
        assert_eq!(get_inherited_slot(&gc, a, missing), None);
    }

    #[test]
    fn nearest_definition_shadows_ancestors() {
        let syms = Symbols::new();
        let mut gc = Gc::new(GcConfig::default());
        let s = syms.intern("s");

        let parent = fresh(&mut gc);
        let child = fresh(&mut gc);
        let old = fresh(&mut gc);
        let new = fresh(&mut gc);

        gc.get_mut(child).put(PARENT, parent);
        gc.get_mut(parent).put(s, old);
        gc.get_mut(child).put(s, new);

        assert_eq!(get_inherited_slot(&gc, child, s), Some(new));
    }

    #[test]
    fn keys_unions_the_chain_and_reports_shadowed_names_once() {
        let syms = Symbols::new();
        let mut gc = Gc::new(GcConfig::default());
        let x = syms.intern("x");
        let y = syms.intern("y");

        let parent = fresh(&mut gc);
        let child = fresh(&mut gc);
        let v = fresh(&mut gc);

        gc.get_mut(child).put(PARENT, parent);
        gc.get_mut(child).put(x, v);
        gc.get_mut(parent).put(x, v);
        gc.get_mut(parent).put(y, v);
        // Cycle back up; keys must still terminate.
        gc.get_mut(parent).put(PARENT, child);

        let names = keys(&gc, child);
        assert_eq!(names.len(), 3);
        assert!(names.contains(&x));
        assert!(names.contains(&y));
        assert!(names.contains(&PARENT));
    }
}
