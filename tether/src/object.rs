use std::collections::HashMap;

use crate::bytecode::{FunctionIndex, Method};
use crate::gc::Gc;
use crate::streams::{ProcessRef, StreamRef};
use crate::symbols::{PARENT, Symbol};

/// A stable handle into the object arena. Handles are plain data; the
/// generation field lets the arena detect references to a slot that has
/// been freed and reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    pub(crate) bucket: u32,
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

/// A named binding on an object.
///
/// `Inherited` is not the same as "bound to nil": an inherited slot
/// delegates the lookup to the parent chain, while a present slot holding
/// the nil object stops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Ptr(ObjRef),
    Inherited,
}

/// The tagged primitive value carried by an object. At most one variant
/// is active; all dispatch on primitive kind is an exhaustive match.
#[derive(Debug, Clone, Default)]
pub enum Prim {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Str(String),
    Sym(Symbol),
    Method(Method),
    Sys(FunctionIndex),
    Stream(StreamRef),
    Process(ProcessRef),
}

impl Prim {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Prim::Empty => "empty",
            Prim::Bool(_) => "bool",
            Prim::Number(_) => "number",
            Prim::Str(_) => "string",
            Prim::Sym(_) => "symbol",
            Prim::Method(_) => "method",
            Prim::Sys(_) => "sys",
            Prim::Stream(_) => "stream",
            Prim::Process(_) => "process",
        }
    }
}

/// One node of the prototype graph: a slot table plus a primitive.
///
/// The parent link is an ordinary slot keyed by the reserved `parent`
/// symbol; nothing prevents the delegation graph from sharing parents or
/// forming cycles, and lookup must tolerate both.
#[derive(Debug, Clone, Default)]
pub struct Object {
    slots: HashMap<Symbol, ObjRef>,
    prim: Prim,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: Symbol) -> Slot {
        match self.slots.get(&name) {
            Some(&value) => Slot::Ptr(value),
            None => Slot::Inherited,
        }
    }

    pub fn put(&mut self, name: Symbol, value: ObjRef) {
        self.slots.insert(name, value);
    }

    /// Remove a direct slot. Returns false if the slot was inherited.
    pub fn remove(&mut self, name: Symbol) -> bool {
        self.slots.remove(&name).is_some()
    }

    pub fn parent(&self) -> Slot {
        self.get(PARENT)
    }

    pub fn direct_keys(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.slots.keys().copied()
    }

    /// Every object reference held directly by this object's slots; the
    /// collector's mark phase traverses these edges.
    pub fn slot_values(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.slots.values().copied()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn prim(&self) -> &Prim {
        &self.prim
    }

    pub fn set_prim(&mut self, prim: Prim) {
        self.prim = prim;
    }
}

/// Clone in the prototype sense: a fresh child object whose `parent`
/// slot delegates to `parent`. The primitive is not copied.
pub fn clone_object(gc: &mut Gc, parent: ObjRef) -> ObjRef {
    let child = gc.allocate();
    gc.get_mut(child).put(PARENT, parent);
    child
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_ref(n: u32) -> ObjRef {
        ObjRef {
            bucket: 0,
            slot: n,
            generation: 0,
        }
    }

    #[test]
    fn absent_and_present_are_distinct_states() {
        let syms = crate::symbols::Symbols::new();
        let name = syms.intern("x");
        let mut obj = Object::new();
        assert_eq!(obj.get(name), Slot::Inherited);
        obj.put(name, dummy_ref(7));
        assert_eq!(obj.get(name), Slot::Ptr(dummy_ref(7)));
        assert!(obj.remove(name));
        assert_eq!(obj.get(name), Slot::Inherited);
        assert!(!obj.remove(name));
    }

    #[test]
    fn parent_is_an_ordinary_slot() {
        let mut obj = Object::new();
        assert_eq!(obj.parent(), Slot::Inherited);
        obj.put(PARENT, dummy_ref(1));
        assert_eq!(obj.parent(), Slot::Ptr(dummy_ref(1)));
        assert_eq!(obj.direct_keys().collect::<Vec<_>>(), vec![PARENT]);
    }
}
