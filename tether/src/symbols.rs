use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// An interned symbol. Two symbols are equal iff their indices are equal.
///
/// Non-negative indices refer to entries in the shared symbol table.
/// Negative indices are "natural" symbols: auto-generated positional
/// names (argument 1, argument 2, ...) that never touch the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(i64);

/// The reserved `parent` slot name, interned when the table is created.
pub const PARENT: Symbol = Symbol(1);
/// The reserved `self` binding in lexical scopes.
pub const SELF: Symbol = Symbol(2);
/// The reserved `closure` slot on method objects.
pub const CLOSURE: Symbol = Symbol(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// An ordinary interned name.
    Standard,
    /// A `~`-prefixed generated name; every intern of one is fresh.
    Generated,
    /// A positional argument name with a negative index.
    Natural,
}

struct SymbolsImpl {
    names: Vec<String>,
    ids: HashMap<String, i64>,
    gensym_index: u64,
}

/// The process-wide symbol table, created once at startup and shared by
/// handle. Symbols are never freed.
pub struct Symbols(Arc<RwLock<SymbolsImpl>>);

impl Clone for Symbols {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl Symbol {
    #[inline]
    pub fn index(self) -> i64 {
        self.0
    }

    /// Rebuild a symbol from a raw index, as embedded in bytecode.
    #[inline]
    pub fn from_raw(index: i64) -> Self {
        Symbol(index)
    }
}

impl SymbolsImpl {
    fn new() -> Self {
        let mut table = Self {
            names: Vec::new(),
            ids: HashMap::new(),
            gensym_index: 100,
        };
        // Fixed low indices backing the reserved constants above.
        assert_eq!(table.intern(""), Symbol(0));
        assert_eq!(table.intern("parent"), PARENT);
        assert_eq!(table.intern("self"), SELF);
        assert_eq!(table.intern("closure"), CLOSURE);
        table
    }

    fn intern(&mut self, name: &str) -> Symbol {
        if has_generated_name(name) {
            // Generated names are uninterned: every request is fresh.
            let index = self.names.len() as i64;
            self.names.push(name.to_owned());
            return Symbol(index);
        }
        if let Some(&id) = self.ids.get(name) {
            return Symbol(id);
        }
        let index = self.names.len() as i64;
        self.names.push(name.to_owned());
        self.ids.insert(name.to_owned(), index);
        Symbol(index)
    }

    fn name(&self, sym: Symbol) -> String {
        if sym.0 < 0 {
            return format!("~NAT{}", -sym.0);
        }
        match self.names.get(sym.0 as usize) {
            Some(name) => name.clone(),
            None => String::new(),
        }
    }

    fn gensym(&mut self, prefix: &str) -> Symbol {
        self.gensym_index += 1;
        let name = format!("~{}{}", prefix, self.gensym_index);
        self.intern(&name)
    }
}

fn has_generated_name(name: &str) -> bool {
    name.starts_with('~')
}

impl Symbols {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(SymbolsImpl::new())))
    }

    pub fn intern(&self, name: &str) -> Symbol {
        self.0.write().intern(name)
    }

    /// Reverse lookup. Natural symbols print as `~NAT{n}`; indices that
    /// were never interned come back empty.
    pub fn name(&self, sym: Symbol) -> String {
        self.0.read().name(sym)
    }

    /// The n-th positional argument name. Non-positive indices collapse
    /// to the interned empty string.
    pub fn natural(&self, n: i64) -> Symbol {
        if n <= 0 {
            return self.intern("");
        }
        Symbol(-n)
    }

    pub fn gensym(&self) -> Symbol {
        self.0.write().gensym("G")
    }

    pub fn gensym_prefix(&self, prefix: &str) -> Symbol {
        self.0.write().gensym(prefix)
    }

    pub fn parent(&self) -> Symbol {
        PARENT
    }

    pub fn kind(&self, sym: Symbol) -> SymbolKind {
        if sym.index() < 0 {
            return SymbolKind::Natural;
        }
        if has_generated_name(&self.name(sym)) {
            return SymbolKind::Generated;
        }
        SymbolKind::Standard
    }

    /// Whether a name needs escaping when printed as a symbol literal.
    pub fn requires_escape(name: &str) -> bool {
        if name.is_empty() || name == "~" {
            return true;
        }
        const SPECIAL: &str = ".,:()[]{}\"' \t\n\0";
        name.chars().any(|c| SPECIAL.contains(c))
    }
}

impl Default for Symbols {
    fn default() -> Self {
        Self::new()
    }
}
