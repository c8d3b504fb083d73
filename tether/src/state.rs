use std::sync::Arc;

use crate::bytecode::{Continuation, Method, TranslationUnit};
use crate::gc::Gc;
use crate::interpreter::VmError;
use crate::node::PList;
use crate::object::ObjRef;
use crate::streams::{ProcessRef, StreamRef};
use crate::symbols::{Symbol, Symbols};

/// A method body closed over the lexical and dynamic scope it should
/// execute in; the unit of deferred execution for wind frames.
#[derive(Debug, Clone)]
pub struct Thunk {
    pub method: Method,
    pub lex: ObjRef,
    pub dynm: ObjRef,
}

/// A before/after thunk pair guarding a protected scope. Frames are
/// shared, never mutated in place; the wind stack is persistent so
/// diverging continuations can compare suffixes by identity.
#[derive(Debug, Clone)]
pub struct WindFrame {
    pub before: Thunk,
    pub after: Thunk,
}

pub type WindPtr = Arc<WindFrame>;

/// One frame of the backtrace.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub line: i64,
    pub file: String,
}

/// An active exception handler: the handler object plus enough captured
/// control state to rewind the machine to the registration point.
#[derive(Debug, Clone)]
pub struct HandlerFrame {
    pub handler: ObjRef,
    pub cont: Continuation,
    pub stack: PList<Continuation>,
    pub wind: PList<WindPtr>,
    pub lex_depth: usize,
    pub dyn_depth: usize,
    pub arg_depth: usize,
    pub sto_depth: usize,
    pub trns_depth: usize,
    pub trace: PList<TraceFrame>,
}

/// The mutable execution context of one VM thread of control.
///
/// Cloning an `IntState` captures a continuation: the persistent call,
/// wind, and backtrace stacks share structure with the live machine.
#[derive(Debug, Clone)]
pub struct IntState {
    pub ptr: Option<ObjRef>,
    pub slf: Option<ObjRef>,
    pub ret: Option<ObjRef>,
    /// Lexical scope stack; the top is the current scope.
    pub lex: Vec<ObjRef>,
    /// Dynamic scope stack; the top is the current scope.
    pub dynm: Vec<ObjRef>,
    /// Argument stack for call marshalling.
    pub arg: Vec<ObjRef>,
    /// General storage stack.
    pub sto: Vec<ObjRef>,
    /// The continuation being executed.
    pub cont: Continuation,
    /// The call stack of pending continuations.
    pub stack: PList<Continuation>,
    pub err0: bool,
    pub err1: bool,
    pub sym: Symbol,
    pub num0: f64,
    pub num1: f64,
    pub str0: String,
    pub str1: String,
    pub mthd: Option<Method>,
    pub mthd_alt: Option<Method>,
    pub flag: bool,
    pub strm: Option<StreamRef>,
    pub prcs: Option<ProcessRef>,
    /// Active wind frames, innermost first.
    pub wind: PList<WindPtr>,
    /// Active exception handlers, innermost last.
    pub hand: Vec<HandlerFrame>,
    pub line: i64,
    pub file: String,
    pub trace: PList<TraceFrame>,
    /// Translation units of the enclosing calls; the top resolves
    /// `Mthd` instructions for cross-file calls.
    pub trns: Vec<Arc<TranslationUnit>>,
    /// Set when an exception reached the top with no handler left; the
    /// host is responsible for presenting it.
    pub pending_exception: Option<ObjRef>,
}

impl IntState {
    /// An empty state, idling until the host installs work.
    pub fn new() -> Self {
        Self {
            ptr: None,
            slf: None,
            ret: None,
            lex: Vec::new(),
            dynm: Vec::new(),
            arg: Vec::new(),
            sto: Vec::new(),
            cont: Continuation::empty(),
            stack: PList::new(),
            err0: false,
            err1: false,
            sym: Symbol::from_raw(0),
            num0: 0.0,
            num1: 0.0,
            str0: String::new(),
            str1: String::new(),
            mthd: None,
            mthd_alt: None,
            flag: false,
            strm: None,
            prcs: None,
            wind: PList::new(),
            hand: Vec::new(),
            line: 0,
            file: String::new(),
            trace: PList::new(),
            trns: Vec::new(),
            pending_exception: None,
        }
    }
}

impl Default for IntState {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether the interpreter has no more work. A call stack holding only
/// empty continuations is *not* idling yet: a step must pop them first,
/// so that a step always makes observable progress.
pub fn is_idling(state: &IntState) -> bool {
    state.cont.at_end() && state.stack.is_empty()
}

/// Force the machine into the idling state, leaving registers valid but
/// unspecified. This is the host's cancellation mechanism; nothing
/// interrupts an instruction mid-flight.
pub fn hard_kill(state: &mut IntState) {
    state.cont = Continuation::empty();
    state.stack = PList::new();
}

/// A host function callable from bytecode via `Sys`. Effects happen
/// entirely through the interpreter state.
pub type NativeFn =
    Box<dyn Fn(&ReadOnlyState, &mut IntState, &mut Gc) -> Result<(), VmError> + Send + Sync>;

/// Registers that are initialized once at startup and never change:
/// the native call table, the literal object table, the global
/// translation unit, and the symbol table handle. Safe to share across
/// interpreter instances without locking.
pub struct ReadOnlyState {
    pub natives: Vec<NativeFn>,
    pub lit: Vec<ObjRef>,
    pub gtu: Arc<TranslationUnit>,
    pub symbols: Symbols,
}

impl ReadOnlyState {
    pub fn new(symbols: Symbols) -> Self {
        Self {
            natives: Vec::new(),
            lit: Vec::new(),
            gtu: Arc::new(TranslationUnit::default()),
            symbols,
        }
    }
}

/// Enumerate every object reference the VM holds, for the collector's
/// mark phase.
///
/// This list must stay exhaustive: every `ObjRef`-bearing field added to
/// `IntState` (or `ReadOnlyState`) gets a line here, or the collector
/// will free live objects. That failure shows up later as a dangling
/// reference, not at the omission site.
pub fn trace_roots(
    state: &IntState,
    reader: &ReadOnlyState,
    mark: &mut dyn FnMut(ObjRef),
) {
    for r in [state.ptr, state.slf, state.ret].into_iter().flatten() {
        mark(r);
    }
    for r in &state.lex {
        mark(*r);
    }
    for r in &state.dynm {
        mark(*r);
    }
    for r in &state.arg {
        mark(*r);
    }
    for r in &state.sto {
        mark(*r);
    }
    for frame in state.wind.iter() {
        mark(frame.before.lex);
        mark(frame.before.dynm);
        mark(frame.after.lex);
        mark(frame.after.dynm);
    }
    for frame in &state.hand {
        mark(frame.handler);
        for wind in frame.wind.iter() {
            mark(wind.before.lex);
            mark(wind.before.dynm);
            mark(wind.after.lex);
            mark(wind.after.dynm);
        }
    }
    if let Some(r) = state.pending_exception {
        mark(r);
    }
    for r in &reader.lit {
        mark(*r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{Gc, GcConfig};

    #[test]
    fn fresh_state_is_idling() {
        let state = IntState::new();
        assert!(is_idling(&state));
    }

    #[test]
    fn a_stack_of_empty_continuations_is_not_idling() {
        let mut state = IntState::new();
        state.stack.push(Continuation::empty());
        assert!(!is_idling(&state));
        hard_kill(&mut state);
        assert!(is_idling(&state));
    }

    #[test]
    fn roots_cover_registers_stacks_and_literals() {
        let symbols = Symbols::new();
        let mut gc = Gc::new(GcConfig::default());
        let mut state = IntState::new();
        let mut reader = ReadOnlyState::new(symbols);

        let a = gc.allocate();
        let b = gc.allocate();
        let c = gc.allocate();
        let d = gc.allocate();
        state.ptr = Some(a);
        state.arg.push(b);
        state.sto.push(c);
        reader.lit.push(d);

        let mut seen = Vec::new();
        trace_roots(&state, &reader, &mut |r| seen.push(r));
        for r in [a, b, c, d] {
            assert!(seen.contains(&r));
        }
    }
}
