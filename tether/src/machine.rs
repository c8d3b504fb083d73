//! Host embedding surface: literal table bootstrap, the standard native
//! call table, and the machine driver that loads translation units and
//! runs them to idle.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, error};

use crate::bytecode::{Continuation, FunctionIndex, TranslationUnit};
use crate::gc::{Gc, GcConfig};
use crate::interpreter::{VmError, run};
use crate::lookup;
use crate::node::PList;
use crate::object::{ObjRef, Prim, clone_object};
use crate::serialize::decode_unit;
use crate::state::{IntState, NativeFn, ReadOnlyState, trace_roots};
use crate::streams::{ProcessRef, StreamRef};
use crate::symbols::Symbols;

/// Indices into the standard literal table, fixed by the bootstrap.
pub mod lit {
    /// The root prototype every other literal delegates to.
    pub const OBJECT: usize = 0;
    pub const NIL: usize = 1;
    pub const TRUE: usize = 2;
    pub const FALSE: usize = 3;
    pub const NUMBER: usize = 4;
    pub const STRING: usize = 5;
    pub const SYMBOL: usize = 6;
    pub const METHOD: usize = 7;
    pub const ERR: usize = 8;
    /// The global scope object, root of every lexical chain.
    pub const GLOBAL: usize = 9;
    pub const COUNT: usize = 10;
}

/// Indices into the standard native call table.
pub mod sys {
    pub const STDOUT: u32 = 0;
    pub const STDIN: u32 = 1;
    pub const STDERR: u32 = 2;
    /// Write `%str0` to the stream in `%strm`.
    pub const STREAM_PUT: u32 = 3;
    pub const STREAM_PUT_LINE: u32 = 4;
    /// Read one line from `%strm` into `%str0`.
    pub const STREAM_READ_LINE: u32 = 5;
    /// Open the path in `%str0` with mode `%str1` (`"r"` or `"w"`).
    pub const STREAM_OPEN: u32 = 6;
    /// Binary numeric operators over two argument objects; the garnished
    /// result lands in `%ret`.
    pub const NUM_ADD: u32 = 7;
    pub const NUM_SUB: u32 = 8;
    pub const NUM_MUL: u32 = 9;
    pub const NUM_DIV: u32 = 10;
    /// Numeric comparisons over two argument objects, into `%flag`.
    pub const NUM_EQ: u32 = 11;
    pub const NUM_LT: u32 = 12;
    /// Format `%num0` into `%str0`.
    pub const NUM_TO_STR: u32 = 13;
    /// Symbol name into `%str0` / intern `%str0` into `%sym`.
    pub const SYM_TO_STR: u32 = 14;
    pub const STR_TO_SYM: u32 = 15;
    /// Reflection over `%slf`: joined key names into `%str0`, the count
    /// into `%num0`.
    pub const KEYS: u32 = 16;
    /// Force a trace pass now.
    pub const GC_RUN: u32 = 17;
    /// Spawn the shell command in `%str0` into `%prcs` / wait for
    /// `%prcs`, exit code into `%num0`.
    pub const PROC_SPAWN: u32 = 18;
    pub const PROC_WAIT: u32 = 19;
    /// Lift scratch registers into garnished objects in `%ret`.
    pub const NUM_OBJ: u32 = 20;
    pub const STR_OBJ: u32 = 21;
    pub const SYM_OBJ: u32 = 22;
    /// `%flag` as the shared true/false literal, into `%ret`.
    pub const BOOL_OBJ: u32 = 23;
    pub const NIL_OBJ: u32 = 24;
    /// Dump `%slf` to stderr.
    pub const DUMP: u32 = 25;
}

fn spawn_from(reader: &ReadOnlyState, gc: &mut Gc, index: usize, prim: Prim) -> ObjRef {
    let obj = match reader.lit.get(index).copied() {
        Some(proto) => clone_object(gc, proto),
        None => gc.allocate(),
    };
    gc.get_mut(obj).set_prim(prim);
    obj
}

/// Garnishing wraps a raw primitive in a fresh object cloned from the
/// matching prototype, so the result participates in delegation like any
/// user object.
pub fn garnish_number(reader: &ReadOnlyState, gc: &mut Gc, value: f64) -> ObjRef {
    spawn_from(reader, gc, lit::NUMBER, Prim::Number(value))
}

pub fn garnish_string(reader: &ReadOnlyState, gc: &mut Gc, value: &str) -> ObjRef {
    spawn_from(reader, gc, lit::STRING, Prim::Str(value.to_owned()))
}

pub fn garnish_symbol(
    reader: &ReadOnlyState,
    gc: &mut Gc,
    value: crate::symbols::Symbol,
) -> ObjRef {
    spawn_from(reader, gc, lit::SYMBOL, Prim::Sym(value))
}

/// Booleans and nil garnish to the shared literals, not fresh objects,
/// so identity tests against the literal table work.
pub fn garnish_bool(reader: &ReadOnlyState, gc: &mut Gc, value: bool) -> ObjRef {
    let index = if value { lit::TRUE } else { lit::FALSE };
    match reader.lit.get(index).copied() {
        Some(obj) => obj,
        None => {
            let obj = gc.allocate();
            gc.get_mut(obj).set_prim(Prim::Bool(value));
            obj
        }
    }
}

pub fn garnish_nil(reader: &ReadOnlyState, gc: &mut Gc) -> ObjRef {
    match reader.lit.get(lit::NIL).copied() {
        Some(obj) => obj,
        None => gc.allocate(),
    }
}

/// Build a structured exception object: a clone of the error prototype
/// carrying `kind`, `message`, and the current source position.
pub fn make_exception(
    reader: &ReadOnlyState,
    gc: &mut Gc,
    state: &IntState,
    kind: &str,
    message: &str,
) -> ObjRef {
    let exc = match reader.lit.get(lit::ERR).copied() {
        Some(proto) => clone_object(gc, proto),
        None => gc.allocate(),
    };
    let kind_obj = garnish_symbol(reader, gc, reader.symbols.intern(kind));
    let message_obj = garnish_string(reader, gc, message);
    let line_obj = garnish_number(reader, gc, state.line as f64);
    let file_obj = garnish_string(reader, gc, &state.file);
    let object = gc.get_mut(exc);
    object.put(reader.symbols.intern("kind"), kind_obj);
    object.put(reader.symbols.intern("message"), message_obj);
    object.put(reader.symbols.intern("line"), line_obj);
    object.put(reader.symbols.intern("file"), file_obj);
    exc
}

fn prim_summary(prim: &Prim, symbols: &Symbols) -> String {
    match prim {
        Prim::Empty => "empty".to_owned(),
        Prim::Bool(b) => format!("bool({b})"),
        Prim::Number(n) => format!("number({n})"),
        Prim::Str(s) => format!("string({s:?})"),
        Prim::Sym(s) => format!("symbol({})", symbols.name(*s)),
        Prim::Method(m) => format!("method(#{})", m.index.0),
        Prim::Sys(i) => format!("sys(#{})", i.0),
        Prim::Stream(_) => "stream".to_owned(),
        Prim::Process(_) => "process".to_owned(),
    }
}

/// One-level textual dump of an object: its primitive plus each direct
/// slot with the slot value's primitive. Used when presenting uncaught
/// exceptions and by the dump native.
pub fn describe(gc: &Gc, symbols: &Symbols, obj: ObjRef) -> String {
    let Some(object) = gc.try_get(obj) else {
        return "#<dead object>".to_owned();
    };
    let mut names: Vec<_> = object.direct_keys().collect();
    names.sort();
    let mut parts = Vec::with_capacity(names.len());
    for name in names {
        let crate::object::Slot::Ptr(value) = object.get(name) else {
            continue;
        };
        let summary = match gc.try_get(value) {
            Some(v) => prim_summary(v.prim(), symbols),
            None => "#<dead>".to_owned(),
        };
        parts.push(format!("{}: {}", symbols.name(name), summary));
    }
    format!(
        "#<object {} {{{}}}>",
        prim_summary(object.prim(), symbols),
        parts.join(", ")
    )
}

/// Garnish an exception into `%ret` and set the error flag. Natives
/// signal user-level errors this way; the assembler sequences a `ThroQ`
/// after the `Sys` to turn the flag into a raise.
fn flag_error(
    reader: &ReadOnlyState,
    state: &mut IntState,
    gc: &mut Gc,
    kind: &str,
    message: &str,
) {
    let exc = make_exception(reader, gc, state, kind, message);
    state.ret = Some(exc);
    state.err0 = true;
}

/// Pop one argument object and read it as a number, flagging a
/// type-error otherwise.
fn take_number(
    reader: &ReadOnlyState,
    state: &mut IntState,
    gc: &mut Gc,
) -> Option<f64> {
    let Some(obj) = state.arg.pop() else {
        flag_error(reader, state, gc, "system-error", "argument stack underflow");
        return None;
    };
    match gc.get(obj).prim() {
        Prim::Number(n) => Some(*n),
        other => {
            let message = format!("expected a number argument, got {}", other.kind_name());
            flag_error(reader, state, gc, "type-error", &message);
            None
        }
    }
}

fn take_number_pair(
    reader: &ReadOnlyState,
    state: &mut IntState,
    gc: &mut Gc,
) -> Option<(f64, f64)> {
    let rhs = take_number(reader, state, gc)?;
    let lhs = take_number(reader, state, gc)?;
    Some((lhs, rhs))
}

fn numeric_op(op: fn(f64, f64) -> f64) -> NativeFn {
    Box::new(move |reader, state, gc| {
        if let Some((lhs, rhs)) = take_number_pair(reader, state, gc) {
            state.ret = Some(garnish_number(reader, gc, op(lhs, rhs)));
        }
        Ok(())
    })
}

fn numeric_cmp(op: fn(f64, f64) -> bool) -> NativeFn {
    Box::new(move |reader, state, gc| {
        if let Some((lhs, rhs)) = take_number_pair(reader, state, gc) {
            state.flag = op(lhs, rhs);
        }
        Ok(())
    })
}

fn with_stream(
    f: impl Fn(&StreamRef, &mut IntState) -> std::io::Result<()> + Send + Sync + 'static,
) -> NativeFn {
    Box::new(move |reader, state, gc| {
        let Some(stream) = state.strm.clone() else {
            flag_error(reader, state, gc, "system-error", "no stream selected");
            return Ok(());
        };
        if let Err(err) = f(&stream, state) {
            flag_error(reader, state, gc, "io-error", &err.to_string());
        }
        Ok(())
    })
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// The standard native call table, installed at indices matching the
/// `sys` module constants.
fn standard_natives() -> Vec<NativeFn> {
    let mut natives: Vec<NativeFn> = Vec::new();

    // sys::STDOUT / STDIN / STDERR
    natives.push(Box::new(|_, state, _| {
        state.strm = Some(StreamRef::stdout());
        Ok(())
    }));
    natives.push(Box::new(|_, state, _| {
        state.strm = Some(StreamRef::stdin());
        Ok(())
    }));
    natives.push(Box::new(|_, state, _| {
        state.strm = Some(StreamRef::stderr());
        Ok(())
    }));

    // sys::STREAM_PUT / STREAM_PUT_LINE / STREAM_READ_LINE
    natives.push(with_stream(|stream, state| stream.write_str(&state.str0)));
    natives.push(with_stream(|stream, state| stream.write_line(&state.str0)));
    natives.push(with_stream(|stream, state| {
        state.str0 = stream.read_line()?;
        Ok(())
    }));

    // sys::STREAM_OPEN
    natives.push(Box::new(|reader, state, gc| {
        let opened = match state.str1.as_str() {
            "r" => StreamRef::open(&state.str0),
            "w" => StreamRef::create(&state.str0),
            mode => {
                let message = format!("unknown stream mode {mode:?}");
                flag_error(reader, state, gc, "system-error", &message);
                return Ok(());
            }
        };
        match opened {
            Ok(stream) => state.strm = Some(stream),
            Err(err) => flag_error(reader, state, gc, "io-error", &err.to_string()),
        }
        Ok(())
    }));

    // sys::NUM_ADD .. NUM_DIV
    natives.push(numeric_op(|a, b| a + b));
    natives.push(numeric_op(|a, b| a - b));
    natives.push(numeric_op(|a, b| a * b));
    natives.push(numeric_op(|a, b| a / b));

    // sys::NUM_EQ / NUM_LT
    natives.push(numeric_cmp(|a, b| a == b));
    natives.push(numeric_cmp(|a, b| a < b));

    // sys::NUM_TO_STR
    natives.push(Box::new(|_, state, _| {
        state.str0 = format_number(state.num0);
        Ok(())
    }));

    // sys::SYM_TO_STR / STR_TO_SYM
    natives.push(Box::new(|reader, state, _| {
        state.str0 = reader.symbols.name(state.sym);
        Ok(())
    }));
    natives.push(Box::new(|reader, state, _| {
        state.sym = reader.symbols.intern(&state.str0);
        Ok(())
    }));

    // sys::KEYS
    natives.push(Box::new(|reader, state, gc| {
        let Some(obj) = state.slf else {
            flag_error(reader, state, gc, "empty-register", "keys of an empty %slf");
            return Ok(());
        };
        let keys = lookup::keys(gc, obj);
        let names: Vec<String> =
            keys.iter().map(|&s| reader.symbols.name(s)).collect();
        state.num0 = names.len() as f64;
        state.str0 = names.join(",");
        Ok(())
    }));

    // sys::GC_RUN
    natives.push(Box::new(|reader, state, gc| {
        gc.collect(|mark| trace_roots(state, reader, mark));
        Ok(())
    }));

    // sys::PROC_SPAWN / PROC_WAIT
    natives.push(Box::new(|reader, state, gc| {
        match ProcessRef::spawn(&state.str0) {
            Ok(process) => state.prcs = Some(process),
            Err(err) => flag_error(reader, state, gc, "io-error", &err.to_string()),
        }
        Ok(())
    }));
    natives.push(Box::new(|reader, state, gc| {
        let Some(process) = state.prcs.clone() else {
            flag_error(reader, state, gc, "system-error", "no process selected");
            return Ok(());
        };
        match process.wait() {
            Ok(code) => state.num0 = code as f64,
            Err(err) => flag_error(reader, state, gc, "io-error", &err.to_string()),
        }
        Ok(())
    }));

    // sys::NUM_OBJ .. NIL_OBJ
    natives.push(Box::new(|reader, state, gc| {
        state.ret = Some(garnish_number(reader, gc, state.num0));
        Ok(())
    }));
    natives.push(Box::new(|reader, state, gc| {
        let text = state.str0.clone();
        state.ret = Some(garnish_string(reader, gc, &text));
        Ok(())
    }));
    natives.push(Box::new(|reader, state, gc| {
        state.ret = Some(garnish_symbol(reader, gc, state.sym));
        Ok(())
    }));
    natives.push(Box::new(|reader, state, gc| {
        state.ret = Some(garnish_bool(reader, gc, state.flag));
        Ok(())
    }));
    natives.push(Box::new(|reader, state, gc| {
        state.ret = Some(garnish_nil(reader, gc));
        Ok(())
    }));

    // sys::DUMP
    natives.push(Box::new(|reader, state, gc| {
        let Some(obj) = state.slf else {
            flag_error(reader, state, gc, "empty-register", "dump of an empty %slf");
            return Ok(());
        };
        let text = describe(gc, &reader.symbols, obj);
        if let Err(err) = StreamRef::stderr().write_line(&text) {
            flag_error(reader, state, gc, "io-error", &err.to_string());
        }
        Ok(())
    }));

    natives
}

/// Build the literal table in `lit` order: the root object, then nil,
/// booleans, and the core prototypes as clones of the root. The global
/// scope gets a named slot for each of them.
fn build_literals(gc: &mut Gc, symbols: &Symbols) -> Vec<ObjRef> {
    let root = gc.allocate();
    let mut lit = Vec::with_capacity(lit::COUNT);
    lit.push(root);

    let nil = clone_object(gc, root);
    lit.push(nil);
    let truth = clone_object(gc, root);
    gc.get_mut(truth).set_prim(Prim::Bool(true));
    lit.push(truth);
    let falsehood = clone_object(gc, root);
    gc.get_mut(falsehood).set_prim(Prim::Bool(false));
    lit.push(falsehood);

    let number = clone_object(gc, root);
    gc.get_mut(number).set_prim(Prim::Number(0.0));
    lit.push(number);
    let string = clone_object(gc, root);
    gc.get_mut(string).set_prim(Prim::Str(String::new()));
    lit.push(string);
    let symbol = clone_object(gc, root);
    gc.get_mut(symbol).set_prim(Prim::Sym(symbols.intern("")));
    lit.push(symbol);
    let method = clone_object(gc, root);
    lit.push(method);
    let err = clone_object(gc, root);
    lit.push(err);

    let global = clone_object(gc, root);
    lit.push(global);
    for (name, index) in [
        ("Object", lit::OBJECT),
        ("Nil", lit::NIL),
        ("True", lit::TRUE),
        ("False", lit::FALSE),
        ("Number", lit::NUMBER),
        ("String", lit::STRING),
        ("Symbol", lit::SYMBOL),
        ("Method", lit::METHOD),
        ("Err", lit::ERR),
    ] {
        let value = lit[index];
        gc.get_mut(global).put(symbols.intern(name), value);
    }
    lit
}

/// Construction parameters for a machine instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineCreateInfo {
    pub gc: GcConfig,
}

/// A complete VM instance: interpreter state, sealed read-only state,
/// and the object arena, wired together and bootstrapped.
pub struct Machine {
    reader: ReadOnlyState,
    state: IntState,
    gc: Gc,
}

impl Machine {
    pub fn new(info: MachineCreateInfo) -> Self {
        let symbols = Symbols::new();
        let mut gc = Gc::new(info.gc);
        let mut reader = ReadOnlyState::new(symbols);
        reader.lit = build_literals(&mut gc, &reader.symbols);
        reader.natives = standard_natives();
        // Literals are traced as roots every pass; the explicit holds
        // additionally pin them across host-driven collections that
        // trace a different state.
        for &obj in &reader.lit {
            gc.retain(obj);
        }

        let mut state = IntState::new();
        let global = reader.lit[lit::GLOBAL];
        state.lex.push(global);
        state.dynm.push(global);
        debug!(
            "machine up: {} literals, {} natives",
            reader.lit.len(),
            reader.natives.len()
        );
        Machine { reader, state, gc }
    }

    pub fn reader(&self) -> &ReadOnlyState {
        &self.reader
    }

    pub fn state(&self) -> &IntState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut IntState {
        &mut self.state
    }

    pub fn gc(&self) -> &Gc {
        &self.gc
    }

    pub fn gc_mut(&mut self) -> &mut Gc {
        &mut self.gc
    }

    pub fn global(&self) -> ObjRef {
        self.reader.lit[lit::GLOBAL]
    }

    /// Append a host native. Must happen before execution starts; the
    /// index is what bytecode names in `Sys` instructions.
    pub fn install_native(&mut self, native: NativeFn) -> FunctionIndex {
        let index = FunctionIndex(self.reader.natives.len() as u32);
        self.reader.natives.push(native);
        index
    }

    pub fn load_unit(&self, bytes: &[u8]) -> Result<Arc<TranslationUnit>, VmError> {
        let unit = decode_unit(bytes)
            .map_err(|source| VmError::Decode { offset: 0, source })?;
        Ok(Arc::new(unit))
    }

    /// Execute function 0 of a unit to idle, returning whatever the
    /// program left in `%ret`. Control state is reinstalled from
    /// scratch, so a machine can execute units back to back.
    pub fn execute_unit(
        &mut self,
        unit: Arc<TranslationUnit>,
    ) -> Result<Option<ObjRef>, VmError> {
        let Some(seq) = unit.get(FunctionIndex(0)) else {
            return Ok(None);
        };
        let global = self.global();
        self.state.cont = Continuation::from_seq(seq);
        self.state.stack = PList::new();
        self.state.lex = vec![global];
        self.state.dynm = vec![global];
        self.state.trns = vec![unit];
        self.state.pending_exception = None;
        run(&mut self.state, &self.reader, &mut self.gc)?;
        Ok(self.state.ret)
    }

    pub fn pending_exception(&self) -> Option<ObjRef> {
        self.state.pending_exception
    }

    /// Load and run a compiled unit from disk. An uncaught exception is
    /// presented on stderr and reported through the exit code; it is a
    /// recovered condition, not an error of the machine itself.
    pub fn run_file(&mut self, path: &Path) -> Result<i32, VmError> {
        let bytes = fs::read(path)?;
        let unit = self.load_unit(&bytes)?;
        self.execute_unit(unit)?;
        if let Some(exc) = self.pending_exception() {
            let text = describe(&self.gc, &self.reader.symbols, exc);
            error!("uncaught exception in {}", path.display());
            eprintln!("uncaught exception: {text}");
            return Ok(1);
        }
        Ok(0)
    }

    /// Abandon all in-flight work: back to an idling state over the
    /// pristine global scope. Objects survive; the next collection
    /// reclaims whatever the discarded state alone kept alive.
    pub fn reset(&mut self) {
        let global = self.global();
        self.state = IntState::new();
        self.state.lex.push(global);
        self.state.dynm.push(global);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Instr, Reg};
    use crate::serialize::{assemble, encode_unit};
    use crate::state::is_idling;

    fn machine() -> Machine {
        Machine::new(MachineCreateInfo::default())
    }

    fn unit_of(bodies: &[&[Instr]]) -> Arc<TranslationUnit> {
        let mut unit = TranslationUnit::default();
        for body in bodies {
            unit.push(assemble(body));
        }
        Arc::new(unit)
    }

    #[test]
    fn bootstrap_builds_the_full_literal_table() {
        let m = machine();
        assert_eq!(m.reader().lit.len(), lit::COUNT);
        let gc = m.gc();
        match gc.get(m.reader().lit[lit::TRUE]).prim() {
            Prim::Bool(true) => {}
            other => panic!("true literal holds {other:?}"),
        }
        match gc.get(m.reader().lit[lit::FALSE]).prim() {
            Prim::Bool(false) => {}
            other => panic!("false literal holds {other:?}"),
        }
        // Every literal except the root delegates to the root.
        let root = m.reader().lit[lit::OBJECT];
        for &obj in &m.reader().lit[1..] {
            assert_eq!(
                crate::lookup::get_inherited_slot(gc, obj, crate::symbols::PARENT),
                Some(root)
            );
        }
        // And each is pinned.
        for &obj in &m.reader().lit {
            assert!(gc.ref_count(obj) > 0);
        }
    }

    #[test]
    fn global_scope_names_the_prototypes() {
        let m = machine();
        let number = m.reader().symbols.intern("Number");
        assert_eq!(
            crate::lookup::get_direct_slot(m.gc(), m.global(), number),
            Some(m.reader().lit[lit::NUMBER])
        );
    }

    #[test]
    fn garnished_numbers_delegate_to_the_number_prototype() {
        let mut m = machine();
        let Machine { reader, gc, .. } = &mut m;
        let obj = garnish_number(reader, gc, 6.5);
        match gc.get(obj).prim() {
            Prim::Number(n) => assert_eq!(*n, 6.5),
            other => panic!("unexpected prim {other:?}"),
        }
        let parent = crate::lookup::get_direct_slot(gc, obj, crate::symbols::PARENT);
        assert_eq!(parent, Some(reader.lit[lit::NUMBER]));
        // Booleans come back as the shared literals.
        let t = garnish_bool(reader, gc, true);
        assert_eq!(t, reader.lit[lit::TRUE]);
    }

    #[test]
    fn arithmetic_natives_garnish_results() {
        let mut m = machine();
        let unit = unit_of(&[&[
            Instr::Int { value: 6 },
            Instr::Sys { index: FunctionIndex(sys::NUM_OBJ) },
            Instr::Push { src: Reg::Ret, stack: Reg::Arg },
            Instr::Int { value: 7 },
            Instr::Sys { index: FunctionIndex(sys::NUM_OBJ) },
            Instr::Push { src: Reg::Ret, stack: Reg::Arg },
            Instr::Sys { index: FunctionIndex(sys::NUM_MUL) },
            Instr::ThroQ,
        ]]);
        let result = m.execute_unit(unit).expect("runs").expect("has a result");
        match m.gc().get(result).prim() {
            Prim::Number(n) => assert_eq!(*n, 42.0),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(m.pending_exception().is_none());
    }

    #[test]
    fn native_type_errors_follow_the_flag_protocol() {
        let mut m = machine();
        let unit = unit_of(&[&[
            // Push a non-number argument, then add.
            Instr::Str { value: "oops".into() },
            Instr::Sys { index: FunctionIndex(sys::STR_OBJ) },
            Instr::Push { src: Reg::Ret, stack: Reg::Arg },
            Instr::Push { src: Reg::Ret, stack: Reg::Arg },
            Instr::Sys { index: FunctionIndex(sys::NUM_ADD) },
            Instr::ThroQ,
        ]]);
        m.execute_unit(unit).expect("vm-level success");
        let exc = m.pending_exception().expect("exception parked");
        let kind_sym = m.reader().symbols.intern("kind");
        let kind = crate::lookup::get_direct_slot(m.gc(), exc, kind_sym)
            .expect("kind slot");
        match m.gc().get(kind).prim() {
            Prim::Sym(s) => assert_eq!(m.reader().symbols.name(*s), "type-error"),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn units_round_trip_through_the_loader() {
        let mut m = machine();
        let unit = unit_of(&[&[
            Instr::Int { value: 5 },
            Instr::Sys { index: FunctionIndex(sys::NUM_TO_STR) },
        ]]);
        let bytes = encode_unit(&unit);
        let decoded = m.load_unit(&bytes).expect("decodes");
        m.execute_unit(decoded).expect("runs");
        assert_eq!(m.state().str0, "5");
    }

    #[test]
    fn number_formatting_trims_integral_values() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn keys_native_reports_the_whole_chain() {
        let mut m = machine();
        let parent_sym = m.reader().symbols.intern("alpha");
        let child_sym = m.reader().symbols.intern("beta");
        let root = m.reader().lit[lit::OBJECT];
        let child = {
            let gc = &mut m.gc;
            let parent = clone_object(gc, root);
            let value = gc.allocate();
            gc.get_mut(parent).put(parent_sym, value);
            let child = clone_object(gc, parent);
            gc.get_mut(child).put(child_sym, value);
            child
        };
        m.state.slf = Some(child);
        let native = &m.reader.natives[sys::KEYS as usize];
        native(&m.reader, &mut m.state, &mut m.gc).expect("native runs");
        assert!(m.state.str0.contains("alpha"));
        assert!(m.state.str0.contains("beta"));
        assert!(m.state.num0 >= 2.0);
    }

    #[test]
    fn reset_returns_to_idle_over_the_global_scope() {
        let mut m = machine();
        m.state.arg.push(m.global());
        m.state.err0 = true;
        m.reset();
        assert!(is_idling(m.state()));
        assert!(m.state().arg.is_empty());
        assert!(!m.state().err0);
        assert_eq!(m.state().lex, vec![m.global()]);
    }

    #[test]
    fn describe_renders_slots_and_prims() {
        let mut m = machine();
        let Machine { reader, gc, state } = &mut m;
        let exc = make_exception(reader, gc, state, "type-error", "bad input");
        let text = describe(gc, &reader.symbols, exc);
        assert!(text.contains("kind: symbol(type-error)"));
        assert!(text.contains("message: string(\"bad input\")"));
    }

    #[test]
    fn gc_run_native_reclaims_unrooted_garbage() {
        let mut m = machine();
        let garbage = m.gc.allocate();
        let live_before = m.gc.live();
        let native = &m.reader.natives[sys::GC_RUN as usize];
        native(&m.reader, &mut m.state, &mut m.gc).expect("native runs");
        assert!(!m.gc.contains(garbage));
        assert_eq!(m.gc.live(), live_before - 1);
    }
}
