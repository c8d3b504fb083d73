use std::mem;

use log::{debug, trace};
use thiserror::Error;

use crate::bytecode::{Continuation, FunctionIndex, Instr, Method, Reg};
use crate::gc::Gc;
use crate::lookup::{get_direct_slot, get_inherited_slot};
use crate::machine::make_exception;
use crate::node::PList;
use crate::object::{ObjRef, Prim, clone_object};
use crate::serialize::{DecodeError, decode_instruction};
use crate::state::{
    HandlerFrame, IntState, ReadOnlyState, Thunk, TraceFrame, WindFrame,
    WindPtr, hard_kill, is_idling, trace_roots,
};
use crate::symbols::{CLOSURE, SELF, Symbol};

/// Fatal VM-level failures: contract violations by the assembler or
/// host, not user-code exceptions. User exceptions travel through the
/// handler stack instead and never appear here.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("bytecode decode failed at offset {offset}: {source}")]
    Decode {
        offset: usize,
        #[source]
        source: DecodeError,
    },
    #[error("literal id {0} out of range")]
    BadLiteral(i64),
    #[error("native function index {0:?} out of range")]
    BadNative(FunctionIndex),
    #[error("no function {0:?} in translation unit")]
    BadFunction(FunctionIndex),
    #[error("register {0:?} is not valid for this operation")]
    BadRegister(Reg),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The result of executing one instruction: either control continues
/// normally, or a user-level exception was raised and the driver must
/// dispatch it to a handler.
#[derive(Debug)]
enum Outcome {
    Continue,
    Raised(ObjRef),
}

fn raise(
    reader: &ReadOnlyState,
    state: &IntState,
    gc: &mut Gc,
    kind: &str,
    message: &str,
) -> Outcome {
    trace!("raise {kind}: {message}");
    Outcome::Raised(make_exception(reader, gc, state, kind, message))
}

fn read_obj_reg(state: &IntState, reg: Reg) -> Result<Option<ObjRef>, VmError> {
    Ok(match reg {
        Reg::Ptr => state.ptr,
        Reg::Slf => state.slf,
        Reg::Ret => state.ret,
        other => return Err(VmError::BadRegister(other)),
    })
}

fn write_obj_reg(
    state: &mut IntState,
    reg: Reg,
    value: Option<ObjRef>,
) -> Result<(), VmError> {
    match reg {
        Reg::Ptr => state.ptr = value,
        Reg::Slf => state.slf = value,
        Reg::Ret => state.ret = value,
        other => return Err(VmError::BadRegister(other)),
    }
    Ok(())
}

fn value_stack_mut<'a>(
    state: &'a mut IntState,
    reg: Reg,
) -> Result<&'a mut Vec<ObjRef>, VmError> {
    Ok(match reg {
        Reg::Lex => &mut state.lex,
        Reg::Dyn => &mut state.dynm,
        Reg::Arg => &mut state.arg,
        Reg::Sto => &mut state.sto,
        other => return Err(VmError::BadRegister(other)),
    })
}

fn current_unit(
    state: &IntState,
    reader: &ReadOnlyState,
) -> std::sync::Arc<crate::bytecode::TranslationUnit> {
    state
        .trns
        .last()
        .cloned()
        .unwrap_or_else(|| reader.gtu.clone())
}

/// Restore the caller's frame: continuation, one scope pair, the
/// translation unit, and the backtrace entry. Method bodies end with
/// `Ret`, which keeps these stacks balanced with `enter_method`.
fn pop_frame(state: &mut IntState) {
    state.cont = state.stack.pop().unwrap_or_else(Continuation::empty);
    state.lex.pop();
    state.dynm.pop();
    state.trns.pop();
    if let Some(frame) = state.trace.pop() {
        state.line = frame.line;
        state.file = frame.file;
    }
}

/// Push a call frame for `method`, binding `args` as natural symbols in
/// a fresh dynamic scope and `self` in a fresh lexical scope derived
/// from the callee's `closure` slot.
///
/// `args` arrives in push order (first argument first). With `tail` the
/// current frame is replaced instead of stacked.
fn enter_method(
    state: &mut IntState,
    reader: &ReadOnlyState,
    gc: &mut Gc,
    callee: ObjRef,
    method: &Method,
    args: &[ObjRef],
    tail: bool,
) -> Result<(), VmError> {
    let seq = method.seq().ok_or(VmError::BadFunction(method.index))?;

    let new_dyn = match state.dynm.last() {
        Some(&scope) => clone_object(gc, scope),
        None => gc.allocate(),
    };
    for (i, &arg) in args.iter().enumerate() {
        let name = reader.symbols.natural(i as i64 + 1);
        gc.get_mut(new_dyn).put(name, arg);
    }

    let closure = get_direct_slot(gc, callee, CLOSURE)
        .or_else(|| state.lex.last().copied());
    let new_lex = match closure {
        Some(scope) => clone_object(gc, scope),
        None => gc.allocate(),
    };
    if let Some(receiver) = state.slf {
        gc.get_mut(new_lex).put(SELF, receiver);
    }

    if tail {
        state.lex.pop();
        state.dynm.pop();
        state.trns.pop();
    } else {
        state.stack.push(state.cont.clone());
        state.trace.push(TraceFrame {
            line: state.line,
            file: state.file.clone(),
        });
    }
    state.cont = Continuation::from_seq(seq);
    state.lex.push(new_lex);
    state.dynm.push(new_dyn);
    state.trns.push(method.unit.clone());
    Ok(())
}

/// Schedule a thunk so it runs before the current continuation resumes,
/// in the thunk's own captured scopes rather than the jump site's.
fn schedule_thunk(state: &mut IntState, thunk: &Thunk) -> Result<(), VmError> {
    let seq = thunk
        .method
        .seq()
        .ok_or(VmError::BadFunction(thunk.method.index))?;
    state.stack.push(state.cont.clone());
    state.trace.push(TraceFrame {
        line: state.line,
        file: state.file.clone(),
    });
    state.cont = Continuation::from_seq(seq);
    state.lex.push(thunk.lex);
    state.dynm.push(thunk.dynm);
    state.trns.push(thunk.method.unit.clone());
    Ok(())
}

/// Enter an inline block (`Branch` arms) sharing the current scopes.
fn schedule_block(
    state: &mut IntState,
    reader: &ReadOnlyState,
    gc: &mut Gc,
    method: &Method,
) -> Result<Outcome, VmError> {
    let seq = method.seq().ok_or(VmError::BadFunction(method.index))?;
    let (Some(&lex), Some(&dynm)) = (state.lex.last(), state.dynm.last())
    else {
        return Ok(raise(
            reader,
            state,
            gc,
            "system-error",
            "branch outside any scope",
        ));
    };
    state.stack.push(state.cont.clone());
    state.trace.push(TraceFrame {
        line: state.line,
        file: state.file.clone(),
    });
    state.cont = Continuation::from_seq(seq);
    state.lex.push(lex);
    state.dynm.push(dynm);
    state.trns.push(method.unit.clone());
    Ok(Outcome::Continue)
}

/// Compare two wind-frame stacks, unwinding out of the old one and
/// winding into the new one.
///
/// The junction is the longest common suffix, found by identity (the
/// stacks are persistent shared structures; sharing a cell means a
/// genuine common enclosing scope). Above it, `after` thunks of the old
/// stack are scheduled innermost first, then `before` thunks of the new
/// stack outermost first; each runs exactly once, in its own captured
/// scopes, before the jump target resumes.
pub fn resolve_thunks(
    state: &mut IntState,
    old_wind: &PList<WindPtr>,
    new_wind: &PList<WindPtr>,
) -> Result<(), VmError> {
    let mut old = old_wind.clone();
    let mut new = new_wind.clone();
    let mut exits: Vec<WindPtr> = Vec::new();
    let mut enters: Vec<WindPtr> = Vec::new();

    while old.len() > new.len() {
        if let Some(frame) = old.pop() {
            exits.push(frame);
        }
    }
    while new.len() > old.len() {
        if let Some(frame) = new.pop() {
            enters.push(frame);
        }
    }
    while !old.same_head(&new) {
        match (old.pop(), new.pop()) {
            (Some(o), Some(n)) => {
                exits.push(o);
                enters.push(n);
            }
            _ => break,
        }
    }

    // Execution order: exits innermost first, then enters outermost
    // first. Scheduling prepends, so iterate that order in reverse.
    let mut order: Vec<Thunk> =
        exits.iter().map(|frame| frame.after.clone()).collect();
    order.extend(enters.iter().rev().map(|frame| frame.before.clone()));
    for thunk in order.iter().rev() {
        schedule_thunk(state, thunk)?;
    }
    Ok(())
}

/// Restore a captured continuation, running wind-frame thunks for every
/// protected scope left or entered by the jump.
pub fn jump(state: &mut IntState, snapshot: &IntState) -> Result<(), VmError> {
    let old_wind = state.wind.clone();
    *state = snapshot.clone();
    let new_wind = state.wind.clone();
    resolve_thunks(state, &old_wind, &new_wind)
}

/// Dispatch a raised exception to the innermost handler, or park it for
/// the host when no handler remains.
///
/// A caught exception abandons the frame that registered the handler:
/// the machine rewinds to the captured control state, discards that
/// frame, and runs the handler body in its place, so the handler's
/// return resumes the registration frame's caller with the handler's
/// `%ret` as the protected region's result.
fn handle_raise(
    state: &mut IntState,
    reader: &ReadOnlyState,
    gc: &mut Gc,
    exc: ObjRef,
) -> Result<(), VmError> {
    // Captured once at the raise site: every protected scope between
    // here and the frame that finally catches must run its exit thunk,
    // no matter how many dud handlers sit in between.
    let old_wind = state.wind.clone();

    loop {
        let Some(frame) = state.hand.pop() else {
            debug!("unhandled exception; machine goes idle");
            state.pending_exception = Some(exc);
            state.err0 = true;
            hard_kill(state);
            return Ok(());
        };

        let handler_prim = gc.get(frame.handler).prim().clone();
        let Prim::Method(method) = handler_prim else {
            // A non-callable handler cannot catch anything; fall
            // through to the next one without disturbing the machine.
            continue;
        };

        // Rewind control state to the registration point.
        state.cont = frame.cont.clone();
        state.stack = frame.stack.clone();
        state.lex.truncate(frame.lex_depth);
        state.dynm.truncate(frame.dyn_depth);
        state.arg.truncate(frame.arg_depth);
        state.sto.truncate(frame.sto_depth);
        state.trns.truncate(frame.trns_depth);
        state.trace = frame.trace.clone();
        state.wind = frame.wind.clone();

        // The registration frame itself is abandoned, not resumed; its
        // remaining instructions would otherwise re-run the protected
        // code.
        pop_frame(state);

        state.slf = Some(exc);
        state.ret = Some(exc);
        enter_method(state, reader, gc, frame.handler, &method, &[exc], false)?;

        // Exit thunks of every unwound protected scope run before the
        // handler body does.
        let new_wind = state.wind.clone();
        return resolve_thunks(state, &old_wind, &new_wind);
    }
}

fn do_call(
    state: &mut IntState,
    reader: &ReadOnlyState,
    gc: &mut Gc,
    argc: i64,
    tail: bool,
) -> Result<Outcome, VmError> {
    let Some(callee) = state.ptr else {
        return Ok(raise(reader, state, gc, "empty-register", "call with no callee"));
    };
    if argc < 0 || argc as usize > state.arg.len() {
        return Ok(raise(
            reader,
            state,
            gc,
            "system-error",
            "argument stack underflow",
        ));
    }
    let prim = gc.get(callee).prim().clone();
    match prim {
        Prim::Method(method) => {
            let n = argc as usize;
            // The last-pushed value is the last argument.
            let args: Vec<ObjRef> = state.arg.split_off(state.arg.len() - n);
            enter_method(state, reader, gc, callee, &method, &args, tail)?;
            Ok(Outcome::Continue)
        }
        Prim::Sys(index) => {
            let native = reader
                .natives
                .get(index.0 as usize)
                .ok_or(VmError::BadNative(index))?;
            native(reader, state, gc)?;
            Ok(Outcome::Continue)
        }
        other => Ok(raise(
            reader,
            state,
            gc,
            "type-error",
            &format!("call of non-callable {} object", other.kind_name()),
        )),
    }
}

fn make_thunk(
    state: &IntState,
    reader: &ReadOnlyState,
    gc: &mut Gc,
    source: Option<ObjRef>,
) -> Result<Result<Thunk, Outcome>, VmError> {
    let Some(obj) = source else {
        return Ok(Err(raise(
            reader,
            state,
            gc,
            "empty-register",
            "wind frame requires a thunk object",
        )));
    };
    let prim = gc.get(obj).prim().clone();
    let Prim::Method(method) = prim else {
        return Ok(Err(raise(
            reader,
            state,
            gc,
            "type-error",
            &format!("wind thunk must be a method, got {}", prim.kind_name()),
        )));
    };
    let (Some(&lex), Some(&dynm)) = (state.lex.last(), state.dynm.last())
    else {
        return Ok(Err(raise(
            reader,
            state,
            gc,
            "system-error",
            "wind frame requires an active scope",
        )));
    };
    Ok(Ok(Thunk { method, lex, dynm }))
}

fn execute_instr(
    instr: &Instr,
    state: &mut IntState,
    reader: &ReadOnlyState,
    gc: &mut Gc,
) -> Result<Outcome, VmError> {
    match instr {
        Instr::Mov { src, dst } => {
            let value = read_obj_reg(state, *src)?;
            write_obj_reg(state, *dst, value)?;
        }
        Instr::Push { src, stack } => {
            let Some(value) = read_obj_reg(state, *src)? else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "push from an empty register",
                ));
            };
            value_stack_mut(state, *stack)?.push(value);
        }
        Instr::Pop { stack, dst } => {
            let value = value_stack_mut(state, *stack)?.pop();
            let Some(value) = value else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "system-error",
                    "pop from an empty stack",
                ));
            };
            write_obj_reg(state, *dst, Some(value))?;
        }
        Instr::GetL { dst } => {
            let Some(&scope) = state.lex.last() else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "system-error",
                    "no lexical scope",
                ));
            };
            write_obj_reg(state, *dst, Some(scope))?;
        }
        Instr::GetD { dst } => {
            let Some(&scope) = state.dynm.last() else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "system-error",
                    "no dynamic scope",
                ));
            };
            write_obj_reg(state, *dst, Some(scope))?;
        }
        Instr::Sym { name } => {
            state.sym = reader.symbols.intern(name);
        }
        Instr::SymN { index } => {
            state.sym = Symbol::from_raw(*index);
        }
        Instr::Int { value } => {
            state.num0 = *value as f64;
        }
        Instr::Flt { repr } => match repr.parse::<f64>() {
            Ok(value) => state.num0 = value,
            Err(_) => {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "number-format",
                    &format!("malformed number literal {repr:?}"),
                ));
            }
        },
        Instr::NSwap => mem::swap(&mut state.num0, &mut state.num1),
        Instr::Str { value } => state.str0 = value.clone(),
        Instr::SSwap => mem::swap(&mut state.str0, &mut state.str1),
        Instr::Mthd { index } => {
            state.mthd = Some(Method::new(current_unit(state, reader), *index));
        }
        Instr::MSwap => mem::swap(&mut state.mthd, &mut state.mthd_alt),
        Instr::Load { reg } => {
            let Some(obj) = state.ptr else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "load from an empty %ptr",
                ));
            };
            let prim = gc.get(obj).prim().clone();
            match (*reg, prim) {
                (Reg::Sym, Prim::Sym(s)) => state.sym = s,
                (Reg::Num0, Prim::Number(n)) => state.num0 = n,
                (Reg::Num1, Prim::Number(n)) => state.num1 = n,
                (Reg::Str0, Prim::Str(s)) => state.str0 = s,
                (Reg::Str1, Prim::Str(s)) => state.str1 = s,
                (Reg::Mthd, Prim::Method(m)) => state.mthd = Some(m),
                (Reg::Strm, Prim::Stream(s)) => state.strm = Some(s),
                (Reg::Prcs, Prim::Process(p)) => state.prcs = Some(p),
                (
                    Reg::Sym | Reg::Num0 | Reg::Num1 | Reg::Str0 | Reg::Str1
                    | Reg::Mthd | Reg::Strm | Reg::Prcs,
                    other,
                ) => {
                    return Ok(raise(
                        reader,
                        state,
                        gc,
                        "type-error",
                        &format!(
                            "cannot load a {} primitive into {:?}",
                            other.kind_name(),
                            reg
                        ),
                    ));
                }
                (other, _) => return Err(VmError::BadRegister(other)),
            }
        }
        Instr::Expd { reg } => {
            let Some(obj) = state.ptr else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "expand into an empty %ptr",
                ));
            };
            let prim = match *reg {
                Reg::Sym => Prim::Sym(state.sym),
                Reg::Num0 => Prim::Number(state.num0),
                Reg::Num1 => Prim::Number(state.num1),
                Reg::Str0 => Prim::Str(state.str0.clone()),
                Reg::Str1 => Prim::Str(state.str1.clone()),
                Reg::Mthd => match &state.mthd {
                    Some(m) => Prim::Method(m.clone()),
                    None => {
                        return Ok(raise(
                            reader,
                            state,
                            gc,
                            "empty-register",
                            "no pending method to expand",
                        ));
                    }
                },
                Reg::Strm => match &state.strm {
                    Some(s) => Prim::Stream(s.clone()),
                    None => {
                        return Ok(raise(
                            reader,
                            state,
                            gc,
                            "empty-register",
                            "no stream to expand",
                        ));
                    }
                },
                Reg::Prcs => match &state.prcs {
                    Some(p) => Prim::Process(p.clone()),
                    None => {
                        return Ok(raise(
                            reader,
                            state,
                            gc,
                            "empty-register",
                            "no process to expand",
                        ));
                    }
                },
                other => return Err(VmError::BadRegister(other)),
            };
            gc.get_mut(obj).set_prim(prim);
        }
        Instr::Lit { id } => {
            let obj = reader
                .lit
                .get(usize::try_from(*id).map_err(|_| VmError::BadLiteral(*id))?)
                .copied()
                .ok_or(VmError::BadLiteral(*id))?;
            state.ptr = Some(obj);
        }
        Instr::Clone => {
            let Some(parent) = state.slf else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "clone of an empty %slf",
                ));
            };
            state.ret = Some(clone_object(gc, parent));
        }
        Instr::Rtrv => {
            let Some(receiver) = state.slf else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "lookup on an empty %slf",
                ));
            };
            match get_inherited_slot(gc, receiver, state.sym) {
                Some(value) => state.ret = Some(value),
                None => {
                    let name = reader.symbols.name(state.sym);
                    let sym = state.sym;
                    let exc = make_exception(
                        reader,
                        gc,
                        state,
                        "slot-missing",
                        &format!("no slot {name:?} on object"),
                    );
                    let slot_name =
                        crate::machine::garnish_symbol(reader, gc, sym);
                    gc.get_mut(exc)
                        .put(reader.symbols.intern("slot-name"), slot_name);
                    return Ok(Outcome::Raised(exc));
                }
            }
        }
        Instr::RtrvD => {
            let Some(receiver) = state.slf else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "lookup on an empty %slf",
                ));
            };
            match get_direct_slot(gc, receiver, state.sym) {
                Some(value) => state.ret = Some(value),
                None => {
                    let name = reader.symbols.name(state.sym);
                    return Ok(raise(
                        reader,
                        state,
                        gc,
                        "slot-missing",
                        &format!("no direct slot {name:?} on object"),
                    ));
                }
            }
        }
        Instr::Setf => {
            let (Some(target), Some(value)) = (state.ptr, state.slf) else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "slot store needs %ptr and %slf",
                ));
            };
            gc.get_mut(target).put(state.sym, value);
        }
        Instr::Del => {
            let Some(target) = state.ptr else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "slot delete on an empty %ptr",
                ));
            };
            gc.get_mut(target).remove(state.sym);
        }
        Instr::Call { argc } => return do_call(state, reader, gc, *argc, false),
        Instr::TCall { argc } => return do_call(state, reader, gc, *argc, true),
        Instr::Ret => pop_frame(state),
        Instr::Goto { index } => {
            let seq = current_unit(state, reader)
                .get(*index)
                .ok_or(VmError::BadFunction(*index))?;
            state.cont = Continuation::from_seq(seq);
        }
        Instr::Sys { index } => {
            let native = reader
                .natives
                .get(index.0 as usize)
                .ok_or(VmError::BadNative(*index))?;
            native(reader, state, gc)?;
        }
        Instr::Test => state.flag = state.ptr == state.slf,
        Instr::Branch => {
            let chosen = if state.flag {
                state.mthd.clone()
            } else {
                state.mthd_alt.clone()
            };
            let Some(method) = chosen else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "branch with no pending method",
                ));
            };
            return schedule_block(state, reader, gc, &method);
        }
        Instr::ESet => state.err0 = true,
        Instr::EClr => state.err0 = false,
        Instr::ESwap => mem::swap(&mut state.err0, &mut state.err1),
        Instr::Throw => {
            let Some(exc) = state.slf else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "throw of an empty %slf",
                ));
            };
            return Ok(Outcome::Raised(exc));
        }
        Instr::ThroQ => {
            if state.err0 {
                state.err0 = false;
                let Some(exc) = state.ret else {
                    return Ok(raise(
                        reader,
                        state,
                        gc,
                        "empty-register",
                        "error flag set with no exception in %ret",
                    ));
                };
                return Ok(Outcome::Raised(exc));
            }
        }
        Instr::Wnd => {
            let before = match make_thunk(state, reader, gc, state.ptr)? {
                Ok(thunk) => thunk,
                Err(outcome) => return Ok(outcome),
            };
            let after = match make_thunk(state, reader, gc, state.slf)? {
                Ok(thunk) => thunk,
                Err(outcome) => return Ok(outcome),
            };
            let frame = std::sync::Arc::new(WindFrame {
                before: before.clone(),
                after,
            });
            state.wind.push(frame);
            // Entering the protected scope runs the before thunk once.
            schedule_thunk(state, &before)?;
        }
        Instr::Unwnd => {
            let Some(frame) = state.wind.pop() else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "system-error",
                    "unwind with no wind frame",
                ));
            };
            // Leaving the protected scope normally runs the after thunk;
            // the frame is already off the stack, so a later jump cannot
            // run it a second time.
            schedule_thunk(state, &frame.after)?;
        }
        Instr::HPush => {
            let Some(handler) = state.ptr else {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "empty-register",
                    "handler registration with an empty %ptr",
                ));
            };
            let frame = HandlerFrame {
                handler,
                cont: state.cont.clone(),
                stack: state.stack.clone(),
                wind: state.wind.clone(),
                lex_depth: state.lex.len(),
                dyn_depth: state.dynm.len(),
                arg_depth: state.arg.len(),
                sto_depth: state.sto.len(),
                trns_depth: state.trns.len(),
                trace: state.trace.clone(),
            };
            state.hand.push(frame);
        }
        Instr::HPop => {
            if state.hand.pop().is_none() {
                return Ok(raise(
                    reader,
                    state,
                    gc,
                    "system-error",
                    "handler pop with no handler",
                ));
            }
        }
        Instr::LocFn { file } => state.file = file.clone(),
        Instr::LocLn { line } => state.line = *line,
    }
    Ok(Outcome::Continue)
}

/// Perform one VM step.
///
/// An empty current continuation is first normalized away by popping the
/// call stack (discarding empty entries); if the stack runs out, the
/// machine is idling and the step is a no-op. Otherwise one instruction
/// is decoded from the continuation front and executed.
pub fn step(
    state: &mut IntState,
    reader: &ReadOnlyState,
    gc: &mut Gc,
) -> Result<(), VmError> {
    while state.cont.at_end() {
        match state.stack.pop() {
            Some(next) => state.cont = next,
            None => return Ok(()),
        }
    }

    let seq = state.cont.seq.clone();
    let offset = state.cont.pos;
    let mut pos = offset;
    let instr = decode_instruction(&seq, &mut pos)
        .map_err(|source| VmError::Decode { offset, source })?;
    state.cont.pos = pos;
    trace!("step {instr:?}");

    match execute_instr(&instr, state, reader, gc)? {
        Outcome::Continue => Ok(()),
        Outcome::Raised(exc) => handle_raise(state, reader, gc, exc),
    }
}

/// Drive the machine until it idles, collecting garbage at instruction
/// boundaries when the policy asks for it. Registers are always in a
/// consistent snapshot at those points; nothing suspends mid-instruction.
pub fn run(
    state: &mut IntState,
    reader: &ReadOnlyState,
    gc: &mut Gc,
) -> Result<(), VmError> {
    while !is_idling(state) {
        if gc.should_collect() {
            gc.collect(|mark| trace_roots(state, reader, mark));
        }
        step(state, reader, gc)?;
    }
    Ok(())
}
