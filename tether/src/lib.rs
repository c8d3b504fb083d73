mod arena;
mod bytecode;
mod gc;
mod interpreter;
mod lookup;
mod machine;
mod node;
mod object;
mod serialize;
mod state;
mod streams;
mod symbols;

pub use bytecode::*;
pub use gc::{Gc, GcConfig, GcStats};
pub use interpreter::{VmError, jump, resolve_thunks, run, step};
pub use lookup::{get_direct_slot, get_inherited_slot, keys};
pub use machine::{
    Machine, MachineCreateInfo, describe, garnish_bool, garnish_nil,
    garnish_number, garnish_string, garnish_symbol, lit, make_exception, sys,
};
pub use node::{Node, NodePtr, PList};
pub use object::{ObjRef, Object, Prim, Slot, clone_object};
pub use serialize::{
    DecodeError, assemble, decode_instruction, decode_unit,
    encode_instruction, encode_unit,
};
pub use state::*;
pub use streams::{ProcessRef, StreamRef};
pub use symbols::{CLOSURE, PARENT, SELF, Symbol, SymbolKind, Symbols};
