use std::sync::Arc;

/// Register tags, as they appear in operand bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    /// General object pointer.
    Ptr = 0x01,
    /// Receiver object.
    Slf = 0x02,
    /// Return value.
    Ret = 0x03,
    /// Lexical scope stack.
    Lex = 0x04,
    /// Dynamic scope stack.
    Dyn = 0x05,
    /// Argument stack.
    Arg = 0x06,
    /// General storage stack.
    Sto = 0x07,
    /// Exception handler stack.
    Hand = 0x08,
    /// Symbol scratch.
    Sym = 0x09,
    /// Numeric scratch registers.
    Num0 = 0x0A,
    Num1 = 0x0B,
    /// String scratch registers.
    Str0 = 0x0C,
    Str1 = 0x0D,
    /// Pending-method register.
    Mthd = 0x0E,
    /// Stream register.
    Strm = 0x0F,
    /// Process register.
    Prcs = 0x10,
}

impl Reg {
    pub fn from_byte(byte: u8) -> Option<Reg> {
        use Reg::*;
        Some(match byte {
            0x01 => Ptr,
            0x02 => Slf,
            0x03 => Ret,
            0x04 => Lex,
            0x05 => Dyn,
            0x06 => Arg,
            0x07 => Sto,
            0x08 => Hand,
            0x09 => Sym,
            0x0A => Num0,
            0x0B => Num1,
            0x0C => Str0,
            0x0D => Str1,
            0x0E => Mthd,
            0x0F => Strm,
            0x10 => Prcs,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Index of a method body within a translation unit, or of a native
/// function within the read-only call table. Always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionIndex(pub u32);

/// A serialized instruction sequence.
pub type InstrSeq = Vec<u8>;

/// One compiled source file: an indexed set of method bodies.
/// Function 0 is the top-level body by convention.
#[derive(Debug, Default)]
pub struct TranslationUnit {
    seqs: Vec<Arc<InstrSeq>>,
}

impl TranslationUnit {
    pub fn new(seqs: Vec<InstrSeq>) -> Self {
        Self {
            seqs: seqs.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn get(&self, index: FunctionIndex) -> Option<Arc<InstrSeq>> {
        self.seqs.get(index.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    pub fn seqs(&self) -> impl Iterator<Item = &Arc<InstrSeq>> {
        self.seqs.iter()
    }

    /// Append a body, returning its index.
    pub fn push(&mut self, seq: InstrSeq) -> FunctionIndex {
        let index = FunctionIndex(self.seqs.len() as u32);
        self.seqs.push(Arc::new(seq));
        index
    }
}

/// A method body: a function within a specific translation unit.
#[derive(Debug, Clone)]
pub struct Method {
    pub unit: Arc<TranslationUnit>,
    pub index: FunctionIndex,
}

impl Method {
    pub fn new(unit: Arc<TranslationUnit>, index: FunctionIndex) -> Self {
        Self { unit, index }
    }

    pub fn seq(&self) -> Option<Arc<InstrSeq>> {
        self.unit.get(self.index)
    }
}

/// A position within a pending instruction sequence; the unit pushed and
/// popped on the call stack.
#[derive(Debug, Clone)]
pub struct Continuation {
    pub seq: Arc<InstrSeq>,
    pub pos: usize,
}

impl Continuation {
    pub fn empty() -> Self {
        Self {
            seq: Arc::new(Vec::new()),
            pos: 0,
        }
    }

    pub fn from_seq(seq: Arc<InstrSeq>) -> Self {
        Self { seq, pos: 0 }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.seq.len()
    }
}

/// A decoded instruction. The opcode byte and operand layout on the wire
/// are defined in `serialize`.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Copy one object register into another.
    Mov { src: Reg, dst: Reg },
    /// Push an object register onto a value stack.
    Push { src: Reg, stack: Reg },
    /// Pop a value stack into an object register.
    Pop { stack: Reg, dst: Reg },
    /// Read the current lexical scope (top of `%lex`) into a register.
    GetL { dst: Reg },
    /// Read the current dynamic scope (top of `%dyn`) into a register.
    GetD { dst: Reg },
    /// Intern a name into `%sym`.
    Sym { name: String },
    /// Load a raw symbol index into `%sym` (natural symbols included).
    SymN { index: i64 },
    /// Load an integer literal into `%num0`.
    Int { value: i64 },
    /// Parse a float literal into `%num0`.
    Flt { repr: String },
    /// Swap `%num0` and `%num1`.
    NSwap,
    /// Load a string literal into `%str0`.
    Str { value: String },
    /// Swap `%str0` and `%str1`.
    SSwap,
    /// Load a method from the current translation unit into `%mthd`.
    Mthd { index: FunctionIndex },
    /// Swap the two pending-method registers.
    MSwap,
    /// Read the primitive of the object in `%ptr` into a scratch register.
    Load { reg: Reg },
    /// Write a scratch register into the primitive of the object in `%ptr`.
    Expd { reg: Reg },
    /// Load a literal-table object into `%ptr`.
    Lit { id: i64 },
    /// Clone the object in `%slf` into `%ret`.
    Clone,
    /// Inherited-slot lookup of `%sym` on `%slf` into `%ret`.
    Rtrv,
    /// Direct-slot lookup of `%sym` on `%slf` into `%ret`.
    RtrvD,
    /// Store `%slf` under `%sym` on the object in `%ptr`.
    Setf,
    /// Delete the direct slot `%sym` on the object in `%ptr`.
    Del,
    /// Call the object in `%ptr` with `%slf` as receiver, marshalling
    /// `argc` values off the argument stack.
    Call { argc: i64 },
    /// Tail call: as `Call` but replacing the current frame.
    TCall { argc: i64 },
    /// Return from the current continuation.
    Ret,
    /// Jump to another body of the current unit, keeping the frame.
    Goto { index: FunctionIndex },
    /// Invoke a native function from the read-only call table.
    Sys { index: FunctionIndex },
    /// Set `%flag` to whether `%ptr` and `%slf` are the same object.
    Test,
    /// Enter `%mthd` if `%flag` is set, `%mthd_alt` otherwise.
    Branch,
    /// Set, clear, and swap the error flag registers.
    ESet,
    EClr,
    ESwap,
    /// Raise the object in `%slf` as an exception.
    Throw,
    /// If `%err0` is set, clear it and raise the object in `%ret`.
    ThroQ,
    /// Push a wind frame (before thunk from `%ptr`, after thunk from
    /// `%slf`) and run the before thunk.
    Wnd,
    /// Pop the innermost wind frame and run its after thunk.
    Unwnd,
    /// Register the object in `%ptr` as an exception handler.
    HPush,
    /// Drop the innermost handler.
    HPop,
    /// Record the current source file / line for diagnostics.
    LocFn { file: String },
    LocLn { line: i64 },
}

/// Opcode bytes, the first byte of every serialized instruction.
pub mod op {
    pub const MOV: u8 = 0x01;
    pub const PUSH: u8 = 0x02;
    pub const POP: u8 = 0x03;
    pub const GETL: u8 = 0x04;
    pub const GETD: u8 = 0x05;
    pub const SYM: u8 = 0x06;
    pub const SYMN: u8 = 0x07;
    pub const INT: u8 = 0x08;
    pub const FLT: u8 = 0x09;
    pub const NSWAP: u8 = 0x0A;
    pub const STR: u8 = 0x0B;
    pub const SSWAP: u8 = 0x0C;
    pub const MTHD: u8 = 0x0D;
    pub const MSWAP: u8 = 0x0E;
    pub const LOAD: u8 = 0x0F;
    pub const EXPD: u8 = 0x10;
    pub const LIT: u8 = 0x11;
    pub const CLONE: u8 = 0x12;
    pub const RTRV: u8 = 0x13;
    pub const RTRVD: u8 = 0x14;
    pub const SETF: u8 = 0x15;
    pub const DEL: u8 = 0x16;
    pub const CALL: u8 = 0x17;
    pub const TCALL: u8 = 0x18;
    pub const RET: u8 = 0x19;
    pub const GOTO: u8 = 0x1A;
    pub const SYS: u8 = 0x1B;
    pub const TEST: u8 = 0x1C;
    pub const BRANCH: u8 = 0x1D;
    pub const ESET: u8 = 0x1E;
    pub const ECLR: u8 = 0x1F;
    pub const ESWAP: u8 = 0x20;
    pub const THROW: u8 = 0x21;
    pub const THROQ: u8 = 0x22;
    pub const WND: u8 = 0x23;
    pub const UNWND: u8 = 0x24;
    pub const HPUSH: u8 = 0x25;
    pub const HPOP: u8 = 0x26;
    pub const LOCFN: u8 = 0x27;
    pub const LOCLN: u8 = 0x28;
}

/// The operand kinds an opcode consumes, in order. This table is the
/// assembler/VM contract for instruction layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Register,
    Long,
    Str,
    Function,
}

impl Instr {
    pub fn opcode(&self) -> u8 {
        use op::*;
        match self {
            Instr::Mov { .. } => MOV,
            Instr::Push { .. } => PUSH,
            Instr::Pop { .. } => POP,
            Instr::GetL { .. } => GETL,
            Instr::GetD { .. } => GETD,
            Instr::Sym { .. } => SYM,
            Instr::SymN { .. } => SYMN,
            Instr::Int { .. } => INT,
            Instr::Flt { .. } => FLT,
            Instr::NSwap => NSWAP,
            Instr::Str { .. } => STR,
            Instr::SSwap => SSWAP,
            Instr::Mthd { .. } => MTHD,
            Instr::MSwap => MSWAP,
            Instr::Load { .. } => LOAD,
            Instr::Expd { .. } => EXPD,
            Instr::Lit { .. } => LIT,
            Instr::Clone => CLONE,
            Instr::Rtrv => RTRV,
            Instr::RtrvD => RTRVD,
            Instr::Setf => SETF,
            Instr::Del => DEL,
            Instr::Call { .. } => CALL,
            Instr::TCall { .. } => TCALL,
            Instr::Ret => RET,
            Instr::Goto { .. } => GOTO,
            Instr::Sys { .. } => SYS,
            Instr::Test => TEST,
            Instr::Branch => BRANCH,
            Instr::ESet => ESET,
            Instr::EClr => ECLR,
            Instr::ESwap => ESWAP,
            Instr::Throw => THROW,
            Instr::ThroQ => THROQ,
            Instr::Wnd => WND,
            Instr::Unwnd => UNWND,
            Instr::HPush => HPUSH,
            Instr::HPop => HPOP,
            Instr::LocFn { .. } => LOCFN,
            Instr::LocLn { .. } => LOCLN,
        }
    }
}

/// Operand layout for an opcode byte, or `None` for an unknown opcode.
pub fn operand_kinds(opcode: u8) -> Option<&'static [OperandKind]> {
    use OperandKind::*;
    const RR: &[OperandKind] = &[Register, Register];
    const R: &[OperandKind] = &[Register];
    const L: &[OperandKind] = &[Long];
    const S: &[OperandKind] = &[Str];
    const F: &[OperandKind] = &[Function];
    const NONE: &[OperandKind] = &[];
    Some(match opcode {
        op::MOV | op::PUSH | op::POP => RR,
        op::GETL | op::GETD | op::LOAD | op::EXPD => R,
        op::SYMN | op::INT | op::LIT | op::CALL | op::TCALL | op::LOCLN => L,
        op::SYM | op::FLT | op::STR | op::LOCFN => S,
        op::MTHD | op::GOTO | op::SYS => F,
        op::NSWAP
        | op::SSWAP
        | op::MSWAP
        | op::CLONE
        | op::RTRV
        | op::RTRVD
        | op::SETF
        | op::DEL
        | op::RET
        | op::TEST
        | op::BRANCH
        | op::ESET
        | op::ECLR
        | op::ESWAP
        | op::THROW
        | op::THROQ
        | op::WND
        | op::UNWND
        | op::HPUSH
        | op::HPOP => NONE,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_bytes_round_trip() {
        for byte in 0x01..=0x10u8 {
            let reg = Reg::from_byte(byte).expect("valid register byte");
            assert_eq!(reg.to_byte(), byte);
        }
        assert_eq!(Reg::from_byte(0x00), None);
        assert_eq!(Reg::from_byte(0x11), None);
    }

    #[test]
    fn every_opcode_has_an_operand_layout() {
        let all = [
            op::MOV,
            op::PUSH,
            op::POP,
            op::GETL,
            op::GETD,
            op::SYM,
            op::SYMN,
            op::INT,
            op::FLT,
            op::NSWAP,
            op::STR,
            op::SSWAP,
            op::MTHD,
            op::MSWAP,
            op::LOAD,
            op::EXPD,
            op::LIT,
            op::CLONE,
            op::RTRV,
            op::RTRVD,
            op::SETF,
            op::DEL,
            op::CALL,
            op::TCALL,
            op::RET,
            op::GOTO,
            op::SYS,
            op::TEST,
            op::BRANCH,
            op::ESET,
            op::ECLR,
            op::ESWAP,
            op::THROW,
            op::THROQ,
            op::WND,
            op::UNWND,
            op::HPUSH,
            op::HPOP,
            op::LOCFN,
            op::LOCLN,
        ];
        for opcode in all {
            assert!(operand_kinds(opcode).is_some(), "opcode {opcode:#04x}");
        }
        assert!(operand_kinds(0x00).is_none());
        assert!(operand_kinds(0xFF).is_none());
    }

    #[test]
    fn translation_unit_indexing() {
        let mut unit = TranslationUnit::default();
        let f0 = unit.push(vec![op::RET]);
        let f1 = unit.push(vec![op::ECLR, op::RET]);
        assert_eq!(f0, FunctionIndex(0));
        assert_eq!(f1, FunctionIndex(1));
        assert_eq!(unit.get(f1).unwrap().len(), 2);
        assert!(unit.get(FunctionIndex(2)).is_none());
    }
}
