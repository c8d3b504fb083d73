//! Wire format for instruction streams.
//!
//! Every instruction starts with its opcode byte, followed by a fixed
//! arity of typed operands:
//!
//! - register: one tag byte
//! - long: a sign byte (`0x00` positive, `0xFF` negative) plus four
//!   magnitude bytes, little-endian
//! - string: 8-bit clean with escaped NULs (`\0.` is an embedded NUL,
//!   `\0\0` terminates)
//! - function index: four bytes little-endian, non-negative
//!
//! Decoding never reads past the buffer; truncated or malformed input
//! yields a `DecodeError`.

use thiserror::Error;

use crate::bytecode::{
    FunctionIndex, Instr, InstrSeq, Reg, TranslationUnit, op,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of instruction stream")]
    UnexpectedEnd,
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("invalid register tag {0:#04x}")]
    BadRegister(u8),
    #[error("string operand is not valid utf-8")]
    BadString,
    #[error("invalid escape byte {0:#04x} after NUL in string operand")]
    BadEscape(u8),
}

pub fn put_byte(out: &mut InstrSeq, byte: u8) {
    out.push(byte);
}

pub fn put_long(out: &mut InstrSeq, value: i64) {
    let magnitude = value.unsigned_abs();
    // The wire format carries a sign byte and a 4-byte magnitude.
    debug_assert!(
        magnitude <= u64::from(u32::MAX),
        "long operand {value} exceeds the 4-byte wire format"
    );
    out.push(if value < 0 { 0xFF } else { 0x00 });
    out.extend_from_slice(&(magnitude as u32).to_le_bytes());
}

pub fn put_string(out: &mut InstrSeq, value: &str) {
    for &byte in value.as_bytes() {
        if byte == 0 {
            out.push(0);
            out.push(b'.');
        } else {
            out.push(byte);
        }
    }
    out.push(0);
    out.push(0);
}

pub fn put_reg(out: &mut InstrSeq, reg: Reg) {
    out.push(reg.to_byte());
}

pub fn put_function(out: &mut InstrSeq, index: FunctionIndex) {
    out.extend_from_slice(&index.0.to_le_bytes());
}

pub fn take_byte(bytes: &[u8], pos: &mut usize) -> Result<u8, DecodeError> {
    let byte = *bytes.get(*pos).ok_or(DecodeError::UnexpectedEnd)?;
    *pos += 1;
    Ok(byte)
}

pub fn take_long(bytes: &[u8], pos: &mut usize) -> Result<i64, DecodeError> {
    let sign = if take_byte(bytes, pos)? > 0 { -1i64 } else { 1i64 };
    let mut raw = [0u8; 4];
    for slot in &mut raw {
        *slot = take_byte(bytes, pos)?;
    }
    Ok(sign * u32::from_le_bytes(raw) as i64)
}

pub fn take_string(bytes: &[u8], pos: &mut usize) -> Result<String, DecodeError> {
    let mut raw = Vec::new();
    loop {
        let byte = take_byte(bytes, pos)?;
        if byte != 0 {
            raw.push(byte);
            continue;
        }
        match take_byte(bytes, pos)? {
            b'.' => raw.push(0),
            0 => break,
            // The encoder only ever emits `.` or NUL after a NUL.
            other => return Err(DecodeError::BadEscape(other)),
        }
    }
    String::from_utf8(raw).map_err(|_| DecodeError::BadString)
}

pub fn take_reg(bytes: &[u8], pos: &mut usize) -> Result<Reg, DecodeError> {
    let byte = take_byte(bytes, pos)?;
    Reg::from_byte(byte).ok_or(DecodeError::BadRegister(byte))
}

pub fn take_function(
    bytes: &[u8],
    pos: &mut usize,
) -> Result<FunctionIndex, DecodeError> {
    let mut raw = [0u8; 4];
    for slot in &mut raw {
        *slot = take_byte(bytes, pos)?;
    }
    Ok(FunctionIndex(u32::from_le_bytes(raw)))
}

pub fn encode_instruction(instr: &Instr, out: &mut InstrSeq) {
    put_byte(out, instr.opcode());
    match instr {
        Instr::Mov { src, dst } => {
            put_reg(out, *src);
            put_reg(out, *dst);
        }
        Instr::Push { src, stack } => {
            put_reg(out, *src);
            put_reg(out, *stack);
        }
        Instr::Pop { stack, dst } => {
            put_reg(out, *stack);
            put_reg(out, *dst);
        }
        Instr::GetL { dst } | Instr::GetD { dst } => put_reg(out, *dst),
        Instr::Load { reg } | Instr::Expd { reg } => put_reg(out, *reg),
        Instr::Sym { name } => put_string(out, name),
        Instr::Flt { repr } => put_string(out, repr),
        Instr::Str { value } => put_string(out, value),
        Instr::LocFn { file } => put_string(out, file),
        Instr::SymN { index } => put_long(out, *index),
        Instr::Int { value } => put_long(out, *value),
        Instr::Lit { id } => put_long(out, *id),
        Instr::Call { argc } | Instr::TCall { argc } => put_long(out, *argc),
        Instr::LocLn { line } => put_long(out, *line),
        Instr::Mthd { index } | Instr::Goto { index } | Instr::Sys { index } => {
            put_function(out, *index)
        }
        Instr::NSwap
        | Instr::SSwap
        | Instr::MSwap
        | Instr::Clone
        | Instr::Rtrv
        | Instr::RtrvD
        | Instr::Setf
        | Instr::Del
        | Instr::Ret
        | Instr::Test
        | Instr::Branch
        | Instr::ESet
        | Instr::EClr
        | Instr::ESwap
        | Instr::Throw
        | Instr::ThroQ
        | Instr::Wnd
        | Instr::Unwnd
        | Instr::HPush
        | Instr::HPop => {}
    }
}

pub fn decode_instruction(
    bytes: &[u8],
    pos: &mut usize,
) -> Result<Instr, DecodeError> {
    let opcode = take_byte(bytes, pos)?;
    Ok(match opcode {
        op::MOV => Instr::Mov {
            src: take_reg(bytes, pos)?,
            dst: take_reg(bytes, pos)?,
        },
        op::PUSH => Instr::Push {
            src: take_reg(bytes, pos)?,
            stack: take_reg(bytes, pos)?,
        },
        op::POP => Instr::Pop {
            stack: take_reg(bytes, pos)?,
            dst: take_reg(bytes, pos)?,
        },
        op::GETL => Instr::GetL {
            dst: take_reg(bytes, pos)?,
        },
        op::GETD => Instr::GetD {
            dst: take_reg(bytes, pos)?,
        },
        op::SYM => Instr::Sym {
            name: take_string(bytes, pos)?,
        },
        op::SYMN => Instr::SymN {
            index: take_long(bytes, pos)?,
        },
        op::INT => Instr::Int {
            value: take_long(bytes, pos)?,
        },
        op::FLT => Instr::Flt {
            repr: take_string(bytes, pos)?,
        },
        op::NSWAP => Instr::NSwap,
        op::STR => Instr::Str {
            value: take_string(bytes, pos)?,
        },
        op::SSWAP => Instr::SSwap,
        op::MTHD => Instr::Mthd {
            index: take_function(bytes, pos)?,
        },
        op::MSWAP => Instr::MSwap,
        op::LOAD => Instr::Load {
            reg: take_reg(bytes, pos)?,
        },
        op::EXPD => Instr::Expd {
            reg: take_reg(bytes, pos)?,
        },
        op::LIT => Instr::Lit {
            id: take_long(bytes, pos)?,
        },
        op::CLONE => Instr::Clone,
        op::RTRV => Instr::Rtrv,
        op::RTRVD => Instr::RtrvD,
        op::SETF => Instr::Setf,
        op::DEL => Instr::Del,
        op::CALL => Instr::Call {
            argc: take_long(bytes, pos)?,
        },
        op::TCALL => Instr::TCall {
            argc: take_long(bytes, pos)?,
        },
        op::RET => Instr::Ret,
        op::GOTO => Instr::Goto {
            index: take_function(bytes, pos)?,
        },
        op::SYS => Instr::Sys {
            index: take_function(bytes, pos)?,
        },
        op::TEST => Instr::Test,
        op::BRANCH => Instr::Branch,
        op::ESET => Instr::ESet,
        op::ECLR => Instr::EClr,
        op::ESWAP => Instr::ESwap,
        op::THROW => Instr::Throw,
        op::THROQ => Instr::ThroQ,
        op::WND => Instr::Wnd,
        op::UNWND => Instr::Unwnd,
        op::HPUSH => Instr::HPush,
        op::HPOP => Instr::HPop,
        op::LOCFN => Instr::LocFn {
            file: take_string(bytes, pos)?,
        },
        op::LOCLN => Instr::LocLn {
            line: take_long(bytes, pos)?,
        },
        other => return Err(DecodeError::UnknownOpcode(other)),
    })
}

/// Assemble a slice of instructions into one serialized sequence.
pub fn assemble(instrs: &[Instr]) -> InstrSeq {
    let mut out = Vec::new();
    for instr in instrs {
        encode_instruction(instr, &mut out);
    }
    out
}

/// Serialize a whole translation unit: a function count, then each body
/// as a length-prefixed byte sequence. This is the on-disk program
/// format consumed by the CLI.
pub fn encode_unit(unit: &TranslationUnit) -> Vec<u8> {
    let mut out = Vec::new();
    put_long(&mut out, unit.len() as i64);
    for seq in unit.seqs() {
        put_long(&mut out, seq.len() as i64);
        out.extend_from_slice(seq);
    }
    out
}

pub fn decode_unit(bytes: &[u8]) -> Result<TranslationUnit, DecodeError> {
    let mut pos = 0usize;
    let count = take_long(bytes, &mut pos)?;
    let mut unit = TranslationUnit::default();
    for _ in 0..count {
        let len = take_long(bytes, &mut pos)?;
        if len < 0 {
            return Err(DecodeError::UnexpectedEnd);
        }
        let len = len as usize;
        let end = pos.checked_add(len).ok_or(DecodeError::UnexpectedEnd)?;
        if end > bytes.len() {
            return Err(DecodeError::UnexpectedEnd);
        }
        unit.push(bytes[pos..end].to_vec());
        pos = end;
    }
    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(instr: Instr) {
        let mut seq = Vec::new();
        encode_instruction(&instr, &mut seq);
        let mut pos = 0;
        let decoded = decode_instruction(&seq, &mut pos).expect("decodes");
        assert_eq!(decoded, instr);
        assert_eq!(pos, seq.len(), "decoder consumed the whole encoding");
    }

    #[test]
    fn every_opcode_and_operand_kind_round_trips() {
        use Instr::*;
        let samples = vec![
            Mov { src: Reg::Ptr, dst: Reg::Ret },
            Push { src: Reg::Slf, stack: Reg::Arg },
            Pop { stack: Reg::Sto, dst: Reg::Ptr },
            GetL { dst: Reg::Slf },
            GetD { dst: Reg::Ptr },
            Sym { name: "hello".into() },
            SymN { index: -3 },
            Int { value: -123456 },
            Flt { repr: "2.5".into() },
            NSwap,
            Str { value: "plain".into() },
            SSwap,
            Mthd { index: FunctionIndex(7) },
            MSwap,
            Load { reg: Reg::Num0 },
            Expd { reg: Reg::Str0 },
            Lit { id: 2 },
            Clone,
            Rtrv,
            RtrvD,
            Setf,
            Del,
            Call { argc: 2 },
            TCall { argc: 0 },
            Ret,
            Goto { index: FunctionIndex(1) },
            Sys { index: FunctionIndex(4) },
            Test,
            Branch,
            ESet,
            EClr,
            ESwap,
            Throw,
            ThroQ,
            Wnd,
            Unwnd,
            HPush,
            HPop,
            LocFn { file: "prelude.tet".into() },
            LocLn { line: 42 },
        ];
        for instr in samples {
            round_trip(instr);
        }
    }

    #[test]
    fn strings_with_embedded_nul_survive() {
        round_trip(Instr::Str {
            value: "before\0after".into(),
        });
        round_trip(Instr::Str { value: "\0".into() });
        round_trip(Instr::Str { value: String::new() });
    }

    #[test]
    fn longs_cover_sign_and_magnitude() {
        for value in [0i64, 1, -1, 255, 256, -70000, u32::MAX as i64] {
            round_trip(Instr::Int { value });
        }
    }

    #[test]
    #[should_panic(expected = "exceeds the 4-byte wire format")]
    fn oversized_longs_are_rejected_at_encode_time() {
        let mut out = Vec::new();
        put_long(&mut out, u32::MAX as i64 + 1);
    }

    #[test]
    fn truncated_streams_are_rejected() {
        let mut seq = Vec::new();
        encode_instruction(&Instr::Int { value: 500 }, &mut seq);
        for cut in 0..seq.len() {
            let mut pos = 0;
            let result = decode_instruction(&seq[..cut], &mut pos);
            if cut == 0 {
                assert_eq!(result, Err(DecodeError::UnexpectedEnd));
            } else {
                assert!(result.is_err(), "cut at {cut} must fail");
            }
        }
    }

    #[test]
    fn unknown_opcode_is_a_decode_error() {
        let mut pos = 0;
        assert_eq!(
            decode_instruction(&[0xEE], &mut pos),
            Err(DecodeError::UnknownOpcode(0xEE))
        );
    }

    #[test]
    fn bad_register_tag_is_a_decode_error() {
        let seq = vec![op::MOV, 0x55, 0x01];
        let mut pos = 0;
        assert_eq!(
            decode_instruction(&seq, &mut pos),
            Err(DecodeError::BadRegister(0x55))
        );
    }

    #[test]
    fn unit_round_trip() {
        let mut unit = TranslationUnit::default();
        unit.push(assemble(&[
            Instr::Str { value: "top\0level".into() },
            Instr::Ret,
        ]));
        unit.push(assemble(&[Instr::Int { value: 9 }]));

        let bytes = encode_unit(&unit);
        let decoded = decode_unit(&bytes).expect("unit decodes");
        assert_eq!(decoded.len(), unit.len());
        for (a, b) in decoded.seqs().zip(unit.seqs()) {
            assert_eq!(a, b);
        }

        // A truncated unit is rejected.
        assert!(decode_unit(&bytes[..bytes.len() - 1]).is_err());
    }
}
