//! Byte codec for instruction streams
//!
//! Every instruction is a single opcode byte followed by a fixed-size little-endian operand:
//!
//! | opcode                            | operand          |
//! |-----------------------------------|------------------|
//! | `LdArg`                           | `u8`             |
//! | `LdInt`, `Br`, `BrFalse`          | `i32`            |
//! | `LdFld`, `Call`                   | `u32` token      |
//! | everything else                   | none             |

use thiserror::Error;

use super::{op, operand_len, FieldId, FunctionId, Instr};

/// Errors while decoding an instruction stream
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Byte at `offset` is not a known opcode
    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode {
        /// Offending byte
        opcode: u8,
        /// Offset of the offending byte
        offset: usize,
    },
    /// Stream ends inside the operand of the instruction starting at `offset`
    #[error("truncated instruction at offset {offset}")]
    Truncated {
        /// Offset of the truncated instruction
        offset: usize,
    },
}

/// Iterator over the instructions of an encoded stream, yielding each instruction with its byte offset.
///
/// Stops after the first error.
pub struct Decoder<'a> {
    /// Encoded stream
    data: &'a [u8],
    /// Offset of the next instruction
    position: usize,
    /// Set once an error has been yielded
    failed: bool,
}
impl<'a> Decoder<'a> {
    /// Creates a decoder over `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            failed: false,
        }
    }

    /// Decodes the instruction at the current position
    fn decode_one(&mut self) -> Result<Instr, DecodeError> {
        let offset = self.position;
        let opcode = self.data[offset];
        let len = operand_len(opcode).ok_or(DecodeError::UnknownOpcode { opcode, offset })?;
        let operand = self
            .data
            .get(offset + 1..offset + 1 + len)
            .ok_or(DecodeError::Truncated { offset })?;
        let word = || {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(operand);
            bytes
        };
        let instr = match opcode {
            op::NOP => Instr::Nop,
            op::LDARG => Instr::LdArg(operand[0]),
            op::LDINT => Instr::LdInt(i32::from_le_bytes(word())),
            op::LDFLD => Instr::LdFld(FieldId(u32::from_le_bytes(word()))),
            op::CALL => Instr::Call(FunctionId(u32::from_le_bytes(word()))),
            op::POP => Instr::Pop,
            op::DUP => Instr::Dup,
            op::ADD => Instr::Add,
            op::MUL => Instr::Mul,
            op::CMPEQ => Instr::CmpEq,
            op::BR => Instr::Br(i32::from_le_bytes(word())),
            op::BRFALSE => Instr::BrFalse(i32::from_le_bytes(word())),
            op::RET => Instr::Ret,
            _ => return Err(DecodeError::UnknownOpcode { opcode, offset }),
        };
        self.position += 1 + len;
        Ok(instr)
    }
}
impl<'a> Iterator for Decoder<'a> {
    type Item = Result<(usize, Instr), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.data.len() {
            return None;
        }
        let offset = self.position;
        let result = self.decode_one().map(|instr| (offset, instr));
        self.failed = result.is_err();
        Some(result)
    }
}

/// Decodes a full instruction stream
pub fn decode(data: &[u8]) -> Result<Vec<Instr>, DecodeError> {
    Decoder::new(data)
        .map(|item| item.map(|(_, instr)| instr))
        .collect()
}

/// Appends the encoding of `instr` to `out`
pub fn encode_into(instr: &Instr, out: &mut Vec<u8>) {
    out.push(instr.opcode());
    match *instr {
        Instr::LdArg(n) => out.push(n),
        Instr::LdInt(v) | Instr::Br(v) | Instr::BrFalse(v) => out.extend_from_slice(&v.to_le_bytes()),
        Instr::LdFld(FieldId(token)) | Instr::Call(FunctionId(token)) => {
            out.extend_from_slice(&token.to_le_bytes())
        }
        _ => {}
    }
}

/// Encodes an instruction stream
pub fn encode(instrs: &[Instr]) -> Vec<u8> {
    let mut out = Vec::with_capacity(instrs.iter().map(Instr::encoded_len).sum());
    for instr in instrs {
        encode_into(instr, &mut out);
    }
    out
}
