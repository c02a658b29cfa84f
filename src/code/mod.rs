//! # Code
//!
//! Instruction set of the host runtime. Method bodies are stored as encoded instruction streams,
//! see [`codec`] for the byte layout.

pub mod codec;

pub use codec::{decode, encode, DecodeError, Decoder};

/// Index of a loaded type in the host's type table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Index of a loaded method in the host's method table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

/// Token of a field, as embedded in [`Instr::LdFld`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

/// Token of a native function, as embedded in [`Instr::Call`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

/// Opcode bytes
pub mod op {
    /// [`super::Instr::Nop`]
    pub const NOP: u8 = 0x00;
    /// [`super::Instr::LdArg`]
    pub const LDARG: u8 = 0x01;
    /// [`super::Instr::LdInt`]
    pub const LDINT: u8 = 0x02;
    /// [`super::Instr::LdFld`]
    pub const LDFLD: u8 = 0x03;
    /// [`super::Instr::Call`]
    pub const CALL: u8 = 0x04;
    /// [`super::Instr::Pop`]
    pub const POP: u8 = 0x05;
    /// [`super::Instr::Dup`]
    pub const DUP: u8 = 0x06;
    /// [`super::Instr::Add`]
    pub const ADD: u8 = 0x07;
    /// [`super::Instr::Mul`]
    pub const MUL: u8 = 0x08;
    /// [`super::Instr::CmpEq`]
    pub const CMPEQ: u8 = 0x09;
    /// [`super::Instr::Br`]
    pub const BR: u8 = 0x0a;
    /// [`super::Instr::BrFalse`]
    pub const BRFALSE: u8 = 0x0b;
    /// [`super::Instr::Ret`]
    pub const RET: u8 = 0x0c;
}

/// A single instruction of a method body.
///
/// Branch offsets are relative to the first byte *after* the branch instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Instr {
    /// Does nothing
    Nop,
    /// Pushes argument `n`
    LdArg(u8),
    /// Pushes an integer constant
    LdInt(i32),
    /// Pops an object reference and pushes the value of the given field
    LdFld(FieldId),
    /// Pops the function's arguments (last argument on top) and pushes its result
    Call(FunctionId),
    /// Discards the top of the stack
    Pop,
    /// Duplicates the top of the stack
    Dup,
    /// Pops two integers and pushes their sum
    Add,
    /// Pops two integers and pushes their product
    Mul,
    /// Pops two values and pushes `1` if they are equal, `0` otherwise
    CmpEq,
    /// Unconditional relative branch
    Br(i32),
    /// Pops an integer and branches if it is zero
    BrFalse(i32),
    /// Pops the return value and leaves the method
    Ret,
}

/// Number of values an instruction takes from and leaves on the evaluation stack
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackEffect {
    /// Values popped
    pub pops: usize,
    /// Values pushed
    pub pushes: usize,
}
impl StackEffect {
    /// Creates a stack effect
    pub const fn new(pops: usize, pushes: usize) -> Self {
        Self { pops, pushes }
    }
    /// Net change in stack depth
    pub fn net(&self) -> isize {
        self.pushes as isize - self.pops as isize
    }
}

impl Instr {
    /// Opcode byte of this instruction
    pub fn opcode(&self) -> u8 {
        match self {
            Instr::Nop => op::NOP,
            Instr::LdArg(_) => op::LDARG,
            Instr::LdInt(_) => op::LDINT,
            Instr::LdFld(_) => op::LDFLD,
            Instr::Call(_) => op::CALL,
            Instr::Pop => op::POP,
            Instr::Dup => op::DUP,
            Instr::Add => op::ADD,
            Instr::Mul => op::MUL,
            Instr::CmpEq => op::CMPEQ,
            Instr::Br(_) => op::BR,
            Instr::BrFalse(_) => op::BRFALSE,
            Instr::Ret => op::RET,
        }
    }

    /// Encoded length in bytes
    pub fn encoded_len(&self) -> usize {
        1 + operand_len(self.opcode()).unwrap_or(0)
    }

    /// Stack effect of this instruction.
    ///
    /// `params_of` reports the parameter count of a called function; `None` is returned when it
    /// doesn't know the function.
    pub fn stack_effect<F>(&self, params_of: F) -> Option<StackEffect>
    where
        F: Fn(FunctionId) -> Option<usize>,
    {
        let effect = match self {
            Instr::Nop | Instr::Br(_) => StackEffect::new(0, 0),
            Instr::LdArg(_) | Instr::LdInt(_) => StackEffect::new(0, 1),
            Instr::LdFld(_) => StackEffect::new(1, 1),
            Instr::Call(function) => StackEffect::new(params_of(*function)?, 1),
            Instr::Pop | Instr::BrFalse(_) | Instr::Ret => StackEffect::new(1, 0),
            Instr::Dup => StackEffect::new(1, 2),
            Instr::Add | Instr::Mul | Instr::CmpEq => StackEffect::new(2, 1),
        };
        Some(effect)
    }
}

/// Length of the operand that follows `opcode`, or `None` for an unknown opcode
pub(crate) fn operand_len(opcode: u8) -> Option<usize> {
    match opcode {
        op::NOP | op::POP | op::DUP | op::ADD | op::MUL | op::CMPEQ | op::RET => Some(0),
        op::LDARG => Some(1),
        op::LDINT | op::LDFLD | op::CALL | op::BR | op::BRFALSE => Some(4),
        _ => None,
    }
}
