//! Interpreter for method bodies

use crate::code::{Decoder, Instr};

use super::{MethodCode, Runtime, RuntimeError, Value, ValueType};

/// Pops the top of the stack
fn pop(stack: &mut Vec<Value>, offset: usize) -> Result<Value, RuntimeError> {
    stack.pop().ok_or(RuntimeError::StackUnderflow { offset })
}

/// Pops an integer off the stack
fn pop_int(stack: &mut Vec<Value>, offset: usize) -> Result<i64, RuntimeError> {
    pop(stack, offset)?
        .as_int()
        .ok_or(RuntimeError::TypeMismatch {
            offset,
            expected: "an integer",
        })
}

/// Index of the instruction a branch lands on
fn branch(offsets: &[usize], offset: usize, next: usize, relative: i32) -> Result<usize, RuntimeError> {
    let target = next as i64 + i64::from(relative);
    usize::try_from(target)
        .ok()
        .and_then(|target| offsets.binary_search(&target).ok())
        .ok_or(RuntimeError::BadBranch { offset, target })
}

/// Runs a snapshot of `code`
pub(super) fn execute(
    runtime: &Runtime,
    code: &MethodCode,
    ret: ValueType,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    // the body is decoded from a snapshot, so an install mid-call only affects later calls
    let bytes = code.snapshot();
    let mut offsets = Vec::new();
    let mut instrs = Vec::new();
    for item in Decoder::new(&bytes) {
        let (offset, instr) = item?;
        offsets.push(offset);
        instrs.push(instr);
    }

    let mut stack: Vec<Value> = Vec::new();
    let mut pc = 0;
    loop {
        let instr = *instrs.get(pc).ok_or(RuntimeError::FellOffEnd)?;
        let offset = offsets[pc];
        let next = offset + instr.encoded_len();
        pc += 1;

        match instr {
            Instr::Nop => {}
            Instr::LdArg(index) => {
                let arg = args
                    .get(usize::from(index))
                    .ok_or(RuntimeError::BadArgument { offset, index })?;
                stack.push(arg.clone());
            }
            Instr::LdInt(v) => stack.push(Value::Int(v.into())),
            Instr::LdFld(field) => {
                let info = runtime.field(field).ok_or(RuntimeError::UnknownField(field))?;
                match pop(&mut stack, offset)? {
                    Value::Object(object) if object.ty() == info.owner => {
                        stack.push(object.field(info.slot).cloned().unwrap_or(Value::Null))
                    }
                    Value::Null => return Err(RuntimeError::NullReference { offset }),
                    _ => {
                        return Err(RuntimeError::TypeMismatch {
                            offset,
                            expected: "an instance of the field's owner",
                        })
                    }
                }
            }
            Instr::Call(function) => {
                let (params, body) = runtime
                    .function(function)
                    .ok_or(RuntimeError::UnknownFunction(function))?;
                if stack.len() < params {
                    return Err(RuntimeError::StackUnderflow { offset });
                }
                let call_args = stack.split_off(stack.len() - params);
                stack.push(body(&call_args));
            }
            Instr::Pop => {
                pop(&mut stack, offset)?;
            }
            Instr::Dup => {
                let value = pop(&mut stack, offset)?;
                stack.push(value.clone());
                stack.push(value);
            }
            Instr::Add | Instr::Mul => {
                let b = pop_int(&mut stack, offset)?;
                let a = pop_int(&mut stack, offset)?;
                let result = match instr {
                    Instr::Add => a.wrapping_add(b),
                    _ => a.wrapping_mul(b),
                };
                stack.push(Value::Int(result));
            }
            Instr::CmpEq => {
                let b = pop(&mut stack, offset)?;
                let a = pop(&mut stack, offset)?;
                stack.push(Value::Int(i64::from(a == b)));
            }
            Instr::Br(relative) => pc = branch(&offsets, offset, next, relative)?,
            Instr::BrFalse(relative) => {
                if pop_int(&mut stack, offset)? == 0 {
                    pc = branch(&offsets, offset, next, relative)?;
                }
            }
            Instr::Ret => {
                let value = pop(&mut stack, offset)?;
                if !value.fits(ret) {
                    return Err(RuntimeError::TypeMismatch {
                        offset,
                        expected: "a value of the declared return type",
                    });
                }
                return Ok(value);
            }
        }
    }
}
