//! # Runtime
//!
//! A small stack-machine host. It loads types, fields, and methods, keeps every method body as an
//! encoded instruction stream in read-only code pages, and interprets whatever body is currently
//! installed. It exposes the lookup ([`TypeRegistry`]) and instrumentation ([`HookHost`])
//! surfaces the engine works against.

pub mod builder;
mod hooks;
mod interp;
#[cfg(test)]
pub(crate) mod testing;
mod value;

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::alloc::CodeBuffer;
use crate::code::{DecodeError, FieldId, FunctionId, MethodId, TypeId};
use crate::hook::{HookError, HookHost, ReadyCallback, RevertToken};
use crate::patcher::byte::BytePatcher;
use crate::patcher::mem::{to_mut, PermissionWrapper};
use crate::patcher::Patcher;
use crate::resolve::{FieldInfo, MethodInfo, TypeRegistry};

pub use builder::RuntimeBuilder;
pub use hooks::CodeHook;
pub use value::{Object, Value, ValueType};

use hooks::HookState;

/// Body of a native function
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Parameter and return types of a method or function
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Parameter types, in order
    pub params: Vec<ValueType>,
    /// Return type
    pub ret: ValueType,
}
impl Signature {
    /// Creates a signature
    pub fn new(params: Vec<ValueType>, ret: ValueType) -> Self {
        Self { params, ret }
    }
}

/// Errors raised while loading or running code
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Allocating code pages failed
    #[error("failed to allocate code pages: {0}")]
    Alloc(#[from] region::Error),
    /// No such type
    #[error("unknown type {0:?}")]
    UnknownType(TypeId),
    /// No such method
    #[error("unknown method {0:?}")]
    UnknownMethod(MethodId),
    /// No such field
    #[error("unknown field {0:?}")]
    UnknownField(FieldId),
    /// No such function
    #[error("unknown function {0:?}")]
    UnknownFunction(FunctionId),
    /// Wrong number of values for a call or an instance
    #[error("expected {expected} values, got {found}")]
    Arity {
        /// Values expected
        expected: usize,
        /// Values supplied
        found: usize,
    },
    /// A value doesn't fit its slot
    #[error("value {index} does not match its declared type")]
    ValueType {
        /// Position of the value
        index: usize,
    },
    /// The method body could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// An instruction needed more values than the stack had
    #[error("stack underflow at offset {offset}")]
    StackUnderflow {
        /// Offset of the instruction
        offset: usize,
    },
    /// An instruction found a value of the wrong kind
    #[error("expected {expected} at offset {offset}")]
    TypeMismatch {
        /// Offset of the instruction
        offset: usize,
        /// What was expected
        expected: &'static str,
    },
    /// A field was read through a null reference
    #[error("null reference at offset {offset}")]
    NullReference {
        /// Offset of the instruction
        offset: usize,
    },
    /// A branch points outside the body or into the middle of an instruction
    #[error("branch at offset {offset} targets {target}")]
    BadBranch {
        /// Offset of the branch
        offset: usize,
        /// Byte offset it targets
        target: i64,
    },
    /// An argument index past the end of the argument list
    #[error("argument {index} read at offset {offset} does not exist")]
    BadArgument {
        /// Offset of the instruction
        offset: usize,
        /// Argument index
        index: u8,
    },
    /// Execution ran past the last instruction
    #[error("execution ran off the end of the method")]
    FellOffEnd,
}

/// A loaded type
struct TypeDef {
    /// Type name
    name: String,
    /// Fields, in slot order
    fields: Vec<FieldId>,
    /// Methods, in load order
    methods: Vec<MethodId>,
}

/// A loaded field
struct FieldDef {
    /// Field name
    name: String,
    /// Lookup view of the field
    info: FieldInfo,
}

/// Body of a loaded method
pub(crate) struct MethodCode {
    /// Encoded instruction stream
    buffer: CodeBuffer,
    /// Readers snapshot under the read lock; installs and restores take the write lock
    lock: RwLock<()>,
}
impl MethodCode {
    /// Copies the current body
    pub(crate) fn snapshot(&self) -> Vec<u8> {
        let _read = self.lock.read();
        self.buffer.snapshot()
    }
}

/// A loaded method
struct MethodDef {
    /// Method name
    name: String,
    /// Parameter and return types
    signature: Signature,
    /// Installed body
    code: Arc<MethodCode>,
}

/// A registered native function
struct FunctionDef {
    /// Function name
    name: String,
    /// Parameter and return types
    signature: Signature,
    /// Implementation
    body: NativeFn,
}

/// The host runtime
pub struct Runtime {
    /// Loaded types, indexed by [`TypeId`]
    types: Vec<TypeDef>,
    /// Loaded fields, indexed by [`FieldId`]
    fields: Vec<FieldDef>,
    /// Loaded methods, indexed by [`MethodId`]
    methods: Vec<MethodDef>,
    /// Native functions, indexed by [`FunctionId`]. Grows when functions are registered.
    functions: RwLock<Vec<FunctionDef>>,
    /// Instrumentation subsystem
    hooks: HookState,
}

impl Runtime {
    /// Starts loading a runtime
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates an instance of `ty` with the given field values, in slot order
    pub fn instantiate(&self, ty: TypeId, fields: Vec<Value>) -> Result<Value, RuntimeError> {
        let def = self.types.get(ty.0 as usize).ok_or(RuntimeError::UnknownType(ty))?;
        if def.fields.len() != fields.len() {
            return Err(RuntimeError::Arity {
                expected: def.fields.len(),
                found: fields.len(),
            });
        }
        for (index, (field, value)) in def.fields.iter().zip(&fields).enumerate() {
            if !value.fits(self.fields[field.0 as usize].info.ty) {
                return Err(RuntimeError::ValueType { index });
            }
        }
        Ok(Value::Object(Arc::new(Object::new(ty, fields))))
    }

    /// Runs the currently installed body of `method`
    pub fn invoke(&self, method: MethodId, args: &[Value]) -> Result<Value, RuntimeError> {
        let def = self
            .methods
            .get(method.0 as usize)
            .ok_or(RuntimeError::UnknownMethod(method))?;
        let params = &def.signature.params;
        if params.len() != args.len() {
            return Err(RuntimeError::Arity {
                expected: params.len(),
                found: args.len(),
            });
        }
        if let Some(index) = params.iter().zip(args).position(|(ty, arg)| !arg.fits(*ty)) {
            return Err(RuntimeError::ValueType { index });
        }
        interp::execute(self, &def.code, def.signature.ret, args)
    }

    /// Marks the instrumentation subsystem ready and runs the queued callbacks
    pub fn signal_ready(&self) {
        self.hooks.signal_ready()
    }

    /// Lookup view of a field
    pub(crate) fn field(&self, field: FieldId) -> Option<&FieldInfo> {
        self.fields.get(field.0 as usize).map(|def| &def.info)
    }

    /// Parameter count and body of a function
    pub(crate) fn function(&self, function: FunctionId) -> Option<(usize, NativeFn)> {
        self.functions
            .read()
            .get(function.0 as usize)
            .map(|def| (def.signature.params.len(), Arc::clone(&def.body)))
    }
}

impl TypeRegistry for Runtime {
    fn find_type(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|def| def.name == name)
            .map(|index| TypeId(index as u32))
    }

    fn methods_named(&self, ty: TypeId, name: &str) -> Vec<MethodInfo> {
        let Some(def) = self.types.get(ty.0 as usize) else {
            return Vec::new();
        };
        def.methods
            .iter()
            .filter_map(|&id| {
                let method = &self.methods[id.0 as usize];
                (method.name == name).then(|| MethodInfo {
                    id,
                    params: method.signature.params.clone(),
                })
            })
            .collect()
    }

    fn find_field(&self, ty: TypeId, name: &str) -> Option<FieldInfo> {
        self.types
            .get(ty.0 as usize)?
            .fields
            .iter()
            .map(|id| &self.fields[id.0 as usize])
            .find(|def| def.name == name)
            .map(|def| def.info)
    }

    fn function_signature(&self, function: FunctionId) -> Option<Signature> {
        self.functions
            .read()
            .get(function.0 as usize)
            .map(|def| def.signature.clone())
    }
}

impl HookHost for Runtime {
    fn is_installed(&self) -> bool {
        self.hooks.is_installed()
    }

    fn is_ready(&self) -> bool {
        self.hooks.is_ready()
    }

    fn when_ready(&self, callback: ReadyCallback) {
        self.hooks.when_ready(callback)
    }

    fn find_function(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .read()
            .iter()
            .position(|def| def.name == name)
            .map(|index| FunctionId(index as u32))
    }

    fn register_function(
        &self,
        name: &str,
        signature: Signature,
        body: NativeFn,
    ) -> Result<FunctionId, HookError> {
        self.hooks.check_ready()?;
        let mut functions = self.functions.write();
        if functions.iter().any(|def| def.name == name) {
            return Err(HookError::DuplicateFunction(name.to_string()));
        }
        functions.push(FunctionDef {
            name: name.to_string(),
            signature,
            body,
        });
        Ok(FunctionId(functions.len() as u32 - 1))
    }

    fn read_code(&self, method: MethodId) -> Result<Vec<u8>, HookError> {
        self.methods
            .get(method.0 as usize)
            .map(|def| def.code.snapshot())
            .ok_or(HookError::UnknownMethod(method))
    }

    fn install(&self, method: MethodId, code: &[u8]) -> Result<Box<dyn RevertToken>, HookError> {
        self.hooks.check_ready()?;
        let def = self
            .methods
            .get(method.0 as usize)
            .ok_or(HookError::UnknownMethod(method))?;
        let target = &def.code;
        if code.len() != target.buffer.len() {
            return Err(HookError::SizeMismatch {
                patch: code.len(),
                body: target.buffer.len(),
            });
        }

        let patcher = PermissionWrapper::new(BytePatcher::new());
        let guard = {
            let _write = target.lock.write();
            // Safety: the buffer is valid for `code.len()` bytes and the write lock keeps readers out
            unsafe { patcher.patch(to_mut(target.buffer.as_ptr()), code)? }
        };
        Ok(Box::new(CodeHook::new(Arc::clone(target), guard)))
    }
}
