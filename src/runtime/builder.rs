//! Loading of types, fields, and methods into a [`Runtime`]

use std::sync::Arc;

use parking_lot::RwLock;

use crate::alloc::CodeBuffer;
use crate::code::{encode, FieldId, Instr, MethodId, TypeId};
use crate::resolve::FieldInfo;

use super::hooks::HookState;
use super::{FieldDef, MethodCode, MethodDef, Runtime, RuntimeError, Signature, TypeDef, ValueType};

/// A method waiting to be assembled
struct PendingMethod {
    /// Method name
    name: String,
    /// Parameter and return types
    signature: Signature,
    /// Body
    body: Vec<Instr>,
}

/// Collects definitions and assembles them into a [`Runtime`].
///
/// Ids handed out by one builder are only meaningful to that builder; passing a foreign id panics.
pub struct RuntimeBuilder {
    /// Types defined so far
    types: Vec<TypeDef>,
    /// Fields defined so far
    fields: Vec<FieldDef>,
    /// Methods defined so far
    methods: Vec<PendingMethod>,
    /// Whether the runtime ships an instrumentation subsystem
    hook_subsystem: bool,
    /// Whether that subsystem is ready as soon as the runtime is built
    ready: bool,
}
impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl RuntimeBuilder {
    /// Creates an empty builder. The instrumentation subsystem is installed but not ready.
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            hook_subsystem: true,
            ready: false,
        }
    }

    /// Builds a runtime without an instrumentation subsystem
    pub fn without_hook_subsystem(&mut self) -> &mut Self {
        self.hook_subsystem = false;
        self
    }

    /// Makes the instrumentation subsystem ready from the start
    pub fn ready(&mut self) -> &mut Self {
        self.ready = true;
        self
    }

    /// Defines a type
    pub fn define_type(&mut self, name: &str) -> TypeId {
        self.types.push(TypeDef {
            name: name.to_string(),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        TypeId(self.types.len() as u32 - 1)
    }

    /// Adds a field to `owner`, in the next free slot
    pub fn define_field(&mut self, owner: TypeId, name: &str, ty: ValueType) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        let def = &mut self.types[owner.0 as usize];
        self.fields.push(FieldDef {
            name: name.to_string(),
            info: FieldInfo {
                id,
                owner,
                ty,
                slot: def.fields.len(),
            },
        });
        def.fields.push(id);
        id
    }

    /// Adds a method with the given body to `owner`
    pub fn define_method(
        &mut self,
        owner: TypeId,
        name: &str,
        signature: Signature,
        body: Vec<Instr>,
    ) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.types[owner.0 as usize].methods.push(id);
        self.methods.push(PendingMethod {
            name: name.to_string(),
            signature,
            body,
        });
        id
    }

    /// Assembles every method body into its own read-only code pages
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let methods = self
            .methods
            .into_iter()
            .map(|method| -> Result<MethodDef, RuntimeError> {
                let buffer = CodeBuffer::with_code(&encode(&method.body))?;
                Ok(MethodDef {
                    name: method.name,
                    signature: method.signature,
                    code: Arc::new(MethodCode {
                        buffer,
                        lock: RwLock::new(()),
                    }),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Runtime {
            types: self.types,
            fields: self.fields,
            methods,
            functions: RwLock::new(Vec::new()),
            hooks: HookState::new(self.hook_subsystem, self.ready),
        })
    }
}
