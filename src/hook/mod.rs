//! # Hook
//!
//! This module covers the host's instrumentation subsystem: readiness, registration of override
//! functions, and the primitive that swaps a method body in place

use std::convert::Infallible;

use thiserror::Error;

use crate::code::{FunctionId, MethodId};
use crate::patcher::mem::PermissionError;
use crate::resolve::TypeRegistry;
use crate::runtime::{NativeFn, Signature};

/// Callback run once the instrumentation subsystem is ready
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Errors raised by the instrumentation subsystem
#[derive(Debug, Error)]
pub enum HookError {
    /// The host has no instrumentation subsystem
    #[error("instrumentation subsystem is not installed")]
    Unavailable,
    /// The subsystem exists but hasn't finished initializing
    #[error("instrumentation subsystem is not ready")]
    NotReady,
    /// No method with this handle is loaded
    #[error("no method loaded for {0:?}")]
    UnknownMethod(MethodId),
    /// Bodies can only be replaced in place
    #[error("new body is {patch} bytes but the loaded body is {body} bytes")]
    SizeMismatch {
        /// Length of the new body
        patch: usize,
        /// Length of the loaded body
        body: usize,
    },
    /// A function with this name is already registered
    #[error("function `{0}` is already registered")]
    DuplicateFunction(String),
    /// Changing code page protections failed
    #[error(transparent)]
    Protection(#[from] PermissionError<Infallible>),
}

/// Saved state sufficient to undo one installed body
pub trait RevertToken: Send {
    /// Bytes the method body held before the install
    fn original(&self) -> &[u8];

    /// Puts the original body back.
    ///
    /// After a success further calls do nothing; after a failure the token stays armed and the
    /// call can be retried. Dropping a token also restores the body, but errors are lost.
    fn revert(&mut self) -> Result<(), HookError>;
}

/// The parts of the host used to instrument it.
///
/// Implementations keep whatever unsafe mechanism they use to write code behind [`HookHost::install`].
pub trait HookHost: TypeRegistry + Send + Sync {
    /// Whether the host ships an instrumentation subsystem at all
    fn is_installed(&self) -> bool;

    /// Whether the subsystem has finished initializing
    fn is_ready(&self) -> bool;

    /// Queues `callback` to run when the subsystem becomes ready.
    ///
    /// Hosts may run the callback more than once if they signal readiness repeatedly, see
    /// [`crate::gate`].
    fn when_ready(&self, callback: ReadyCallback);

    /// Id of the function registered under `name`, if any.
    ///
    /// Registrations are permanent, so a function registered by an earlier engine is found here
    /// and reused instead of being registered again.
    fn find_function(&self, name: &str) -> Option<FunctionId>;

    /// Registers a native function that rewritten bodies can call. Names are unique per host.
    fn register_function(
        &self,
        name: &str,
        signature: Signature,
        body: NativeFn,
    ) -> Result<FunctionId, HookError>;

    /// Current encoded body of `method`
    fn read_code(&self, method: MethodId) -> Result<Vec<u8>, HookError>;

    /// Replaces the body of `method` in place with `code`, returning a token to undo it
    fn install(&self, method: MethodId, code: &[u8]) -> Result<Box<dyn RevertToken>, HookError>;
}
