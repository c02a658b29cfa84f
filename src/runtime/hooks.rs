//! Instrumentation subsystem state and the revert token for installed bodies

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::hook::{HookError, ReadyCallback, RevertToken};
use crate::patcher::byte::BytePatchGuard;
use crate::patcher::mem::PermissionWrapperGuard;
use crate::patcher::PatchGuard;

use super::MethodCode;

/// Readiness and pending callbacks of the subsystem
pub(crate) struct HookState {
    /// Whether the subsystem exists at all
    installed: bool,
    /// Mutable part, behind one lock so queueing and signalling can't interleave
    inner: Mutex<Readiness>,
}

/// See [`HookState::inner`]
#[derive(Default)]
struct Readiness {
    /// Set by the first [`HookState::signal_ready`]
    ready: bool,
    /// Callbacks waiting for readiness
    pending: Vec<ReadyCallback>,
}

impl HookState {
    /// Creates the state for a host with or without the subsystem
    pub(crate) fn new(installed: bool, ready: bool) -> Self {
        Self {
            installed,
            inner: Mutex::new(Readiness {
                ready: installed && ready,
                pending: Vec::new(),
            }),
        }
    }

    /// Whether the subsystem exists
    pub(crate) fn is_installed(&self) -> bool {
        self.installed
    }

    /// Whether the subsystem has been signalled ready
    pub(crate) fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Errors unless the subsystem is installed and ready
    pub(crate) fn check_ready(&self) -> Result<(), HookError> {
        if !self.installed {
            Err(HookError::Unavailable)
        } else if !self.is_ready() {
            Err(HookError::NotReady)
        } else {
            Ok(())
        }
    }

    /// Runs `callback` now if ready, otherwise queues it. Without a subsystem it never runs.
    pub(crate) fn when_ready(&self, callback: ReadyCallback) {
        if !self.installed {
            debug!("no instrumentation subsystem, dropping ready callback");
            return;
        }
        let mut inner = self.inner.lock();
        if inner.ready {
            drop(inner);
            callback();
        } else {
            inner.pending.push(callback);
        }
    }

    /// Marks the subsystem ready and runs every queued callback, outside the lock
    pub(crate) fn signal_ready(&self) {
        if !self.installed {
            return;
        }
        let pending = {
            let mut inner = self.inner.lock();
            inner.ready = true;
            mem::take(&mut inner.pending)
        };
        debug!(callbacks = pending.len(), "instrumentation subsystem ready");
        for callback in pending {
            callback();
        }
    }
}

/// Revert token for a body installed with [`crate::hook::HookHost::install`]
pub struct CodeHook {
    /// The body, kept alive for as long as the patch is
    code: Arc<MethodCode>,
    /// Patch over the body. Disarmed once restored.
    guard: PermissionWrapperGuard<BytePatchGuard>,
}

// SAFETY: the guard points into `code`, which this token keeps alive, and every write through it
// happens under `code`'s write lock
unsafe impl Send for CodeHook {}

impl CodeHook {
    /// Wraps a patch over `code`
    pub(crate) fn new(code: Arc<MethodCode>, guard: PermissionWrapperGuard<BytePatchGuard>) -> Self {
        Self { code, guard }
    }

    /// Restores the original body under the write lock
    fn unpatch(&mut self) -> Result<(), HookError> {
        let _write = self.code.lock.write();
        self.guard.try_restore()?;
        Ok(())
    }
}

impl RevertToken for CodeHook {
    fn original(&self) -> &[u8] {
        self.guard.original()
    }

    fn revert(&mut self) -> Result<(), HookError> {
        self.unpatch()
    }
}

impl Drop for CodeHook {
    fn drop(&mut self) {
        // errors are only reported through `revert`; a body that can't be restored stays patched
        if self.unpatch().is_err() {
            self.guard.leak();
        }
    }
}
