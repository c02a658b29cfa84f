//! This module contains a patcher which adjusts memory permissions to patch read-only data

use std::convert::Infallible;
use std::mem;

use region::Protection;
use thiserror::Error;

use super::{PatchGuard, Patcher};

/// Errors when using permission patching
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// Error when setting memory protections
    #[error("Error setting memory protections: {0}")]
    ProtectionError(#[from] region::Error),
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    CustomError(E),
}
impl From<Infallible> for PermissionError<Infallible> {
    fn from(e: Infallible) -> Self {
        Self::CustomError(e)
    }
}

/// This struct wraps patchers to allow them to write to memory that's normally unwritable.
/// It achieves this result by changing the memory permissions of the target memory, triggering the patch, and then reverting the permissions.
///
/// # Safety
///
/// `PermissionWrapper` relies on the size of the patch value to determine how many pages to change write permissions,
/// pairing `PermissionWrapper` with a patcher that writes more memory than the size of the patch is undefined behavior.
///
/// The `*mut u8` **MUST** be memory not tracked by Rust (such as a [`crate::alloc::CodeBuffer`]), or ensured that reading from and writing to data tracked by Rust will not trigger undefined behavior.
pub struct PermissionWrapper<P: Patcher> {
    /// Underlying patcher.
    patcher: P,
}
impl<P: Patcher> PermissionWrapper<P> {
    /// Creates a new PermissionWrapper
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

/// Converts a const pointer to a mutable pointer to be passed into our [`Patcher::patch`] implementation.
///
/// # Safety
///
/// **THIS FUNCTION DOES NOT CHANGE MEMORY PERMISSIONS.**
///
/// It is **NOT** safe to treat the returned value as mutable, as this function does not change memory permissions.
///
/// This function should **ONLY** be called in conjunction with our [`Patcher::patch`] implementation, which properly changes the memory permissions.
pub unsafe fn to_mut<T>(ptr: *const T) -> *mut T {
    ptr as _
}

unsafe impl<P> Patcher for PermissionWrapper<P>
where
    P: Patcher,
    PermissionError<P::Error>: From<P::Error>,
{
    type Error = PermissionError<P::Error>;
    type Guard = PermissionWrapperGuard<P::Guard>;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        let _guard = region::protect_with_handle(location, patch.len(), Protection::READ_WRITE)?;
        self.patcher
            .patch(location, patch)
            .map(|g| PermissionWrapperGuard::guard(g, location, patch.len()))
            .map_err(Into::into)
    }
}

/// Permission guard for the underlying patch guard
pub struct PermissionWrapperGuard<G: PatchGuard> {
    /// Underlying patch guard for the wrapped patcher. `Option` so that we can drop it in our [`Drop::drop`] impl
    guard: Option<G>,
    /// Location of the patch
    location: *const u8,
    /// Length of the patch
    len: usize,
}
impl<G: PatchGuard> PermissionWrapperGuard<G> {
    /// Wrap a patcher's guard. When this guard is dropped, the underlying guard will also be dropped with its target location made writable
    fn guard(guard: G, location: *const u8, len: usize) -> Self {
        let guard = Some(guard);
        Self {
            guard,
            location,
            len,
        }
    }

    /// Makes the location writable and restores the underlying guard.
    ///
    /// If the location can't be made writable the guard stays armed, so the restore can be retried.
    pub fn try_restore(&mut self) -> Result<(), PermissionError<G::Error>> {
        let Some(guard) = self.guard.take() else {
            return Ok(());
        };
        // Safety: `location` was valid for `len` bytes when the patch was made
        let _protection =
            match unsafe { region::protect_with_handle(self.location, self.len, Protection::READ_WRITE) } {
                Ok(protection) => protection,
                Err(e) => {
                    self.guard = Some(guard);
                    return Err(e.into());
                }
            };
        guard.restore().map_err(PermissionError::CustomError)
    }

    /// Gives up on restoring. The patch stays in place and nothing is written on drop.
    pub fn leak(&mut self) {
        if let Some(guard) = self.guard.take() {
            // the underlying guard would write to memory that may not be writable
            mem::forget(guard);
        }
    }
}
unsafe impl<G: PatchGuard> PatchGuard for PermissionWrapperGuard<G> {
    type Error = PermissionError<G::Error>;

    fn original(&self) -> &[u8] {
        self.guard.as_ref().map(G::original).unwrap_or_default()
    }

    fn restore(mut self) -> Result<(), Self::Error> {
        self.try_restore()
    }
}

impl<G: PatchGuard> Drop for PermissionWrapperGuard<G> {
    fn drop(&mut self) {
        // errors are only reported through `restore`
        if self.try_restore().is_err() {
            self.leak();
        }
    }
}

#[cfg(test)]
mod tests {
    use region::Protection;

    use crate::alloc::CodeBuffer;
    use crate::patcher::byte::BytePatcher;
    use crate::patcher::mem::{to_mut, PermissionWrapper};
    use crate::patcher::{PatchGuard, Patcher};

    #[test]
    /// Tests to ensure permissions are actually set
    fn test_perms() {
        let buffer = CodeBuffer::with_code(b"1234").unwrap();

        // sanity check
        assert_eq!(buffer.snapshot(), b"1234");
        assert_eq!(buffer.protection().unwrap(), Protection::READ);

        // patch the read-only code
        let patcher = PermissionWrapper::new(BytePatcher::new());
        let patch = unsafe { patcher.patch(to_mut(buffer.as_ptr()), &[4, 3, 2, 1]).unwrap() };
        assert_eq!(patch.original(), b"1234");

        // make sure the data was actually changed
        assert_eq!(buffer.snapshot(), [4, 3, 2, 1]);

        // make sure permissions reverted correctly after the patch
        assert_eq!(buffer.protection().unwrap(), Protection::READ);

        // restore the patch
        patch.restore().unwrap();

        // make sure the patch was restored
        assert_eq!(buffer.snapshot(), b"1234");

        // make sure permissions were restored
        assert_eq!(buffer.protection().unwrap(), Protection::READ);
    }

    #[test]
    /// Dropping the guard restores read-only memory too
    fn test_drop_restores() {
        let buffer = CodeBuffer::with_code(&[9, 9, 9]).unwrap();
        let patcher = PermissionWrapper::new(BytePatcher::new());
        let patch = unsafe { patcher.patch(to_mut(buffer.as_ptr()), &[0]).unwrap() };
        assert_eq!(buffer.snapshot(), [0, 9, 9]);
        drop(patch);
        assert_eq!(buffer.snapshot(), [9, 9, 9]);
        assert_eq!(buffer.protection().unwrap(), Protection::READ);
    }

    #[test]
    /// A restored guard has nothing left to restore, and a leaked one leaves the patch in place
    fn test_try_restore_and_leak() {
        let buffer = CodeBuffer::with_code(&[1, 2]).unwrap();
        let patcher = PermissionWrapper::new(BytePatcher::new());

        let mut patch = unsafe { patcher.patch(to_mut(buffer.as_ptr()), &[7]).unwrap() };
        patch.try_restore().unwrap();
        assert_eq!(buffer.snapshot(), [1, 2]);
        assert!(patch.original().is_empty());
        patch.try_restore().unwrap();

        let mut patch = unsafe { patcher.patch(to_mut(buffer.as_ptr()), &[7]).unwrap() };
        patch.leak();
        drop(patch);
        assert_eq!(buffer.snapshot(), [7, 2]);
        assert_eq!(buffer.protection().unwrap(), Protection::READ);
    }
}
