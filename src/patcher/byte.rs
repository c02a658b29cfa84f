//! This module contains a byte patcher

use std::convert::Infallible;
use std::ptr;

use super::{PatchGuard, Patcher};

/// Patcher for patching memory locations with byte arrays.
/// This patcher never fails.
#[derive(Default)]
pub struct BytePatcher;
impl BytePatcher {
    /// Creates a new [`BytePatcher`]
    pub fn new() -> Self {
        Self
    }
}
unsafe impl Patcher for BytePatcher {
    type Error = Infallible;
    type Guard = BytePatchGuard;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        Ok(BytePatchGuard::patch(location, patch))
    }
}

/// Guard for byte-patches
///
/// See [`BytePatcher`].
pub struct BytePatchGuard {
    /// Original data from `location`
    original: Vec<u8>,
    /// Location of the patch
    location: *mut u8,
}
impl BytePatchGuard {
    /// Patches a location, returning a guard for unpatching
    ///
    /// # Safety
    ///
    /// `location` must be valid for reads and writes of `patch.len()` bytes
    unsafe fn patch(location: *mut u8, patch: &[u8]) -> Self {
        let mut original = vec![0u8; patch.len()];

        // Safety: caller must pass in a `location` pointer that is valid for the full length of the patch
        ptr::copy_nonoverlapping(location, original.as_mut_ptr(), patch.len());

        let guard = Self { original, location };

        // Safety: caller must ensure that `location` is writable
        ptr::copy_nonoverlapping(patch.as_ptr(), location, patch.len());

        guard
    }
}
unsafe impl PatchGuard for BytePatchGuard {
    type Error = Infallible;

    fn original(&self) -> &[u8] {
        &self.original
    }

    fn restore(self) -> Result<(), Self::Error> {
        // implemented in [`Drop::drop`]
        Ok(())
    }
}
impl Drop for BytePatchGuard {
    fn drop(&mut self) {
        // Safety: creator must pass in a `location` pointer that is valid and writable for the full length of the patch
        unsafe {
            ptr::copy_nonoverlapping(self.original.as_ptr(), self.location, self.original.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::patcher::byte::BytePatcher;
    use crate::patcher::{PatchGuard, Patcher};

    #[test]
    /// Test patch and revert functionality
    fn test_patch() {
        let mut data = [1u8, 2, 3, 4];
        let ptr = data.as_mut_ptr();

        // get our patcher to test
        let patcher = BytePatcher::new();

        // patch the data
        let patch = unsafe { patcher.patch(ptr, &[4, 3, 2, 1]).unwrap() };
        assert_eq!(patch.original(), [1, 2, 3, 4]);

        // make sure the data was actually changed
        assert_eq!(unsafe { *ptr.add(0) }, 4);
        assert_eq!(unsafe { *ptr.add(3) }, 1);

        // restore the patch
        patch.restore().unwrap();

        // make sure the patch was restored
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[test]
    /// Tests a partial patch of a block to ensure we're not overwriting outside the patch area
    fn test_partial_patch() {
        let mut data = [1u8, 2, 3, 4];
        let ptr = data.as_mut_ptr();

        let patcher = BytePatcher::new();

        // patch the middle of the data
        let patch = unsafe { patcher.patch(ptr.add(1), &[5, 5]).unwrap() };
        assert_eq!(patch.original(), [2, 3]);
        assert_eq!(
            unsafe { [*ptr, *ptr.add(1), *ptr.add(2), *ptr.add(3)] },
            [1, 5, 5, 4]
        );

        // dropping the guard restores as well
        drop(patch);

        assert_eq!(data, [1, 2, 3, 4]);
    }
}
