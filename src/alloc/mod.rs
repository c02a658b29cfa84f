//! Page-backed storage for method bodies
//!
//! Loaded code lives in its own pages and is made read-only once written, so every later write
//! has to go through a [`crate::patcher::mem::PermissionWrapper`].

use std::ptr;

use region::{Allocation, Protection};

/// Read-only buffer holding one method body
pub struct CodeBuffer {
    /// Backing pages
    allocation: Allocation,
    /// Number of code bytes at the start of `allocation`
    len: usize,
}

// SAFETY: the buffer is only written through patch guards, and owners serialize those writes
// against reads (see `runtime::MethodCode`)
unsafe impl Send for CodeBuffer {}
unsafe impl Sync for CodeBuffer {}

impl CodeBuffer {
    /// Allocates pages for `code`, copies it in, and makes the pages read-only
    pub fn with_code(code: &[u8]) -> Result<Self, region::Error> {
        // zero-sized allocations are rejected
        let mut allocation = region::alloc(code.len().max(1), Protection::READ_WRITE)?;
        unsafe {
            // Safety: the allocation is at least `code.len()` bytes and currently writable
            ptr::copy_nonoverlapping(code.as_ptr(), allocation.as_mut_ptr::<u8>(), code.len());
            region::protect(allocation.as_ptr::<u8>(), allocation.len(), Protection::READ)?;
        }
        Ok(Self {
            allocation,
            len: code.len(),
        })
    }

    /// Start of the code
    pub fn as_ptr(&self) -> *const u8 {
        self.allocation.as_ptr()
    }

    /// Number of code bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no code
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the current code out of the buffer.
    ///
    /// Callers must make sure no patch is being applied or restored concurrently.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        // Safety: the allocation is readable for `len` bytes for as long as `self` lives
        unsafe { ptr::copy_nonoverlapping(self.as_ptr(), out.as_mut_ptr(), self.len) };
        out
    }

    /// Current protection of the code pages
    pub fn protection(&self) -> Result<Protection, region::Error> {
        region::query(self.as_ptr()).map(|region| region.protection())
    }
}
