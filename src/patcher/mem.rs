//! This module contains a patcher which adjusts memory permissions to patch read-only data

use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;
use region::Protection;
use thiserror::Error;

use super::{PatchGuard, Patcher};

lazy_static! {
    /// Protection changes are process-wide: two patches on one page must not interleave their
    /// make-writable and restore steps
    static ref PROTECT_LOCK: Mutex<()> = Mutex::new(());
}

/// Errors when using permission patching
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// Error when setting memory protections
    #[error("error setting memory protections: {0}")]
    ProtectionError(#[from] region::Error),
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    CustomError(E),
}

/// This struct wraps patchers to allow them to write to memory that's normally unwritable.
/// It makes the target writable, triggers the patch and then reverts the permissions; the same happens
/// again when the guard restores the location.
///
/// # Safety
///
/// `PermissionWrapper` relies on the size of the patch value to determine how many pages to change,
/// so pairing it with a patcher that writes more memory than the size of the patch is undefined behavior.
///
/// The `*mut u8` **MUST** be memory not tracked by Rust, or ensured that reading from and writing to data
/// tracked by Rust will not trigger undefined behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionWrapper<P: Patcher> {
    /// Underlying patcher
    patcher: P,
}

impl<P: Patcher> PermissionWrapper<P> {
    /// Creates a new PermissionWrapper
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

unsafe impl<P: Patcher> Patcher for PermissionWrapper<P> {
    type Error = PermissionError<P::Error>;
    type Guard = PermissionWrapperGuard<P::Guard>;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        let _lock = PROTECT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let _protection = region::protect_with_handle(
            location,
            patch.len(),
            Protection::READ_WRITE_EXECUTE,
        )?;
        self.patcher
            .patch(location, patch)
            .map(|guard| PermissionWrapperGuard::guard(guard, location, patch.len()))
            .map_err(PermissionError::CustomError)
    }
}

/// Permission guard for the underlying patch guard
#[derive(Debug)]
pub struct PermissionWrapperGuard<G: PatchGuard> {
    /// Underlying patch guard. `Option` so that we can drop it in our [`Drop::drop`] impl
    guard: Option<G>,
    /// Location of the patch
    location: *const u8,
    /// Length of the patch
    len: usize,
}

impl<G: PatchGuard> PermissionWrapperGuard<G> {
    /// Wraps a patcher's guard, making the location writable again while the inner guard is dropped
    fn guard(guard: G, location: *const u8, len: usize) -> Self {
        Self {
            guard: Some(guard),
            location,
            len,
        }
    }
}

unsafe impl<G: PatchGuard> PatchGuard for PermissionWrapperGuard<G> {}

impl<G: PatchGuard> Drop for PermissionWrapperGuard<G> {
    fn drop(&mut self) {
        let _lock = PROTECT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        // SAFETY: the location was valid for `len` bytes when patched
        let protection = unsafe {
            region::protect_with_handle(self.location, self.len, Protection::READ_WRITE_EXECUTE)
        };
        match protection {
            Ok(_protection) => {
                if let Some(guard) = self.guard.take() {
                    guard.restore();
                }
            }
            Err(error) => {
                // writing now would fault, so the patch stays in place
                tracing::error!(location = ?self.location, %error, "failed to restore patched memory");
                if let Some(guard) = self.guard.take() {
                    std::mem::forget(guard);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::slice;

    use region::Protection;

    use crate::patcher::byte::BytePatcher;
    use crate::patcher::mem::PermissionWrapper;
    use crate::patcher::{PatchGuard, Patcher};

    /// Asserts that `len` bytes at `ptr` are mapped read-only
    fn assert_read_only(ptr: *const u8, len: usize) {
        for region in region::query_range(ptr, len).unwrap() {
            let region = region.unwrap();
            assert!(!region.is_guarded());
            assert_eq!(region.protection(), Protection::READ);
        }
    }

    #[test]
    /// Patching writable memory works and restores it
    fn test_patch() {
        let mut data = vec![1u8, 2, 3, 4];
        let ptr = data.as_mut_ptr();

        let wrapper = PermissionWrapper::new(BytePatcher::new());
        let patch = unsafe { wrapper.patch(ptr, &[4, 3, 2, 1]).unwrap() };
        assert_eq!(unsafe { slice::from_raw_parts(ptr, 4) }, [4, 3, 2, 1]);

        patch.restore();
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[test]
    /// Tests to ensure permissions are actually set and reverted
    fn test_perms() {
        // Global immutables are stored in a read-only section in the binary.
        // Normally, writing to this global would result in a segfault, but PermissionWrapper changes the permissions to be writable so that no fault occurs
        static DATA: [u8; 4] = *b"wxyz";
        let ptr = DATA.as_ptr();
        let size = DATA.len();

        assert_read_only(ptr, size);

        let wrapper = PermissionWrapper::new(BytePatcher::new());
        let patch = unsafe { wrapper.patch(ptr as *mut u8, &[4, 3, 2, 1]).unwrap() };

        // read through the pointer so the compiler can't assume the static never changes
        assert_eq!(unsafe { slice::from_raw_parts(ptr, size) }, [4, 3, 2, 1]);
        assert_read_only(ptr, size);

        patch.restore();
        assert_eq!(unsafe { slice::from_raw_parts(ptr, size) }, *b"wxyz");
        assert_read_only(ptr, size);
    }
}
