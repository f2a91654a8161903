//! This module contains a byte patcher

use std::convert::Infallible;
use std::ptr;

use super::{PatchGuard, Patcher};

/// Patcher copying a byte array over a location. It never fails, but requires the location to be
/// writable already; see [`super::mem::PermissionWrapper`] for code.
#[derive(Debug, Default, Clone, Copy)]
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

    unsafe fn patch(&self, target: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        Ok(BytePatchGuard::patch(target, patch))
    }
}

/// Guard for byte patches, holding the bytes that were overwritten
///
/// See [`BytePatcher`].
#[derive(Debug)]
pub struct BytePatchGuard {
    /// Original data from `location`
    original: Vec<u8>,
    /// Location of the patch
    location: *mut u8,
}

impl BytePatchGuard {
    /// Saves the bytes at `location` and overwrites them with `patch`
    ///
    /// # Safety
    ///
    /// `location` must be valid for reads and writes of `patch.len()` bytes
    unsafe fn patch(location: *mut u8, patch: &[u8]) -> Self {
        let original = std::slice::from_raw_parts(location, patch.len()).to_vec();
        ptr::copy_nonoverlapping(patch.as_ptr(), location, patch.len());
        Self { original, location }
    }

    /// Bytes that were at the location before patching
    pub fn original(&self) -> &[u8] {
        &self.original
    }
}

unsafe impl PatchGuard for BytePatchGuard {}

impl Drop for BytePatchGuard {
    fn drop(&mut self) {
        // SAFETY: the location was valid and writable when patched; the creator keeps it writable for the drop
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

        let patch = unsafe { BytePatcher::new().patch(ptr, &[4, 3, 2, 1]).unwrap() };
        assert_eq!(patch.original(), [1, 2, 3, 4]);
        assert_eq!(unsafe { std::slice::from_raw_parts(ptr, 4) }, [4, 3, 2, 1]);

        patch.restore();
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[test]
    /// Tests a partial patch of a block to ensure we're not overwriting outside the patch area
    fn test_partial_patch() {
        let mut data = [1u8, 2, 3, 4];
        let ptr = data.as_mut_ptr();

        let patch = unsafe { BytePatcher::new().patch(ptr.add(1), &[5, 5]).unwrap() };
        assert_eq!(unsafe { std::slice::from_raw_parts(ptr, 4) }, [1, 5, 5, 4]);

        drop(patch);
        assert_eq!(data, [1, 2, 3, 4]);
    }
}
