//! # Patcher
//!
//! Patchers overwrite locations in memory and restore them when their guard goes away

pub mod byte;
pub mod mem;

/// All patchers save the bytes they overwrite and restore them when the returned guard is dropped
///
/// # Safety
///
/// Patchers are inherently unsafe. The implementor must ensure that the implementation of `patch` works
/// correctly and documents what makes a location valid for it
pub unsafe trait Patcher {
    /// Error type that can occur when patching
    type Error;
    /// Guard type for the patcher. When this guard is dropped, the location is restored
    type Guard: PatchGuard;

    /// Overwrites `target` with `patch`.
    ///
    /// # Safety
    ///
    /// `target` must be valid for `patch.len()` bytes as required by the implementor
    unsafe fn patch(&self, target: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error>;
}

/// Guard for a patch
///
/// # Safety
///
/// Guard must fully unpatch the location when dropped, even if `restore` is not called
pub unsafe trait PatchGuard: Sized {
    /// Restores the original bytes now rather than when the guard goes out of scope
    fn restore(self) {
        // implementations restore in their [`Drop::drop`]
    }
}
