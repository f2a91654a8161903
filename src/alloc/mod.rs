//! # Alloc
//!
//! Executable memory close to a given address. Trampolines need to live within a `rel32` jump of the
//! function they belong to, so allocations are carved out of pages mapped near the requested origin.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;
use thiserror::Error;

use self::proximity::{Allocation, ProximityAllocator};

pub mod proximity;
pub mod search;

/// The furthest distance between an origin and memory allocated for it, keeping every byte of the
/// allocation reachable with a signed 32-bit displacement
pub const PROXIMITY_RANGE: usize = 0x7FFF_0000;

/// Errors while allocating executable memory
#[derive(Debug, Error)]
pub enum AllocError {
    /// No free memory within range of the origin
    #[error("out of memory within range of the requested origin")]
    OutOfMemory,
    /// Mapping a free region failed
    #[error("failed to map memory: {0}")]
    Map(mmap::MapError),
    /// Querying the address space failed
    #[error("failed to query memory region: {0}")]
    Region(#[from] region::Error),
}

lazy_static! {
    /// Process-wide allocator shared by every trampoline
    static ref POOL: Mutex<ProximityAllocator> = Mutex::new(ProximityAllocator::new(PROXIMITY_RANGE));
}

/// Read-, write- and executable memory handed out by [`allocate_near`]. Returned to its pool on drop.
pub struct ExecutableMemory {
    /// Slice of a mapped pool
    data: Allocation,
}

impl ExecutableMemory {
    /// Address of the first byte
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }
}

impl Deref for ExecutableMemory {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for ExecutableMemory {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Allocates `size` bytes of executable memory within [`PROXIMITY_RANGE`] of `origin`
///
/// The contents are unspecified.
pub fn allocate_near(origin: usize, size: usize) -> Result<ExecutableMemory, AllocError> {
    let mut pool = POOL.lock().unwrap_or_else(PoisonError::into_inner);
    pool.allocate(origin, size)
        .map(|data| ExecutableMemory { data })
}

#[cfg(test)]
mod tests {
    use super::{allocate_near, PROXIMITY_RANGE};

    #[inline(never)]
    /// Something to allocate next to
    fn anchor() -> u32 {
        std::hint::black_box(7)
    }

    #[test]
    /// Allocations are in range of their origin and writable
    fn test_allocate_near() {
        let origin = anchor as usize;
        let mut memory = allocate_near(origin, 64).unwrap();
        assert_eq!(memory.len(), 64);
        assert!((memory.as_ptr() as usize).abs_diff(origin) < PROXIMITY_RANGE);

        memory.fill(0xCC);
        assert!(memory.iter().all(|&byte| byte == 0xCC));
    }

    #[test]
    /// Concurrent allocations don't overlap
    fn test_distinct_allocations() {
        let origin = anchor as usize;
        let a = allocate_near(origin, 64).unwrap();
        let b = allocate_near(origin, 64).unwrap();
        let (a, b) = (a.as_ptr() as usize, b.as_ptr() as usize);
        assert!(a + 64 <= b || b + 64 <= a);
    }
}
