//! Proximity allocator
//!
//! Pools of executable pages mapped close to an origin. Based on the allocator from detour-rs:
//! https://github.com/darfink/detour-rs

// detour-rs - A cross-platform detour library written in Rust
// Copyright (C) 2017 Elliott Linder.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
//
//  1. Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//  2. Redistributions in binary form must reproduce the above copyright
//     notice, this list of conditions and the following disclaimer in the
//     documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED
// TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A
// PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER
// OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
//
// ===============================================================================
//
// minhook-rs - A minimalist x86/x86-64 hooking library for Rust
// Copyright (C) 2015 Jascha Neutelings.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
//
//  1. Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//  2. Redistributions in binary form must reproduce the above copyright
//     notice, this list of conditions and the following disclaimer in the
//     documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED
// TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A
// PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER
// OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::ops::Range;
use std::slice;

use slice_pool::sync::{SliceBox, SlicePool};

use super::search::{self, Direction};
use super::AllocError;

/// A chunk of a pool
pub type Allocation = SliceBox<u8>;

/// Pools of read-, write- and executable memory, each usable by origins within `max_distance`
pub struct ProximityAllocator {
    /// Max distance between an origin and memory allocated for it
    max_distance: usize,
    /// Mapped pools. Pools are kept for reuse once their chunks are returned
    pools: Vec<SlicePool<u8>>,
}

impl ProximityAllocator {
    /// Creates an allocator without any pool
    pub fn new(max_distance: usize) -> Self {
        Self {
            max_distance,
            pools: Vec::new(),
        }
    }

    /// Allocates `size` bytes within range of `origin`, mapping a new pool if no existing one fits
    pub fn allocate(&mut self, origin: usize, size: usize) -> Result<Allocation, AllocError> {
        let range = origin.saturating_sub(self.max_distance)..origin.saturating_add(self.max_distance);

        if let Some(allocation) = self
            .pools
            .iter()
            .filter(|pool| Self::pool_in_range(pool, &range))
            .find_map(|pool| pool.alloc(size))
        {
            return Ok(allocation);
        }

        let pool = self.map_pool(origin, &range, size)?;
        let allocation = pool.alloc(size).ok_or(AllocError::OutOfMemory)?;
        self.pools.push(pool);
        Ok(allocation)
    }

    /// Whether every byte of `pool` lies within `range`
    fn pool_in_range(pool: &SlicePool<u8>, range: &Range<usize>) -> bool {
        let lower = pool.as_ptr() as usize;
        let upper = lower + pool.len();
        range.contains(&lower) && range.contains(&(upper - 1))
    }

    /// Maps a new pool in the free region closest to `origin`
    fn map_pool(
        &self,
        origin: usize,
        range: &Range<usize>,
        size: usize,
    ) -> Result<SlicePool<u8>, AllocError> {
        let page_size = region::page::size();
        // round up to whole pages; small requests share a single page
        let pool_size = (size.max(1) + page_size - 1) / page_size * page_size;

        // search after the origin first since macOS can't map below the process image
        let after = search::free_regions(origin, range.clone(), Direction::After);
        let before = search::free_regions(origin, range.clone(), Direction::Before);

        for candidate in after.chain(before) {
            let address = candidate?;
            if address + pool_size > range.end {
                continue;
            }
            match Self::map_fixed(address, pool_size) {
                Ok(pool) if Self::pool_in_range(&pool, range) => return Ok(pool),
                Ok(_) => continue,
                Err(AllocError::OutOfMemory) => continue,
                Err(error) => return Err(error),
            }
        }

        Err(AllocError::OutOfMemory)
    }

    /// Maps `size` bytes at exactly `address`
    fn map_fixed(address: usize, size: usize) -> Result<SlicePool<u8>, AllocError> {
        mmap::MemoryMap::new(
            size,
            &[
                mmap::MapOption::MapReadable,
                mmap::MapOption::MapWritable,
                mmap::MapOption::MapExecutable,
                mmap::MapOption::MapAddr(address as *const u8),
            ],
        )
        .map_err(|error| match error {
            mmap::MapError::ErrNoMem => AllocError::OutOfMemory,
            error => AllocError::Map(error),
        })
        .map(MappedPool)
        .map(SlicePool::new)
    }
}

/// A memory map usable as `SlicePool` storage
struct MappedPool(mmap::MemoryMap);

impl AsRef<[u8]> for MappedPool {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the map is valid for `len` bytes for as long as it lives
        unsafe { slice::from_raw_parts(self.0.data(), self.0.len()) }
    }
}

impl AsMut<[u8]> for MappedPool {
    fn as_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and the map is mapped writable
        unsafe { slice::from_raw_parts_mut(self.0.data(), self.0.len()) }
    }
}

// SAFETY: the map is plain memory; `SlicePool` serializes access to its chunks
unsafe impl Send for MappedPool {}
unsafe impl Sync for MappedPool {}

#[cfg(test)]
mod tests {
    use super::ProximityAllocator;

    #[test]
    /// Small allocations are served from the same pool
    fn test_pool_reuse() {
        let origin = test_pool_reuse as usize;
        let mut allocator = ProximityAllocator::new(super::super::PROXIMITY_RANGE);

        let first = allocator.allocate(origin, 32).unwrap();
        let second = allocator.allocate(origin, 32).unwrap();
        assert_eq!(allocator.pools.len(), 1);
        assert_ne!(first.as_ptr(), second.as_ptr());
    }

    #[test]
    /// Returned chunks can be handed out again
    fn test_chunk_returned() {
        let origin = test_chunk_returned as usize;
        let mut allocator = ProximityAllocator::new(super::super::PROXIMITY_RANGE);
        let page_size = region::page::size();

        let whole = allocator.allocate(origin, page_size).unwrap();
        drop(whole);
        allocator.allocate(origin, page_size).unwrap();
        assert_eq!(allocator.pools.len(), 1);
    }
}
