//! Free region search
//!
//! Walks the address space outwards from an origin looking for unmapped pages. Based on the search
//! from detour-rs: https://github.com/darfink/detour-rs

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

/// Which way to walk from the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards lower addresses
    Before,
    /// Towards higher addresses
    After,
}

/// Returns the page-aligned addresses of free pages within `range`, closest to `origin` first
pub fn free_regions(
    origin: usize,
    range: Range<usize>,
    direction: Direction,
) -> impl Iterator<Item = Result<usize, region::Error>> {
    FreeRegions {
        range,
        direction,
        current: origin,
    }
}

/// Iterator behind [`free_regions`]
struct FreeRegions {
    /// Addresses the search may visit
    range: Range<usize>,
    /// Direction of the walk
    direction: Direction,
    /// Next address to query
    current: usize,
}

impl FreeRegions {
    /// Moves `current` one page past `address` in the search direction
    fn step_from(&mut self, address: usize, page_size: usize) {
        self.current = match self.direction {
            Direction::Before => address.saturating_sub(page_size),
            Direction::After => address.saturating_add(page_size),
        };
    }
}

impl Iterator for FreeRegions {
    type Item = Result<usize, region::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let page_size = region::page::size();

        while self.current > 0 && self.range.contains(&self.current) {
            match region::query(self.current as *const u8) {
                // mapped: skip past the whole region
                Ok(mapped) => {
                    let range = mapped.as_range();
                    self.current = match self.direction {
                        Direction::Before => range.start.saturating_sub(page_size),
                        Direction::After => range.end,
                    };
                }
                Err(region::Error::UnmappedRegion) => {
                    let free = self.current;
                    self.step_from(free, page_size);
                    return Some(Ok(free));
                }
                Err(error) => {
                    let current = self.current;
                    self.step_from(current, page_size);
                    return Some(Err(error));
                }
            }
        }

        None
    }
}
