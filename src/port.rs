// Copyright 2025 Antonio Castillo
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! OS heap-extension primitive
//!
//! This module is the allocator's only window onto the operating system.
//! It owns the `(start, end)` pair describing the current heap extent and
//! exposes a single growth operation, [`Port::extend`], that the placement
//! engine calls when every free list comes up empty.
//!
//! Growth is backed by `sbrk(2)` (via `libc`), which already guarantees
//! that the returned region is contiguous with the previous break or fails
//! outright -- exactly the contract the boundary-tagged arena needs. A
//! non-contiguous extension scheme would force per-region metadata the
//! core is deliberately built to avoid.

use crate::error::{Error, Result};

/// Tracks the current heap extent and grows it via `sbrk`.
#[derive(Debug)]
pub struct Port {
    start: usize,
    end: usize,
    page_size: usize,
}

impl Port {
    /// Create a port with no heap yet established. The first call to
    /// [`Port::extend`] performs the initial `sbrk` and fixes `start`.
    pub fn new() -> Self {
        Port {
            start: 0,
            end: 0,
            page_size: query_page_size(),
        }
    }

    /// OS page size, queried once via `sysconf(_SC_PAGESIZE)`.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Start of the heap. Meaningless before the first successful `extend`.
    pub fn heap_start(&self) -> usize {
        self.start
    }

    /// Exclusive end of the heap.
    pub fn heap_end(&self) -> usize {
        self.end
    }

    /// Grow the heap contiguously from `end` by `pages * page_size()` bytes.
    ///
    /// On the very first call this also establishes `start`. Returns the
    /// address of the newly mapped region's first byte.
    pub fn extend(&mut self, pages: usize) -> Result<usize> {
        let grow_by = pages
            .checked_mul(self.page_size)
            .ok_or(Error::OutOfMemory)?;

        let new_break = unsafe { libc::sbrk(grow_by as libc::intptr_t) };
        if new_break as isize == -1 {
            log::error!("port: sbrk({grow_by}) failed, heap stuck at {:#x}", self.end);
            return Err(Error::OutOfMemory);
        }

        let region_start = new_break as usize;
        if self.start == 0 {
            self.start = region_start;
        } else if region_start != self.end {
            // sbrk returned a region that does not start where our last
            // extension left off -- something else moved the break.
            log::error!(
                "port: non-contiguous extension: expected {:#x}, got {:#x}",
                self.end,
                region_start
            );
            return Err(Error::OutOfMemory);
        }

        self.end = region_start + grow_by;
        log::debug!(
            "port: extended by {pages} page(s) ({grow_by} bytes), heap now [{:#x}, {:#x})",
            self.start,
            self.end
        );
        Ok(region_start)
    }
}

impl Default for Port {
    fn default() -> Self {
        Self::new()
    }
}

fn query_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}
