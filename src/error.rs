// Copyright 2025 Antonio Castillo
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Allocator error codes
//!
//! This module provides the status codes returned by the internal
//! allocator primitives. The public façade (see [`crate::alloc`])
//! converts these into the C-shaped null/0/-1 values the core API
//! promises; the `Error` type itself never crosses that boundary.

use std::fmt;

/// Result type for internal allocator operations.
pub type Result<T = ()> = std::result::Result<T, Error>;

/// Error conditions the allocator core can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The port layer could not extend the heap.
    OutOfMemory,
    /// A pointer handed to `free`/`realloc` does not point at a live block.
    InvalidPointer,
    /// `free` was called on a block that is already free.
    DoubleFree,
    /// A boundary tag's XOR check failed. Non-recoverable for the heap.
    HeapCorruption,
    /// `calloc`'s `n * element_size` would overflow.
    OverflowInCalloc,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::OutOfMemory => "heap extension failed",
            Error::InvalidPointer => "pointer does not belong to the heap",
            Error::DoubleFree => "block is already free",
            Error::HeapCorruption => "boundary tag check failed",
            Error::OverflowInCalloc => "calloc element count * size overflows",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}
