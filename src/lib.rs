// Copyright 2025 Antonio Castillo
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A segregated free-list dynamic memory allocator.
//!
//! The heap is a single contiguous arena grown with `sbrk` ([`port`]),
//! carved into boundary-tagged blocks ([`tags`]) that can be split
//! ([`block::split`]) and coalesced ([`block::coalesce`]) in constant
//! time. Free blocks are indexed by ten size classes ([`freelist`]);
//! [`placement`] picks a block for a request and grows the heap when
//! every class is empty. [`alloc::Allocator`] wires all of this into the
//! four operations a drop-in allocator needs, plus a process-wide
//! singleton for callers that just want `alloc`/`free`/`calloc`/`realloc`.
//!
//! ```no_run
//! let mut heap = xmalloc::Allocator::new();
//! let p = heap.alloc(64).unwrap();
//! heap.free(p).unwrap();
//! ```

pub mod alloc;
pub mod block;
pub mod error;
pub mod freelist;
pub mod placement;
pub mod port;
pub mod tags;

pub use alloc::Allocator;
pub use error::{Error, Result};
