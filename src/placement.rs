// Copyright 2025 Antonio Castillo
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Block placement and heap growth
//!
//! [`find_block`] implements the search-then-fallthrough policy: scan the
//! block's own size class for a first fit (which, since classes 1-9 are
//! kept sorted, is also a best fit), then fall through to the smallest
//! larger class and take its head unconditionally -- anything living
//! there is already bigger than this class's whole range.
//!
//! [`init_heap`] and [`grow_heap`] are the other half: the first lays down
//! the prologue/epilogue sentinels and the initial free block on the
//! heap's first extension; the second folds every later extension into
//! one new free block and re-lays the epilogue at the new top of heap.

use crate::error::{Error, Result};
use crate::freelist::{class_of, FreeLists};
use crate::port::Port;
use crate::tags::{self, WORD};

const NULL: usize = 0;

/// Bytes of padding + prologue (header, 2*WORD body, footer) that precede
/// the first real block's header, per the heap layout table.
pub const PROLOGUE_PREFIX: usize = 5 * WORD;

/// Size field written into the prologue header/footer pair.
const PROLOGUE_SIZE: usize = 2 * WORD;

/// Find a free block of at least `want_size` bytes. Returns its header
/// address and actual size, still linked into its free-list class --
/// the caller is responsible for unlinking it. Fails with
/// [`Error::HeapCorruption`] if a visited node's tags don't check out,
/// without returning that node.
///
/// # Safety
/// Every block linked into `free_lists` must have valid free-list links.
pub unsafe fn find_block(free_lists: &FreeLists, want_size: usize) -> Result<Option<(usize, usize)>> {
    let k0 = class_of(want_size);

    if let Some(head) = free_lists.head(k0) {
        let mut node = head;
        loop {
            if !tags::check(node) {
                return Err(Error::HeapCorruption);
            }
            let size = tags::size_of_header(tags::read_header(node));
            if size >= want_size {
                return Ok(Some((node, size)));
            }
            let next = core::ptr::read((tags::payload_addr(node) + WORD) as *const usize);
            if next == NULL {
                break;
            }
            node = next;
        }
    }

    let Some(k) = free_lists.first_nonempty_from(k0 + 1) else {
        return Ok(None);
    };
    let head = free_lists.head(k).unwrap();
    if !tags::check(head) {
        return Err(Error::HeapCorruption);
    }
    let size = tags::size_of_header(tags::read_header(head));
    Ok(Some((head, size)))
}

/// Result of [`init_heap`]/[`grow_heap`]: a single new free block covering
/// the freshly mapped pages, plus the arena's new top of heap. The caller
/// still runs [`crate::block::coalesce`] on it in case the old top-of-heap
/// block was free; this function only lays down tags.
pub struct Grown {
    pub header: usize,
    pub size: usize,
    pub heap_end: usize,
}

fn pages_for(extra_bytes: usize, page_size: usize) -> usize {
    ((extra_bytes + page_size - 1) / page_size).max(1)
}

/// First-ever heap extension: lays down the padding word, the prologue
/// (header/body/footer, size `2*WORD`, allocated), one free block covering
/// the remaining space, and the epilogue sentinel at the new top.
///
/// # Safety
/// Must be called exactly once, before any other heap operation, with a
/// `port` that has not yet been extended.
pub unsafe fn init_heap(port: &mut Port, min_size: usize) -> Result<Grown> {
    let needed = PROLOGUE_PREFIX + 2 * WORD + min_size + WORD;
    let pages = pages_for(needed, port.page_size());
    let arena_start = port.extend(pages)?;
    let heap_end = port.heap_end();

    let prologue_header = arena_start + WORD;
    tags::write_tags(prologue_header, PROLOGUE_SIZE, true);

    let first_header = tags::next_header_addr(prologue_header, PROLOGUE_SIZE);
    let first_size = (heap_end - WORD) - first_header - 2 * WORD;
    tags::write_tags(first_header, first_size, false);
    core::ptr::write((heap_end - WORD) as *mut usize, 1);

    Ok(Grown {
        header: first_header,
        size: first_size,
        heap_end,
    })
}

/// Grow an already-initialized heap by enough pages to host a block of at
/// least `min_size` bytes. Overwrites the old epilogue slot with the new
/// block's header, re-lays the epilogue at the new top, and updates the
/// prologue's informational total-size field.
///
/// # Safety
/// `arena_start`/`heap_end` must be the values this heap was initialized
/// and last grown with.
pub unsafe fn grow_heap(
    port: &mut Port,
    arena_start: usize,
    heap_end: usize,
    min_size: usize,
) -> Result<Grown> {
    let needed = 2 * WORD + min_size + WORD;
    let pages = pages_for(needed, port.page_size());
    port.extend(pages)?;
    let new_heap_end = port.heap_end();

    // `extend` guarantees contiguity, so the new region starts exactly
    // where the old epilogue used to sit.
    let block_header = heap_end - WORD;
    let block_size = (new_heap_end - WORD) - block_header - 2 * WORD;
    tags::write_tags(block_header, block_size, false);
    core::ptr::write((new_heap_end - WORD) as *mut usize, 1);

    let prologue_header_addr = arena_start + WORD;
    let total = (new_heap_end - arena_start) | 1;
    core::ptr::write(prologue_header_addr as *mut usize, total);

    Ok(Grown {
        header: block_header,
        size: block_size,
        heap_end: new_heap_end,
    })
}
