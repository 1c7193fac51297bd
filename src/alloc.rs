// Copyright 2025 Antonio Castillo
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The allocator façade
//!
//! [`Allocator`] ties the port, boundary tags, free lists and placement
//! policy together into the four operations malloc implementations are
//! judged by: `alloc`, `free`, `calloc`, `realloc`. A process-wide
//! singleton, guarded by a `Mutex`, backs the free functions at the
//! bottom of this module so the crate can stand in for a drop-in
//! allocator; [`Allocator::new`] remains public for tests and for callers
//! who want an isolated heap instance.
//!
//! Once a boundary-tag check fails anywhere, the allocator is marked
//! poisoned and every subsequent call fails fast with
//! [`Error::HeapCorruption`] rather than touching memory it can no longer
//! trust.

use std::sync::{Mutex, OnceLock};

use crate::block;
use crate::error::{Error, Result};
use crate::freelist::FreeLists;
use crate::placement::{self, PROLOGUE_PREFIX};
use crate::port::Port;
use crate::tags::{self, MIN_SIZE, WORD};

/// A single, independently growable heap.
pub struct Allocator {
    port: Port,
    free_lists: FreeLists,
    /// Start of the raw OS-mapped arena (`0` until the first `alloc`).
    arena_start: usize,
    /// Exclusive end of the raw OS-mapped arena.
    heap_end: usize,
    poisoned: bool,
}

impl Allocator {
    /// A fresh allocator with no heap yet mapped. The first `alloc` call
    /// performs the initial `sbrk` and lays down the prologue/epilogue.
    pub fn new() -> Self {
        Allocator {
            port: Port::new(),
            free_lists: FreeLists::new(),
            arena_start: 0,
            heap_end: 0,
            poisoned: false,
        }
    }

    fn size_for_request(n: usize) -> usize {
        tags::align_up(n.max(MIN_SIZE))
    }

    fn check_live(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::HeapCorruption);
        }
        Ok(())
    }

    /// Header address of the first real (non-prologue) block slot.
    fn first_block_header(&self) -> usize {
        self.arena_start + PROLOGUE_PREFIX
    }

    /// Start of the raw OS-mapped arena, or `0` if no heap has been mapped
    /// yet (no `alloc` has run).
    pub fn heap_start(&self) -> usize {
        self.arena_start
    }

    /// Exclusive end of the raw OS-mapped arena, or `0` if no heap has
    /// been mapped yet.
    pub fn heap_end(&self) -> usize {
        self.heap_end
    }

    fn validate_owned(&self, header: usize) -> Result<()> {
        if self.arena_start == 0
            || header < self.first_block_header()
            || header >= self.heap_end - WORD
        {
            return Err(Error::InvalidPointer);
        }
        Ok(())
    }

    fn poison(&mut self, where_: &str) -> Error {
        log::error!("alloc: boundary tag check failed in {where_}, heap is now poisoned");
        self.poisoned = true;
        Error::HeapCorruption
    }

    fn grow(&mut self, min_size: usize) -> Result<()> {
        let grown = if self.heap_end == 0 {
            unsafe { placement::init_heap(&mut self.port, min_size)? }
        } else {
            unsafe { placement::grow_heap(&mut self.port, self.arena_start, self.heap_end, min_size)? }
        };
        if self.arena_start == 0 {
            self.arena_start = self.port.heap_start();
        }
        self.heap_end = grown.heap_end;

        let merged = unsafe { block::coalesce(grown.header, grown.size) };
        if let Some(prev) = merged.absorbed_prev {
            unsafe { self.free_lists.remove(prev.header, prev.size) };
        }
        unsafe { self.free_lists.insert(merged.header, merged.size) };
        Ok(())
    }

    /// Allocate at least `n` bytes, zero-filled. Growing the heap happens
    /// transparently when no free block is large enough.
    pub fn alloc(&mut self, n: usize) -> Result<usize> {
        self.check_live()?;
        let size = Self::size_for_request(n);

        loop {
            let found = unsafe { placement::find_block(&self.free_lists, size) };
            let found = match found {
                Ok(found) => found,
                Err(e) => {
                    self.poisoned = true;
                    log::error!("alloc: corrupted free-list node found during search");
                    return Err(e);
                }
            };

            if let Some((header, block_size)) = found {
                unsafe { self.free_lists.remove(header, block_size) };
                let split = unsafe { block::split(header, block_size, size) };
                if let Some(rem_header) = split.remainder {
                    unsafe { self.free_lists.insert(rem_header, split.remainder_size) };
                }
                let payload = tags::payload_addr(header);
                unsafe { core::ptr::write_bytes(payload as *mut u8, 0, size) };
                log::debug!("alloc: {n} bytes -> block of {size} at {:#x}", header);
                return Ok(payload);
            }

            self.grow(size)?;
        }
    }

    /// Release a block previously returned by `alloc`/`calloc`/`realloc`.
    /// A null or otherwise out-of-heap address is rejected rather than
    /// silently ignored.
    pub fn free(&mut self, payload_addr: usize) -> Result<()> {
        self.check_live()?;
        if payload_addr == 0 {
            return Err(Error::InvalidPointer);
        }
        let header = payload_addr - WORD;
        self.validate_owned(header)?;

        let raw = unsafe { tags::read_header(header) };
        if !tags::is_allocated_header(raw) {
            log::warn!("free: double free at {:#x}", header);
            return Err(Error::DoubleFree);
        }
        if unsafe { !tags::check(header) } {
            return Err(self.poison("free"));
        }
        let size = tags::size_of_header(raw);

        let merged = unsafe { block::coalesce(header, size) };
        if let Some(prev) = merged.absorbed_prev {
            unsafe { self.free_lists.remove(prev.header, prev.size) };
        }
        if let Some(next) = merged.absorbed_next {
            unsafe { self.free_lists.remove(next.header, next.size) };
        }
        unsafe { self.free_lists.insert(merged.header, merged.size) };
        log::debug!("free: block at {:#x} ({size} bytes) released", header);
        Ok(())
    }

    /// Allocate space for `count` elements of `elem_size` bytes each,
    /// zero-filled. Fails with [`Error::OverflowInCalloc`] rather than
    /// silently wrapping, matching hardened libc implementations.
    pub fn calloc(&mut self, count: usize, elem_size: usize) -> Result<usize> {
        self.check_live()?;
        let total = count.checked_mul(elem_size).ok_or(Error::OverflowInCalloc)?;
        self.alloc(total)
    }

    /// Resize a live block to `new_n` bytes, preserving the first
    /// `min(old_size, new_n)` bytes. `realloc(0, n)` behaves like
    /// `alloc(n)`; `realloc(ptr, 0)` behaves like `free(ptr)` and returns 0.
    pub fn realloc(&mut self, payload_addr: usize, new_n: usize) -> Result<usize> {
        self.check_live()?;
        if payload_addr == 0 {
            return self.alloc(new_n);
        }
        if new_n == 0 {
            self.free(payload_addr)?;
            return Ok(0);
        }

        let header = payload_addr - WORD;
        self.validate_owned(header)?;
        let raw = unsafe { tags::read_header(header) };
        if !tags::is_allocated_header(raw) {
            return Err(Error::InvalidPointer);
        }
        if unsafe { !tags::check(header) } {
            return Err(self.poison("realloc"));
        }
        let old_size = tags::size_of_header(raw);
        let new_size = Self::size_for_request(new_n);

        if new_size <= old_size {
            let split = unsafe { block::split(header, old_size, new_size) };
            if let Some(rem_header) = split.remainder {
                let merged = unsafe { block::coalesce(rem_header, split.remainder_size) };
                if let Some(next) = merged.absorbed_next {
                    unsafe { self.free_lists.remove(next.header, next.size) };
                }
                unsafe { self.free_lists.insert(merged.header, merged.size) };
            }
            return Ok(payload_addr);
        }

        let new_payload = self.alloc(new_size)?;
        unsafe {
            core::ptr::copy_nonoverlapping(
                payload_addr as *const u8,
                new_payload as *mut u8,
                old_size,
            );
        }
        self.free(payload_addr)?;
        log::debug!(
            "realloc: block at {:#x} ({old_size} -> {new_size}) moved to {:#x}",
            header,
            new_payload - WORD
        );
        Ok(new_payload)
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<Mutex<Allocator>> = OnceLock::new();

fn global() -> &'static Mutex<Allocator> {
    GLOBAL.get_or_init(|| Mutex::new(Allocator::new()))
}

/// Process-wide `malloc`. Returns a null pointer on failure.
pub fn alloc(n: usize) -> *mut u8 {
    let mut guard = global().lock().unwrap();
    match guard.alloc(n) {
        Ok(addr) => addr as *mut u8,
        Err(e) => {
            log::warn!("alloc({n}) failed: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Process-wide `free`. Returns `0` on success, `-1` on error.
pub fn free(ptr: *mut u8) -> i32 {
    let mut guard = global().lock().unwrap();
    match guard.free(ptr as usize) {
        Ok(()) => 0,
        Err(e) => {
            log::warn!("free({:#x}) failed: {e}", ptr as usize);
            -1
        }
    }
}

/// Process-wide `calloc`. Returns a null pointer on failure.
pub fn calloc(count: usize, elem_size: usize) -> *mut u8 {
    let mut guard = global().lock().unwrap();
    match guard.calloc(count, elem_size) {
        Ok(addr) => addr as *mut u8,
        Err(e) => {
            log::warn!("calloc({count}, {elem_size}) failed: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Process-wide `realloc`. Returns a null pointer on failure, leaving the
/// original block untouched.
pub fn realloc(ptr: *mut u8, new_n: usize) -> *mut u8 {
    let mut guard = global().lock().unwrap();
    match guard.realloc(ptr as usize, new_n) {
        Ok(addr) => addr as *mut u8,
        Err(e) => {
            log::warn!("realloc({:#x}, {new_n}) failed: {e}", ptr as usize);
            std::ptr::null_mut()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::test_support::SBRK_LOCK;

    #[test]
    fn alloc_then_free_round_trips() {
        let _guard = SBRK_LOCK.lock().unwrap();
        let mut a = Allocator::new();
        let p = a.alloc(128).unwrap();
        assert_ne!(p, 0);
        a.free(p).unwrap();
    }

    #[test]
    fn alloc_is_zero_filled() {
        let _guard = SBRK_LOCK.lock().unwrap();
        let mut a = Allocator::new();
        let p = a.alloc(64).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(p as *const u8, 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn double_free_is_rejected() {
        let _guard = SBRK_LOCK.lock().unwrap();
        let mut a = Allocator::new();
        let p = a.alloc(32).unwrap();
        a.free(p).unwrap();
        assert_eq!(a.free(p), Err(Error::DoubleFree));
    }

    #[test]
    fn freed_block_is_reused_by_next_alloc_of_same_size() {
        let _guard = SBRK_LOCK.lock().unwrap();
        let mut a = Allocator::new();
        let p1 = a.alloc(100).unwrap();
        a.free(p1).unwrap();
        let p2 = a.alloc(100).unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn realloc_grow_preserves_contents() {
        let _guard = SBRK_LOCK.lock().unwrap();
        let mut a = Allocator::new();
        let p = a.alloc(16).unwrap();
        unsafe {
            std::slice::from_raw_parts_mut(p as *mut u8, 16).copy_from_slice(&[7u8; 16]);
        }
        let p2 = a.realloc(p, 256).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(p2 as *const u8, 16) };
        assert_eq!(bytes, &[7u8; 16]);
    }

    #[test]
    fn realloc_to_zero_frees_and_returns_null() {
        let _guard = SBRK_LOCK.lock().unwrap();
        let mut a = Allocator::new();
        let p = a.alloc(16).unwrap();
        let r = a.realloc(p, 0).unwrap();
        assert_eq!(r, 0);
    }

    #[test]
    fn calloc_overflow_is_rejected() {
        let _guard = SBRK_LOCK.lock().unwrap();
        let mut a = Allocator::new();
        assert_eq!(a.calloc(usize::MAX, 2), Err(Error::OverflowInCalloc));
    }

    #[test]
    fn corrupted_heap_poisons_future_operations() {
        let _guard = SBRK_LOCK.lock().unwrap();
        let mut a = Allocator::new();
        let p = a.alloc(32).unwrap();
        let header = p - WORD;
        unsafe {
            core::ptr::write(tags::footer_addr(header, 32) as *mut usize, 0xdead_beef);
        }
        assert_eq!(a.free(p), Err(Error::HeapCorruption));
        assert_eq!(a.alloc(8), Err(Error::HeapCorruption));
    }

    #[test]
    fn corrupted_free_block_is_caught_during_placement_search() {
        let _guard = SBRK_LOCK.lock().unwrap();
        let mut a = Allocator::new();
        let p = a.alloc(32).unwrap();
        a.free(p).unwrap();

        let header = p - WORD;
        unsafe {
            core::ptr::write(tags::footer_addr(header, 32) as *mut usize, 0xdead_beef);
        }

        assert_eq!(a.alloc(32), Err(Error::HeapCorruption));
    }
}
