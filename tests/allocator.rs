// Copyright 2025 Antonio Castillo
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! End-to-end tests against a real process heap.
//!
//! `sbrk` is genuine process-wide state, so every test here takes
//! `HEAP_LOCK` before touching an `Allocator` -- two tests growing the
//! heap concurrently would each see the other's extension as an
//! impossible jump.

use std::sync::Mutex;

use xmalloc::Allocator;

static HEAP_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn repeated_alloc_free_of_growing_sizes_does_not_fail() {
    let _guard = HEAP_LOCK.lock().unwrap();
    let mut heap = Allocator::new();

    for i in 0..200 {
        let n = i * 37;
        let p = heap.alloc(n.max(1)).expect("alloc should succeed");
        heap.free(p).expect("free should succeed");
    }
}

#[test]
fn freed_neighbors_coalesce_back_into_one_reusable_block() {
    let _guard = HEAP_LOCK.lock().unwrap();
    let mut heap = Allocator::new();

    let a = heap.alloc(64).unwrap();
    let b = heap.alloc(64).unwrap();
    let c = heap.alloc(64).unwrap();

    heap.free(a).unwrap();
    heap.free(c).unwrap();
    heap.free(b).unwrap();

    // a, b, c coalesced into one run; a large enough request should reuse
    // exactly that run rather than growing the heap again.
    let big = heap.alloc(64 * 3 + 32).unwrap();
    assert_eq!(big, a);
}

#[test]
fn realloc_in_place_shrink_then_grow_preserves_prefix() {
    let _guard = HEAP_LOCK.lock().unwrap();
    let mut heap = Allocator::new();

    let p = heap.alloc(512).unwrap();
    unsafe {
        std::slice::from_raw_parts_mut(p as *mut u8, 512).fill(0xab);
    }

    let shrunk = heap.realloc(p, 32).unwrap();
    assert_eq!(shrunk, p);

    let grown = heap.realloc(shrunk, 2048).unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(grown as *const u8, 32) };
    assert!(bytes.iter().all(|&b| b == 0xab));
}

#[test]
fn interleaved_allocations_survive_many_heap_growths() {
    let _guard = HEAP_LOCK.lock().unwrap();
    let mut heap = Allocator::new();
    let mut live = Vec::new();

    for i in 0..64 {
        let p = heap.alloc(4096 + i * 64).unwrap();
        live.push(p);
        if i % 3 == 0 {
            let old = live.remove(0);
            heap.free(old).unwrap();
        }
    }

    for p in live {
        heap.free(p).unwrap();
    }
}

#[test]
fn free_of_unowned_pointer_is_rejected() {
    let _guard = HEAP_LOCK.lock().unwrap();
    let mut heap = Allocator::new();
    heap.alloc(16).unwrap();

    let bogus = 0x1usize;
    assert!(heap.free(bogus).is_err());
}

#[test]
fn free_of_null_is_rejected_without_effect() {
    let _guard = HEAP_LOCK.lock().unwrap();
    let mut heap = Allocator::new();
    let p = heap.alloc(16).unwrap();

    assert!(heap.free(0).is_err());
    // The unrelated live block is untouched.
    heap.free(p).unwrap();
}

#[test]
fn calloc_zero_fills_across_a_reused_block() {
    let _guard = HEAP_LOCK.lock().unwrap();
    let mut heap = Allocator::new();

    let p = heap.alloc(256).unwrap();
    unsafe {
        std::slice::from_raw_parts_mut(p as *mut u8, 256).fill(0x42);
    }
    heap.free(p).unwrap();

    let q = heap.calloc(16, 16).unwrap();
    assert_eq!(q, p);
    let bytes = unsafe { std::slice::from_raw_parts(q as *const u8, 256) };
    assert!(bytes.iter().all(|&b| b == 0));
}
