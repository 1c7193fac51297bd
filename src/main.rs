// Copyright 2025 Antonio Castillo
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Command-line driver for the allocator core.
//!
//! Three subcommands exercise the heap the way the library's own test
//! suite does, but against a real process heap rather than a throwaway
//! buffer: `demo` replays the original reference's exact greeting and
//! growing-size sweep, `stress` churns alloc/free/realloc across every
//! size class and reports the resulting heap extent, and `corrupt`
//! deliberately tramples a *free* block's footer to show how the
//! placement engine's search surfaces the poisoning.

use std::ffi::CStr;
use std::os::raw::c_char;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xmalloc", about = "Drive the segregated free-list allocator from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay the reference greeting, then a 1000-step growing-size sweep.
    Demo,
    /// Churn alloc/free/realloc across every size class, then report heap extent.
    Stress {
        /// Number of churn rounds over the size-class table.
        #[arg(long, default_value_t = 3)]
        iterations: usize,
    },
    /// Free a block, corrupt its footer, then try to allocate through it.
    Corrupt,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let code = match cli.command {
        Command::Demo => run_demo(),
        Command::Stress { iterations } => run_stress(iterations),
        Command::Corrupt => run_corrupt(),
    };
    std::process::exit(code);
}

fn run_demo() -> i32 {
    unsafe {
        let p = xmalloc::alloc::alloc(500);
        if p.is_null() {
            log::error!("demo: alloc(500) failed");
            return 1;
        }

        let msg = b"Hello!\0";
        std::ptr::copy_nonoverlapping(msg.as_ptr(), p, msg.len());
        let s = CStr::from_ptr(p as *const c_char);
        println!("{}", s.to_string_lossy());

        xmalloc::alloc::free(p);
    }

    for i in 0..1000usize {
        unsafe {
            let p = xmalloc::alloc::alloc(i * 1000);
            if p.is_null() {
                log::error!("demo: alloc({}) failed at iteration {i}", i * 1000);
                return 1;
            }
            let label = i.to_string();
            std::ptr::copy_nonoverlapping(label.as_ptr(), p, label.len());
            let slice = std::slice::from_raw_parts(p, label.len());
            println!("{}", String::from_utf8_lossy(slice));
            xmalloc::alloc::free(p);
        }
    }
    0
}

/// One representative size per size class (bounds are 512B, 1/2/4/8/16/
/// 32/64/128MiB, and anything past that), so a single round walks every
/// class the free-list index maintains.
const STRESS_SIZE_CLASSES: [usize; 10] = [
    256,
    1 << 20,
    2 << 20,
    4 << 20,
    8 << 20,
    16 << 20,
    32 << 20,
    64 << 20,
    128 << 20,
    129 << 20,
];

fn run_stress(iterations: usize) -> i32 {
    let mut heap = xmalloc::Allocator::new();

    for round in 0..iterations {
        for &n in STRESS_SIZE_CLASSES.iter() {
            let p = match heap.alloc(n) {
                Ok(p) => p,
                Err(e) => {
                    log::error!("stress: alloc({n}) failed in round {round}: {e}");
                    return 1;
                }
            };

            let label = format!("round {round}, size {n}");
            unsafe {
                std::ptr::copy_nonoverlapping(label.as_ptr(), p as *mut u8, label.len());
            }

            // Grow, then shrink back below the original size, to exercise
            // both realloc paths on the same block.
            let grown = match heap.realloc(p, n * 2) {
                Ok(q) => q,
                Err(e) => {
                    log::error!("stress: realloc grow failed in round {round}: {e}");
                    return 1;
                }
            };
            let shrunk = match heap.realloc(grown, n / 2) {
                Ok(q) => q,
                Err(e) => {
                    log::error!("stress: realloc shrink failed in round {round}: {e}");
                    return 1;
                }
            };

            if let Err(e) = heap.free(shrunk) {
                log::error!("stress: free failed in round {round}: {e}");
                return 1;
            }
        }
    }

    let extent = heap.heap_end() - heap.heap_start();
    println!("final heap extent: {extent} bytes ({} - {})", heap.heap_end(), heap.heap_start());
    0
}

fn run_corrupt() -> i32 {
    let mut heap = xmalloc::Allocator::new();
    let p = match heap.alloc(32) {
        Ok(p) => p,
        Err(e) => {
            log::error!("corrupt: alloc failed: {e}");
            return 1;
        }
    };

    if let Err(e) = heap.free(p) {
        log::error!("corrupt: free failed: {e}");
        return 1;
    }

    // Trample the now-free block's footer; the placement engine checks
    // its tags the next time a search walks over it.
    let header = p - xmalloc::tags::WORD;
    unsafe {
        let footer = xmalloc::tags::footer_addr(header, 32);
        std::ptr::write(footer as *mut usize, 0xdead_beef);
    }

    match heap.alloc(32) {
        Ok(_) => {
            println!("alloc succeeded despite corruption (this should not happen)");
            1
        }
        Err(e) => {
            println!("alloc rejected corrupted free block: {e}");
            0
        }
    }
}
