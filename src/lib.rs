//! SpindleOS: a single-hart RV64 kernel that loads one ELF program and runs
//! it, and everything it forks, under a cooperative FIFO scheduler.
//!
//! Everything here but the board glue builds on the host too, where frames
//! come from the global allocator, so the loader, page tables, scheduler and
//! syscalls are tested as ordinary unit and integration tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod consts;
pub mod debug_line;
pub mod elf;
pub mod error;
pub mod kernel;
pub mod logger;
pub mod mem;
pub mod process;
pub mod sched;
pub mod serial;
pub mod syscall;
pub mod trap;
