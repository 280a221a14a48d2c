pub const KERNEL_HEAP_SIZE: usize = 0x80_0000;
pub const KERNEL_STACK_SIZE: usize = 0x8_0000;

pub const PHYS_MEMORY_END: usize = 0x8800_0000;

pub const PAGE_SIZE: usize = 4096;

// For processes
pub const USER_STACK_TOP: usize = 0x8000_0000;
pub const USER_STACK_PAGES: usize = 16;
pub const USER_HEAP_BASE: usize = 0x4000_0000;

/// Capacity of the process table.
pub const NPROC: usize = 32;
pub const HEAP_FREE_LIST_CAPACITY: usize = 64;

pub const SYMBOL_CAPACITY: usize = 64;
pub const SYMBOL_NAME_LEN: usize = 32;
/// Backtraces stop after printing this function.
pub const ENTRY_FUNCTION: &str = "main";

/// Upper bound on a single print syscall.
pub const PRINT_MAX: usize = 4096;

/// Timer ticks between two timer interrupts.
pub const TIMEBASE: u64 = 100000;

pub const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Info;
