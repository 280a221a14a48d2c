use core::fmt;

/// Errors surfaced to user space through the syscall return register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// Bad pid, bad heap address, wait without children.
    InvalidArgument,
    /// A user pointer that does not resolve in the caller's page table.
    BadAddress,
    /// Process table is full.
    NoProcess,
    /// Out of physical frames or free-list slots.
    OutOfMemory,
    NoSyscall,
    AlreadyMapped,
    NotMapped,
}

impl Errno {
    /// Negative value written back into `a0`.
    pub fn code(self) -> isize {
        match self {
            Errno::InvalidArgument => -22,
            Errno::BadAddress => -14,
            Errno::NoProcess => -11,
            Errno::OutOfMemory => -12,
            Errno::NoSyscall => -38,
            Errno::AlreadyMapped => -17,
            Errno::NotMapped => -2,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Errno::InvalidArgument => "invalid argument",
            Errno::BadAddress => "bad address",
            Errno::NoProcess => "process table full",
            Errno::OutOfMemory => "out of memory",
            Errno::NoSyscall => "no such syscall",
            Errno::AlreadyMapped => "page already mapped",
            Errno::NotMapped => "page not mapped",
        };
        f.write_str(text)
    }
}
