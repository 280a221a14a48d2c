use core::fmt;

use crate::elf::{ByteSource, ElfContext, ElfError, SymbolTable};
use crate::error::Errno;
use crate::process::{Pid, Process};
use crate::sched::Sched;
use crate::trap::TrapFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    Elf(ElfError),
    Kernel(Errno),
}

impl From<ElfError> for BootError {
    fn from(err: ElfError) -> Self {
        BootError::Elf(err)
    }
}

impl From<Errno> for BootError {
    fn from(err: Errno) -> Self {
        BootError::Kernel(err)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Elf(err) => write!(f, "cannot load program: {}", err),
            BootError::Kernel(err) => write!(f, "cannot create process: {}", err),
        }
    }
}

/// Everything the trap path mutates: the process table and the symbols of
/// the loaded program.
#[derive(Default)]
pub struct Kernel {
    pub sched: Sched,
    pub symbols: SymbolTable,
    /// Soft-interrupt ticks acknowledged so far.
    pub ticks: u64,
    last_exit: isize,
}

impl Kernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads an ELF image as a new Ready process and takes its global
    /// functions as the backtrace symbol table.
    pub fn load_program<S: ByteSource>(&mut self, source: S) -> Result<Pid, BootError> {
        let mut elf = ElfContext::init(source)?;
        let proc = Process::new_user(&mut elf)?;
        let symbols = elf.symbols()?;
        log::info!(
            "[Kernel] loaded program, entry {:#x}, {} symbols",
            elf.entry(),
            symbols.len()
        );
        let pid = self.sched.spawn(proc)?;
        self.symbols = symbols;
        Ok(pid)
    }

    /// Picks the first process and loads its context into `tf`.
    pub fn start(&mut self, tf: &mut TrapFrame) -> Option<Pid> {
        let pid = self.sched.schedule()?;
        self.sched.resume(pid, tf);
        Some(pid)
    }

    pub fn last_exit(&self) -> isize {
        self.last_exit
    }

    pub(crate) fn record_exit(&mut self, code: isize) {
        self.last_exit = code;
    }
}
