use alloc::boxed::Box;
use core::fmt::{self, Write};
use enum_repr::EnumRepr;

use crate::debug_line::{self, SourceLocation};
use crate::elf::ByteSource;
use crate::kernel::Kernel;
use crate::syscall;

const SSTATUS_SPIE: usize = 1 << 5;
const SSTATUS_SPP: usize = 1 << 8;
const SSTATUS_SUM: usize = 1 << 18;

const INTERRUPT_BIT: usize = 1 << (usize::BITS - 1);

pub const RA: usize = 1;
pub const SP: usize = 2;
pub const S0: usize = 8;
pub const A0: usize = 10;

/// User context saved on trap entry. The layout is shared with the assembly
/// entry/exit path: `x` at 0, then `sstatus`, `sepc`, `stval`, `scause`.
#[repr(C)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub x: [usize; 32],   // General registers
    pub sstatus: usize,   // Supervisor Status Register
    pub sepc: usize,      // Supervisor exception program counter
    pub stval: usize,     // Supervisor trap value
    pub scause: usize,    // Scause register: record the cause of exception/interrupt/trap
}

impl TrapFrame {
    /// Context that enters user mode at `entry` with interrupts enabled.
    pub fn new_user(entry: usize, sp: usize) -> Self {
        let mut tf = Self {
            sstatus: (SSTATUS_SPIE | SSTATUS_SUM) & !SSTATUS_SPP,
            sepc: entry,
            ..Default::default()
        };
        tf.x[SP] = sp;
        tf
    }

    /// Syscall argument `n` (1..=7), read from `a1`..`a7`.
    pub fn arg(&self, n: usize) -> usize {
        debug_assert!((1..=7).contains(&n));
        self.x[A0 + n]
    }

    pub fn set_return(&mut self, value: isize) {
        self.x[A0] = value as usize;
    }

    pub fn from_user(&self) -> bool {
        self.sstatus & SSTATUS_SPP == 0
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[EnumRepr(type = "usize")]
pub enum Interrupt {
    SupervisorSoft = 1,
    SupervisorTimer = 5,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[EnumRepr(type = "usize")]
pub enum Exception {
    InstructionFault = 1,
    IllegalInstruction = 2,
    LoadMisaligned = 4,
    LoadFault = 5,
    StoreMisaligned = 6,
    StoreFault = 7,
    UserEnvCall = 8,
}

impl Exception {
    pub fn describe(self) -> &'static str {
        match self {
            Exception::InstructionFault => "Instruction access fault!",
            Exception::IllegalInstruction => "Illegal instruction!",
            Exception::LoadMisaligned => "Misaligned Load!",
            Exception::LoadFault => "Load access fault!",
            Exception::StoreMisaligned => "Misaligned AMO!",
            Exception::StoreFault => "Store/AMO access fault!",
            Exception::UserEnvCall => "Environment call from U-mode",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TrapCause {
    Interrupt(Interrupt),
    Exception(Exception),
    Unknown(usize),
}

impl TrapCause {
    pub fn classify(scause: usize) -> Self {
        let code = scause & !INTERRUPT_BIT;
        let known = if scause & INTERRUPT_BIT != 0 {
            Interrupt::from_repr(code).map(TrapCause::Interrupt)
        } else {
            Exception::from_repr(code).map(TrapCause::Exception)
        };
        known.unwrap_or(TrapCause::Unknown(scause))
    }
}

/// What the low-level trap path does once the dispatcher returns.
#[derive(Debug, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Return to the context now held in the trap frame.
    Resume,
    /// Nothing is ready, but some process is still alive.
    Idle,
    /// The last process exited with this code.
    Shutdown(isize),
    Halt(FaultReport),
}

#[derive(Debug, PartialEq, Eq)]
pub struct FaultReport {
    pub cause: TrapCause,
    pub sepc: usize,
    pub stval: usize,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            TrapCause::Exception(e) => write!(f, "{}", e.describe())?,
            TrapCause::Interrupt(i) => write!(f, "unexpected interrupt {:?}", i)?,
            TrapCause::Unknown(raw) => write!(f, "unexpected scause {:#x}", raw)?,
        }
        write!(f, " sepc={:#x} stval={:#x}", self.sepc, self.stval)
    }
}

pub trait TimerControl {
    /// Programs the comparator one interval from now.
    fn set_next_timer(&mut self);
    fn raise_soft_interrupt(&mut self);
    fn clear_soft_interrupt(&mut self);
}

/// Access to source files for fault annotation.
pub trait SourceFiles {
    fn open(&mut self, path: &str) -> Option<Box<dyn ByteSource>>;
}

pub trait Platform: TimerControl + SourceFiles {}

impl<T: TimerControl + SourceFiles> Platform for T {}

/// Portable half of the trap handler. `tf` is the live frame on the kernel
/// stack; whatever it holds on `Resume` is what the exit path restores.
pub fn handle(
    kernel: &mut Kernel,
    tf: &mut TrapFrame,
    platform: &mut dyn Platform,
    out: &mut dyn Write,
) -> TrapOutcome {
    let cause = TrapCause::classify(tf.scause);
    log::trace!("[Trap] {:?} at {:#x}", cause, tf.sepc);
    match cause {
        TrapCause::Interrupt(Interrupt::SupervisorTimer) => {
            platform.set_next_timer();
            platform.raise_soft_interrupt();
            TrapOutcome::Resume
        }
        TrapCause::Interrupt(Interrupt::SupervisorSoft) => {
            platform.clear_soft_interrupt();
            kernel.ticks += 1;
            TrapOutcome::Resume
        }
        TrapCause::Exception(Exception::UserEnvCall) => syscall::dispatch(kernel, tf, out),
        TrapCause::Exception(_) => fatal(kernel, tf, cause, platform, out),
        TrapCause::Unknown(raw) => {
            let _ = writeln!(out, "trap(): unexpected scause {:#x}", raw);
            let _ = writeln!(out, "            sepc={:#x} stval={:#x}", tf.sepc, tf.stval);
            TrapOutcome::Halt(FaultReport {
                cause,
                sepc: tf.sepc,
                stval: tf.stval,
                location: None,
            })
        }
    }
}

fn fatal(
    kernel: &Kernel,
    tf: &TrapFrame,
    cause: TrapCause,
    platform: &mut dyn Platform,
    out: &mut dyn Write,
) -> TrapOutcome {
    let location = kernel
        .sched
        .current()
        .and_then(|proc| proc.debug_line.as_ref())
        .and_then(|table| debug_line::annotate(table, tf.sepc as u64, platform, out));
    let report = FaultReport {
        cause,
        sepc: tf.sepc,
        stval: tf.stval,
        location,
    };
    log::error!("[Trap] fatal: {}", report);
    let _ = writeln!(out, "{}", report);
    TrapOutcome::Halt(report)
}
