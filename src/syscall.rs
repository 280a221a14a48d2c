use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;
use enum_repr::EnumRepr;

use crate::consts::{ENTRY_FUNCTION, PAGE_SIZE, PRINT_MAX};
use crate::error::Errno;
use crate::kernel::Kernel;
use crate::mem::addr::VirtAddr;
use crate::mem::set::MemorySet;
use crate::process::Pid;
use crate::sched::WaitOutcome;
use crate::trap::{Exception, FaultReport, TrapCause, TrapFrame, TrapOutcome, A0, S0};

/// Width of the `ecall` instruction.
const ECALL_LEN: usize = 4;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[EnumRepr(type = "usize")]
pub enum Syscall {
    Print = 64,
    Exit = 65,
    AllocatePage = 66,
    FreePage = 67,
    Fork = 68,
    Yield = 69,
    Wait = 70,
    PrintBacktrace = 71,
}

/// Routes the `ecall` in `tf` to its handler. Calls that switch processes
/// leave the next process's context in `tf`.
pub fn dispatch(kernel: &mut Kernel, tf: &mut TrapFrame, out: &mut dyn Write) -> TrapOutcome {
    let Some(pid) = kernel.sched.running() else {
        log::error!("[Syscall] ecall with no running process");
        return TrapOutcome::Halt(FaultReport {
            cause: TrapCause::Exception(Exception::UserEnvCall),
            sepc: tf.sepc,
            stval: tf.stval,
            location: None,
        });
    };

    let number = tf.x[A0];
    let Some(call) = Syscall::from_repr(number) else {
        log::warn!("[Syscall] unknown syscall {} from process {}", number, pid);
        return complete(tf, Err(Errno::NoSyscall));
    };
    log::trace!("[Syscall] {:?} from process {}", call, pid);

    match call {
        Syscall::Print => {
            let result = sys_print(kernel, pid, tf.arg(1), tf.arg(2), out);
            complete(tf, result)
        }
        Syscall::Exit => sys_exit(kernel, pid, tf.arg(1) as isize, tf, out),
        Syscall::AllocatePage => {
            let result = match kernel.sched.process_mut(pid) {
                Some(proc) => proc.allocate_page().map(|va| va.0 as isize),
                None => Err(Errno::InvalidArgument),
            };
            complete(tf, result)
        }
        Syscall::FreePage => {
            let va = VirtAddr(tf.arg(1));
            let result = match kernel.sched.process_mut(pid) {
                Some(proc) => proc.free_page(va).map(|_| 0),
                None => Err(Errno::InvalidArgument),
            };
            complete(tf, result)
        }
        Syscall::Fork => {
            tf.sepc += ECALL_LEN;
            let result = kernel.sched.fork(pid, tf).map(|child| child.0 as isize);
            tf.set_return(result.unwrap_or_else(Errno::code));
            TrapOutcome::Resume
        }
        Syscall::Yield => {
            tf.sepc += ECALL_LEN;
            tf.set_return(0);
            kernel.sched.save_context(tf);
            let next = kernel.sched.yield_now(pid);
            switch_to(kernel, next, tf)
        }
        Syscall::Wait => sys_wait(kernel, pid, tf.arg(1) as isize, tf),
        Syscall::PrintBacktrace => {
            let result = sys_print_backtrace(kernel, pid, tf, tf.arg(1), out);
            complete(tf, result)
        }
    }
}

/// Finishes a call that returns to its caller.
fn complete(tf: &mut TrapFrame, result: Result<isize, Errno>) -> TrapOutcome {
    tf.sepc += ECALL_LEN;
    tf.set_return(result.unwrap_or_else(Errno::code));
    TrapOutcome::Resume
}

fn switch_to(kernel: &mut Kernel, next: Option<Pid>, tf: &mut TrapFrame) -> TrapOutcome {
    match next {
        Some(pid) => {
            kernel.sched.resume(pid, tf);
            TrapOutcome::Resume
        }
        None if kernel.sched.live_count() == 0 => TrapOutcome::Shutdown(kernel.last_exit()),
        None => {
            log::warn!("[Syscall] no runnable process, idling");
            TrapOutcome::Idle
        }
    }
}

/// Writes at most `PRINT_MAX` bytes of the user string at `ptr`, stopping at
/// the first NUL.
fn sys_print(
    kernel: &Kernel,
    pid: Pid,
    ptr: usize,
    len: usize,
    out: &mut dyn Write,
) -> Result<isize, Errno> {
    let proc = kernel.sched.process(pid).ok_or(Errno::InvalidArgument)?;
    let bytes = read_user_str(&proc.mset, VirtAddr(ptr), len.min(PRINT_MAX))?;
    let _ = out.write_str(&String::from_utf8_lossy(&bytes));
    Ok(0)
}

fn read_user_str(mset: &MemorySet, va: VirtAddr, max: usize) -> Result<Vec<u8>, Errno> {
    let mut bytes = Vec::new();
    let mut chunk = [0u8; 256];
    while bytes.len() < max {
        let cur = va.0.checked_add(bytes.len()).ok_or(Errno::BadAddress)?;
        let n = (max - bytes.len())
            .min(chunk.len())
            .min(PAGE_SIZE - cur % PAGE_SIZE);
        mset.copy_from_user(VirtAddr(cur), &mut chunk[..n])?;
        match chunk[..n].iter().position(|b| *b == 0) {
            Some(end) => {
                bytes.extend_from_slice(&chunk[..end]);
                break;
            }
            None => bytes.extend_from_slice(&chunk[..n]),
        }
    }
    Ok(bytes)
}

fn sys_exit(
    kernel: &mut Kernel,
    pid: Pid,
    code: isize,
    tf: &mut TrapFrame,
    out: &mut dyn Write,
) -> TrapOutcome {
    let _ = writeln!(out, "User exit with code:{}.", code);
    kernel.record_exit(code);
    let next = kernel.sched.exit(pid, code);
    switch_to(kernel, next, tf)
}

/// A blocked wait keeps `sepc` on the `ecall`, so the waiter re-enters wait
/// once it is woken and reaps the child then.
fn sys_wait(kernel: &mut Kernel, pid: Pid, target: isize, tf: &mut TrapFrame) -> TrapOutcome {
    kernel.sched.save_context(tf);
    match kernel.sched.wait(pid, target) {
        Ok(WaitOutcome::Reaped { pid: child, .. }) => complete(tf, Ok(child.0 as isize)),
        Ok(WaitOutcome::Blocked(next)) => switch_to(kernel, next, tf),
        Err(err) => complete(tf, Err(err)),
    }
}

/// One frame-pointer step: the return address saved at `fp - 8` and the
/// caller's frame pointer at `fp - 16`.
pub fn frame_step<R>(fp: usize, read: R) -> Result<(usize, usize), Errno>
where
    R: Fn(usize) -> Result<usize, Errno>,
{
    let ra = read(fp.checked_sub(8).ok_or(Errno::BadAddress)?)?;
    let prev = read(fp.checked_sub(16).ok_or(Errno::BadAddress)?)?;
    Ok((ra, prev))
}

/// Prints up to `depth` function names from the caller's stack. The walk
/// starts above the syscall wrapper, a leaf that saves only its caller's frame
/// pointer at `s0 - 8`, and ends after the entry function.
fn sys_print_backtrace(
    kernel: &Kernel,
    pid: Pid,
    tf: &TrapFrame,
    depth: usize,
    out: &mut dyn Write,
) -> Result<isize, Errno> {
    let proc = kernel.sched.process(pid).ok_or(Errno::InvalidArgument)?;
    let read = |va: usize| {
        proc.mset
            .read_user_u64(VirtAddr(va))
            .map(|word| word as usize)
    };

    let mut fp = read(tf.x[S0].checked_sub(8).ok_or(Errno::BadAddress)?)?;
    for _ in 0..depth {
        let (ra, prev) = frame_step(fp, read)?;
        if let Some(sym) = kernel.symbols.resolve(ra as u64) {
            let _ = writeln!(out, "{}", sym.name());
            if sym.name() == ENTRY_FUNCTION {
                break;
            }
        }
        fp = prev;
    }
    Ok(0)
}
