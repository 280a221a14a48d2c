mod common;

use common::{booted, ecall, sample_program};
use spindle_os::consts::NPROC;
use spindle_os::error::Errno;
use spindle_os::kernel::Kernel;
use spindle_os::mem::addr::VirtAddr;
use spindle_os::process::{Pid, Status, WaitReason};
use spindle_os::syscall::Syscall;
use spindle_os::trap::{TrapFrame, TrapOutcome, A0};

fn ret(tf: &TrapFrame) -> isize {
    tf.x[A0] as isize
}

#[test]
fn fork_then_wait_blocks_until_child_exits() {
    let (mut kernel, mut tf, parent) = booted();
    let mut out = String::new();

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Fork as usize, &[]);
    let child = Pid(ret(&tf) as usize);
    assert_eq!(kernel.sched.status(child), Status::Ready);
    assert_eq!(kernel.sched.running(), Some(parent));

    let wait_pc = tf.sepc;
    let outcome = ecall(&mut kernel, &mut tf, &mut out, Syscall::Wait as usize, &[usize::MAX]);
    assert_eq!(outcome, TrapOutcome::Resume);
    assert_eq!(kernel.sched.status(parent), Status::Blocked(WaitReason::AnyChild));

    // The child resumes right after its fork with a zero return value.
    assert_eq!(kernel.sched.running(), Some(child));
    assert_eq!(ret(&tf), 0);
    assert_eq!(tf.sepc, wait_pc);

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Exit as usize, &[42]);
    assert_eq!(out, "User exit with code:42.\n");
    assert_eq!(kernel.sched.running(), Some(parent));
    assert_eq!(kernel.sched.status(child), Status::Zombie(42));

    // The parent is back on its wait ecall and re-enters it.
    assert_eq!(tf.sepc, wait_pc);
    assert_eq!(tf.x[A0], Syscall::Wait as usize);
    let outcome = ecall(&mut kernel, &mut tf, &mut out, Syscall::Wait as usize, &[usize::MAX]);
    assert_eq!(outcome, TrapOutcome::Resume);
    assert_eq!(Pid(ret(&tf) as usize), child);
    assert_eq!(tf.sepc, wait_pc + 4);
    assert_eq!(kernel.sched.status(child), Status::Free);
}

#[test]
fn exited_child_is_zombie_until_parent_waits() {
    let (mut kernel, mut tf, parent) = booted();
    let mut out = String::new();

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Fork as usize, &[]);
    let child = Pid(ret(&tf) as usize);

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Yield as usize, &[]);
    assert_eq!(kernel.sched.running(), Some(child));
    ecall(&mut kernel, &mut tf, &mut out, Syscall::Exit as usize, &[7]);
    assert_eq!(kernel.sched.running(), Some(parent));
    assert_eq!(ret(&tf), 0);

    assert_eq!(kernel.sched.status(child), Status::Zombie(7));
    ecall(&mut kernel, &mut tf, &mut out, Syscall::Yield as usize, &[]);
    assert_eq!(kernel.sched.status(child), Status::Zombie(7));

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Wait as usize, &[child.0]);
    assert_eq!(Pid(ret(&tf) as usize), child);
    assert_eq!(kernel.sched.status(child), Status::Free);
}

#[test]
fn wait_on_a_stranger_fails_without_blocking() {
    let (mut kernel, mut tf, parent) = booted();
    let image = sample_program().build();
    let stranger = kernel.load_program(image.as_slice()).expect("load");
    let mut out = String::new();

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Wait as usize, &[stranger.0]);
    assert_eq!(ret(&tf), Errno::InvalidArgument.code());
    assert_eq!(kernel.sched.running(), Some(parent));

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Wait as usize, &[usize::MAX]);
    assert_eq!(ret(&tf), Errno::InvalidArgument.code());

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Wait as usize, &[0]);
    assert_eq!(ret(&tf), Errno::InvalidArgument.code());
    assert_eq!(kernel.sched.status(parent), Status::Running);
}

#[test]
fn yield_rotates_three_ready_processes() {
    let mut kernel = Kernel::new();
    let image = sample_program().build();
    let a = kernel.load_program(image.as_slice()).expect("a");
    let b = kernel.load_program(image.as_slice()).expect("b");
    let c = kernel.load_program(image.as_slice()).expect("c");
    let mut tf = TrapFrame::default();
    assert_eq!(kernel.start(&mut tf), Some(a));
    let mut out = String::new();

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Yield as usize, &[]);
    assert_eq!(kernel.sched.running(), Some(b));
    assert_eq!(kernel.sched.ready_queue().collect::<Vec<_>>(), [c, a]);

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Yield as usize, &[]);
    assert_eq!(kernel.sched.running(), Some(c));
}

#[test]
fn forked_memory_is_private() {
    let (mut kernel, mut tf, parent) = booted();
    let mut out = String::new();

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Fork as usize, &[]);
    let child = Pid(ret(&tf) as usize);

    let proc = kernel.sched.process_mut(child).expect("child");
    proc.mset.write(VirtAddr(0x11000), b"child").expect("write");

    let mut buf = [0u8; 5];
    let proc = kernel.sched.process(parent).expect("parent");
    proc.mset.copy_from_user(VirtAddr(0x11000), &mut buf).expect("read");
    assert_eq!(&buf, b"hello");
}

#[test]
fn fork_reports_a_full_table() {
    let (mut kernel, mut tf, _) = booted();
    let mut out = String::new();
    for _ in 1..NPROC {
        ecall(&mut kernel, &mut tf, &mut out, Syscall::Fork as usize, &[]);
        assert!(ret(&tf) > 0);
    }
    ecall(&mut kernel, &mut tf, &mut out, Syscall::Fork as usize, &[]);
    assert_eq!(ret(&tf), Errno::NoProcess.code());
}

#[test]
fn last_exit_shuts_down() {
    let (mut kernel, mut tf, _) = booted();
    let mut out = String::new();
    let outcome = ecall(&mut kernel, &mut tf, &mut out, Syscall::Exit as usize, &[3]);
    assert_eq!(outcome, TrapOutcome::Shutdown(3));
    assert_eq!(kernel.sched.live_count(), 0);
}

#[test]
fn root_exit_leaves_a_zombie_while_children_run() {
    let (mut kernel, mut tf, root) = booted();
    let mut out = String::new();

    ecall(&mut kernel, &mut tf, &mut out, Syscall::Fork as usize, &[]);
    let child = Pid(ret(&tf) as usize);

    let outcome = ecall(&mut kernel, &mut tf, &mut out, Syscall::Exit as usize, &[5]);
    assert_eq!(outcome, TrapOutcome::Resume);
    assert_eq!(kernel.sched.status(root), Status::Zombie(5));
    assert_eq!(kernel.sched.running(), Some(child));
    assert_eq!(kernel.sched.live_count(), 1);
}
