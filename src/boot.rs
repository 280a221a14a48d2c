use spindle_os::consts::KERNEL_STACK_SIZE;
use spindle_os::trap::TrapFrame;

const TF_SIZE: usize = core::mem::size_of::<TrapFrame>();

// Clears everything except ra, a0 (hartid) and a1 (fdt addr), switches to the
// boot stack and jumps to `boot`. Traps run on their own stack.
core::arch::global_asm!(
    ".section .text.entry",
    ".globl _start",
    "_start:",
    "fence.i",
    "li gp, 0",
    "li tp, 0",
    "li t0, 0",
    "li t1, 0",
    "li t2, 0",
    "li s0, 0",
    "li s1, 0",
    "li a2, 0",
    "li a3, 0",
    "li a4, 0",
    "li a5, 0",
    "li a6, 0",
    "li a7, 0",
    "la sp, boot_stack_top",
    "j boot",

    ".section .bss.stack",
    ".align 12",
    ".globl boot_stack",
    "boot_stack:",
    ".space {stack_size}",
    ".globl boot_stack_top",
    "boot_stack_top:",
    ".align 12",
    ".globl trap_stack",
    "trap_stack:",
    ".space {stack_size}",
    ".globl trap_stack_top",
    "trap_stack_top:",
    stack_size = const KERNEL_STACK_SIZE,
);

// Trap entry/exit. `sscratch` holds the kernel stack top while user code
// runs and zero while the kernel does. The frame sits right below the stack
// top, so whatever `trap_impl` leaves in it is what `sret` resumes.
core::arch::global_asm!(
    ".section .text",
    ".globl trap_entry",
    ".align 2",
    "trap_entry:",
    "csrrw sp, sscratch, sp",
    "bnez sp, 1f",
    "csrr sp, sscratch",
    "1:",
    "addi sp, sp, -{tf_size}",
    "sd x1, 1*8(sp)",
    "sd x3, 3*8(sp)",
    "sd x4, 4*8(sp)",
    "sd x5, 5*8(sp)",
    "sd x6, 6*8(sp)",
    "sd x7, 7*8(sp)",
    "sd x8, 8*8(sp)",
    "sd x9, 9*8(sp)",
    "sd x10, 10*8(sp)",
    "sd x11, 11*8(sp)",
    "sd x12, 12*8(sp)",
    "sd x13, 13*8(sp)",
    "sd x14, 14*8(sp)",
    "sd x15, 15*8(sp)",
    "sd x16, 16*8(sp)",
    "sd x17, 17*8(sp)",
    "sd x18, 18*8(sp)",
    "sd x19, 19*8(sp)",
    "sd x20, 20*8(sp)",
    "sd x21, 21*8(sp)",
    "sd x22, 22*8(sp)",
    "sd x23, 23*8(sp)",
    "sd x24, 24*8(sp)",
    "sd x25, 25*8(sp)",
    "sd x26, 26*8(sp)",
    "sd x27, 27*8(sp)",
    "sd x28, 28*8(sp)",
    "sd x29, 29*8(sp)",
    "sd x30, 30*8(sp)",
    "sd x31, 31*8(sp)",
    "csrrw s0, sscratch, x0",
    "csrr s1, sstatus",
    "csrr s2, sepc",
    "csrr s3, stval",
    "csrr s4, scause",
    "sd s0, 2*8(sp)",
    "sd s1, 32*8(sp)",
    "sd s2, 33*8(sp)",
    "sd s3, 34*8(sp)",
    "sd s4, 35*8(sp)",
    "mv a0, sp",
    "call trap_impl",

    ".globl trap_exit",
    "trap_exit:",
    "ld s1, 32*8(sp)",
    "ld s2, 33*8(sp)",
    "andi s0, s1, 1 << 8",
    "bnez s0, 2f",
    "addi s0, sp, {tf_size}",
    "csrw sscratch, s0",
    "2:",
    "csrw sstatus, s1",
    "csrw sepc, s2",
    "ld x1, 1*8(sp)",
    "ld x3, 3*8(sp)",
    "ld x4, 4*8(sp)",
    "ld x5, 5*8(sp)",
    "ld x6, 6*8(sp)",
    "ld x7, 7*8(sp)",
    "ld x8, 8*8(sp)",
    "ld x9, 9*8(sp)",
    "ld x10, 10*8(sp)",
    "ld x11, 11*8(sp)",
    "ld x12, 12*8(sp)",
    "ld x13, 13*8(sp)",
    "ld x14, 14*8(sp)",
    "ld x15, 15*8(sp)",
    "ld x16, 16*8(sp)",
    "ld x17, 17*8(sp)",
    "ld x18, 18*8(sp)",
    "ld x19, 19*8(sp)",
    "ld x20, 20*8(sp)",
    "ld x21, 21*8(sp)",
    "ld x22, 22*8(sp)",
    "ld x23, 23*8(sp)",
    "ld x24, 24*8(sp)",
    "ld x25, 25*8(sp)",
    "ld x26, 26*8(sp)",
    "ld x27, 27*8(sp)",
    "ld x28, 28*8(sp)",
    "ld x29, 29*8(sp)",
    "ld x30, 30*8(sp)",
    "ld x31, 31*8(sp)",
    "ld sp, 2*8(sp)",
    "sret",
    tf_size = const TF_SIZE,
);

extern "C" {
    fn trap_entry();
    static trap_stack_top: u8;
}

pub unsafe fn init_trap() {
    use riscv::register::{sscratch, stvec};
    sscratch::write(0);
    stvec::write(trap_entry as usize, stvec::TrapMode::Direct);
}

/// Writes `tf` just below the trap stack top and leaves through the trap exit
/// path, which drops into user mode.
pub unsafe fn kickoff(tf: &TrapFrame) -> ! {
    let top = core::ptr::addr_of!(trap_stack_top) as usize;
    let frame = (top - TF_SIZE) as *mut TrapFrame;
    frame.write(tf.clone());
    log::info!("[Boot] entering user mode at {:#x}", tf.sepc);
    core::arch::asm!(
        "mv sp, {frame}",
        "j trap_exit",
        frame = in(reg) frame,
        options(noreturn),
    )
}
