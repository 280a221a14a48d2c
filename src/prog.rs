use align_data::{include_aligned, Align64};

/// The user program run at boot. Point `SPINDLE_USER_ELF` at an absolute path
/// when building the kernel binary.
#[link_section = ".rodata"]
pub static USER: &[u8] = include_aligned!(Align64, env!("SPINDLE_USER_ELF"));

pub fn idle() -> ! {
    loop {
        unsafe { riscv::asm::wfi() };
    }
}
