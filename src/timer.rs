use alloc::boxed::Box;
use riscv::register::{sie, sip, time};

use spindle_os::consts::TIMEBASE;
use spindle_os::elf::ByteSource;
use spindle_os::trap::{SourceFiles, TimerControl};

use crate::sbi::set_timer;

/// Timer and soft-interrupt control through SBI and `sip`. There is no file
/// system on the board, so fault annotation never finds a source file.
pub struct Board;

pub fn init() {
    unsafe {
        sie::set_stimer();
        sie::set_ssoft();
    }
    clock_set_next_event();
    log::info!("[Timer] setup, interval {}", TIMEBASE);
}

pub fn clock_set_next_event() {
    set_timer(get_cycle() + TIMEBASE);
}

pub fn get_cycle() -> u64 {
    time::read() as u64
}

impl TimerControl for Board {
    fn set_next_timer(&mut self) {
        clock_set_next_event();
    }

    fn raise_soft_interrupt(&mut self) {
        unsafe { sip::set_ssoft() }
    }

    fn clear_soft_interrupt(&mut self) {
        unsafe { sip::clear_ssoft() }
    }
}

impl SourceFiles for Board {
    fn open(&mut self, path: &str) -> Option<Box<dyn ByteSource>> {
        log::debug!("[Board] no source available for {}", path);
        None
    }
}
