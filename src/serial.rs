use core::fmt::{self, Write};

use spin::Mutex;

pub struct UART16550 {
    base: usize,
    shift: usize,
    clk: u64,
    baud: u64,
}

mod offsets {
    pub const THR: usize = 0x0;

    pub const IER: usize = 0x1;
    pub const FCR: usize = 0x2;
    pub const LCR: usize = 0x3;
    pub const MCR: usize = 0x4;
    pub const LSR: usize = 0x5;

    pub const DLL: usize = 0x0;
    pub const DLH: usize = 0x1;
}

mod masks {
    pub const THRE: u8 = 1 << 5;
}

impl UART16550 {
    pub const fn new(base: usize, shift: usize, clk: u64, baud: u64) -> Self {
        Self {
            base,
            shift,
            clk,
            baud,
        }
    }

    fn reg(&self, offset: usize) -> *mut u8 {
        (self.base + (offset << self.shift)) as *mut u8
    }

    /// # Safety
    /// `base` must be the MMIO window of a 16550 and mapped.
    pub unsafe fn init(&self) {
        core::ptr::write_volatile(self.reg(offsets::LCR), 0x80); // DLAB

        let latch = self.clk / (16 * self.baud);
        core::ptr::write_volatile(self.reg(offsets::DLL), latch as u8);
        core::ptr::write_volatile(self.reg(offsets::DLH), (latch >> 8) as u8);

        core::ptr::write_volatile(self.reg(offsets::LCR), 3); // WLEN8 & !DLAB

        core::ptr::write_volatile(self.reg(offsets::MCR), 0);
        core::ptr::write_volatile(self.reg(offsets::IER), 0);
        // FIFO enable + FIFO reset
        core::ptr::write_volatile(self.reg(offsets::FCR), 0x7);
    }

    /// # Safety
    /// See [`UART16550::init`].
    pub unsafe fn putchar(&self, c: u8) {
        core::ptr::write_volatile(self.reg(offsets::THR), c);
        while core::ptr::read_volatile(self.reg(offsets::LSR)) & masks::THRE == 0 {}
    }
}

/// QEMU virt UART0.
static SERIAL: Mutex<UART16550> = Mutex::new(UART16550::new(0x1000_0000, 0, 11_059_200, 115200));

/// Console sink for user output and kernel logs.
pub struct Stdout;

impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let serial = SERIAL.lock();
        for c in s.bytes() {
            unsafe { serial.putchar(c) };
        }
        Ok(())
    }
}

pub fn fprint(args: fmt::Arguments) -> fmt::Result {
    Stdout.write_fmt(args)
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ({
        let _ = $crate::serial::fprint(format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// # Safety
/// Must run once, before anything prints, with the UART reachable.
pub unsafe fn early_serial_init() {
    SERIAL.lock().init()
}
