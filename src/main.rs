#![no_std]
#![no_main]

extern crate alloc;

mod boot;
mod lang_items;
mod prog;
mod sbi;
mod timer;

use lazy_static::lazy_static;
use spin::Mutex;

use spindle_os::consts::LOG_LEVEL;
use spindle_os::kernel::Kernel;
use spindle_os::logger::{self, KernelLogger};
use spindle_os::serial::{self, Stdout};
use spindle_os::trap::{self, TrapFrame, TrapOutcome};
use spindle_os::{mem, println};

static LOGGER: KernelLogger = KernelLogger::new(serial::fprint, LOG_LEVEL);

lazy_static! {
    static ref KERNEL: Mutex<Kernel> = Mutex::new(Kernel::new());
}

#[no_mangle]
extern "C" fn boot(hartid: usize, fdt_addr: usize) -> ! {
    unsafe { serial::early_serial_init() };
    if logger::init(&LOGGER).is_err() {
        println!("logger already installed");
    }
    log::info!("[Boot] hart {}, fdt at {:#x}", hartid, fdt_addr);

    unsafe { boot::init_trap() };
    mem::init();

    let mut kernel = KERNEL.lock();
    if let Err(err) = kernel.load_program(prog::USER) {
        panic!("{}", err);
    }
    let mut tf = TrapFrame::default();
    if kernel.start(&mut tf).is_none() {
        panic!("no process to run");
    }
    drop(kernel);

    timer::init();
    unsafe { boot::kickoff(&tf) }
}

#[no_mangle]
extern "C" fn trap_impl(tf: &mut TrapFrame) {
    let mut kernel = KERNEL.lock();
    match trap::handle(&mut kernel, tf, &mut timer::Board, &mut Stdout) {
        TrapOutcome::Resume => {}
        TrapOutcome::Idle => {
            drop(kernel);
            prog::idle()
        }
        TrapOutcome::Shutdown(code) => {
            log::info!("[Boot] all processes exited, last code {}", code);
            sbi::shutdown(code != 0)
        }
        TrapOutcome::Halt(report) => {
            log::error!("[Boot] halting: {}", report);
            sbi::shutdown(true)
        }
    }
}
