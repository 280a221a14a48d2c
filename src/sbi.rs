enum SBIFunc {
    SetTimer,
    ConsolePutchar,
    SystemReset,
}

impl SBIFunc {
    fn id(&self) -> (usize, usize) {
        match self {
            SBIFunc::SetTimer => (0x54494D45, 0),
            SBIFunc::ConsolePutchar => (1, 0),
            SBIFunc::SystemReset => (0x53525354, 0),
        }
    }
}

fn send(func: SBIFunc, mut param0: usize, mut param1: usize) -> Result<usize, usize> {
    let (eid, fid) = func.id();
    unsafe {
        core::arch::asm!(
            "ecall",
            in("a7") eid,
            in("a6") fid,
            inout("a0") param0,
            inout("a1") param1,
        );
    }

    if param0 == 0 {
        Ok(param1)
    } else {
        Err(param0)
    }
}

pub fn set_timer(stime: u64) {
    if let Err(err) = send(SBIFunc::SetTimer, stime as usize, 0) {
        log::warn!("[SBI] set_timer failed: {:#x}", err);
    }
}

pub fn console_putchar(c: u8) {
    let _ = send(SBIFunc::ConsolePutchar, c as usize, 0);
}

/// Powers off; a nonzero `failure` reports a system failure as the reason.
pub fn shutdown(failure: bool) -> ! {
    const SHUTDOWN: usize = 0;
    const NO_REASON: usize = 0;
    const SYSTEM_FAILURE: usize = 1;
    let reason = if failure { SYSTEM_FAILURE } else { NO_REASON };
    let _ = send(SBIFunc::SystemReset, SHUTDOWN, reason);
    loop {
        unsafe { riscv::asm::wfi() };
    }
}
