#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    spindle_os::println!("SpindleOS Panic: {}", info);
    crate::sbi::shutdown(true)
}
