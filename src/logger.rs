//! `log` backend that formats records onto a console sink.

use core::fmt;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

pub type Sink = fn(fmt::Arguments) -> fmt::Result;

pub struct KernelLogger {
    sink: Sink,
    level: LevelFilter,
}

impl KernelLogger {
    pub const fn new(sink: Sink, level: LevelFilter) -> Self {
        Self { sink, level }
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = (self.sink)(format_args!("[{:>5}] {}\n", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Installs `logger` as the global logger.
pub fn init(logger: &'static KernelLogger) -> Result<(), SetLoggerError> {
    log::set_logger(logger)?;
    log::set_max_level(logger.level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use core::fmt::Write;
    use log::Level;
    use spin::Mutex;

    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    fn capture(args: fmt::Arguments) -> fmt::Result {
        CAPTURED.lock().write_fmt(args)
    }

    #[test]
    fn filters_by_level_and_formats_records() {
        let logger = KernelLogger::new(capture, LevelFilter::Info);
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .args(format_args!("hidden"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("process {} rejected", 3))
                .build(),
        );
        assert_eq!(CAPTURED.lock().as_str(), "[ WARN] process 3 rejected\n");
    }
}
