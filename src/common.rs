// Licensed under the Apache-2.0 license

//! Logging sinks shared by the driver modules.
//!
//! Controllers take a `Logger` as a generic parameter so that the logging
//! backend is chosen at compile time. `NoOpLogger` compiles away entirely;
//! `WriteLogger` formats each record into a fixed-size line buffer and writes
//! it to any `embedded_io::Write` sink, typically a debug UART.

use core::fmt::{self, Write as _};
use heapless::String;

/// Maximum length of one formatted log line. Longer records are truncated.
pub const LOG_LINE_CAPACITY: usize = 128;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

pub trait Logger {
    /// Record one message at the given level.
    fn log(&mut self, level: LogLevel, args: fmt::Arguments<'_>);

    fn error(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    fn warn(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    fn info(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    fn debug(&mut self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&mut self, _level: LogLevel, _args: fmt::Arguments<'_>) {}
}

/// Fixed line buffer that keeps the prefix that fits and drops the rest.
struct LineBuffer(String<LOG_LINE_CAPACITY>);

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            self.0.push(c).map_err(|()| fmt::Error)?;
        }
        Ok(())
    }
}

/// Logger writing `[LEVEL] message\r\n` lines to a byte sink.
pub struct WriteLogger<W: embedded_io::Write> {
    writer: W,
    max_level: LogLevel,
}

impl<W: embedded_io::Write> WriteLogger<W> {
    /// Records more verbose than `max_level` are dropped.
    pub fn new(writer: W, max_level: LogLevel) -> Self {
        Self { writer, max_level }
    }

    pub fn set_max_level(&mut self, level: LogLevel) {
        self.max_level = level;
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: embedded_io::Write> Logger for WriteLogger<W> {
    fn log(&mut self, level: LogLevel, args: fmt::Arguments<'_>) {
        if level > self.max_level {
            return;
        }
        let mut line = LineBuffer(String::new());
        // A full buffer stops formatting; whatever fit is still emitted.
        let _ = write!(line, "[{}] ", level.as_str());
        let _ = line.write_fmt(args);
        // Logging must never fail the caller.
        let _ = self.writer.write_all(line.0.as_bytes());
        let _ = self.writer.write_all(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    #[derive(Default)]
    struct VecSink {
        bytes: Vec<u8>,
    }

    impl embedded_io::ErrorType for VecSink {
        type Error = Infallible;
    }

    impl embedded_io::Write for VecSink {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn output(logger: WriteLogger<VecSink>) -> std::string::String {
        std::string::String::from_utf8(logger.into_inner().bytes).unwrap()
    }

    #[test]
    fn test_write_logger_formats_lines() {
        let mut logger = WriteLogger::new(VecSink::default(), LogLevel::Debug);
        logger.info(format_args!("bus ready at {} Hz", 100_000));
        logger.warn(format_args!("addr {:#04x} nack", 0x50));

        assert_eq!(
            output(logger),
            "[INFO] bus ready at 100000 Hz\r\n[WARN] addr 0x50 nack\r\n"
        );
    }

    #[test]
    fn test_write_logger_filters_by_level() {
        let mut logger = WriteLogger::new(VecSink::default(), LogLevel::Warn);
        logger.debug(format_args!("dropped"));
        logger.info(format_args!("dropped too"));
        logger.error(format_args!("kept"));

        assert_eq!(output(logger), "[ERROR] kept\r\n");
    }

    #[test]
    fn test_write_logger_truncates_long_lines() {
        let mut logger = WriteLogger::new(VecSink::default(), LogLevel::Debug);
        let long = [b'x'; 2 * LOG_LINE_CAPACITY];
        logger.info(format_args!("{}", core::str::from_utf8(&long).unwrap()));

        let text = output(logger);
        let kept = LOG_LINE_CAPACITY - "[INFO] ".len();
        let expected = format!("[INFO] {}\r\n", "x".repeat(kept));
        assert_eq!(text, expected);
    }

    #[test]
    fn test_write_logger_truncates_between_arguments() {
        let mut logger = WriteLogger::new(VecSink::default(), LogLevel::Debug);
        let long = "y".repeat(LOG_LINE_CAPACITY);
        logger.warn(format_args!("lead {} tail", long));

        let text = output(logger);
        assert!(text.starts_with("[WARN] lead yyyy"));
        assert!(!text.contains("tail"));
        assert_eq!(text.len(), LOG_LINE_CAPACITY + 2);
    }

    #[test]
    fn test_noop_logger_accepts_everything() {
        let mut logger = NoOpLogger;
        logger.error(format_args!("ignored {}", 1));
        logger.debug(format_args!("ignored {}", 2));
    }
}
