//! # Kernel Logger
//!
//! Backend for the `log` facade. Each record becomes one line
//!
//! ```text
//! [<tick>] <LEVEL> <target>: <message>\r\n
//! ```
//!
//! formatted into a fixed-size buffer (overlong messages are cut, never
//! allocated) and handed to the sink installed by [`init`], typically a
//! UART or a console FIFO. Records are dropped until `init` is called.

use core::fmt::{self, Write};

use heapless::String;
use spin::Once;

use crate::config::LOG_LINE_MAX;
use crate::error::{KernelError, KernelResult};

/// Consumer of formatted log lines.
pub type Sink = fn(&[u8]);

static SINK: Once<Sink> = Once::new();
static LOGGER: KernelLogger = KernelLogger;

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = SINK.get() {
            let line = format_line(
                crate::kernel::ticks(),
                record.level(),
                record.target(),
                *record.args(),
            );
            sink(line.as_bytes());
        }
    }

    fn flush(&self) {}
}

/// Install the kernel logger, writing lines at or above `level` to `sink`.
///
/// # Errors
/// [`KernelError::Access`] if a logger is already installed.
pub fn init(level: log::LevelFilter, sink: Sink) -> KernelResult<()> {
    log::set_logger(&LOGGER).map_err(|_| KernelError::Access)?;
    SINK.call_once(|| sink);
    log::set_max_level(level);
    Ok(())
}

/// Format one log line, truncating the message to fit `LOG_LINE_MAX`
/// bytes including the trailing `\r\n`.
pub fn format_line(
    tick: u32,
    level: log::Level,
    target: &str,
    args: fmt::Arguments<'_>,
) -> String<LOG_LINE_MAX> {
    let mut line = Line {
        buf: String::new(),
        limit: LOG_LINE_MAX - 2,
    };
    let _ = write!(line, "[{}] {:<5} {}: {}", tick, level, target, args);
    let mut buf = line.buf;
    let _ = buf.push_str("\r\n");
    buf
}

/// Writer that keeps whole characters up to `limit` bytes and silently
/// drops the rest.
struct Line {
    buf: String<LOG_LINE_MAX>,
    limit: usize,
}

impl Write for Line {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if self.buf.len() + ch.len_utf8() > self.limit {
                break;
            }
            let _ = self.buf.push(ch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let line = format_line(42, log::Level::Info, "plos::kernel", format_args!("ready {}", 7));
        assert_eq!(line.as_str(), "[42] INFO  plos::kernel: ready 7\r\n");
    }

    #[test]
    fn test_long_line_truncated() {
        let long = [b'x'; 2 * LOG_LINE_MAX];
        let text = core::str::from_utf8(&long).unwrap();
        let line = format_line(1, log::Level::Warn, "t", format_args!("{}", text));
        assert_eq!(line.len(), LOG_LINE_MAX);
        assert!(line.starts_with("[1] WARN  t: xxx"));
        assert!(line.ends_with("x\r\n"));
    }

    #[test]
    fn test_truncation_keeps_whole_characters() {
        let mut bytes = [0u8; 2 * LOG_LINE_MAX];
        for pair in bytes.chunks_mut(2) {
            pair.copy_from_slice("é".as_bytes());
        }
        let text = core::str::from_utf8(&bytes).unwrap();
        let line = format_line(0, log::Level::Error, "t", format_args!("{}", text));
        assert!(line.len() <= LOG_LINE_MAX);
        assert!(line.ends_with("é\r\n"));
    }

    fn first_sink(_line: &[u8]) {}
    fn second_sink(_line: &[u8]) {}

    #[test]
    fn test_second_init_keeps_first_sink() {
        let _ = init(log::LevelFilter::Info, first_sink);
        let installed = SINK.get().map(|sink| *sink as usize);
        assert_eq!(
            init(log::LevelFilter::Info, second_sink),
            Err(KernelError::Access)
        );
        assert_eq!(SINK.get().map(|sink| *sink as usize), installed);
        assert_ne!(installed, Some(second_sink as usize));
    }
}
