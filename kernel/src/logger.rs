//! Kernel logger
//!
//! Installs a [`log::Log`] implementation that writes level-tagged lines to
//! the serial console and mirrors every record into a fixed-size, heap-free
//! circular buffer of structured entries. The buffer lets a debugger (or the
//! self tests) inspect recent kernel activity without scraping the console.
//!
//! The buffer holds up to [`LOG_BUFFER_CAPACITY`] entries. Once full it
//! wraps around and silently overwrites the oldest entries.

use core::fmt::Write as _;

use log::{Level, LevelFilter, Metadata, Record};
use spin::Mutex;

/// Maximum number of log entries the circular buffer can hold.
const LOG_BUFFER_CAPACITY: usize = 256;

/// Maximum length (in bytes) of a log message stored in a [`LogEntry`].
const LOG_MESSAGE_MAX_LEN: usize = 128;

/// Maximum length (in bytes) of the target tag in a [`LogEntry`].
const LOG_TARGET_MAX_LEN: usize = 16;

/// A single structured log entry. All fields are inline fixed-size arrays
/// so the buffer never allocates.
#[derive(Clone, Copy)]
pub struct LogEntry {
    /// Timer ticks at the time the record was emitted.
    pub ticks: u64,
    pub level: Level,
    target: [u8; LOG_TARGET_MAX_LEN],
    target_len: u8,
    message: [u8; LOG_MESSAGE_MAX_LEN],
    message_len: u8,
}

impl LogEntry {
    const fn empty() -> Self {
        Self {
            ticks: 0,
            level: Level::Info,
            target: [0; LOG_TARGET_MAX_LEN],
            target_len: 0,
            message: [0; LOG_MESSAGE_MAX_LEN],
            message_len: 0,
        }
    }

    /// The module path the record came from, truncated.
    pub fn target(&self) -> &str {
        core::str::from_utf8(&self.target[..self.target_len as usize]).unwrap_or("")
    }

    /// The message text, truncated to [`LOG_MESSAGE_MAX_LEN`] bytes.
    pub fn message(&self) -> &str {
        core::str::from_utf8(&self.message[..self.message_len as usize]).unwrap_or("")
    }
}

/// Fixed-capacity ring of log entries.
struct LogBuffer {
    entries: [LogEntry; LOG_BUFFER_CAPACITY],
    head: usize,
    len: usize,
}

impl LogBuffer {
    const fn new() -> Self {
        Self {
            entries: [LogEntry::empty(); LOG_BUFFER_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    /// Append an entry, overwriting the oldest if full.
    fn push(&mut self, entry: LogEntry) {
        self.entries[self.head] = entry;
        self.head = (self.head + 1) % LOG_BUFFER_CAPACITY;
        if self.len < LOG_BUFFER_CAPACITY {
            self.len += 1;
        }
    }
}

static LOG_BUFFER: Mutex<LogBuffer> = Mutex::new(LogBuffer::new());

/// Bounded writer that truncates instead of failing once the buffer fills.
struct TruncatingWriter<'a> {
    buf: &'a mut [u8],
    used: usize,
}

impl core::fmt::Write for TruncatingWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let room = self.buf.len().saturating_sub(self.used);
        let take = room.min(s.len());
        self.buf[self.used..self.used + take].copy_from_slice(&s.as_bytes()[..take]);
        self.used += take;
        Ok(())
    }
}

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let ticks = crate::time::ticks();
        crate::serial_println!(
            "[{:>5}.{:02}] {:5} {}: {}",
            ticks / crate::config::TIMER_HZ,
            ticks % crate::config::TIMER_HZ,
            record.level(),
            record.target(),
            record.args()
        );

        let mut entry = LogEntry::empty();
        entry.ticks = ticks;
        entry.level = record.level();

        let target = record.target().as_bytes();
        let tlen = target.len().min(LOG_TARGET_MAX_LEN);
        entry.target[..tlen].copy_from_slice(&target[..tlen]);
        entry.target_len = tlen as u8;

        let mut writer = TruncatingWriter {
            buf: &mut entry.message,
            used: 0,
        };
        let _ = write!(writer, "{}", record.args());
        entry.message_len = writer.used as u8;

        LOG_BUFFER.lock().push(entry);
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the logger. Called once from bootstrap, before any subsystem
/// that logs.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Number of entries currently held in the ring.
pub fn entry_count() -> usize {
    LOG_BUFFER.lock().len
}

/// Visit buffered entries oldest-first.
pub fn for_each_entry<F: FnMut(&LogEntry)>(mut f: F) {
    let buf = LOG_BUFFER.lock();
    let start = (buf.head + LOG_BUFFER_CAPACITY - buf.len) % LOG_BUFFER_CAPACITY;
    for i in 0..buf.len {
        f(&buf.entries[(start + i) % LOG_BUFFER_CAPACITY]);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn ring_overwrites_oldest_when_full() {
        let mut ring = LogBuffer::new();
        for i in 0..(LOG_BUFFER_CAPACITY + 3) {
            let mut e = LogEntry::empty();
            e.ticks = i as u64;
            ring.push(e);
        }
        assert_eq!(ring.len, LOG_BUFFER_CAPACITY);
        // Oldest surviving entry is number 3
        let start = (ring.head + LOG_BUFFER_CAPACITY - ring.len) % LOG_BUFFER_CAPACITY;
        assert_eq!(ring.entries[start].ticks, 3);
    }

    #[test]
    fn truncating_writer_clamps_long_messages() {
        let mut buf = [0u8; 8];
        let mut w = TruncatingWriter {
            buf: &mut buf,
            used: 0,
        };
        use core::fmt::Write;
        write!(w, "0123456789abcdef").expect("truncating writer never errors");
        assert_eq!(w.used, 8);
        assert_eq!(&buf, b"01234567");
    }
}
