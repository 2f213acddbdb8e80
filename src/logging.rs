//! Logging: `tracing` + `tracing-subscriber`, with the
//! original's five numeric levels (`--log 0..4`, TRACE..ERROR) mapped onto
//! [`LevelFilter`], and `--syslog` mirroring every event to the system debug
//! stream via `OutputDebugStringA` (grounded on `logging.cpp`'s `_debug_view`
//! flag), in addition to the normal stderr sink.

use std::io;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

use crate::core::win32;

/// Values above 4 (ERROR) silence logging entirely, matching the original's
/// unclamped `_min_log_level` comparison -- not an error, just "quiet".
pub fn level_filter(level: u16) -> LevelFilter {
    match level {
        0 => LevelFilter::TRACE,
        1 => LevelFilter::DEBUG,
        2 => LevelFilter::INFO,
        3 => LevelFilter::WARN,
        4 => LevelFilter::ERROR,
        _ => LevelFilter::OFF,
    }
}

/// A `Write` impl that forwards every write to `OutputDebugStringA`, so a
/// `fmt` layer built on it behaves like a second, DebugView-visible sink.
#[derive(Clone, Copy, Default)]
struct DebugViewWriter;

impl io::Write for DebugViewWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        win32::output_debug_string(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DebugViewWriter {
    type Writer = DebugViewWriter;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Installs the global `tracing` subscriber: stderr always, plus a DebugView
/// mirror when `syslog` is set. Both sinks share the same level filter.
pub fn init(level: u16, syslog: bool) {
    let filter = level_filter(level);
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(filter);
    let registry = tracing_subscriber::registry().with(stderr_layer);

    if syslog {
        let debug_view_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(DebugViewWriter)
            .with_filter(filter);
        registry.with(debug_view_layer).init();
    } else {
        registry.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_maps_the_five_numeric_levels() {
        assert_eq!(level_filter(0), LevelFilter::TRACE);
        assert_eq!(level_filter(1), LevelFilter::DEBUG);
        assert_eq!(level_filter(2), LevelFilter::INFO);
        assert_eq!(level_filter(3), LevelFilter::WARN);
        assert_eq!(level_filter(4), LevelFilter::ERROR);
    }

    #[test]
    fn out_of_range_level_silences_logging() {
        assert_eq!(level_filter(5), LevelFilter::OFF);
        assert_eq!(level_filter(u16::MAX), LevelFilter::OFF);
    }
}
