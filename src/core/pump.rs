//! PTY I/O Pump: the output-drain / input-inject pair, grounded on
//! `io_processor.cpp`'s `process_output`/`process_input`.
//!
//! The original's "recursive drain" becomes a plain `while had_leftover { .. }`
//! loop here; the `fd_set` built by hand for `select()` is expressed through
//! `nix::sys::select`.

use std::os::unix::io::RawFd;
use std::time::Duration;

use nix::sys::select::{select, FdSet};
use nix::sys::time::{TimeVal, TimeValLike};
use nix::unistd::read;
use thiserror::Error;
use tracing::trace;

use super::console::{self, ConsoleError};
use super::fd_io::write_all_fd;
use super::pipe::{self, RawPipe};

pub const PTY_BUFFER_SIZE: usize = 4096;
/// `select()` timeout on the PTY master fd: 20ms, named as in the original.
pub const READ_LOOP_TIMEOUT: Duration = Duration::from_micros(20_000);

#[derive(Error, Debug)]
pub enum PumpError {
    #[error("select on PTY master fd failed: {0}")]
    Select(#[source] nix::Error),
    #[error("read from PTY master fd failed: {0}")]
    Read(#[source] nix::Error),
    #[error("write to PTY master fd failed: {0}")]
    Write(#[source] nix::Error),
    #[error(transparent)]
    Pipe(#[from] pipe::PipeError),
    #[error(transparent)]
    Console(#[from] ConsoleError),
}

type Result<T> = std::result::Result<T, PumpError>;

/// Where drained PTY output goes: a host pipe in managed mode, or the
/// console in stand-alone mode. An enum instead of a function pointer.
pub enum OutputSink<P: RawPipe> {
    Pipe(P),
    Console,
}

impl<P: RawPipe> OutputSink<P> {
    fn write_all(&self, buf: &[u8]) -> Result<()> {
        match self {
            OutputSink::Pipe(pipe) => Ok(pipe::write_bytes(pipe, buf)?),
            OutputSink::Console => Ok(console::write_output(buf)?),
        }
    }
}

/// Bytes read from the PTY, pending forward to the output sink. Retained
/// across cycles so a failed write can be retried without losing data.
#[derive(Default)]
pub struct OutputBuffer {
    buf: [u8; PTY_BUFFER_SIZE],
    count: usize,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0u8; PTY_BUFFER_SIZE],
            count: 0,
        }
    }
}

/// Bytes read from the host input stream, pending write to the PTY.
#[derive(Default)]
pub struct InputBuffer {
    buf: [u8; PTY_BUFFER_SIZE],
    count: usize,
    index: usize,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0u8; PTY_BUFFER_SIZE],
            count: 0,
            index: 0,
        }
    }
}

fn wait_readable(pty_fd: RawFd) -> Result<bool> {
    let mut read_fds = FdSet::new();
    read_fds.insert(pty_fd);
    let mut timeout = TimeVal::microseconds(READ_LOOP_TIMEOUT.as_micros() as i64);
    let ready = select(pty_fd + 1, &mut read_fds, None, None, &mut timeout)
        .map_err(PumpError::Select)?;
    Ok(ready > 0 && read_fds.contains(pty_fd))
}

/// Drains whatever is available from the PTY master into `buffer` and
/// forwards it to `sink`. Returns `(exhausted, activity)`: `exhausted` is
/// whether no more data is immediately available (so the next phase may
/// proceed); `activity` is whether this call actually read or wrote
/// anything, for the supervisor's heartbeat.
pub fn drain_output<P: RawPipe>(
    pty_fd: RawFd,
    sink: &OutputSink<P>,
    buffer: &mut OutputBuffer,
) -> Result<(bool, bool)> {
    let mut activity = false;
    loop {
        let had_leftover = buffer.count > 0;
        let mut exhausted = true;
        if !had_leftover {
            if wait_readable(pty_fd)? {
                activity = true;
                let read_len = read(pty_fd, &mut buffer.buf).map_err(PumpError::Read)?;
                buffer.count = read_len;
                exhausted = read_len < PTY_BUFFER_SIZE;
                if read_len > 0 {
                    trace!(bytes = read_len, "read from PTY master");
                }
            }
        }
        if buffer.count > 0 {
            activity = true;
            trace!(bytes = buffer.count, "writing to output sink");
            sink.write_all(&buffer.buf[..buffer.count])?;
        }
        buffer.count = 0;
        if !had_leftover {
            return Ok((exhausted, activity));
        }
        // There was leftover data from a previous failed cycle; having
        // cleared it, try once more in case more is immediately available.
    }
}

/// Writes as much of the host input stream as is immediately available to
/// the PTY, tracking partial writes across cycles. Only called once the
/// output and record phases are both exhausted, so a fresh keystroke burst
/// never gets accepted ahead of output still being flushed to the host.
/// Returns whether this call read or wrote anything (heartbeat activity).
pub fn inject_input<P: RawPipe>(
    pty_fd: RawFd,
    source: &P,
    buffer: &mut InputBuffer,
) -> Result<bool> {
    let had_leftover = buffer.count > 0;
    let mut activity = false;
    if !had_leftover {
        let read_len = pipe::try_read_bytes(source, &mut buffer.buf)? as usize;
        buffer.count = read_len;
        buffer.index = 0;
        if read_len > 0 {
            activity = true;
            trace!(bytes = read_len, "read from host input stream");
        }
    }
    if buffer.count > 0 {
        activity = true;
        let pending = &buffer.buf[buffer.index..buffer.count];
        trace!(bytes = pending.len(), "writing to PTY master");
        let written = write_bytes_partial(pty_fd, pending)?;
        buffer.index += written;
        if buffer.index == buffer.count {
            buffer.index = 0;
            buffer.count = 0;
        }
    }
    Ok(activity)
}

/// Writes one chunk (not a full loop-until-done -- partial writes here are
/// expected and tracked by the caller across cycles, matching
/// `process_input`'s single `write()` call per cycle).
fn write_bytes_partial(pty_fd: RawFd, buf: &[u8]) -> Result<usize> {
    nix::unistd::write(pty_fd, buf).map_err(PumpError::Write)
}

/// A Ctrl+C delivered to the master via `SIGINT` is written straight
/// through, bypassing the retained buffers -- it's out-of-band, not part of
/// an ongoing input burst.
pub fn write_interrupt(pty_fd: RawFd) -> Result<()> {
    write_all_fd(pty_fd, &[0x03]).map_err(PumpError::Write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipe::test_support::MemPipe;

    #[test]
    fn output_buffer_starts_empty() {
        let buffer = OutputBuffer::new();
        assert_eq!(buffer.count, 0);
    }

    #[test]
    fn input_buffer_starts_empty() {
        let buffer = InputBuffer::new();
        assert_eq!(buffer.count, 0);
        assert_eq!(buffer.index, 0);
    }

    #[test]
    fn sink_write_all_reaches_pipe() {
        let pipe = MemPipe::new();
        let sink = OutputSink::Pipe(pipe);
        sink.write_all(b"hello").unwrap();
        match &sink {
            OutputSink::Pipe(p) => assert_eq!(p.written(), b"hello"),
            OutputSink::Console => unreachable!(),
        }
    }
}
