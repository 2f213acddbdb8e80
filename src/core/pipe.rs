//! Byte Pipe I/O: framing primitives over a Windows pipe `HANDLE`.
//!
//! Mirrors `file_helpers.cpp` from the original implementation: a
//! peek-then-read gate that only consumes bytes once enough of them are
//! available, plus loop-until-done read/write helpers for when a single
//! `ReadFile`/`WriteFile` call returns short.
//!
//! The raw Win32 peek/read/write calls are behind the [`RawPipe`] trait so
//! the framing logic itself can be exercised against an in-memory pipe in
//! tests, without needing a live Windows pipe `HANDLE`.

use thiserror::Error;

use super::win32::{self, RawHandle};

#[derive(Error, Debug)]
pub enum PipeError {
    #[error("PeekNamedPipe call failed (error {0})")]
    Peek(u32),
    #[error("ReadFile call failed (error {0})")]
    Read(u32),
    #[error("WriteFile call failed (error {0})")]
    Write(u32),
}

pub type Result<T> = std::result::Result<T, PipeError>;

/// A byte-oriented endpoint that can be peeked, read, and written without
/// blocking past what's immediately available -- the framing primitives
/// below are all built from these three operations. The production impl
/// is a thin wrapper over a Win32 pipe `HANDLE`; tests use an in-memory
/// stand-in.
pub trait RawPipe {
    fn peek_available(&self) -> Result<u32>;
    fn read_some(&self, buf: &mut [u8]) -> Result<u32>;
    fn write_some(&self, buf: &[u8]) -> Result<u32>;
}

/// A real Windows pipe `HANDLE`, as used for `--out`/`--ins`/`--inr`/`--cmd`.
#[derive(Clone, Copy, Debug)]
pub struct Win32Pipe(pub RawHandle);

impl RawPipe for Win32Pipe {
    fn peek_available(&self) -> Result<u32> {
        win32::peek_named_pipe_available(self.0).map_err(PipeError::Peek)
    }

    fn read_some(&self, buf: &mut [u8]) -> Result<u32> {
        win32::read_file(self.0, buf).map_err(PipeError::Read)
    }

    fn write_some(&self, buf: &[u8]) -> Result<u32> {
        win32::write_file(self.0, buf).map_err(PipeError::Write)
    }
}

fn peek_for_bytes(pipe: &impl RawPipe, bytes_needed: u32) -> Result<bool> {
    let available = pipe.peek_available()?;
    Ok(available >= bytes_needed)
}

/// Reads exactly `buf.len()` bytes, looping until satisfied. Blocking for
/// however long the far end takes; callers that need non-blocking behavior
/// should gate with [`try_read_bytes_fixed`] first.
pub fn read_bytes_fixed(pipe: &impl RawPipe, buf: &mut [u8]) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let read = pipe.read_some(&mut buf[pos..])?;
        pos += read as usize;
    }
    Ok(())
}

/// Reads whatever is immediately available (at least 1 byte), or 0 bytes if
/// nothing is ready yet. Never blocks waiting for data that hasn't arrived.
pub fn try_read_bytes(pipe: &impl RawPipe, buf: &mut [u8]) -> Result<u32> {
    if !peek_for_bytes(pipe, 1)? {
        return Ok(0);
    }
    pipe.read_some(buf)
}

/// Reads exactly `buf.len()` bytes only if that many are already available;
/// otherwise returns 0 without consuming anything. This is the atomic gate
/// used for framed reads (opcodes, fixed records) so a partial frame is
/// never pulled off the pipe.
pub fn try_read_bytes_fixed(pipe: &impl RawPipe, buf: &mut [u8]) -> Result<u32> {
    if !peek_for_bytes(pipe, buf.len() as u32)? {
        return Ok(0);
    }
    read_bytes_fixed(pipe, buf)?;
    Ok(buf.len() as u32)
}

/// Writes the whole buffer, looping past short writes.
pub fn write_bytes(pipe: &impl RawPipe, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        let written = pipe.write_some(buf)? as usize;
        buf = &buf[written..];
    }
    Ok(())
}

pub fn read_u16(pipe: &impl RawPipe) -> Result<u16> {
    let mut bytes = [0u8; 2];
    read_bytes_fixed(pipe, &mut bytes)?;
    Ok(u16::from_le_bytes(bytes))
}

pub fn write_u16(pipe: &impl RawPipe, value: u16) -> Result<()> {
    write_bytes(pipe, &value.to_le_bytes())
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// An in-memory stand-in for a Win32 pipe, for exercising the framing
    /// logic above without a real `HANDLE`. Reads never return partial data
    /// across an "available" boundary drawn by [`MemPipe::push_partial`],
    /// matching `PeekNamedPipe`'s atomic peek-then-read semantics.
    #[derive(Default)]
    pub struct MemPipe {
        available: RefCell<VecDeque<u8>>,
        written: RefCell<Vec<u8>>,
    }

    impl MemPipe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, bytes: &[u8]) {
            self.available.borrow_mut().extend(bytes.iter().copied());
        }

        pub fn written(&self) -> Vec<u8> {
            self.written.borrow().clone()
        }
    }

    impl RawPipe for MemPipe {
        fn peek_available(&self) -> Result<u32> {
            Ok(self.available.borrow().len() as u32)
        }

        fn read_some(&self, buf: &mut [u8]) -> Result<u32> {
            let mut avail = self.available.borrow_mut();
            let n = buf.len().min(avail.len());
            for slot in buf.iter_mut().take(n) {
                *slot = avail.pop_front().unwrap();
            }
            Ok(n as u32)
        }

        fn write_some(&self, buf: &[u8]) -> Result<u32> {
            self.written.borrow_mut().extend_from_slice(buf);
            Ok(buf.len() as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MemPipe;
    use super::*;

    #[test]
    fn u16_round_trips_little_endian() {
        let pipe = MemPipe::new();
        write_u16(&pipe, 0x1234).unwrap();
        assert_eq!(pipe.written(), vec![0x34, 0x12]);

        let back = MemPipe::new();
        back.push(&[0x34, 0x12]);
        assert_eq!(read_u16(&back).unwrap(), 0x1234);
    }

    #[test]
    fn try_read_bytes_fixed_returns_zero_when_short() {
        let pipe = MemPipe::new();
        pipe.push(&[1, 2]);
        let mut buf = [0u8; 4];
        assert_eq!(try_read_bytes_fixed(&pipe, &mut buf).unwrap(), 0);

        pipe.push(&[3, 4]);
        assert_eq!(try_read_bytes_fixed(&pipe, &mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn try_read_bytes_takes_whatever_is_available() {
        let pipe = MemPipe::new();
        pipe.push(&[9, 8, 7]);
        let mut buf = [0u8; 8];
        assert_eq!(try_read_bytes(&pipe, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[9, 8, 7]);
    }

    #[test]
    fn write_bytes_writes_everything() {
        let pipe = MemPipe::new();
        write_bytes(&pipe, b"hello").unwrap();
        assert_eq!(pipe.written(), b"hello");
    }
}
