//! Input-Record Processor: decoding and dispatch of 20-byte
//! `INPUT_RECORD` values, grounded on `io_processor.cpp`'s
//! `process_input_record`/`read_input_records`/`read_input_records_from_pipe`.
//!
//! A record is parsed by explicit byte-offset reads rather than a `#[repr(C)]`
//! union -- the wire layout is the authority, and this sidesteps needing
//! `unsafe` unions to read a field the active variant doesn't own.

use std::os::unix::io::RawFd;

use nix::libc;
use thiserror::Error;
use tracing::{debug, warn};

use super::console::{self, INPUT_RECORD_LEN};
use super::fd_io::write_all_fd;
use super::pipe::{self, RawPipe};
use super::win32::{ControlKeyState, KEY_EVENT, VK_SPACE, WINDOW_BUFFER_SIZE_EVENT};

pub const RECORDS_PER_CYCLE: usize = 100;

nix::ioctl_write_ptr_bad!(ioctl_set_winsize, libc::TIOCSWINSZ, libc::winsize);

#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Pipe(#[from] pipe::PipeError),
    #[error(transparent)]
    Console(#[from] console::ConsoleError),
    #[error("ioctl(TIOCSWINSZ) failed: {0}")]
    Resize(#[source] nix::Error),
    #[error("write to PTY failed: {0}")]
    Write(#[source] nix::Error),
    #[error("failed to transcode UTF-16 code unit 0x{0:04x}")]
    Transcode(u16),
}

type Result<T> = std::result::Result<T, RecordError>;

/// A single 20-byte `INPUT_RECORD`, viewed by field accessor rather than by
/// struct cast.
pub struct RawRecord<'a>(&'a [u8; INPUT_RECORD_LEN]);

impl<'a> RawRecord<'a> {
    pub fn new(bytes: &'a [u8; INPUT_RECORD_LEN]) -> Self {
        Self(bytes)
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.0[offset], self.0[offset + 1]])
    }

    fn u32_at(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.0[offset],
            self.0[offset + 1],
            self.0[offset + 2],
            self.0[offset + 3],
        ])
    }

    fn i16_at(&self, offset: usize) -> i16 {
        self.u16_at(offset) as i16
    }

    pub fn event_type(&self) -> u16 {
        self.u16_at(0)
    }

    // Event union starts at byte offset 4 (after EventType + 2 bytes padding).
    fn key_down(&self) -> bool {
        self.u32_at(4) != 0
    }

    fn vkey(&self) -> u16 {
        self.u16_at(10)
    }

    fn ctrl_state(&self) -> ControlKeyState {
        ControlKeyState::from_bits_truncate(self.u32_at(16))
    }

    fn unicode_char(&self) -> u16 {
        self.u16_at(14)
    }

    fn window_size(&self) -> (i16, i16) {
        (self.i16_at(4), self.i16_at(6))
    }
}

/// Source of input records: a pipe handle in managed mode, or the console in
/// stand-alone mode. A small enum instead of a function-pointer dispatch.
pub enum RecordSource<P: RawPipe> {
    Pipe(P),
    Console,
    /// Managed mode with `--inr` absent: records are disabled entirely.
    Disabled,
}

impl<P: RawPipe> RecordSource<P> {
    /// Fills `buf` (must hold `RECORDS_PER_CYCLE * INPUT_RECORD_LEN` bytes)
    /// with as many whole records as are atomically available, up to
    /// `RECORDS_PER_CYCLE`. Returns the record count.
    pub fn fill_batch(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            RecordSource::Disabled => Ok(0),
            RecordSource::Pipe(pipe) => {
                let mut count = 0;
                while count < RECORDS_PER_CYCLE {
                    let start = count * INPUT_RECORD_LEN;
                    let end = start + INPUT_RECORD_LEN;
                    let read = pipe::try_read_bytes_fixed(pipe, &mut buf[start..end])?;
                    if read < INPUT_RECORD_LEN as u32 {
                        break;
                    }
                    count += 1;
                }
                Ok(count)
            }
            RecordSource::Console => {
                Ok(console::read_input_records(buf, RECORDS_PER_CYCLE)?)
            }
        }
    }
}

fn transcode_to_utf8(unit: u16) -> Result<([u8; 4], usize)> {
    let mut decoded = char::decode_utf16([unit]);
    let ch = decoded
        .next()
        .expect("decode_utf16 over a single unit yields exactly one item")
        .map_err(|_| RecordError::Transcode(unit))?;
    let mut buf = [0u8; 4];
    let len = ch.encode_utf8(&mut buf).len();
    Ok((buf, len))
}

/// Dispatches a single decoded record: resize, key, or ignore. `standalone`
/// selects the stand-alone-mode resize override (console geometry wins over
/// the event payload -- see [`console::query_window_size`]).
pub fn dispatch(pty_fd: RawFd, record: RawRecord<'_>, standalone: bool) -> Result<()> {
    match record.event_type() {
        WINDOW_BUFFER_SIZE_EVENT => {
            let (mut cols, mut rows) = record.window_size();
            if standalone {
                let (actual_cols, actual_rows) = console::query_window_size()?;
                cols = actual_cols as i16;
                rows = actual_rows as i16;
            }
            debug!(cols, rows, "window-buffer-size event");
            let mut win_size: libc::winsize = unsafe { std::mem::zeroed() };
            win_size.ws_col = cols as u16;
            win_size.ws_row = rows as u16;
            unsafe { ioctl_set_winsize(pty_fd, &win_size) }
                .map(|_| ())
                .map_err(RecordError::Resize)
        }
        KEY_EVENT => {
            if !record.key_down() {
                return Ok(());
            }
            if record.vkey() == VK_SPACE && record.ctrl_state().either_ctrl_pressed() {
                return write_all_fd(pty_fd, &[0u8]).map_err(RecordError::Write);
            }
            let unicode = record.unicode_char();
            if unicode == 0 {
                return Ok(());
            }
            let (utf8, len) = transcode_to_utf8(unicode)?;
            write_all_fd(pty_fd, &utf8[..len]).map_err(RecordError::Write)
        }
        other => {
            warn!(event_type = other, "ignoring unhandled input record type");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_record(key_down: bool, vkey: u16, unicode_char: u16, ctrl_state: u32) -> [u8; INPUT_RECORD_LEN] {
        let mut bytes = [0u8; INPUT_RECORD_LEN];
        bytes[0..2].copy_from_slice(&KEY_EVENT.to_le_bytes());
        bytes[4..8].copy_from_slice(&(key_down as u32).to_le_bytes());
        bytes[10..12].copy_from_slice(&vkey.to_le_bytes());
        bytes[14..16].copy_from_slice(&unicode_char.to_le_bytes());
        bytes[16..20].copy_from_slice(&ctrl_state.to_le_bytes());
        bytes
    }

    fn resize_record(cols: i16, rows: i16) -> [u8; INPUT_RECORD_LEN] {
        let mut bytes = [0u8; INPUT_RECORD_LEN];
        bytes[0..2].copy_from_slice(&WINDOW_BUFFER_SIZE_EVENT.to_le_bytes());
        bytes[4..6].copy_from_slice(&cols.to_le_bytes());
        bytes[6..8].copy_from_slice(&rows.to_le_bytes());
        bytes
    }

    #[test]
    fn key_up_is_ignored_without_touching_pty() {
        let bytes = key_record(false, 0x41, 0x41, 0);
        let record = RawRecord::new(&bytes);
        assert!(!record.key_down());
        // dispatch() would try a real ioctl/write on a bogus fd for anything
        // that isn't a silent no-op, so we only assert the decode here.
    }

    #[test]
    fn ctrl_space_decodes_with_ctrl_bit_set() {
        let bytes = key_record(true, VK_SPACE, 0x20, ControlKeyState::LEFT_CTRL_PRESSED.bits());
        let record = RawRecord::new(&bytes);
        assert!(record.key_down());
        assert_eq!(record.vkey(), VK_SPACE);
        assert!(record.ctrl_state().either_ctrl_pressed());
    }

    #[test]
    fn unicode_e_acute_transcodes_to_two_utf8_bytes() {
        let (utf8, len) = transcode_to_utf8(0x00E9).unwrap();
        assert_eq!(len, 2);
        assert_eq!(&utf8[..2], &[0xC3, 0xA9]);
    }

    #[test]
    fn lone_low_surrogate_fails_to_transcode() {
        let err = transcode_to_utf8(0xDC00).unwrap_err();
        assert!(matches!(err, RecordError::Transcode(0xDC00)));
    }

    #[test]
    fn window_buffer_size_record_decodes_payload() {
        let bytes = resize_record(100, 30);
        let record = RawRecord::new(&bytes);
        assert_eq!(record.event_type(), WINDOW_BUFFER_SIZE_EVENT);
        assert_eq!(record.window_size(), (100, 30));
    }

    #[test]
    fn fill_batch_stops_at_partial_record() {
        use super::super::pipe::test_support::MemPipe;

        let pipe = MemPipe::new();
        pipe.push(&key_record(true, 0x41, 0x41, 0));
        pipe.push(&[1, 2, 3]); // a partial second record
        let source: RecordSource<MemPipe> = RecordSource::Pipe(pipe);
        let mut buf = [0u8; RECORDS_PER_CYCLE * INPUT_RECORD_LEN];
        let count = source.fill_batch(&mut buf).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn disabled_source_never_yields_records() {
        let source: RecordSource<super::super::pipe::test_support::MemPipe> =
            RecordSource::Disabled;
        let mut buf = [0u8; RECORDS_PER_CYCLE * INPUT_RECORD_LEN];
        assert_eq!(source.fill_batch(&mut buf).unwrap(), 0);
    }
}
