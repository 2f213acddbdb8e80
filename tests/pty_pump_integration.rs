//! Integration tests that open a real PTY pair and drive the input-record
//! dispatch logic (resize, Ctrl+Space, Unicode key translation) against it
//! directly, without forking a shell. Grounded on
//! `permosegaard-ptyprocess/tests/io_async.rs`'s pattern of exercising PTY
//! behavior end-to-end rather than mocking it.
#![cfg(unix)]

use nix::fcntl::{open, OFlag};
use nix::libc;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, LocalFlags, SetArg};
use nix::unistd::{close, read, write};
use std::os::unix::io::{AsRawFd, RawFd};

use wincygbridge::core::input_record::{RawRecord, RECORDS_PER_CYCLE};
use wincygbridge::core::console::INPUT_RECORD_LEN;
use wincygbridge::core::input_record::dispatch;
use wincygbridge::core::win32::{ControlKeyState, KEY_EVENT, VK_SPACE, WINDOW_BUFFER_SIZE_EVENT};

nix::ioctl_read_bad!(ioctl_get_winsize, libc::TIOCGWINSZ, libc::winsize);

/// Opens a fresh PTY pair and puts the slave side into a raw mode (no
/// canonical line buffering, no echo) so a single written byte is readable
/// immediately without needing a shell attached to drive it.
struct PtyPair {
    master_fd: RawFd,
    slave_fd: RawFd,
}

impl PtyPair {
    fn open() -> Self {
        let master = posix_openpt(OFlag::O_RDWR).expect("posix_openpt");
        grantpt(&master).expect("grantpt");
        unlockpt(&master).expect("unlockpt");
        let slave_name = ptsname_r(&master).expect("ptsname_r");
        let slave_fd = open(slave_name.as_str(), OFlag::O_RDWR, Mode::empty())
            .expect("open slave device");

        let mut attrs = termios::tcgetattr(slave_fd).expect("tcgetattr");
        attrs.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        termios::tcsetattr(slave_fd, SetArg::TCSANOW, &attrs).expect("tcsetattr");

        let master_fd = master.as_raw_fd();
        std::mem::forget(master); // caller owns the fd via `master_fd` now
        Self { master_fd, slave_fd }
    }

    fn read_slave(&self, max: usize) -> Vec<u8> {
        let mut buf = vec![0u8; max];
        let n = read(self.slave_fd, &mut buf).expect("read from slave");
        buf.truncate(n);
        buf
    }
}

impl Drop for PtyPair {
    fn drop(&mut self) {
        let _ = close(self.master_fd);
        let _ = close(self.slave_fd);
    }
}

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

/// Resize via input-record: the dispatched `WINDOW_BUFFER_SIZE`
/// record's payload must reach the PTY's `TIOCGWINSZ` view immediately.
#[test]
fn resize_record_applies_winsize_to_pty() {
    let pty = PtyPair::open();
    let bytes = resize_record(100, 30);
    dispatch(pty.master_fd, RawRecord::new(&bytes), false).expect("dispatch resize");

    let mut win_size: libc::winsize = unsafe { std::mem::zeroed() };
    unsafe { ioctl_get_winsize(pty.master_fd, &mut win_size) }.expect("TIOCGWINSZ");
    assert_eq!(win_size.ws_col, 100);
    assert_eq!(win_size.ws_row, 30);
}

/// Ctrl+Space produces exactly one NUL byte on the PTY, regardless of what
/// the record's repeat count would have been.
#[test]
fn ctrl_space_writes_single_nul_byte() {
    let pty = PtyPair::open();
    let bytes = key_record(true, VK_SPACE, 0x20, ControlKeyState::LEFT_CTRL_PRESSED.bits());
    dispatch(pty.master_fd, RawRecord::new(&bytes), false).expect("dispatch ctrl+space");

    let received = pty.read_slave(8);
    assert_eq!(received, vec![0x00]);
}

/// A lone UTF-16 code unit for "é" (U+00E9) transcodes to its two-byte
/// UTF-8 form on the PTY.
#[test]
fn unicode_e_acute_reaches_pty_as_utf8() {
    let pty = PtyPair::open();
    let bytes = key_record(true, 0, 0x00E9, 0);
    dispatch(pty.master_fd, RawRecord::new(&bytes), false).expect("dispatch unicode key");

    let received = pty.read_slave(8);
    assert_eq!(received, vec![0xC3, 0xA9]);
}

/// A key-up record (`key_down = false`) must not touch the PTY at all.
#[test]
fn key_up_event_is_a_silent_noop() {
    let pty = PtyPair::open();
    let bytes = key_record(false, 0x41, 0x41, 0);
    dispatch(pty.master_fd, RawRecord::new(&bytes), false).expect("dispatch key-up");

    write(pty.master_fd, b"sentinel").expect("write sentinel");
    let received = pty.read_slave(64);
    assert_eq!(received, b"sentinel");
}

/// Sanity check that the batch size constant lines up with the wire layout
/// this whole test file hand-encodes records against.
#[test]
fn records_per_cycle_matches_wire_batch_size() {
    assert_eq!(RECORDS_PER_CYCLE, 100);
}
