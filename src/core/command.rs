//! Command Processor (`--cmd <cin>;<cout>`): the control-plane opcode
//! dispatcher, grounded on `command_processor.cpp`.
//!
//! One opcode byte in, one status byte (+ optional payload) out. A failure
//! *inside* a request (e.g. a failing `ioctl`) is reported back over the
//! wire and the loop continues; a failure reading the opcode byte itself
//! means the command channel is corrupted and is fatal to the whole bridge
//! (see [`crate::core::supervisor`]).

use std::os::unix::io::RawFd;

use nix::libc;
use tracing::debug;

use super::pipe::{self, RawPipe};

pub const PING_PONG_COMMAND: u8 = 1;
pub const GET_WINSIZE_COMMAND: u8 = 2;
pub const SET_WINSIZE_COMMAND: u8 = 3;
pub const GET_TERMIOS_COMMAND: u8 = 4;
pub const SET_TERMIOS_COMMAND: u8 = 5;

const SUCCESS_BYTE: u8 = 0;
const FAILURE_BYTE: u8 = 1;

/// Exact byte layout of Linux/Cygwin `struct termios` as the wire protocol
/// defines it: four `u32` flags, a line-discipline byte, an 18-byte control
/// character array, then input/output speed as two more `u32`s.
pub const TERMIOS_BLOB_LEN: usize = 44;

nix::ioctl_read_bad!(ioctl_get_winsize, libc::TIOCGWINSZ, libc::winsize);
nix::ioctl_write_ptr_bad!(ioctl_set_winsize, libc::TIOCSWINSZ, libc::winsize);

fn termios_to_blob(t: &libc::termios) -> [u8; TERMIOS_BLOB_LEN] {
    debug_assert_eq!(std::mem::size_of::<libc::termios>(), TERMIOS_BLOB_LEN);
    let mut blob = [0u8; TERMIOS_BLOB_LEN];
    unsafe {
        std::ptr::copy_nonoverlapping(
            t as *const libc::termios as *const u8,
            blob.as_mut_ptr(),
            TERMIOS_BLOB_LEN,
        );
    }
    blob
}

fn blob_to_termios(blob: &[u8; TERMIOS_BLOB_LEN]) -> libc::termios {
    debug_assert_eq!(std::mem::size_of::<libc::termios>(), TERMIOS_BLOB_LEN);
    unsafe { std::ptr::read(blob.as_ptr() as *const libc::termios) }
}

fn write_response(cout: &impl RawPipe, success: bool, payload: &[u8]) -> pipe::Result<()> {
    let status = if success { SUCCESS_BYTE } else { FAILURE_BYTE };
    pipe::write_bytes(cout, &[status])?;
    if !payload.is_empty() {
        pipe::write_bytes(cout, payload)?;
    }
    Ok(())
}

fn write_failure(cout: &impl RawPipe, message: &str) -> pipe::Result<()> {
    write_response(cout, false, message.as_bytes())
}

fn process_ping(cout: &impl RawPipe) -> pipe::Result<()> {
    write_response(cout, true, &[])
}

fn process_get_winsize(pty_fd: RawFd, cout: &impl RawPipe) -> pipe::Result<()> {
    let mut win_size: libc::winsize = unsafe { std::mem::zeroed() };
    match unsafe { ioctl_get_winsize(pty_fd, &mut win_size) } {
        Ok(_) => {
            debug!(cols = win_size.ws_col, rows = win_size.ws_row, "get-winsize succeeded");
            write_response(cout, true, &[])?;
            pipe::write_u16(cout, win_size.ws_col)?;
            pipe::write_u16(cout, win_size.ws_row)
        }
        Err(errno) => {
            let message = format!("ioctl(TIOCGWINSZ) failed: {errno}");
            write_failure(cout, &message)
        }
    }
}

fn process_set_winsize(pty_fd: RawFd, cin: &impl RawPipe, cout: &impl RawPipe) -> pipe::Result<()> {
    let cols = pipe::read_u16(cin)?;
    let rows = pipe::read_u16(cin)?;
    let mut win_size: libc::winsize = unsafe { std::mem::zeroed() };
    win_size.ws_col = cols;
    win_size.ws_row = rows;
    match unsafe { ioctl_set_winsize(pty_fd, &win_size) } {
        Ok(_) => {
            debug!(cols, rows, "set-winsize succeeded");
            write_response(cout, true, &[])
        }
        Err(errno) => {
            let message = format!("ioctl(TIOCSWINSZ) failed: {errno}");
            write_failure(cout, &message)
        }
    }
}

fn process_get_termios(pty_fd: RawFd, cout: &impl RawPipe) -> pipe::Result<()> {
    let mut t: libc::termios = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::tcgetattr(pty_fd, &mut t) };
    if result == 0 {
        debug!("tcgetattr succeeded");
        write_response(cout, true, &termios_to_blob(&t))
    } else {
        let message = format!("tcgetattr failed: {}", std::io::Error::last_os_error());
        write_failure(cout, &message)
    }
}

fn process_set_termios(pty_fd: RawFd, cin: &impl RawPipe, cout: &impl RawPipe) -> pipe::Result<()> {
    let mut blob = [0u8; TERMIOS_BLOB_LEN];
    pipe::read_bytes_fixed(cin, &mut blob)?;
    let t = blob_to_termios(&blob);
    let result = unsafe { libc::tcsetattr(pty_fd, libc::TCSANOW, &t) };
    if result == 0 {
        debug!("tcsetattr succeeded");
        write_response(cout, true, &[])
    } else {
        let message = format!("tcsetattr failed: {}", std::io::Error::last_os_error());
        write_failure(cout, &message)
    }
}

/// Reads and dispatches at most one command. The `bool` reports whether a
/// command was actually available this cycle (used by the supervisor's
/// heartbeat) -- an in-request failure is still reported on `cout`, not
/// surfaced as an `Err`. Only a failure reading the leading opcode byte (a
/// corrupted command channel) is an `Err`, and that is fatal to the whole
/// bridge.
pub fn process_commands(
    pty_fd: RawFd,
    cin: Option<&impl RawPipe>,
    cout: &impl RawPipe,
) -> pipe::Result<bool> {
    let Some(cin) = cin else {
        return Ok(false);
    };
    let mut opcode = [0u8; 1];
    let read = pipe::try_read_bytes_fixed(cin, &mut opcode)?;
    if read < 1 {
        return Ok(false);
    }
    let result = match opcode[0] {
        PING_PONG_COMMAND => {
            debug!("ping command received");
            process_ping(cout)
        }
        GET_WINSIZE_COMMAND => {
            debug!("get-winsize command received");
            process_get_winsize(pty_fd, cout)
        }
        SET_WINSIZE_COMMAND => {
            debug!("set-winsize command received");
            process_set_winsize(pty_fd, cin, cout)
        }
        GET_TERMIOS_COMMAND => {
            debug!("get-termios command received");
            process_get_termios(pty_fd, cout)
        }
        SET_TERMIOS_COMMAND => {
            debug!("set-termios command received");
            process_set_termios(pty_fd, cin, cout)
        }
        other => {
            let message = format!("Unknown command received: {other}.");
            debug!(opcode = other, "{}", message);
            write_failure(cout, &message)
        }
    };
    result.map(|()| true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipe::test_support::MemPipe;

    #[test]
    fn ping_replies_success() {
        let cin = MemPipe::new();
        let cout = MemPipe::new();
        cin.push(&[PING_PONG_COMMAND]);
        assert!(process_commands(-1, Some(&cin), &cout).unwrap());
        assert_eq!(cout.written(), vec![SUCCESS_BYTE]);
    }

    #[test]
    fn unknown_opcode_reports_failure_but_does_not_error() {
        let cin = MemPipe::new();
        let cout = MemPipe::new();
        cin.push(&[42]);
        process_commands(-1, Some(&cin), &cout).unwrap();
        let written = cout.written();
        assert_eq!(written[0], FAILURE_BYTE);
        assert!(written.len() > 1);
    }

    #[test]
    fn no_command_available_is_a_noop() {
        let cin = MemPipe::new();
        let cout = MemPipe::new();
        assert!(!process_commands(-1, Some(&cin), &cout).unwrap());
        assert!(cout.written().is_empty());
    }

    #[test]
    fn absent_cin_is_a_noop() {
        let cout = MemPipe::new();
        process_commands::<MemPipe>(-1, None, &cout).unwrap();
        assert!(cout.written().is_empty());
    }

    #[test]
    fn termios_blob_round_trips_byte_layout() {
        let mut t: libc::termios = unsafe { std::mem::zeroed() };
        t.c_iflag = 0xAABB_CCDD;
        t.c_lflag = libc::ECHO | libc::ICANON;
        let blob = termios_to_blob(&t);
        let back = blob_to_termios(&blob);
        assert_eq!(back.c_iflag, t.c_iflag);
        assert_eq!(back.c_lflag, t.c_lflag);
    }
}
