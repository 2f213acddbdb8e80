//! Minimal raw bindings to the handful of Win32 calls this bridge needs.
//!
//! This crate runs on the Cygwin/MSYS2 POSIX target, which is `cfg(unix)` in
//! Rust's eyes even though the process links against `kernel32.dll` and
//! `ntdll` directly, exactly as the original C/C++ implementation does by
//! including `w32api/*.h` alongside `sys/*.h` in the same translation unit.
//! The `windows` crate only targets `cfg(windows)` builds (MSVC/MinGW ABI),
//! so it cannot express this; these are the same declarations a Cygwin
//! program would pull from `w32api`, kept to exactly what the pipe and
//! console I/O paths need.

use std::ffi::c_void;
use std::os::raw::{c_int, c_long};

pub type RawHandle = isize;
pub const INVALID_HANDLE_VALUE: RawHandle = -1;

pub const STD_INPUT_HANDLE: u32 = 0xFFFF_FFF6;
pub const STD_OUTPUT_HANDLE: u32 = 0xFFFF_FFF5;

pub const ENABLE_PROCESSED_INPUT: u32 = 0x0001;

pub const KEY_EVENT: u16 = 0x0001;
pub const MOUSE_EVENT: u16 = 0x0002;
pub const WINDOW_BUFFER_SIZE_EVENT: u16 = 0x0004;

pub const VK_SPACE: u16 = 0x20;

bitflags::bitflags! {
    /// `dwControlKeyState` from a Windows `KEY_EVENT_RECORD`: which
    /// modifier keys were held down when the key event was generated. The
    /// core only ever tests the two Ctrl bits (the Ctrl+Space special case),
    /// but the full set is kept here rather than two bare constants
    /// so a combined state decodes the same way the console API documents it.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ControlKeyState: u32 {
        const RIGHT_ALT_PRESSED  = 0x0001;
        const LEFT_ALT_PRESSED   = 0x0002;
        const RIGHT_CTRL_PRESSED = 0x0004;
        const LEFT_CTRL_PRESSED  = 0x0008;
        const SHIFT_PRESSED      = 0x0010;
        const NUMLOCK_ON         = 0x0020;
        const SCROLLLOCK_ON      = 0x0040;
        const CAPSLOCK_ON        = 0x0080;
        const ENHANCED_KEY       = 0x0100;
    }
}

impl ControlKeyState {
    pub fn either_ctrl_pressed(self) -> bool {
        self.intersects(Self::LEFT_CTRL_PRESSED | Self::RIGHT_CTRL_PRESSED)
    }
}

pub const CTRL_C_EVENT: u32 = 0;
pub const CTRL_BREAK_EVENT: u32 = 1;
pub const CTRL_CLOSE_EVENT: u32 = 2;
pub const CTRL_LOGOFF_EVENT: u32 = 5;
pub const CTRL_SHUTDOWN_EVENT: u32 = 6;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Coord {
    pub x: i16,
    pub y: i16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SmallRect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleScreenBufferInfo {
    pub dw_size: Coord,
    pub dw_cursor_position: Coord,
    pub w_attributes: u16,
    pub sr_window: SmallRect,
    pub dw_maximum_window_size: Coord,
}

extern "system" {
    fn GetStdHandle(std_handle: u32) -> RawHandle;
    fn GetLastError() -> u32;

    fn ReadFile(
        handle: RawHandle,
        buffer: *mut c_void,
        n_to_read: u32,
        n_read: *mut u32,
        overlapped: *mut c_void,
    ) -> c_int;

    fn WriteFile(
        handle: RawHandle,
        buffer: *const c_void,
        n_to_write: u32,
        n_written: *mut u32,
        overlapped: *mut c_void,
    ) -> c_int;

    fn PeekNamedPipe(
        handle: RawHandle,
        buffer: *mut c_void,
        buffer_size: u32,
        bytes_read: *mut u32,
        total_bytes_avail: *mut u32,
        bytes_left_this_message: *mut u32,
    ) -> c_int;

    fn GetConsoleMode(handle: RawHandle, mode: *mut u32) -> c_int;
    fn SetConsoleMode(handle: RawHandle, mode: u32) -> c_int;
    fn GetNumberOfConsoleInputEvents(handle: RawHandle, n_events: *mut u32) -> c_int;

    fn ReadConsoleInputW(
        handle: RawHandle,
        buffer: *mut c_void,
        length: u32,
        n_read: *mut u32,
    ) -> c_int;

    fn WriteConsoleA(
        handle: RawHandle,
        buffer: *const c_void,
        n_to_write: u32,
        n_written: *mut u32,
        reserved: *mut c_void,
    ) -> c_int;

    fn GetConsoleScreenBufferInfo(handle: RawHandle, info: *mut ConsoleScreenBufferInfo) -> c_int;

    fn SetConsoleCtrlHandler(
        handler: Option<unsafe extern "system" fn(u32) -> c_int>,
        add: c_int,
    ) -> c_int;

    fn OutputDebugStringA(output_string: *const u8);
}

fn bool_from(ret: c_int) -> bool {
    ret != 0
}

pub fn get_last_error() -> u32 {
    unsafe { GetLastError() }
}

pub fn get_std_handle(which: u32) -> RawHandle {
    unsafe { GetStdHandle(which) }
}

pub fn read_file(handle: RawHandle, buf: &mut [u8]) -> Result<u32, u32> {
    let mut read: u32 = 0;
    let ok = unsafe {
        ReadFile(
            handle,
            buf.as_mut_ptr() as *mut c_void,
            buf.len() as u32,
            &mut read,
            std::ptr::null_mut(),
        )
    };
    if bool_from(ok) {
        Ok(read)
    } else {
        Err(get_last_error())
    }
}

pub fn write_file(handle: RawHandle, buf: &[u8]) -> Result<u32, u32> {
    let mut written: u32 = 0;
    let ok = unsafe {
        WriteFile(
            handle,
            buf.as_ptr() as *const c_void,
            buf.len() as u32,
            &mut written,
            std::ptr::null_mut(),
        )
    };
    if bool_from(ok) {
        Ok(written)
    } else {
        Err(get_last_error())
    }
}

pub fn peek_named_pipe_available(handle: RawHandle) -> Result<u32, u32> {
    let mut available: u32 = 0;
    let ok = unsafe {
        PeekNamedPipe(
            handle,
            std::ptr::null_mut(),
            0,
            std::ptr::null_mut(),
            &mut available,
            std::ptr::null_mut(),
        )
    };
    if bool_from(ok) {
        Ok(available)
    } else {
        Err(get_last_error())
    }
}

pub fn get_console_mode(handle: RawHandle) -> Result<u32, u32> {
    let mut mode: u32 = 0;
    let ok = unsafe { GetConsoleMode(handle, &mut mode) };
    if bool_from(ok) {
        Ok(mode)
    } else {
        Err(get_last_error())
    }
}

pub fn set_console_mode(handle: RawHandle, mode: u32) -> Result<(), u32> {
    let ok = unsafe { SetConsoleMode(handle, mode) };
    if bool_from(ok) {
        Ok(())
    } else {
        Err(get_last_error())
    }
}

pub fn get_number_of_console_input_events(handle: RawHandle) -> Result<u32, u32> {
    let mut n: u32 = 0;
    let ok = unsafe { GetNumberOfConsoleInputEvents(handle, &mut n) };
    if bool_from(ok) {
        Ok(n)
    } else {
        Err(get_last_error())
    }
}

/// `buf` must hold whole 20-byte `INPUT_RECORD`s; `count` is a record count, not a byte count.
pub fn read_console_input_w(handle: RawHandle, buf: &mut [u8], count: u32) -> Result<u32, u32> {
    let mut read: u32 = 0;
    let ok = unsafe {
        ReadConsoleInputW(handle, buf.as_mut_ptr() as *mut c_void, count, &mut read)
    };
    if bool_from(ok) {
        Ok(read)
    } else {
        Err(get_last_error())
    }
}

pub fn write_console_a(handle: RawHandle, buf: &[u8]) -> Result<u32, u32> {
    let mut written: u32 = 0;
    let ok = unsafe {
        WriteConsoleA(
            handle,
            buf.as_ptr() as *const c_void,
            buf.len() as u32,
            &mut written,
            std::ptr::null_mut(),
        )
    };
    if bool_from(ok) {
        Ok(written)
    } else {
        Err(get_last_error())
    }
}

pub fn get_console_screen_buffer_info(handle: RawHandle) -> Result<ConsoleScreenBufferInfo, u32> {
    let mut info = ConsoleScreenBufferInfo::default();
    let ok = unsafe { GetConsoleScreenBufferInfo(handle, &mut info) };
    if bool_from(ok) {
        Ok(info)
    } else {
        Err(get_last_error())
    }
}

pub fn set_console_ctrl_handler(
    handler: Option<unsafe extern "system" fn(u32) -> c_int>,
    add: bool,
) -> Result<(), u32> {
    let ok = unsafe { SetConsoleCtrlHandler(handler, add as c_int) };
    if bool_from(ok) {
        Ok(())
    } else {
        Err(get_last_error())
    }
}

/// Mirrors a NUL-terminated byte string to the system debug stream (visible
/// in DebugView or similar), for `--syslog`. A stray interior NUL just
/// truncates what DebugView prints; that's how `OutputDebugStringA` itself
/// behaves and isn't worth failing the log write over.
pub fn output_debug_string(bytes: &[u8]) {
    let mut owned = Vec::with_capacity(bytes.len() + 1);
    owned.extend_from_slice(bytes);
    owned.push(0);
    unsafe { OutputDebugStringA(owned.as_ptr()) };
}

#[allow(dead_code)]
pub type LongResult = c_long;
