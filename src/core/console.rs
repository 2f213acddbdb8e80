//! Console I/O Adapter: stand-alone-mode input/output, grounded on
//! `stand_alone_io.cpp`. Only exercised when the host didn't supply `--out`.

use thiserror::Error;

use super::win32::{self, RawHandle, ENABLE_PROCESSED_INPUT, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE};

pub const INPUT_RECORD_LEN: usize = 20;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("GetStdHandle returned INVALID_HANDLE_VALUE")]
    NoStdHandle,
    #[error("GetConsoleMode call failed (error {0})")]
    GetMode(u32),
    #[error("SetConsoleMode call failed (error {0})")]
    SetMode(u32),
    #[error("GetNumberOfConsoleInputEvents call failed (error {0})")]
    EventCount(u32),
    #[error("ReadConsoleInputW call failed (error {0})")]
    ReadInput(u32),
    #[error("WriteConsoleA call failed (error {0})")]
    WriteOutput(u32),
    #[error("GetConsoleScreenBufferInfo call failed (error {0})")]
    ScreenBufferInfo(u32),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;

fn std_handle(which: u32) -> Result<RawHandle> {
    let handle = win32::get_std_handle(which);
    if handle == win32::INVALID_HANDLE_VALUE {
        Err(ConsoleError::NoStdHandle)
    } else {
        Ok(handle)
    }
}

/// Turns off `ENABLE_PROCESSED_INPUT` on stdin so Ctrl+C/Ctrl+Break reach us
/// as ordinary key events instead of being intercepted by the console itself.
pub fn disable_processed_input() -> Result<()> {
    let handle = std_handle(STD_INPUT_HANDLE)?;
    let mode = win32::get_console_mode(handle).map_err(ConsoleError::GetMode)?;
    if mode & ENABLE_PROCESSED_INPUT != 0 {
        win32::set_console_mode(handle, mode & !ENABLE_PROCESSED_INPUT)
            .map_err(ConsoleError::SetMode)?;
    }
    Ok(())
}

/// Reads up to `max_records` 20-byte input records into `buf` (which must be
/// at least `max_records * INPUT_RECORD_LEN` bytes), returning the number of
/// records actually read. Zero pending events is not an error -- it simply
/// yields 0 records, matching the peek-then-read shape the pipe source uses.
pub fn read_input_records(buf: &mut [u8], max_records: usize) -> Result<usize> {
    debug_assert!(buf.len() >= max_records * INPUT_RECORD_LEN);
    let handle = std_handle(STD_INPUT_HANDLE)?;
    let available = win32::get_number_of_console_input_events(handle)
        .map_err(ConsoleError::EventCount)?;
    if available == 0 {
        return Ok(0);
    }
    let want = (available as usize).min(max_records);
    let read = win32::read_console_input_w(handle, buf, want as u32)
        .map_err(ConsoleError::ReadInput)?;
    Ok(read as usize)
}

/// Writes the whole buffer to the console's standard output, looping past
/// short writes just like [`super::pipe::write_bytes`] does for pipes.
pub fn write_output(mut buf: &[u8]) -> Result<()> {
    let handle = std_handle(STD_OUTPUT_HANDLE)?;
    while !buf.is_empty() {
        let written =
            win32::write_console_a(handle, buf).map_err(ConsoleError::WriteOutput)? as usize;
        buf = &buf[written..];
    }
    Ok(())
}

/// Queries the console's actual screen-buffer geometry. Stand-alone-mode
/// `WINDOW_BUFFER_SIZE` dispatch uses this instead of the event payload:
/// rows from the visible window, columns from the full buffer width.
/// Preserved verbatim even though it reads asymmetric; that asymmetry is
/// in the original.
pub fn query_window_size() -> Result<(u16, u16)> {
    let handle = std_handle(STD_OUTPUT_HANDLE)?;
    let info = win32::get_console_screen_buffer_info(handle)
        .map_err(ConsoleError::ScreenBufferInfo)?;
    let rows = (info.sr_window.bottom - info.sr_window.top + 1) as u16;
    let cols = info.dw_size.x as u16;
    Ok((cols, rows))
}
