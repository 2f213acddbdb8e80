//! Event loop and protocol engine: the bridge between Windows pipe handles
//! and a Cygwin/MSYS2 PTY.
//!
//! Leaves first, matching `file_helpers.cpp` -> `command_processor.cpp` ->
//! `io_processor.cpp` -> `main.cpp`'s dependency order in the original:
//!
//! - [`win32`]: raw Win32 bindings the rest of the module needs.
//! - [`pipe`]: framed byte I/O over a Windows pipe `HANDLE`.
//! - [`console`]: the stand-alone-mode console adapter (reads input records,
//!   writes output bytes) used when no host pipes are supplied.
//! - [`fd_io`]: a loop-until-done write helper for the PTY master fd, shared
//!   by [`input_record`] and [`pump`].
//! - [`command`]: the `--cmd` opcode dispatcher (winsize/termios queries).
//! - [`input_record`]: decoding and dispatch of 20-byte `INPUT_RECORD`s.
//! - [`pump`]: the PTY output-drain / input-inject pair.
//! - [`pty`]: PTY allocation, fork, and the two-process handshake.
//! - [`signals`]: signal handler plumbing shared by [`pty`] and [`supervisor`].
//! - [`supervisor`]: the fixed-order event loop tying everything together.

pub mod command;
pub mod console;
pub mod fd_io;
pub mod input_record;
pub mod pipe;
pub mod pty;
pub mod pump;
pub mod signals;
pub mod supervisor;
pub mod win32;
