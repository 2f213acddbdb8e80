//! wincygbridge - Windows-pipe to Cygwin/MSYS2 PTY bridge.
//!
//! The binary (`src/main.rs`) is a thin wire-up over this library; splitting
//! it out is what lets `tests/` drive [`core`] against a real PTY pair
//! without forking the whole process through the CLI, the way
//! `permosegaard-ptyprocess`'s own `tests/` does against its `PtyProcess`.

pub mod cli;
pub mod core;
pub mod exit_codes;
pub mod logging;
