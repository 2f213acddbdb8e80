//! Process exit codes, shared by argument parsing and the PTY fork's
//! own fatal-error paths.

pub const ARGUMENTS: i32 = 1;
pub const API_CALL_FAILED: i32 = 2;
pub const SHELL_LAUNCH_FAILED: i32 = 3;
pub const UNEXPECTED: i32 = -1;
