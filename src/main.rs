//! wincygbridge - Windows-pipe to Cygwin/MSYS2 PTY bridge.
//!
//! Bridges a Windows-native host process to a Unix-style pseudoterminal
//! provided by a POSIX emulation layer (Cygwin/MSYS2), so the host can drive
//! an interactive shell as if it were connected to a real terminal. See
//! [`wincygbridge::core`] for the event loop and protocol engine this
//! binary wires up.

use std::process::exit;

use tracing::{error, info, warn};

use wincygbridge::cli::{self, Action};
use wincygbridge::core::console;
use wincygbridge::core::pipe::Win32Pipe;
use wincygbridge::core::pty;
use wincygbridge::core::input_record::RecordSource;
use wincygbridge::core::pump::OutputSink;
use wincygbridge::core::signals;
use wincygbridge::core::supervisor::{self, BridgeSession};
use wincygbridge::exit_codes;
use wincygbridge::logging;

/// Every branch below ends in an explicit `std::process::exit(code)` so
/// each failure class reports its own distinguishable exit code --
/// `anyhow::Result` is kept as the `main` signature, but the actual exit
/// status is never left to anyhow's default "print Debug, exit 1" behavior.
fn main() -> anyhow::Result<()> {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match cli::parse(&raw_args) {
        Ok(Action::Help) => {
            cli::print_help();
            exit(0);
        }
        Ok(Action::Version) => {
            cli::print_version();
            exit(0);
        }
        Ok(Action::Run(parsed)) => parsed,
        Err(err) => {
            println!("Invalid arguments. {err}.\n");
            cli::print_help();
            exit(exit_codes::ARGUMENTS);
        }
    };

    logging::init(parsed.log_level, parsed.syslog);
    info!(
        standalone = parsed.standalone(),
        shell = ?parsed.shell,
        "wincygbridge starting"
    );

    if let Err(err) = signals::install_console_ctrl_handler() {
        error!(error = %err, "'SetConsoleCtrlHandler' call failed");
        exit(exit_codes::API_CALL_FAILED);
    }

    let standalone = parsed.standalone();
    if standalone {
        if let Err(err) = pty::configure_master_standalone_termios() {
            error!(error = %err, "failed to set master terminal attributes");
            exit(exit_codes::API_CALL_FAILED);
        }
    }

    let outcome = match pty::spawn(&parsed.shell, parsed.dir.as_deref()) {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "failed to spawn PTY/shell");
            exit(exit_codes::API_CALL_FAILED);
        }
    };
    info!(slave_pid = outcome.slave_pid.as_raw(), "handshake complete");

    let (initial_cols, initial_rows) = if standalone {
        console::query_window_size().unwrap_or_else(|err| {
            warn!(error = %err, "failed to query console geometry, keeping CLI defaults");
            (parsed.cols, parsed.rows)
        })
    } else {
        (parsed.cols, parsed.rows)
    };
    if let Err(err) = pty::set_initial_winsize(outcome.master_fd, initial_cols, initial_rows) {
        warn!(error = %err, "failed to apply initial terminal size");
    }

    let output_sink = match parsed.out {
        Some(handle) => OutputSink::Pipe(Win32Pipe(handle)),
        None => OutputSink::Console,
    };
    let record_source = match (parsed.out, parsed.inr) {
        (Some(_), Some(handle)) => RecordSource::Pipe(Win32Pipe(handle)),
        (Some(_), None) => RecordSource::Disabled,
        (None, _) => RecordSource::Console,
    };
    let input_source = parsed.ins.map(Win32Pipe);
    let (cin, cout) = match parsed.cmd {
        Some((cin, cout)) => (Some(Win32Pipe(cin)), Some(Win32Pipe(cout))),
        None => (None, None),
    };

    let mut session = BridgeSession::new(
        outcome.master_fd,
        outcome.slave_pid,
        standalone,
        cin,
        cout,
        output_sink,
        record_source,
        input_source,
    );

    match supervisor::run(&mut session) {
        Ok(()) => {
            info!("slave process exited, bye-bye");
            exit(0);
        }
        Err(err) => {
            error!(error = %err, "event loop exited on a fatal condition");
            exit(exit_codes::API_CALL_FAILED);
        }
    }
}
