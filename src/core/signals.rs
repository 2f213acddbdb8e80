//! Handshake & Signal Plane: the `SIGUSR1` rendezvous between master
//! and slave, the master's signal handlers, and the Windows console control
//! handler. Grounded on `main.cpp`'s `sigusr1_signal`/`exit_signal`/
//! `ctrl_handler_routine` and `do_slave`/`do_master`'s handshake sequence.
//!
//! Signal handlers may only touch `AtomicBool`/`AtomicI32` globals -- the
//! event loop is the only place that acts on what they observed.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::fd_io::write_all_fd;
use super::win32;

/// One fixed sleep of this length, then a single check of the flag -- not a
/// short-interval poll. The original costs the full window even on a fast
/// handshake; this is observable behavior a faithful port preserves.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
const NOTIFY_ATTEMPTS: u32 = 5;
const NOTIFY_RETRY_DELAY: Duration = Duration::from_millis(20);

static SIGUSR1_RECEIVED: AtomicBool = AtomicBool::new(false);
static MASTER_PTY_FD: AtomicI32 = AtomicI32::new(-1);
static MASTER_SLAVE_PID: AtomicI32 = AtomicI32::new(-1);

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("signal handler install failed: {0}")]
    Install(#[source] nix::Error),
    #[error("kill({0}, SIGUSR1) failed: {1}")]
    Kill(i32, #[source] nix::Error),
    #[error("handshake timed out after {0:?} waiting for SIGUSR1")]
    Timeout(Duration),
    #[error("failed to notify parent after {0} attempts")]
    NotifyFailed(u32),
    #[error("SetConsoleCtrlHandler failed: error {0}")]
    CtrlHandler(u32),
}

type Result<T> = std::result::Result<T, HandshakeError>;

extern "C" fn sigusr1_handler(_sig: i32) {
    SIGUSR1_RECEIVED.store(true, Ordering::SeqCst);
}

/// `SIGINT` writes Ctrl+C through to the PTY instead of exiting; the
/// remaining exit signals kill the slave's process group, restore the
/// default disposition, and re-raise themselves so the process's own exit
/// status reflects the original signal.
extern "C" fn exit_signal_handler(sig: i32) {
    let Ok(caught) = Signal::try_from(sig) else {
        return;
    };
    if caught == Signal::SIGINT {
        let pty_fd = MASTER_PTY_FD.load(Ordering::SeqCst);
        if pty_fd >= 0 {
            let _ = write_all_fd(pty_fd as RawFd, &[0x03]);
        }
        return;
    }
    let slave_pid = MASTER_SLAVE_PID.load(Ordering::SeqCst);
    if slave_pid > 0 {
        let _ = kill(Pid::from_raw(-slave_pid), caught);
    }
    let _ = unsafe { signal(caught, SigHandler::SigDfl) };
    let _ = kill(Pid::this(), caught);
}

/// Records the fd/pid the master's signal handlers act on. Must be called
/// before installing the handlers (and again once the slave is known).
pub fn set_master_context(pty_fd: RawFd, slave_pid: Pid) {
    MASTER_PTY_FD.store(pty_fd, Ordering::SeqCst);
    MASTER_SLAVE_PID.store(slave_pid.as_raw(), Ordering::SeqCst);
}

/// Installs the master's signal handlers: `SIGHUP` ignored, `SIGINT`/
/// `SIGTERM`/`SIGQUIT` routed through [`exit_signal_handler`], `SIGUSR1`
/// wired to the handshake flag. Must run before `fork` so the child
/// inherits the same handler code (each process then gets its own copy of
/// the flag it sets).
pub fn install_master_signal_handlers() -> Result<()> {
    unsafe {
        signal(Signal::SIGHUP, SigHandler::SigIgn).map_err(HandshakeError::Install)?;
        signal(Signal::SIGINT, SigHandler::Handler(exit_signal_handler))
            .map_err(HandshakeError::Install)?;
        signal(Signal::SIGTERM, SigHandler::Handler(exit_signal_handler))
            .map_err(HandshakeError::Install)?;
        signal(Signal::SIGQUIT, SigHandler::Handler(exit_signal_handler))
            .map_err(HandshakeError::Install)?;
        signal(Signal::SIGUSR1, SigHandler::Handler(sigusr1_handler))
            .map_err(HandshakeError::Install)?;
    }
    Ok(())
}

/// `CTRL_C_EVENT` is ignored (left for the PTY/slave to handle), `CTRL_BREAK_EVENT`
/// is consumed and suppressed, `CTRL_CLOSE/LOGOFF/SHUTDOWN_EVENT` kill the
/// slave's process group with `SIGHUP`.
unsafe extern "system" fn ctrl_handler_routine(ctrl_type: u32) -> i32 {
    const FALSE: i32 = 0;
    const TRUE: i32 = 1;
    match ctrl_type {
        win32::CTRL_C_EVENT => {
            debug!("CTRL_C_EVENT received, doing nothing");
            FALSE
        }
        win32::CTRL_BREAK_EVENT => {
            debug!("CTRL_BREAK_EVENT received, marking as processed");
            TRUE
        }
        win32::CTRL_CLOSE_EVENT | win32::CTRL_LOGOFF_EVENT | win32::CTRL_SHUTDOWN_EVENT => {
            debug!(ctrl_type, "console close/logoff/shutdown, killing slave process group");
            let slave_pid = MASTER_SLAVE_PID.load(Ordering::SeqCst);
            if slave_pid > 0 {
                let _ = kill(Pid::from_raw(-slave_pid), Signal::SIGHUP);
            }
            FALSE
        }
        other => {
            error!(ctrl_type = other, "unknown console control event, doing nothing");
            FALSE
        }
    }
}

pub fn install_console_ctrl_handler() -> Result<()> {
    win32::set_console_ctrl_handler(Some(ctrl_handler_routine), true)
        .map_err(HandshakeError::CtrlHandler)
}

/// Clears and returns whether `SIGUSR1` has been received since the last
/// check (by either side of the handshake, in its own process).
fn take_sigusr1() -> bool {
    SIGUSR1_RECEIVED.swap(false, Ordering::SeqCst)
}

/// Sleeps the whole handshake window once, then checks the flag -- matching
/// the original's single `usleep(3_000_000)` rather than a polling loop.
fn wait_for_sigusr1_once(timeout: Duration) -> bool {
    if take_sigusr1() {
        return true;
    }
    thread::sleep(timeout);
    take_sigusr1()
}

/// Master side: notify the slave, then wait for its acknowledgement.
pub fn master_handshake(slave_pid: Pid) -> Result<()> {
    kill(slave_pid, Signal::SIGUSR1)
        .map_err(|e| HandshakeError::Kill(slave_pid.as_raw(), e))?;
    debug!(pid = slave_pid.as_raw(), "notified slave to continue");
    if !wait_for_sigusr1_once(HANDSHAKE_TIMEOUT) {
        return Err(HandshakeError::Timeout(HANDSHAKE_TIMEOUT));
    }
    debug!("received SIGUSR1 acknowledgement from slave");
    Ok(())
}

/// Slave side: wait for the master's go-ahead.
pub fn slave_wait_for_master() -> Result<()> {
    if !wait_for_sigusr1_once(HANDSHAKE_TIMEOUT) {
        return Err(HandshakeError::Timeout(HANDSHAKE_TIMEOUT));
    }
    Ok(())
}

/// Slave side: notify the parent it's ready, retrying up to
/// [`NOTIFY_ATTEMPTS`] times 20ms apart.
pub fn slave_notify_parent(parent_pid: Pid) -> Result<()> {
    for attempt in 1..=NOTIFY_ATTEMPTS {
        match kill(parent_pid, Signal::SIGUSR1) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, error = %e, "failed to notify parent, retrying");
                thread::sleep(NOTIFY_RETRY_DELAY);
            }
        }
    }
    Err(HandshakeError::NotifyFailed(NOTIFY_ATTEMPTS))
}

/// Slave-side signal reset performed after the rendezvous and before
/// `tcsetattr`: the handshake/job-control signals go back to their defaults
/// (or are ignored, for job-control), so the forked shell doesn't inherit
/// handler state it shouldn't.
pub fn reset_slave_signals() -> Result<()> {
    unsafe {
        for sig in [
            Signal::SIGUSR1,
            Signal::SIGHUP,
            Signal::SIGINT,
            Signal::SIGQUIT,
            Signal::SIGTERM,
            Signal::SIGCHLD,
        ] {
            signal(sig, SigHandler::SigDfl).map_err(HandshakeError::Install)?;
        }
        for sig in [Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU] {
            signal(sig, SigHandler::SigIgn).map_err(HandshakeError::Install)?;
        }
    }
    Ok(())
}
