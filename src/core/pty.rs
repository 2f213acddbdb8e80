//! PTY allocation and the master/slave fork.
//!
//! The `Master` wrapper and the open/grant/unlock/slave-name/redirect
//! sequence are grounded on `permosegaard-ptyprocess`'s `Master` and
//! `make_controlling_tty`/`redirect_std_streams`; the handshake itself
//! (the fixed sleep-then-check rendezvous, the slave's signal reset,
//! termios defaults, `chdir`+`CHERE_INVOKING`, and the 5-attempt notify
//! back to the parent) is grounded on `main.cpp`'s `do_slave`/`do_master`,
//! since `nix` has no single `forkpty()`-equivalent call -- it's composed
//! from the primitives `ptyprocess` already demonstrates.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::{open, OFlag};
use nix::libc;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, InputFlags, LocalFlags, SpecialCharacterIndices};
use nix::unistd::{chdir, close, dup2, execvp, fork, setsid, ForkResult, Pid};
use thiserror::Error;
use tracing::error;

use super::signals;
use crate::exit_codes;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("argument contains an interior NUL byte: {0}")]
    InvalidArgument(#[source] std::ffi::NulError),
    #[error("failed to open PTY master: {0}")]
    OpenMaster(#[source] nix::Error),
    #[error("grantpt failed: {0}")]
    Grant(#[source] nix::Error),
    #[error("unlockpt failed: {0}")]
    Unlock(#[source] nix::Error),
    #[error("failed to resolve slave device name: {0}")]
    SlaveName(#[source] nix::Error),
    #[error("failed to open slave device {0}: {1}")]
    OpenSlave(String, #[source] nix::Error),
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),
    #[error("failed to acquire controlling terminal: {0}")]
    Ctty(#[source] nix::Error),
    #[error("failed to redirect std stream {0}: {1}")]
    Redirect(&'static str, #[source] nix::Error),
    #[error("failed to read/set slave termios: {0}")]
    Termios(#[source] nix::Error),
    #[error("chdir to {0:?} failed: {1}")]
    Chdir(PathBuf, #[source] nix::Error),
    #[error(transparent)]
    Handshake(#[from] signals::HandshakeError),
    #[error("execvp({0:?}) failed: {1}")]
    Exec(String, #[source] nix::Error),
    #[error("ioctl(TIOCSWINSZ) failed: {0}")]
    Resize(#[source] nix::Error),
}

type Result<T> = std::result::Result<T, PtyError>;

nix::ioctl_write_ptr_bad!(ioctl_set_winsize, libc::TIOCSWINSZ, libc::winsize);

/// Applies the initial terminal geometry to the master fd. `forkpty()` takes
/// a `winsize` at fork time in the original; `nix` has no such all-in-one
/// call, so this is a separate `ioctl` run by the caller right after
/// [`spawn`] returns, before the event loop starts.
pub fn set_initial_winsize(master_fd: RawFd, cols: u16, rows: u16) -> Result<()> {
    let mut win_size: libc::winsize = unsafe { std::mem::zeroed() };
    win_size.ws_col = cols;
    win_size.ws_row = rows;
    unsafe { ioctl_set_winsize(master_fd, &win_size) }
        .map(|_| ())
        .map_err(PtyError::Resize)
}

/// The PTY master side. Owns the master fd until [`spawn`] hands its raw
/// value off to the caller for the lifetime of the bridge session.
struct Master {
    fd: PtyMaster,
}

impl Master {
    fn open() -> Result<Self> {
        let fd = posix_openpt(OFlag::O_RDWR).map_err(PtyError::OpenMaster)?;
        grantpt(&fd).map_err(PtyError::Grant)?;
        unlockpt(&fd).map_err(PtyError::Unlock)?;
        Ok(Self { fd })
    }

    fn slave_name(&self) -> Result<String> {
        ptsname_r(&self.fd).map_err(PtyError::SlaveName)
    }

    fn open_slave(&self) -> Result<RawFd> {
        let name = self.slave_name()?;
        open(name.as_str(), OFlag::O_RDWR, Mode::empty()).map_err(|e| PtyError::OpenSlave(name, e))
    }
}

impl AsRawFd for Master {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Result of a successful [`spawn`]: the raw master fd (now owned by the
/// caller) and the slave's pid.
pub struct SpawnOutcome {
    pub master_fd: RawFd,
    pub slave_pid: Pid,
}

/// Opens a PTY, forks, and runs the full master/slave rendezvous handshake.
///
/// The child never returns from this function: it either `exec`s `command[0]`
/// or exits with [`exit_codes::API_CALL_FAILED`]/[`exit_codes::SHELL_LAUNCH_FAILED`].
/// The parent returns once the slave has acknowledged the handshake.
pub fn spawn(command: &[String], working_dir: Option<&Path>) -> Result<SpawnOutcome> {
    let shell = CString::new(command[0].as_str()).map_err(PtyError::InvalidArgument)?;
    let argv = command
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(PtyError::InvalidArgument)?;
    let working_dir = working_dir.map(Path::to_path_buf);

    let master = Master::open()?;
    // Installed before fork so the child inherits the same handler code;
    // each process then has its own private copy of the flag it sets.
    signals::install_master_signal_handlers()?;

    let fork_result = unsafe { fork() }.map_err(PtyError::Fork)?;
    match fork_result {
        ForkResult::Child => {
            match run_slave(master, &shell, &argv, working_dir.as_deref()) {
                Ok(never) => match never {},
                Err(err) => {
                    error!(%err, "slave setup failed before exec");
                    let code = match err {
                        PtyError::Exec(..) => exit_codes::SHELL_LAUNCH_FAILED,
                        _ => exit_codes::API_CALL_FAILED,
                    };
                    std::process::exit(code);
                }
            }
        }
        ForkResult::Parent { child } => {
            let master_fd = master.as_raw_fd();
            signals::set_master_context(master_fd, child);
            signals::master_handshake(child)?;
            // The caller owns this fd for the rest of the process's life and
            // closes it on shutdown; don't let `Master`'s drop close it here.
            std::mem::forget(master);
            Ok(SpawnOutcome {
                master_fd,
                slave_pid: child,
            })
        }
    }
}

/// Everything the slave does between `fork` and `exec`. Returning `Ok` is
/// impossible by construction: a successful `execvp` replaces this process
/// image and never returns.
fn run_slave(
    master: Master,
    shell: &CString,
    argv: &[CString],
    working_dir: Option<&Path>,
) -> Result<Infallible> {
    let parent_pid = Pid::parent();

    let slave_name = master.slave_name()?;
    let slave_fd = master.open_slave()?;
    drop(master); // close this process's copy of the master fd

    make_controlling_tty(&slave_name)?;
    redirect_std_streams(slave_fd)?;

    signals::slave_wait_for_master()?;
    signals::reset_slave_signals()?;
    configure_slave_termios(libc::STDIN_FILENO)?;

    if let Some(dir) = working_dir {
        chdir(dir).map_err(|e| PtyError::Chdir(dir.to_path_buf(), e))?;
        std::env::set_var("CHERE_INVOKING", "1");
    }

    signals::slave_notify_parent(parent_pid)?;

    execvp(shell, argv).map_err(|e| PtyError::Exec(shell.to_string_lossy().into_owned(), e))
}

/// Disconnects from any inherited controlling terminal, starts a new
/// session, then briefly reopens the slave device so the kernel assigns it
/// as this session's controlling terminal.
fn make_controlling_tty(slave_name: &str) -> Result<()> {
    if let Ok(fd) = open("/dev/tty", OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty()) {
        let _ = close(fd);
    }
    setsid().map_err(PtyError::Ctty)?;
    let fd = open(slave_name, OFlag::O_RDWR, Mode::empty())
        .map_err(|e| PtyError::OpenSlave(slave_name.to_string(), e))?;
    let _ = close(fd);
    Ok(())
}

fn redirect_std_streams(slave_fd: RawFd) -> Result<()> {
    for (fd, name) in [
        (libc::STDIN_FILENO, "stdin"),
        (libc::STDOUT_FILENO, "stdout"),
        (libc::STDERR_FILENO, "stderr"),
    ] {
        dup2(slave_fd, fd).map_err(|e| PtyError::Redirect(name, e))?;
    }
    if slave_fd > libc::STDERR_FILENO {
        let _ = close(slave_fd);
    }
    Ok(())
}

/// `VERASE=CDEL`, `IXANY|IMAXBEL` on input, `ECHOE|ECHOK|ECHOCTL|ECHOKE` on
/// local flags -- the slave-side termios defaults `do_slave` applies before
/// handing control to the shell.
fn configure_slave_termios(fd: RawFd) -> Result<()> {
    let mut attrs = termios::tcgetattr(fd).map_err(PtyError::Termios)?;
    attrs.control_chars[SpecialCharacterIndices::VERASE as usize] = 0x7f;
    attrs.input_flags |= InputFlags::IXANY | InputFlags::IMAXBEL;
    attrs.local_flags |=
        LocalFlags::ECHOE | LocalFlags::ECHOK | LocalFlags::ECHOCTL | LocalFlags::ECHOKE;
    termios::tcsetattr(fd, termios::SetArg::TCSANOW, &attrs).map_err(PtyError::Termios)
}

/// Stand-alone-mode-only master setup, run once before `spawn`: puts the
/// invoking console's own terminal (fd 0) into a raw-ish mode suitable for
/// passing bytes straight through -- `VERASE=DEL`, input flags cleared
/// entirely, local flags reduced to just `ISIG`. Distinct from (and in
/// addition to) the per-fork slave defaults in [`configure_slave_termios`];
/// never run in managed mode, where the host owns the invoking console.
pub fn configure_master_standalone_termios() -> Result<()> {
    let mut attrs = termios::tcgetattr(libc::STDIN_FILENO).map_err(PtyError::Termios)?;
    attrs.control_chars[SpecialCharacterIndices::VERASE as usize] = 0x7f;
    attrs.input_flags = InputFlags::empty();
    attrs.local_flags = LocalFlags::ISIG;
    termios::tcsetattr(libc::STDIN_FILENO, termios::SetArg::TCSANOW, &attrs)
        .map_err(PtyError::Termios)
}
