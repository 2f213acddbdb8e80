//! Supervisor / Event Loop: ties the command processor, the
//! input-record processor, and the PTY pump together in one fixed cycle
//! order, grounded on `io_processor.cpp`'s `run()`.

use std::os::unix::io::RawFd;
use std::thread;
use std::time::Duration;

use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{close, Pid};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::command;
use super::console::{self, INPUT_RECORD_LEN};
use super::input_record::{self, RawRecord, RecordError, RecordSource, RECORDS_PER_CYCLE};
use super::pipe::{self, RawPipe};
use super::pump::{self, InputBuffer, OutputBuffer, OutputSink, PumpError};

/// Idle cycles before the heartbeat logs and resets (the original's
/// commented-out `test()` hook at this point is dropped here).
const HEART_BEAT_CYCLES: u32 = 500;
/// Consecutive per-phase failures tolerated before the loop treats it as fatal.
const IO_ERRCOUNT_IGNORE: u32 = 2;
const BACKOFF: Duration = Duration::from_millis(10);

const RECORD_BATCH_BYTES: usize = RECORDS_PER_CYCLE * INPUT_RECORD_LEN;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Command(#[from] pipe::PipeError),
    #[error("output phase failed {0} consecutive times: {1}")]
    Output(u32, #[source] PumpError),
    #[error("record phase failed {0} consecutive times: {1}")]
    Record(u32, #[source] RecordError),
    #[error("input phase failed {0} consecutive times: {1}")]
    Input(u32, #[source] PumpError),
}

type Result<T> = std::result::Result<T, SupervisorError>;

/// Owns the PTY session's lifetime: the fd, the slave pid, and every piece
/// of retained state the event loop touches -- the output/input/record
/// buffers and the per-phase error counters, all moved out of statics and
/// into fields here.
pub struct BridgeSession<P: RawPipe> {
    pty_fd: RawFd,
    slave_pid: Pid,
    standalone: bool,
    cin: Option<P>,
    cout: Option<P>,
    output_sink: OutputSink<P>,
    record_source: RecordSource<P>,
    input_source: Option<P>,
    output_buffer: OutputBuffer,
    input_buffer: InputBuffer,
    record_buf: [u8; RECORD_BATCH_BYTES],
    record_index: usize,
    record_count: usize,
    record_exhausted: bool,
    heartbeat: u32,
    output_errors: u32,
    record_errors: u32,
    input_errors: u32,
}

impl<P: RawPipe> BridgeSession<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pty_fd: RawFd,
        slave_pid: Pid,
        standalone: bool,
        cin: Option<P>,
        cout: Option<P>,
        output_sink: OutputSink<P>,
        record_source: RecordSource<P>,
        input_source: Option<P>,
    ) -> Self {
        Self {
            pty_fd,
            slave_pid,
            standalone,
            cin,
            cout,
            output_sink,
            record_source,
            input_source,
            output_buffer: OutputBuffer::new(),
            input_buffer: InputBuffer::new(),
            record_buf: [0u8; RECORD_BATCH_BYTES],
            record_index: 0,
            record_count: 0,
            record_exhausted: true,
            heartbeat: 0,
            output_errors: 0,
            record_errors: 0,
            input_errors: 0,
        }
    }

    fn process_active(&self) -> bool {
        kill(self.slave_pid, None).is_ok()
    }

    /// Mirrors the original's exact polarity: only a `waitpid` that reaps
    /// *this* pid as exited/signaled counts as "gone". Any other outcome,
    /// including an error, is "still alive" -- not a typo.
    fn slave_process_running(&self) -> bool {
        match waitpid(self.slave_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _))
                if pid == self.slave_pid =>
            {
                false
            }
            _ => true,
        }
    }

    fn tick_heartbeat(&mut self, activity: bool) {
        if activity {
            self.heartbeat = 0;
            return;
        }
        self.heartbeat += 1;
        if self.heartbeat >= HEART_BEAT_CYCLES {
            debug!(cycles = self.heartbeat, "heartbeat: nothing happened");
            self.heartbeat = 0;
        }
    }

    /// Fetches a new batch only once the previous one has been fully
    /// dispatched; otherwise resumes at `record_index`, so a record that
    /// fails to dispatch (a bad transcode, a failing resize ioctl) is
    /// retried on the next cycle instead of being skipped over by a fresh
    /// `fill_batch` call that would overwrite the buffer out from under it.
    /// Returns `(exhausted, records_dispatched_this_call)`.
    fn fill_and_dispatch_records(&mut self) -> std::result::Result<(bool, usize), RecordError> {
        if self.record_index >= self.record_count {
            self.record_count = self.record_source.fill_batch(&mut self.record_buf)?;
            self.record_index = 0;
            self.record_exhausted = self.record_count < RECORDS_PER_CYCLE;
        }
        let dispatched_before = self.record_index;
        while self.record_index < self.record_count {
            let start = self.record_index * INPUT_RECORD_LEN;
            let end = start + INPUT_RECORD_LEN;
            let bytes: &[u8; INPUT_RECORD_LEN] = self.record_buf[start..end]
                .try_into()
                .expect("slice is exactly INPUT_RECORD_LEN bytes");
            input_record::dispatch(self.pty_fd, RawRecord::new(bytes), self.standalone)?;
            self.record_index += 1;
        }
        Ok((self.record_exhausted, self.record_index - dispatched_before))
    }
}

impl<P: RawPipe> Drop for BridgeSession<P> {
    fn drop(&mut self) {
        let _ = close(self.pty_fd);
    }
}

/// Runs the event loop until the slave exits (returns `Ok(())`, a normal
/// shutdown) or a fatal condition is hit (returns `Err`, mapped to exit code
/// 2 by the caller).
pub fn run<P: RawPipe>(session: &mut BridgeSession<P>) -> Result<()> {
    if session.standalone {
        if let Err(err) = console::disable_processed_input() {
            warn!(error = %err, "failed to disable ENABLE_PROCESSED_INPUT on stdin");
        }
    }
    info!("event loop started");
    loop {
        if !session.process_active() || !session.slave_process_running() {
            info!("slave process exited, shutting down");
            return Ok(());
        }

        let mut activity = false;

        if let (Some(cin), Some(cout)) = (session.cin.as_ref(), session.cout.as_ref()) {
            let had_command = command::process_commands(session.pty_fd, Some(cin), cout)?;
            activity |= had_command;
        }

        let (output_exhausted, output_activity) = match pump::drain_output(
            session.pty_fd,
            &session.output_sink,
            &mut session.output_buffer,
        ) {
            Ok(result) => {
                session.output_errors = 0;
                result
            }
            Err(err) => {
                session.output_errors += 1;
                warn!(error = %err, consecutive = session.output_errors, "output drain failed");
                if session.output_errors > IO_ERRCOUNT_IGNORE {
                    return Err(SupervisorError::Output(session.output_errors, err));
                }
                thread::sleep(BACKOFF);
                continue;
            }
        };
        activity |= output_activity;

        let (records_exhausted, records_dispatched) = match session.fill_and_dispatch_records() {
            Ok(result) => {
                session.record_errors = 0;
                result
            }
            Err(err) => {
                session.record_errors += 1;
                warn!(error = %err, consecutive = session.record_errors, "record dispatch failed");
                if session.record_errors > IO_ERRCOUNT_IGNORE {
                    return Err(SupervisorError::Record(session.record_errors, err));
                }
                thread::sleep(BACKOFF);
                continue;
            }
        };
        activity |= records_dispatched > 0;

        if session.input_source.is_none() || !output_exhausted || !records_exhausted {
            session.tick_heartbeat(activity);
            continue;
        }

        let input_source = session.input_source.as_ref().unwrap();
        match pump::inject_input(session.pty_fd, input_source, &mut session.input_buffer) {
            Ok(input_activity) => {
                session.input_errors = 0;
                activity |= input_activity;
            }
            Err(err) => {
                session.input_errors += 1;
                warn!(error = %err, consecutive = session.input_errors, "input inject failed");
                if session.input_errors > IO_ERRCOUNT_IGNORE {
                    return Err(SupervisorError::Input(session.input_errors, err));
                }
                thread::sleep(BACKOFF);
                session.tick_heartbeat(activity);
                continue;
            }
        }

        session.tick_heartbeat(activity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipe::test_support::MemPipe;

    fn new_session(slave_pid: Pid) -> BridgeSession<MemPipe> {
        BridgeSession::new(
            -1,
            slave_pid,
            false,
            None,
            None,
            OutputSink::Pipe(MemPipe::new()),
            RecordSource::Disabled,
            None,
        )
    }

    #[test]
    fn dead_pid_is_not_running() {
        // pid 1 always exists but isn't our child, so waitpid returns ECHILD,
        // which the original's polarity treats as "still alive" -- this just
        // confirms the helper doesn't panic on a foreign pid.
        let session = new_session(Pid::from_raw(1));
        let _ = session.slave_process_running();
    }

    fn key_up_record() -> [u8; INPUT_RECORD_LEN] {
        // event_type = KEY_EVENT (1), key_down left at 0 (false) -- dispatch
        // treats this as a silent no-op without touching the PTY fd, so it's
        // safe to dispatch against the placeholder fd these tests use.
        let mut bytes = [0u8; INPUT_RECORD_LEN];
        bytes[0..2].copy_from_slice(&1u16.to_le_bytes());
        bytes
    }

    #[test]
    fn pending_records_are_dispatched_without_a_fresh_fill() {
        // Simulate state left behind by an earlier cycle where one record in
        // the batch had already been consumed and the rest are still
        // pending. The source is `Disabled` (fill_batch always returns 0),
        // so if fill_and_dispatch_records() re-fetched instead of resuming
        // from record_index, this record would be silently lost.
        let mut session = new_session(Pid::this());
        session.record_buf[..INPUT_RECORD_LEN].copy_from_slice(&key_up_record());
        session.record_count = 1;
        session.record_index = 0;
        session.record_exhausted = false;

        let (exhausted, dispatched) = session.fill_and_dispatch_records().unwrap();
        assert_eq!(dispatched, 1);
        assert_eq!(session.record_index, 1);
        // The exhausted flag carried over from the original fill is
        // preserved, not recomputed, while resuming a partial batch.
        assert!(!exhausted);
    }

    #[test]
    fn exhausted_batch_triggers_a_fresh_fill_on_the_next_call() {
        let mut session = new_session(Pid::this());
        let (exhausted, dispatched) = session.fill_and_dispatch_records().unwrap();
        assert!(exhausted);
        assert_eq!(dispatched, 0);
        assert_eq!(session.record_index, 0);
        assert_eq!(session.record_count, 0);
    }

    #[test]
    fn heartbeat_resets_on_activity() {
        let mut session = new_session(Pid::this());
        session.heartbeat = 10;
        session.tick_heartbeat(true);
        assert_eq!(session.heartbeat, 0);
    }

    #[test]
    fn heartbeat_increments_when_idle() {
        let mut session = new_session(Pid::this());
        session.tick_heartbeat(false);
        assert_eq!(session.heartbeat, 1);
    }
}
