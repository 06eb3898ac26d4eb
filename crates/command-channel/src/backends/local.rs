//! Local process backend
//!
//! A [`LocalRunner`] owns one OS process with piped standard streams. Stdout is pumped
//! by a supervising thread which, after end-of-stream, joins the stderr pump, reaps the
//! child and raises `Closed`. Writes to stdin happen on the caller's thread.

use async_process::{Child, ChildStdout, Stdio};
use futures_lite::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::{ErrorSource, EventCallback, EventGate, RunnerEvent};
use crate::runner::{CommandRunner, Phase, ReadMode, RunnerKind};
use crate::stdin::StdinHandle;
use crate::sync::lock;

/// A command runner backed by a local OS process
pub struct LocalRunner {
    command: Command,
    read_mode: ReadMode,
    shared: Arc<Shared>,
}

struct Shared {
    label: String,
    events: EventGate,
    cancel: AtomicBool,
    state: Mutex<State>,
    stdin: Mutex<StdinHandle>,
}

struct State {
    phase: Phase,
    pid: Option<u32>,
}

impl LocalRunner {
    /// Create a runner for `command`; nothing is spawned until [`CommandRunner::start`]
    pub fn new(command: Command, read_mode: ReadMode, callback: EventCallback) -> Self {
        let label = command.get_program().to_string_lossy().into_owned();
        Self {
            command,
            read_mode,
            shared: Arc::new(Shared {
                label,
                events: EventGate::new(callback),
                cancel: AtomicBool::new(false),
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    pid: None,
                }),
                stdin: Mutex::new(StdinHandle::new(None)),
            }),
        }
    }

    /// Line-buffered runner
    pub fn lines(command: Command, callback: EventCallback) -> Self {
        Self::new(command, ReadMode::Lines, callback)
    }

    /// Raw-buffered runner with the default chunk size
    pub fn raw(command: Command, callback: EventCallback) -> Self {
        Self::new(command, ReadMode::raw(), callback)
    }

    /// The command this runner executes
    pub fn command(&self) -> &Command {
        &self.command
    }

    fn spawn_pumps(&self, mut child: Child) -> io::Result<()> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("stdout was not captured"))?;

        let stderr_pump = match child.stderr.take() {
            Some(stderr) => {
                let shared = Arc::clone(&self.shared);
                Some(
                    thread::Builder::new()
                        .name(format!("{}-stderr", self.shared.label))
                        .spawn(move || {
                            let result = read_lines(&shared, stderr, |line| RunnerEvent::Error {
                                source: ErrorSource::Stderr,
                                detail: line,
                            });
                            if let Err(e) = result {
                                shared.fault("stderr", e);
                            }
                        })?,
                )
            }
            None => None,
        };

        let shared = Arc::clone(&self.shared);
        let read_mode = self.read_mode;
        thread::Builder::new()
            .name(format!("{}-stdout", self.shared.label))
            .spawn(move || supervise(shared, child, stdout, stderr_pump, read_mode))?;

        Ok(())
    }
}

impl CommandRunner for LocalRunner {
    fn kind(&self) -> RunnerKind {
        self.read_mode.local_kind()
    }

    fn start(&self) -> Result<()> {
        let mut state = lock(&self.shared.state);
        if state.phase != Phase::Idle {
            return Err(Error::invalid_state(format!(
                "cannot start `{}`: runner is {}",
                self.command,
                state.phase.describe()
            )));
        }

        let mut cmd = self.command.prepare();
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(format!("`{}`: {}", self.command, e)))?;
        let pid = child.id();
        debug!(pid, command = %self.command, "started local runner");

        *lock(&self.shared.stdin) = StdinHandle::new(child.stdin.take());
        state.phase = Phase::Running;
        state.pid = Some(pid);
        drop(state);

        if let Err(e) = self.spawn_pumps(child) {
            self.shared.shutdown();
            return Err(Error::spawn_failed(format!(
                "could not start output pumps for `{}`: {}",
                self.command, e
            )));
        }
        Ok(())
    }

    fn write(&self, text: &str) {
        if !self.is_running() {
            return;
        }
        if let Err(e) = lock(&self.shared.stdin).write(text) {
            // The process closing its input is a normal way for it to finish.
            debug!(runner = %self.shared.label, error = %e, "write to stdin failed");
        }
    }

    fn dispose(&self) {
        self.shared.shutdown();
    }

    fn is_running(&self) -> bool {
        lock(&self.shared.state).phase == Phase::Running
    }

    fn pid(&self) -> Option<u32> {
        lock(&self.shared.state).pid
    }
}

impl Drop for LocalRunner {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl Shared {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Tear the runner down: silence events and kill the process group
    fn shutdown(&self) {
        let pid = {
            let mut state = lock(&self.state);
            let pid = match state.phase {
                Phase::Disposed => return,
                Phase::Running => state.pid,
                Phase::Idle | Phase::Exited => None,
            };
            state.phase = Phase::Disposed;
            pid
        };

        self.cancel.store(true, Ordering::SeqCst);
        self.events.seal();

        if let Some(pid) = pid {
            debug!(pid, runner = %self.label, "killing local runner");
            kill_process_group(pid);
        }
        lock(&self.stdin).close();
    }

    /// Report an unexpected read failure and tear the runner down
    fn fault(&self, stream: &str, err: io::Error) {
        if self.is_cancelled() {
            debug!(runner = %self.label, stream, error = %err, "read ended after cancellation");
            return;
        }
        error!(runner = %self.label, stream, error = %err, "runner read loop failed");
        self.events.emit(RunnerEvent::Error {
            source: ErrorSource::Fault,
            detail: format!("{stream}: {err}"),
        });
        self.shutdown();
    }

    fn mark_exited(&self) -> bool {
        let mut state = lock(&self.state);
        if state.phase == Phase::Running {
            state.phase = Phase::Exited;
            true
        } else {
            false
        }
    }
}

fn supervise(
    shared: Arc<Shared>,
    mut child: Child,
    stdout: ChildStdout,
    stderr_pump: Option<JoinHandle<()>>,
    read_mode: ReadMode,
) {
    let result = match read_mode {
        ReadMode::Lines => read_lines(&shared, stdout, RunnerEvent::Output),
        ReadMode::Chunks(size) => read_chunks(&shared, stdout, size),
    };
    if let Err(e) = result {
        shared.fault("stdout", e);
    }

    if let Some(pump) = stderr_pump {
        let _ = pump.join();
    }

    match futures_lite::future::block_on(child.status()) {
        Ok(status) => {
            let exit_code = exit_code(status);
            if shared.mark_exited() {
                debug!(runner = %shared.label, exit_code, "local runner exited");
                shared.events.emit_closed(exit_code);
            }
        }
        Err(e) => shared.fault("wait", e),
    }
}

/// Blocking line reads until end-of-stream, checking for cancellation between reads
fn read_lines<R, F>(shared: &Shared, stream: R, to_event: F) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: Fn(String) -> RunnerEvent,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    futures_lite::future::block_on(async {
        while !shared.is_cancelled() {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            shared.events.emit(to_event(line_text(&buf)));
        }
        Ok(())
    })
}

/// Fixed-size buffered reads until end-of-stream, forwarding chunks verbatim
fn read_chunks<R>(shared: &Shared, mut stream: R, size: usize) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; size.max(1)];
    futures_lite::future::block_on(async {
        while !shared.is_cancelled() {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            shared.events.emit(RunnerEvent::Chunk(buf[..n].to_vec()));
        }
        Ok(())
    })
}

/// Decode one line, dropping its `\n` or `\r\n` terminator
pub(crate) fn line_text(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Map a process exit status to an exit code; signal deaths become `128 + signal`
pub(crate) fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    if signal::killpg(pid, Signal::SIGKILL).is_err() {
        // Already reaped, or the group was never created.
        let _ = signal::kill(pid, Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_text_strips_terminators() {
        assert_eq!(line_text(b"hello\n"), "hello");
        assert_eq!(line_text(b"hello\r\n"), "hello");
        assert_eq!(line_text(b"no newline"), "no newline");
        assert_eq!(line_text(b"\n"), "");
        assert_eq!(line_text(b"keep\rinner\n"), "keep\rinner");
    }

    #[test]
    #[cfg(unix)]
    fn test_exit_code_from_signal() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(exit_code(std::process::ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(3 << 8)), 3);
        // Raw wait status 9 means "killed by SIGKILL".
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(9)), 137);
    }

    #[test]
    fn test_runner_kind_follows_read_mode() {
        let noop: EventCallback = Arc::new(|_| {});
        let lines = LocalRunner::lines(Command::new("true"), noop.clone());
        let raw = LocalRunner::raw(Command::new("true"), noop);
        assert_eq!(lines.kind(), RunnerKind::LocalLines);
        assert_eq!(raw.kind(), RunnerKind::LocalRaw);
        assert!(!lines.is_running());
        assert_eq!(lines.pid(), None);
    }
}
