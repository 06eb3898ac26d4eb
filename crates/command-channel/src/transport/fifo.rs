//! Terminal-hosted debugger bridged through named pipes
//!
//! The debugger runs inside a terminal so it has a controlling terminal of its own. Its
//! standard streams are redirected to two FIFOs, and a third FIFO carries two PIDs back
//! to us: the shell running the launch script, then the debugger itself. Once both have
//! arrived the shell is monitored and its exit is reported as the debuggee exiting.
//!
//! The FIFOs are named from the debugger's side: we write into `in` and read from `out`.

use async_channel::Receiver;
use async_io::Timer;
use futures_lite::future;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{mkfifo, Pid};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::backends::LocalRunner;
use crate::command::shell_escape;
use crate::error::{Error, Result};
use crate::event::{ErrorSource, EventCallback, RunnerEvent};
use crate::runner::CommandRunner;
use crate::sync_exec::ExecOutput;
use crate::transport::monitor::{self, PidMonitor, POLL_INTERVAL};
use crate::transport::{
    DEFAULT_HANDSHAKE_TIMEOUT, TerminalConfig, Transport, TransportCallback, TransportEvent, TransportStreams,
};

/// Name of the generated launch script
pub const LAUNCH_SCRIPT: &str = "launch.sh";

/// Paths of the FIFOs and launch script inside the session directory
struct SessionPaths {
    stdin: PathBuf,
    stdout: PathBuf,
    pid: PathBuf,
    script: PathBuf,
}

impl SessionPaths {
    fn new(dir: &Path) -> Self {
        Self {
            stdin: dir.join("in"),
            stdout: dir.join("out"),
            pid: dir.join("pid"),
            script: dir.join(LAUNCH_SCRIPT),
        }
    }
}

/// FIFO ends opened before the terminal is launched
struct FifoEnds {
    /// Write end of the debugger's stdin
    writer: File,
    /// Read end of the debugger's stdout
    reader: File,
    /// Read end of the PID side channel
    pid_reader: File,
    /// Counterparts that keep each FIFO open for as long as the session lives
    keep_alive: Vec<File>,
}

/// State of a launched session
struct Session {
    _dir: TempDir,
    terminal: LocalRunner,
    streams: Option<TransportStreams>,
    keep_alive: Vec<File>,
    shell_pid: u32,
    debugger_pid: u32,
    monitor: PidMonitor,
}

impl Session {
    fn close(self) {
        self.monitor.stop();
        kill_if_alive("debugger", self.debugger_pid);
        kill_if_alive("shell", self.shell_pid);
        self.terminal.dispose();
        drop(self.keep_alive);
        debug!(shell_pid = self.shell_pid, debugger_pid = self.debugger_pid, "closed FIFO session");
    }
}

/// Transport that launches a debugger in a terminal and talks to it over FIFOs
pub struct FifoTransport {
    debugger_command: String,
    terminal: TerminalConfig,
    handshake_timeout: Duration,
    session: Option<Session>,
}

impl FifoTransport {
    /// Prepare a transport for `debugger_command`, a shell command line
    pub fn new(debugger_command: impl Into<String>, terminal: TerminalConfig) -> Self {
        Self {
            debugger_command: debugger_command.into(),
            terminal,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            session: None,
        }
    }

    /// Bound the wait for each PID on the side channel
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// PIDs of the launching shell and the debugger, once started
    pub fn pids(&self) -> Option<(u32, u32)> {
        self.session
            .as_ref()
            .map(|session| (session.shell_pid, session.debugger_pid))
    }

    fn launch(&self, callback: TransportCallback) -> Result<Session> {
        let dir = tempfile::Builder::new().prefix("channel-fifo").tempdir()?;
        let paths = SessionPaths::new(dir.path());
        for fifo in [&paths.stdin, &paths.stdout, &paths.pid] {
            mkfifo(fifo, Mode::S_IRUSR | Mode::S_IWUSR)
                .map_err(|e| Error::handshake_failed("creating pipes", format!("{}: {}", fifo.display(), e)))?;
        }

        // Listen on every pipe before anything can connect to the far side.
        let ends = open_ends(&paths)?;
        write_launch_script(&paths, &self.debugger_command)?;

        let pids = spawn_pid_reader(ends.pid_reader)?;
        let (exited_tx, exited_rx) = async_channel::bounded::<i32>(1);
        let terminal_events: EventCallback = Arc::new(move |event| match event {
            RunnerEvent::Output(line) => debug!(line, "terminal output"),
            RunnerEvent::Error {
                source: ErrorSource::Stderr,
                detail,
            } => debug!(detail, "terminal stderr"),
            RunnerEvent::Error { detail, .. } => warn!(detail, "terminal runner fault"),
            RunnerEvent::Closed { exit_code } => {
                debug!(exit_code, "terminal launcher exited");
                let _ = exited_tx.try_send(exit_code);
            }
            RunnerEvent::Chunk(_) => {}
        });
        let terminal = LocalRunner::lines(self.terminal.command(&paths.script), terminal_events);
        terminal.start()?;

        let shell_pid = self.read_pid(&pids, Some(&exited_rx), "waiting for the shell PID")?;
        let debugger_pid = match self.read_pid(&pids, None, "waiting for the debugger PID") {
            Ok(pid) => pid,
            Err(e) => {
                // The shell may have outlived a detached terminal.
                kill_if_alive("shell", shell_pid);
                return Err(e);
            }
        };
        debug!(shell_pid, debugger_pid, "FIFO handshake complete");

        let monitor = PidMonitor::spawn(shell_pid, POLL_INTERVAL, move || {
            callback(TransportEvent::DebuggeeExited { exit_code: None });
        })
        .map_err(|e| Error::handshake_failed("starting the monitor", e.to_string()))?;

        Ok(Session {
            _dir: dir,
            terminal,
            streams: Some(TransportStreams {
                reader: Box::new(ends.reader),
                writer: Box::new(ends.writer),
            }),
            keep_alive: ends.keep_alive,
            shell_pid,
            debugger_pid,
            monitor,
        })
    }

    /// Wait for one PID line, failing on timeout, a closed channel or a failed launcher
    fn read_pid(&self, pids: &Receiver<String>, launcher: Option<&Receiver<i32>>, stage: &'static str) -> Result<u32> {
        enum Outcome {
            Line(Option<String>),
            LauncherFailed(i32),
            TimedOut,
        }

        let timeout = self.handshake_timeout;
        let outcome = future::block_on(future::or(
            future::or(
                async { Outcome::Line(pids.recv().await.ok()) },
                async {
                    if let Some(exited) = launcher {
                        // Terminals that detach exit cleanly before the shell reports in.
                        if let Ok(code) = exited.recv().await {
                            if code != 0 {
                                return Outcome::LauncherFailed(code);
                            }
                        }
                    }
                    future::pending::<Outcome>().await
                },
            ),
            async {
                Timer::after(timeout).await;
                Outcome::TimedOut
            },
        ));

        match outcome {
            Outcome::Line(Some(line)) => line
                .trim()
                .parse()
                .map_err(|_| Error::handshake_failed(stage, format!("malformed PID line {line:?}"))),
            Outcome::Line(None) => Err(Error::handshake_failed(stage, "PID channel closed")),
            Outcome::LauncherFailed(code) => Err(Error::handshake_failed(
                stage,
                format!("terminal exited with code {code}"),
            )),
            Outcome::TimedOut => Err(Error::handshake_failed(stage, format!("no PID within {timeout:?}"))),
        }
    }
}

impl Transport for FifoTransport {
    fn start(&mut self, callback: TransportCallback) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::invalid_state("FIFO transport is already started"));
        }
        self.session = Some(self.launch(callback)?);
        Ok(())
    }

    fn take_streams(&mut self) -> Option<TransportStreams> {
        self.session.as_mut().and_then(|session| session.streams.take())
    }

    fn execute_sync_command(&self, _command_text: &str, _timeout: Duration) -> Result<ExecOutput> {
        Err(Error::Unsupported {
            operation: "synchronous command execution",
        })
    }

    fn can_execute_command(&self) -> bool {
        false
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }
}

impl Drop for FifoTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// SIGKILL `pid` if it still names a process
fn kill_if_alive(what: &str, pid: u32) {
    if !monitor::is_alive(pid) {
        return;
    }
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGKILL) {
        warn!(pid, what, error = %e, "could not terminate process");
    }
}

/// Open one FIFO end without blocking, then make it blocking for normal I/O
fn open_fifo(path: &Path, write: bool) -> Result<File> {
    let file = OpenOptions::new()
        .read(!write)
        .write(write)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)?;
    fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(OFlag::empty()))?;
    Ok(file)
}

fn open_ends(paths: &SessionPaths) -> Result<FifoEnds> {
    // A non-blocking write open needs a reader, so each write end gets its reader first.
    let stdin_keep_alive = open_fifo(&paths.stdin, false)?;
    let writer = open_fifo(&paths.stdin, true)?;

    let reader = open_fifo(&paths.stdout, false)?;
    let stdout_keep_alive = open_fifo(&paths.stdout, true)?;

    let pid_reader = open_fifo(&paths.pid, false)?;
    let pid_keep_alive = open_fifo(&paths.pid, true)?;

    Ok(FifoEnds {
        writer,
        reader,
        pid_reader,
        keep_alive: vec![stdin_keep_alive, stdout_keep_alive, pid_keep_alive],
    })
}

/// The script the terminal runs: report the shell PID, start the debugger on the
/// FIFOs, report its PID and wait for it
fn launch_script(paths: &SessionPaths, debugger_command: &str) -> String {
    let pid = shell_escape(&paths.pid.to_string_lossy());
    format!(
        "#!/bin/sh\necho $$ > {pid}\n{debugger_command} < {stdin} > {stdout} &\nchild=$!\necho $child > {pid}\nwait $child\n",
        stdin = shell_escape(&paths.stdin.to_string_lossy()),
        stdout = shell_escape(&paths.stdout.to_string_lossy()),
    )
}

fn write_launch_script(paths: &SessionPaths, debugger_command: &str) -> Result<()> {
    fs::write(&paths.script, launch_script(paths, debugger_command))?;
    fs::set_permissions(&paths.script, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

/// Forward PID lines to a channel from a dedicated thread
fn spawn_pid_reader(pid_reader: File) -> Result<Receiver<String>> {
    let (tx, rx) = async_channel::unbounded();
    thread::Builder::new()
        .name("fifo-pid".to_string())
        .spawn(move || {
            for line in BufReader::new(pid_reader).lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send_blocking(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}
