//! Connections own a target's command runners and build file operations from commands
//!
//! A [`Connection`] is cheap to clone; clones share the same live-runner set. Once
//! closed, a connection refuses to spawn anything and every runner it started has been
//! disposed.

use async_io::Timer;
use futures_lite::future;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backends::docker::exec_command_text;
use crate::backends::{LocalRunner, RemoteShellRunner, ShellTransport, SshTransport};
use crate::command::{shell_escape, Command};
use crate::error::{Error, Result};
use crate::event::{ErrorSource, EventCallback, RunnerEvent};
use crate::runner::{CommandRunner, ReadMode};
use crate::sync::lock;
use crate::sync_exec::{ExecOutput, SyncExecutor, TIMEOUT_EXIT_CODE};
use crate::target::Target;

/// Prefix of the temporary files used to stage copies on an outer target
pub const STAGING_PREFIX: &str = "ChannelStaging_";

/// Timeout used for the helper commands of composite operations
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A reachable execution target and the runners started against it
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    target: Target,
    outer: Option<Connection>,
    shell: Option<Arc<dyn ShellTransport>>,
    command_timeout: Mutex<Duration>,
    runners: Mutex<RunnerSet>,
    sync: SyncExecutor,
}

#[derive(Default)]
struct RunnerSet {
    closed: bool,
    next_id: u64,
    live: HashMap<u64, Weak<dyn CommandRunner>>,
    dependents: Vec<Weak<Inner>>,
}

impl RunnerSet {
    /// Forget runners that were disposed or dropped without raising `Closed`
    fn prune(&mut self) {
        self.live.retain(|_, runner| runner.strong_count() > 0);
    }
}

/// A process listed on a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process ID on the target
    pub pid: u32,
    /// Owning user name
    pub user: String,
    /// Full command line
    pub command_line: String,
}

impl Connection {
    /// Connection to the local machine
    pub fn local() -> Self {
        Self::build(Target::Local, None, None)
    }

    /// Connection to a remote host over the `ssh` client
    pub fn ssh(config: crate::backends::SshConfig) -> Self {
        let shell: Arc<dyn ShellTransport> = Arc::new(SshTransport::new(config.clone()));
        Self::build(Target::Ssh(config), None, Some(shell))
    }

    /// Connection whose commands run through a caller-supplied shell transport
    pub fn with_transport(target: Target, shell: Arc<dyn ShellTransport>) -> Self {
        Self::build(target, None, Some(shell))
    }

    /// Connection to a container, optionally reached through an outer connection.
    ///
    /// Without an outer connection the container lives on the local machine. Closing the
    /// outer connection also closes this one.
    pub fn container(config: crate::backends::ContainerConfig, outer: Option<Connection>) -> Self {
        let connection = Self::build(Target::Container(config), outer.clone(), None);
        if let Some(outer) = outer {
            let mut set = lock(&outer.inner.runners);
            set.dependents.retain(|dependent| dependent.strong_count() > 0);
            set.dependents.push(Arc::downgrade(&connection.inner));
        }
        connection
    }

    /// Connection for any target, using the default transport for it
    pub fn open(target: Target, outer: Option<Connection>) -> Self {
        match target {
            Target::Local => Self::local(),
            Target::Ssh(config) => Self::ssh(config),
            Target::Container(config) => Self::container(config, outer),
        }
    }

    fn build(target: Target, outer: Option<Connection>, shell: Option<Arc<dyn ShellTransport>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                target,
                outer,
                shell,
                command_timeout: Mutex::new(DEFAULT_COMMAND_TIMEOUT),
                runners: Mutex::new(RunnerSet::default()),
                sync: SyncExecutor::new(),
            }),
        }
    }

    /// Use `timeout` for the helper commands of composite operations
    pub fn with_command_timeout(self, timeout: Duration) -> Self {
        *lock(&self.inner.command_timeout) = timeout;
        self
    }

    fn command_timeout(&self) -> Duration {
        *lock(&self.inner.command_timeout)
    }

    /// The target this connection executes on
    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    /// The connection this one is nested behind, if any
    pub fn outer(&self) -> Option<&Connection> {
        self.inner.outer.as_ref()
    }

    /// Human-readable description
    pub fn describe(&self) -> String {
        match &self.inner.outer {
            Some(outer) => format!("{} via {}", self.inner.target.describe(), outer.describe()),
            None => self.inner.target.describe(),
        }
    }

    /// Whether [`Connection::close`] has been called
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.runners).closed
    }

    /// Number of runners started through this connection that have not closed yet
    pub fn live_runner_count(&self) -> usize {
        let mut set = lock(&self.inner.runners);
        set.prune();
        set.live.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Disposed {
                object: "connection",
            });
        }
        Ok(())
    }

    /// Run `command_text` in a shell to completion.
    ///
    /// Returns the exit code and the output with trailing newlines trimmed. A command that
    /// outlives `timeout` is killed and reported with
    /// [`TIMEOUT_EXIT_CODE`](crate::sync_exec::TIMEOUT_EXIT_CODE). Only one such command
    /// may run at a time per connection; a concurrent call fails immediately.
    pub fn execute_command(&self, command_text: &str, timeout: Duration) -> Result<ExecOutput> {
        self.ensure_open()?;
        debug!(connection = %self.describe(), command = command_text, "executing command");
        self.inner.sync.execute(command_text, Some(timeout), |callback| {
            self.spawn_tracked(command_text, true, ReadMode::Lines, callback)
        })
    }

    /// Like [`Connection::execute_command`] but a non-zero exit is an error
    pub fn execute_command_checked(&self, command_text: &str, timeout: Duration) -> Result<String> {
        let result = self.execute_command(command_text, timeout)?;
        if result.timed_out() {
            return Err(Error::Timeout {
                command: command_text.to_string(),
                timeout,
            });
        }
        if !result.success() {
            return Err(Error::command_failed(command_text, result.exit_code, result.output));
        }
        Ok(result.output)
    }

    /// Start an interactive command whose events go to `callback`
    pub fn begin_execute_async_command(
        &self,
        command_text: &str,
        run_in_shell: bool,
        callback: EventCallback,
    ) -> Result<AsyncCommandHandle> {
        self.ensure_open()?;
        let runner = self.spawn_tracked(command_text, run_in_shell, ReadMode::Lines, callback)?;
        Ok(AsyncCommandHandle { runner })
    }

    /// Create `path` (and parents) if absent and return its absolute path on the target.
    ///
    /// A blank path is accepted and yields an empty string without running anything.
    pub fn make_directory(&self, path: &str) -> Result<String> {
        if path.trim().is_empty() {
            return Ok(String::new());
        }

        let timeout = self.command_timeout();
        let quoted = shell_escape(path);
        self.execute_command_checked(&format!("mkdir -p {quoted}"), timeout)?;

        // Each command gets a fresh shell here; the restore only matters for transports that keep shell state.
        let prior = self.execute_command_checked("pwd", timeout);
        let resolved = self.execute_command_checked(&format!("cd {quoted} && pwd"), timeout)?;

        match prior {
            Ok(prior) if !prior.is_empty() => {
                let restore = format!("cd {}", shell_escape(&prior));
                if let Err(e) = self.execute_command_checked(&restore, timeout) {
                    warn!(connection = %self.describe(), error = %e, "could not restore working directory");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(connection = %self.describe(), error = %e, "could not read working directory"),
        }

        Ok(resolved)
    }

    /// Copy a local file or directory to `destination` on the target, without a time limit
    pub fn copy_file(&self, source: &Path, destination: &str) -> Result<()> {
        self.copy_file_with_timeout(source, destination, None)
    }

    /// Copy a local file or directory to `destination` on the target.
    ///
    /// Containers behind an outer connection are staged through a temporary path on the
    /// outer target, which is removed afterwards whether or not the copy succeeded.
    pub fn copy_file_with_timeout(&self, source: &Path, destination: &str, timeout: Option<Duration>) -> Result<()> {
        if !source.exists() {
            return Err(Error::invalid_argument(
                "source",
                format!("{} does not exist", source.display()),
            ));
        }
        self.ensure_open()?;

        match (&self.inner.target, &self.inner.outer) {
            (Target::Local, _) => {
                let mut cp = Command::new("cp");
                cp.arg("-R").arg(source).arg(destination);
                self.run_local(cp, timeout)
            }
            (Target::Ssh(config), _) => self.run_local(config.scp_command(source, destination), timeout),
            (Target::Container(config), None) => {
                let source = source.to_string_lossy();
                self.run_local(config.copy_command(&source, destination), timeout)
            }
            (Target::Container(config), Some(outer)) => {
                let staging = format!("/tmp/{}{}", STAGING_PREFIX, Uuid::new_v4().simple());
                debug!(staging = %staging, outer = %outer.describe(), "staging copy on outer target");

                let result = outer
                    .copy_file_with_timeout(source, &staging, timeout)
                    .and_then(|()| {
                        let docker_cp = config.copy_command(&staging, destination).to_shell_string();
                        outer.run_text(&docker_cp, timeout)
                    });

                let cleanup = format!("rm -rf {}", shell_escape(&staging));
                if let Err(e) = outer.run_text(&cleanup, Some(self.command_timeout())) {
                    warn!(staging = %staging, error = %e, "could not remove staged copy");
                }
                result
            }
        }
    }

    /// List the processes running on the target
    pub fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        let output =
            self.execute_command_checked("ps -A -ww -o pid=,ruser=,args=", self.command_timeout())?;
        Ok(parse_process_list(&output))
    }

    /// Mark the connection closed and dispose every runner it started. Idempotent.
    pub fn close(&self) {
        let (runners, dependents) = {
            let mut set = lock(&self.inner.runners);
            if set.closed {
                return;
            }
            set.closed = true;
            let runners: Vec<_> = set.live.drain().map(|(_, runner)| runner).collect();
            (runners, std::mem::take(&mut set.dependents))
        };
        debug!(connection = %self.describe(), runners = runners.len(), "closing connection");

        for dependent in dependents.iter().filter_map(Weak::upgrade) {
            Connection { inner: dependent }.close();
        }
        self.inner.sync.cancel();
        for runner in runners.iter().filter_map(Weak::upgrade) {
            runner.dispose();
        }
    }

    /// Build an unstarted runner for `command_text` on this target
    fn create_runner(
        &self,
        command_text: &str,
        run_in_shell: bool,
        read_mode: ReadMode,
        callback: EventCallback,
    ) -> Result<Arc<dyn CommandRunner>> {
        if let Some(shell) = &self.inner.shell {
            return Ok(Arc::new(RemoteShellRunner::new(
                Arc::clone(shell),
                command_text,
                run_in_shell,
                read_mode,
                callback,
            )));
        }

        match (&self.inner.target, &self.inner.outer) {
            (Target::Container(config), Some(outer)) => {
                let wrapped = exec_command_text(config, command_text);
                outer.create_runner(&wrapped, true, read_mode, callback)
            }
            (Target::Container(config), None) => Ok(Arc::new(LocalRunner::new(
                config.exec_command(command_text),
                read_mode,
                callback,
            ))),
            _ => {
                let command = Command::from_text(command_text, run_in_shell)
                    .ok_or_else(|| Error::invalid_argument("command_text", "command is empty"))?;
                Ok(Arc::new(LocalRunner::new(command, read_mode, callback)))
            }
        }
    }

    fn spawn_tracked(
        &self,
        command_text: &str,
        run_in_shell: bool,
        read_mode: ReadMode,
        callback: EventCallback,
    ) -> Result<Arc<dyn CommandRunner>> {
        self.track(callback, |callback| {
            self.create_runner(command_text, run_in_shell, read_mode, callback)
        })
    }

    /// Create a runner through `create`, register it and start it.
    ///
    /// Registration and start happen under the runner-set lock so that a concurrent
    /// `close` either sees the runner or prevents it from starting.
    fn track<F>(&self, callback: EventCallback, create: F) -> Result<Arc<dyn CommandRunner>>
    where
        F: FnOnce(EventCallback) -> Result<Arc<dyn CommandRunner>>,
    {
        let mut set = lock(&self.inner.runners);
        if set.closed {
            return Err(Error::Disposed {
                object: "connection",
            });
        }
        set.prune();
        let id = set.next_id;
        set.next_id += 1;

        let owner = Arc::downgrade(&self.inner);
        let tracked: EventCallback = Arc::new(move |event| {
            let closed = matches!(event, RunnerEvent::Closed { .. });
            callback(event);
            if closed {
                if let Some(inner) = owner.upgrade() {
                    lock(&inner.runners).live.remove(&id);
                }
            }
        });

        let runner = create(tracked)?;
        set.live.insert(id, Arc::downgrade(&runner));
        if let Err(e) = runner.start() {
            set.live.remove(&id);
            return Err(e);
        }
        Ok(runner)
    }

    /// Run a locally built command (copy helpers) to completion on a raw runner
    fn run_local(&self, command: Command, timeout: Option<Duration>) -> Result<()> {
        let description = command.to_shell_string();
        self.run_to_completion(&description, timeout, |callback| {
            Ok(Arc::new(LocalRunner::new(command, ReadMode::raw(), callback)))
        })
    }

    /// Run shell text on this target to completion on a raw runner
    fn run_text(&self, command_text: &str, timeout: Option<Duration>) -> Result<()> {
        self.run_to_completion(command_text, timeout, |callback| {
            self.create_runner(command_text, true, ReadMode::raw(), callback)
        })
    }

    /// Wait for a runner's `Closed` event; non-zero exit or timeout is a command failure
    fn run_to_completion<F>(&self, description: &str, timeout: Option<Duration>, create: F) -> Result<()>
    where
        F: FnOnce(EventCallback) -> Result<Arc<dyn CommandRunner>>,
    {
        let (done_tx, done_rx) = async_channel::bounded::<std::result::Result<i32, String>>(1);
        let diagnostics = Arc::new(Mutex::new(Vec::<u8>::new()));

        let captured = Arc::clone(&diagnostics);
        let callback: EventCallback = Arc::new(move |event| match event {
            RunnerEvent::Output(line) => {
                let mut captured = lock(&captured);
                captured.extend_from_slice(line.as_bytes());
                captured.push(b'\n');
            }
            RunnerEvent::Chunk(bytes) => lock(&captured).extend_from_slice(&bytes),
            RunnerEvent::Error {
                source: ErrorSource::Stderr,
                detail,
            } => {
                let mut captured = lock(&captured);
                captured.extend_from_slice(detail.as_bytes());
                captured.push(b'\n');
            }
            RunnerEvent::Error {
                source: ErrorSource::Fault,
                detail,
            } => {
                let _ = done_tx.try_send(Err(detail));
            }
            RunnerEvent::Closed { exit_code } => {
                let _ = done_tx.try_send(Ok(exit_code));
            }
        });

        let runner = self.track(callback, create)?;
        let completion = future::block_on(future::or(
            async { done_rx.recv().await.ok() },
            async {
                match timeout {
                    Some(timeout) => Timer::after(timeout).await,
                    None => Timer::never().await,
                };
                None
            },
        ));

        let captured = || {
            let bytes = lock(&diagnostics);
            crate::sync_exec::trim_trailing_newlines(&String::from_utf8_lossy(&bytes)).to_string()
        };
        match completion {
            Some(Ok(0)) => Ok(()),
            Some(Ok(exit_code)) => Err(Error::command_failed(description, exit_code, captured())),
            Some(Err(detail)) => {
                runner.dispose();
                Err(Error::transport(detail))
            }
            None => {
                runner.dispose();
                Err(Error::command_failed(description, TIMEOUT_EXIT_CODE, captured()))
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.inner.target)
            .field("outer", &self.inner.outer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A live interactive command started through a [`Connection`].
///
/// Dropping the last clone of the handle terminates the command.
#[derive(Clone)]
pub struct AsyncCommandHandle {
    runner: Arc<dyn CommandRunner>,
}

impl AsyncCommandHandle {
    /// Send text to the command's input
    pub fn write(&self, text: &str) {
        self.runner.write(text);
    }

    /// Send a line to the command's input
    pub fn write_line(&self, text: &str) {
        self.runner.write_line(text);
    }

    /// Whether the command is still running
    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Local process ID, when the command runs as a local process
    pub fn pid(&self) -> Option<u32> {
        self.runner.pid()
    }

    /// Terminate the command; no events are delivered afterwards
    pub fn close(&self) {
        self.runner.dispose();
    }
}

/// Parse `ps -o pid=,ruser=,args=` output, skipping rows that do not fit
pub fn parse_process_list(output: &str) -> Vec<ProcessInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let user = fields.next()?.to_string();
            let command_line = fields.collect::<Vec<_>>().join(" ");
            Some(ProcessInfo {
                pid,
                user,
                command_line,
            })
        })
        .collect()
}
