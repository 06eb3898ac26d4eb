//! Remote-shell backend
//!
//! A [`ShellTransport`] is the outer connection a command travels through (an SSH
//! session, or plain local processes). It hands out [`AsyncCommand`] objects which are
//! their own event sources. [`RemoteShellRunner`] adapts one of those to the
//! [`CommandRunner`] contract.

use async_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, error};

use crate::backends::local::LocalRunner;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::event::{ErrorSource, EventCallback, EventGate, RunnerEvent};
use crate::runner::{CommandRunner, Phase, ReadMode, RunnerKind};
use crate::sync::lock;

/// A command executing asynchronously through an outer transport
pub trait AsyncCommand: Send + Sync {
    /// Take the command's event stream. Only the first call returns it.
    fn take_events(&self) -> Option<Receiver<RunnerEvent>>;

    /// Forward text to the command's input.
    ///
    /// Fails with [`Error::ShellNotRunning`] once the command's exit has been observed.
    fn write(&self, text: &str) -> Result<()>;

    /// Whether the command is still executing
    fn is_running(&self) -> bool;

    /// Terminate the command
    fn close(&self);
}

/// An outer connection able to execute commands on behalf of an inner target
pub trait ShellTransport: Send + Sync {
    /// Human-readable description, used in logs and errors
    fn describe(&self) -> String;

    /// Start `command_text` and return the live command object, reading its output
    /// with `read_mode`
    fn begin_command(
        &self,
        command_text: &str,
        run_in_shell: bool,
        read_mode: ReadMode,
    ) -> Result<Box<dyn AsyncCommand>>;
}

/// [`AsyncCommand`] backed by a local process
pub struct ProcessCommand {
    runner: LocalRunner,
    events: Mutex<Option<Receiver<RunnerEvent>>>,
    exited: Arc<AtomicBool>,
}

impl ProcessCommand {
    /// Spawn `command` and start collecting its events
    pub fn spawn(command: Command, read_mode: ReadMode) -> Result<Self> {
        let (tx, rx) = async_channel::unbounded();
        let exited = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&exited);
        let callback: EventCallback = Arc::new(move |event| {
            if matches!(event, RunnerEvent::Closed { .. }) {
                flag.store(true, Ordering::SeqCst);
            }
            let _ = tx.send_blocking(event);
        });

        let runner = LocalRunner::new(command, read_mode, callback);
        runner.start()?;

        Ok(Self {
            runner,
            events: Mutex::new(Some(rx)),
            exited,
        })
    }
}

impl AsyncCommand for ProcessCommand {
    fn take_events(&self) -> Option<Receiver<RunnerEvent>> {
        lock(&self.events).take()
    }

    fn write(&self, text: &str) -> Result<()> {
        if self.exited.load(Ordering::SeqCst) || !self.runner.is_running() {
            return Err(Error::ShellNotRunning);
        }
        self.runner.write(text);
        Ok(())
    }

    fn is_running(&self) -> bool {
        !self.exited.load(Ordering::SeqCst) && self.runner.is_running()
    }

    fn close(&self) {
        self.runner.dispose();
    }
}

/// Shell transport that runs commands as local processes
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalShellTransport;

impl ShellTransport for LocalShellTransport {
    fn describe(&self) -> String {
        "local shell".to_string()
    }

    fn begin_command(
        &self,
        command_text: &str,
        run_in_shell: bool,
        read_mode: ReadMode,
    ) -> Result<Box<dyn AsyncCommand>> {
        let command = Command::from_text(command_text, run_in_shell)
            .ok_or_else(|| Error::invalid_argument("command_text", "command is empty"))?;
        Ok(Box::new(ProcessCommand::spawn(command, read_mode)?))
    }
}

/// A command runner over an [`AsyncCommand`] obtained from a [`ShellTransport`]
pub struct RemoteShellRunner {
    transport: Arc<dyn ShellTransport>,
    command_text: String,
    run_in_shell: bool,
    read_mode: ReadMode,
    shared: Arc<Shared>,
}

struct Shared {
    events: EventGate,
    cancel: AtomicBool,
    state: Mutex<State>,
}

struct State {
    phase: Phase,
    command: Option<Arc<dyn AsyncCommand>>,
}

impl RemoteShellRunner {
    /// Create a runner; the command is not begun until [`CommandRunner::start`]
    pub fn new(
        transport: Arc<dyn ShellTransport>,
        command_text: impl Into<String>,
        run_in_shell: bool,
        read_mode: ReadMode,
        callback: EventCallback,
    ) -> Self {
        Self {
            transport,
            command_text: command_text.into(),
            run_in_shell,
            read_mode,
            shared: Arc::new(Shared {
                events: EventGate::new(callback),
                cancel: AtomicBool::new(false),
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    command: None,
                }),
            }),
        }
    }

    fn current(&self) -> Option<Arc<dyn AsyncCommand>> {
        let state = lock(&self.shared.state);
        match state.phase {
            Phase::Running => state.command.clone(),
            _ => None,
        }
    }
}

impl CommandRunner for RemoteShellRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::RemoteShell
    }

    fn start(&self) -> Result<()> {
        let mut state = lock(&self.shared.state);
        if state.phase != Phase::Idle {
            return Err(Error::invalid_state(format!(
                "cannot start `{}`: runner is {}",
                self.command_text,
                state.phase.describe()
            )));
        }

        let command: Arc<dyn AsyncCommand> = Arc::from(
            self.transport
                .begin_command(&self.command_text, self.run_in_shell, self.read_mode)?,
        );
        let events = command.take_events().ok_or_else(|| {
            Error::invalid_state("remote command event stream was already taken")
        })?;
        debug!(transport = %self.transport.describe(), command = %self.command_text, "started remote runner");

        state.phase = Phase::Running;
        state.command = Some(Arc::clone(&command));
        drop(state);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("remote-shell".to_string())
            .spawn(move || forward(shared, events));
        if let Err(e) = spawned {
            self.shared.shutdown();
            return Err(Error::spawn_failed(format!(
                "could not start event pump for `{}`: {}",
                self.command_text, e
            )));
        }
        Ok(())
    }

    fn write(&self, text: &str) {
        if let Some(command) = self.current() {
            if let Err(e) = command.write(text) {
                debug!(command = %self.command_text, error = %e, "write to remote command dropped");
            }
        }
    }

    fn dispose(&self) {
        self.shared.shutdown();
    }

    fn is_running(&self) -> bool {
        lock(&self.shared.state).phase == Phase::Running
    }
}

impl Drop for RemoteShellRunner {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl Shared {
    fn shutdown(&self) {
        let command = {
            let mut state = lock(&self.state);
            if state.phase == Phase::Disposed {
                return;
            }
            state.phase = Phase::Disposed;
            state.command.take()
        };

        self.cancel.store(true, Ordering::SeqCst);
        self.events.seal();
        if let Some(command) = command {
            command.close();
        }
    }

    fn mark_exited(&self) {
        let mut state = lock(&self.state);
        if state.phase == Phase::Running {
            state.phase = Phase::Exited;
        }
    }
}

/// Relay the command's events in order until it closes
fn forward(shared: Arc<Shared>, events: Receiver<RunnerEvent>) {
    while let Ok(event) = events.recv_blocking() {
        if shared.cancel.load(Ordering::SeqCst) {
            return;
        }
        match event {
            RunnerEvent::Closed { exit_code } => {
                shared.mark_exited();
                shared.events.emit_closed(exit_code);
                return;
            }
            RunnerEvent::Error {
                source: ErrorSource::Fault,
                detail,
            } => {
                shared.events.emit(RunnerEvent::Error {
                    source: ErrorSource::Fault,
                    detail,
                });
                shared.shutdown();
                return;
            }
            other => shared.events.emit(other),
        }
    }

    if !shared.cancel.load(Ordering::SeqCst) {
        error!("remote command stream ended without an exit status");
        shared.events.emit(RunnerEvent::Error {
            source: ErrorSource::Fault,
            detail: "remote command ended without an exit status".to_string(),
        });
        shared.shutdown();
    }
}
