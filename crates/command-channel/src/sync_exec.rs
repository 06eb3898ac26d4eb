//! Blocking execution on top of the asynchronous runner events
//!
//! [`SyncExecutor`] turns one runner's event stream into a single call that returns
//! the exit code and the accumulated output, or the timeout sentinel. Only one such
//! call may be outstanding per executor.

use async_channel::{Receiver, Sender};
use async_io::Timer;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::{ErrorSource, EventCallback, RunnerEvent};
use crate::runner::CommandRunner;
use crate::sync::lock;

/// Exit code reported for a command that did not finish in time.
///
/// Unix exit statuses are 0-255 and signal deaths map to `128 + signal`, so no real
/// command can report this value.
pub const TIMEOUT_EXIT_CODE: i32 = 1460;

/// Result of a synchronous command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code, or [`TIMEOUT_EXIT_CODE`]
    pub exit_code: i32,
    /// Output with trailing `\r` and `\n` characters removed
    pub output: String,
}

impl ExecOutput {
    /// Returns true if the command exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns true if the command hit its timeout
    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

enum Completion {
    Exited(i32),
    Faulted(String),
    Cancelled,
}

/// State of the one outstanding blocking command
struct PendingSyncCommand {
    output: Mutex<Vec<u8>>,
    done_tx: Sender<Completion>,
    done_rx: Receiver<Completion>,
}

impl PendingSyncCommand {
    fn new() -> Self {
        let (done_tx, done_rx) = async_channel::bounded(1);
        Self {
            output: Mutex::new(Vec::new()),
            done_tx,
            done_rx,
        }
    }

    fn complete(&self, completion: Completion) {
        // Only the first completion counts.
        let _ = self.done_tx.try_send(completion);
    }

    fn callback(self: &Arc<Self>) -> EventCallback {
        let pending = Arc::clone(self);
        Arc::new(move |event| match event {
            RunnerEvent::Output(line) => {
                let mut output = lock(&pending.output);
                output.extend_from_slice(line.as_bytes());
                output.push(b'\n');
            }
            RunnerEvent::Chunk(bytes) => lock(&pending.output).extend_from_slice(&bytes),
            RunnerEvent::Error {
                source: ErrorSource::Stderr,
                detail,
            } => debug!(stderr = %detail, "synchronous command wrote to stderr"),
            RunnerEvent::Error {
                source: ErrorSource::Fault,
                detail,
            } => pending.complete(Completion::Faulted(detail)),
            RunnerEvent::Closed { exit_code } => pending.complete(Completion::Exited(exit_code)),
        })
    }

    /// Block until completion or until `timeout` elapses
    fn wait(&self, timeout: Option<Duration>) -> Option<Completion> {
        futures_lite::future::block_on(futures_lite::future::or(
            async { self.done_rx.recv().await.ok() },
            async {
                match timeout {
                    Some(timeout) => Timer::after(timeout).await,
                    None => Timer::never().await,
                };
                None
            },
        ))
    }

    fn take_output(&self) -> String {
        let bytes = std::mem::take(&mut *lock(&self.output));
        trim_trailing_newlines(&String::from_utf8_lossy(&bytes)).to_string()
    }
}

struct ActiveCommand {
    command: String,
    pending: Arc<PendingSyncCommand>,
    runner: Option<Arc<dyn CommandRunner>>,
}

/// Runs one command at a time to completion
#[derive(Default)]
pub struct SyncExecutor {
    current: Mutex<Option<ActiveCommand>>,
}

impl SyncExecutor {
    /// Create an idle executor
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a command is currently outstanding
    pub fn is_busy(&self) -> bool {
        lock(&self.current).is_some()
    }

    /// Run `command` to completion.
    ///
    /// `spawn` must create and start a runner reporting to the callback it is given. A
    /// `None` timeout waits forever. On timeout the runner is disposed and the result
    /// carries [`TIMEOUT_EXIT_CODE`] with whatever output arrived in time.
    pub fn execute<F>(&self, command: &str, timeout: Option<Duration>, spawn: F) -> Result<ExecOutput>
    where
        F: FnOnce(EventCallback) -> Result<Arc<dyn CommandRunner>>,
    {
        let pending = Arc::new(PendingSyncCommand::new());
        {
            let mut current = lock(&self.current);
            if let Some(active) = current.as_ref() {
                return Err(Error::CommandInProgress {
                    command: active.command.clone(),
                });
            }
            *current = Some(ActiveCommand {
                command: command.to_string(),
                pending: Arc::clone(&pending),
                runner: None,
            });
        }

        let runner = match spawn(pending.callback()) {
            Ok(runner) => runner,
            Err(e) => {
                self.clear(&pending);
                return Err(e);
            }
        };
        if let Some(active) = lock(&self.current).as_mut() {
            if Arc::ptr_eq(&active.pending, &pending) {
                active.runner = Some(Arc::clone(&runner));
            }
        }

        let completion = pending.wait(timeout);
        self.clear(&pending);

        match completion {
            Some(Completion::Exited(exit_code)) => Ok(ExecOutput {
                exit_code,
                output: pending.take_output(),
            }),
            Some(Completion::Faulted(detail)) => {
                runner.dispose();
                Err(Error::transport(detail))
            }
            Some(Completion::Cancelled) => {
                runner.dispose();
                Err(Error::Disposed {
                    object: "connection",
                })
            }
            None => {
                warn!(command, ?timeout, "synchronous command timed out");
                runner.dispose();
                Ok(ExecOutput {
                    exit_code: TIMEOUT_EXIT_CODE,
                    output: pending.take_output(),
                })
            }
        }
    }

    /// Abort the outstanding command, if any; its caller gets a closed-connection error
    pub fn cancel(&self) {
        let active = lock(&self.current).take();
        if let Some(active) = active {
            active.pending.complete(Completion::Cancelled);
            if let Some(runner) = active.runner {
                runner.dispose();
            }
        }
    }

    /// Free the slot if it still belongs to `pending`
    fn clear(&self, pending: &Arc<PendingSyncCommand>) {
        let mut current = lock(&self.current);
        if current
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(&active.pending, pending))
        {
            current.take();
        }
    }
}

/// Remove trailing `\r` and `\n` characters
pub fn trim_trailing_newlines(text: &str) -> &str {
    text.trim_end_matches(['\r', '\n'])
}
