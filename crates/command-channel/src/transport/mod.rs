//! Transports carry a live debugger protocol stream
//!
//! A [`Transport`] starts a debugger somewhere and hands the caller a byte stream pair
//! wired to the debugger's standard input and output. Whether a transport can also run
//! one-off commands next to the debugger depends on how it reaches it.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::command::Command;
use crate::error::Result;
use crate::sync_exec::ExecOutput;

#[cfg(unix)]
pub mod fifo;
#[cfg(unix)]
pub mod monitor;
pub mod pipe;

#[cfg(unix)]
pub use fifo::FifoTransport;
pub use pipe::PipeTransport;

/// How long to wait for each PID on the side channel
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal program used to host the debugger; the launch script path is appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Terminal executable
    pub program: String,
    /// Arguments placed before the script path
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            program: "x-terminal-emulator".to_string(),
            args: vec!["-e".to_string(), "/bin/sh".to_string()],
        }
    }
}

impl TerminalConfig {
    /// A terminal config running `program` with `args`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The terminal invocation running `script`
    pub fn command(&self, script: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(script);
        cmd
    }
}

/// Lifecycle notifications raised by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The debuggee (or the shell supervising it) is gone. Raised at most once.
    DebuggeeExited {
        /// Exit code, when the transport can observe it
        exit_code: Option<i32>,
    },
}

/// Subscriber for transport events
pub type TransportCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// The byte streams of a running debugger
pub struct TransportStreams {
    /// Reads what the debugger writes to its standard output
    pub reader: Box<dyn Read + Send>,
    /// Writes to the debugger's standard input
    pub writer: Box<dyn Write + Send>,
}

impl std::fmt::Debug for TransportStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStreams").finish_non_exhaustive()
    }
}

/// A way of running a debugger and talking to it
pub trait Transport: Send {
    /// Launch the debugger. Events go to `callback` until [`Transport::close`].
    fn start(&mut self, callback: TransportCallback) -> Result<()>;

    /// Take the debugger's streams. Only the first call after `start` returns them.
    fn take_streams(&mut self) -> Option<TransportStreams>;

    /// Run a one-off command next to the debugger
    fn execute_sync_command(&self, command_text: &str, timeout: Duration) -> Result<ExecOutput>;

    /// Whether [`Transport::execute_sync_command`] is available
    fn can_execute_command(&self) -> bool;

    /// Tear the session down. Idempotent.
    fn close(&mut self);
}
