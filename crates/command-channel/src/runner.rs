//! The command runner contract shared by every backend

use crate::error::Result;

/// Default size of one raw read for chunk-oriented runners
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// One in-flight external process or remote shell.
///
/// Runners report through the [`EventCallback`](crate::event::EventCallback) they were
/// built with: output lines or chunks (never both), error details, and a single
/// `Closed` once all output has been delivered.
pub trait CommandRunner: Send + Sync {
    /// Which backend this runner uses
    fn kind(&self) -> RunnerKind;

    /// Begin execution. Only valid once; any later call is an invalid-state error.
    fn start(&self) -> Result<()>;

    /// Send text to the command's input. Ignored unless the runner is running.
    fn write(&self, text: &str);

    /// Send a line of text to the command's input
    fn write_line(&self, text: &str) {
        self.write(&format!("{text}\n"));
    }

    /// Stop the command and silence the runner. Idempotent; no event fires after it returns.
    fn dispose(&self);

    /// Whether the command has been started and has neither exited nor been disposed
    fn is_running(&self) -> bool;

    /// OS process ID of the local process backing this runner, if any
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Backend of a [`CommandRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    /// Local process, output delivered line by line
    LocalLines,
    /// Local process, output delivered as raw chunks
    LocalRaw,
    /// Command executing through an outer connection's shell
    RemoteShell,
}

/// How a runner reads its output stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// Blocking line reads, one `Output` event per line
    #[default]
    Lines,
    /// Fixed-size buffered reads, one `Chunk` event per read
    Chunks(usize),
}

impl ReadMode {
    /// Raw reads with the default chunk size
    pub fn raw() -> Self {
        ReadMode::Chunks(DEFAULT_CHUNK_SIZE)
    }

    /// The runner kind a local process with this read mode reports
    pub fn local_kind(&self) -> RunnerKind {
        match self {
            ReadMode::Lines => RunnerKind::LocalLines,
            ReadMode::Chunks(_) => RunnerKind::LocalRaw,
        }
    }
}

/// Lifecycle of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Running,
    Exited,
    Disposed,
}

impl Phase {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Phase::Idle => "not started",
            Phase::Running => "already running",
            Phase::Exited => "already exited",
            Phase::Disposed => "disposed",
        }
    }
}
