//! Uniform command channels to local, remote and containerised targets
//!
//! This crate runs commands and debuggers on a local machine, inside a container or on
//! a remote host reached through an outer connection, and presents all of them as the
//! same event-driven runner or blocking call.

#![warn(missing_docs)]

pub mod backends;
pub mod command;
pub mod connection;
pub mod error;
pub mod event;
pub mod resolver;
pub mod runner;
pub mod sync_exec;
pub mod target;
pub mod transport;

mod stdin;
mod sync;

pub use backends::{ContainerConfig, LocalRunner, LocalShellTransport, RemoteShellRunner, ShellTransport, SshConfig, SshTransport};
pub use command::Command;
pub use connection::{AsyncCommandHandle, Connection, ProcessInfo};
pub use error::{Error, Result};
pub use event::{EventCallback, ErrorSource, RunnerEvent, channel_callback};
pub use resolver::{ErrorReporter, LogErrorReporter, NoOpWaitReporter, TargetResolver, WaitReporter, run_with_wait};
pub use runner::{CommandRunner, ReadMode, RunnerKind};
pub use sync_exec::{ExecOutput, SyncExecutor, TIMEOUT_EXIT_CODE};
pub use target::Target;
#[cfg(unix)]
pub use transport::FifoTransport;
pub use transport::{PipeTransport, TerminalConfig, Transport, TransportCallback, TransportEvent, TransportStreams};
