//! Backend implementations for different execution contexts
//!
//! Every backend implements [`CommandRunner`](crate::runner::CommandRunner):
//!
//! - [`LocalRunner`] owns a local OS process and reads its output either line by line or
//!   in raw chunks, selected by [`ReadMode`](crate::runner::ReadMode).
//! - [`RemoteShellRunner`] adapts an [`AsyncCommand`] handed out by an outer
//!   [`ShellTransport`] such as [`SshTransport`].
//!
//! Containers are not a backend of their own: their commands are wrapped in
//! `docker exec` and run through whichever backend reaches the container's host.

pub mod docker;
pub mod local;
pub mod remote;
pub mod ssh;

pub use docker::ContainerConfig;
pub use local::LocalRunner;
pub use remote::{AsyncCommand, LocalShellTransport, ProcessCommand, RemoteShellRunner, ShellTransport};
pub use ssh::{SshConfig, SshTransport};
