//! Error types for command channels

use std::time::Duration;
use thiserror::Error;

/// Unified error type for command execution and transports
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to spawn a process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// An operation was attempted in a state that does not allow it
    #[error("invalid state: {reason}")]
    InvalidState {
        /// What was attempted and why it was rejected
        reason: String,
    },

    /// A caller-supplied argument was rejected before anything was started
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        /// The argument name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Input was written to a remote shell that has already exited
    #[error("shell not running")]
    ShellNotRunning,

    /// The connection (or runner) has already been closed
    #[error("{object} has been closed")]
    Disposed {
        /// The kind of object that was closed
        object: &'static str,
    },

    /// A command exited with a non-zero code
    #[error("command `{command}` failed with exit code {exit_code}: {output}")]
    CommandFailed {
        /// The command text
        command: String,
        /// The exit code reported by the command
        exit_code: i32,
        /// Output captured before the command exited
        output: String,
    },

    /// A command did not complete within its bound
    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout {
        /// The command text
        command: String,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// A synchronous command is already outstanding on this connection
    #[error("a synchronous command is already running: {command}")]
    CommandInProgress {
        /// The command that currently owns the slot
        command: String,
    },

    /// A stream or pipe fault in a running command
    #[error("transport fault: {detail}")]
    Transport {
        /// The underlying fault
        detail: String,
    },

    /// The PID side-channel handshake failed
    #[error("transport initialization failed while {stage}: {reason}")]
    HandshakeFailed {
        /// Which handshake step failed
        stage: &'static str,
        /// The reason for the failure
        reason: String,
    },

    /// The operation is not available on this transport
    #[error("operation not supported: {operation}")]
    Unsupported {
        /// The rejected operation
        operation: &'static str,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Nix error (Unix signal handling and FIFOs)
    #[cfg(unix)]
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, exit_code: i32, output: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            output: output.into(),
        }
    }

    /// Create a transport fault error
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport {
            detail: detail.into(),
        }
    }

    /// Create a handshake failure
    pub fn handshake_failed(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            stage,
            reason: reason.into(),
        }
    }

    /// Returns true for timeouts, which callers may choose to retry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Add layer context to a spawn failure
    pub fn with_layer_context(self, layer: impl Into<String>) -> Self {
        match self {
            Error::SpawnFailed { reason } => Error::SpawnFailed {
                reason: format!("in {} layer: {}", layer.into(), reason),
            },
            other => other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_message() {
        let err = Error::command_failed("ls /nope", 2, "No such file");
        assert_eq!(
            err.to_string(),
            "command `ls /nope` failed with exit code 2: No such file"
        );
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_layer_context() {
        let err = Error::spawn_failed("docker not found").with_layer_context("Docker");
        assert_eq!(
            err.to_string(),
            "failed to spawn process: in Docker layer: docker not found"
        );

        let untouched = Error::ShellNotRunning.with_layer_context("SSH");
        assert!(matches!(untouched, Error::ShellNotRunning));
    }

    #[test]
    fn test_timeout_is_distinguished() {
        let err = Error::Timeout {
            command: "sleep 10".into(),
            timeout: Duration::from_millis(100),
        };
        assert!(err.is_timeout());
    }
}
